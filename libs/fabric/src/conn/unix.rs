use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};

use crate::address::Address;
use crate::conn::{
    clamp_frame_size, read_frame, write_frame, Connection, ConnectionListener, FrameLimits,
    FrameReader, FrameWriter,
};
use crate::error::{Error, Result};

/// Unix domain socket connection with length-prefix framing
pub struct UnixConnection {
    stream: UnixStream,
    limits: FrameLimits,
}

impl UnixConnection {
    /// Connect to a Unix socket with no timeouts
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Self::builder().path(path).connect().await
    }

    /// Create a builder for configuring the connection
    pub fn builder() -> UnixConnectionBuilder {
        UnixConnectionBuilder::new()
    }

    /// Create from an existing UnixStream
    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            stream,
            limits: FrameLimits::default(),
        }
    }

    pub(crate) fn with_max_frame_size(mut self, max: usize) -> Self {
        self.limits.max_frame_size = clamp_frame_size(max);
        self
    }
}

#[async_trait::async_trait]
impl Connection for UnixConnection {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        write_frame(&mut self.stream, bytes, &self.limits).await
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        read_frame(&mut self.stream, &self.limits).await
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    fn peer(&self) -> String {
        "unix".to_string()
    }

    fn into_split(self: Box<Self>) -> (FrameReader, FrameWriter) {
        let this = *self;
        let (read, write) = this.stream.into_split();
        (
            FrameReader::new(Box::new(read), this.limits),
            FrameWriter::new(Box::new(write), this.limits),
        )
    }
}

/// Unix socket listener; the socket file is removed when it is dropped
pub struct UnixConnectionListener {
    listener: UnixListener,
    path: PathBuf,
    max_frame_size: usize,
}

impl UnixConnectionListener {
    /// Bind to a Unix socket path, replacing a stale socket file
    pub async fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        Ok(Self {
            listener,
            path,
            max_frame_size: FrameLimits::default().max_frame_size,
        })
    }

    pub(crate) fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = clamp_frame_size(max);
        self
    }

    /// Get the path this listener is bound to
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixConnectionListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[async_trait::async_trait]
impl ConnectionListener for UnixConnectionListener {
    async fn accept(&self) -> Result<Box<dyn Connection>> {
        let (stream, _) = self.listener.accept().await?;
        let conn = UnixConnection::from_stream(stream).with_max_frame_size(self.max_frame_size);
        Ok(Box::new(conn))
    }

    fn local_address(&self) -> Result<Address> {
        Ok(Address::Unix(self.path.clone()))
    }
}

/// Builder for configuring a Unix socket connection
#[derive(Default)]
pub struct UnixConnectionBuilder {
    path: Option<PathBuf>,
    connect_timeout: Option<Duration>,
    limits: FrameLimits,
}

impl UnixConnectionBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the path to connect to
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.limits.send_timeout = Some(timeout);
        self
    }

    /// Set the receive timeout
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.limits.receive_timeout = Some(timeout);
        self
    }

    /// Set the largest frame accepted in either direction
    pub fn max_frame_size(mut self, max: usize) -> Self {
        self.limits.max_frame_size = clamp_frame_size(max);
        self
    }

    /// Connect with the configured settings
    pub async fn connect(self) -> Result<UnixConnection> {
        let path = self
            .path
            .ok_or_else(|| Error::Address("path not set".to_string()))?;

        let connect_op = UnixStream::connect(path);

        let stream = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect_op)
                .await
                .map_err(|_| Error::Timeout("Connect"))??,
            None => connect_op.await?,
        };

        Ok(UnixConnection {
            stream,
            limits: self.limits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::MAX_FRAME_SIZE_LIMIT;

    #[test]
    fn max_frame_size_is_capped_by_the_length_prefix() {
        let builder = UnixConnectionBuilder::new().max_frame_size(usize::MAX);
        assert_eq!(builder.limits.max_frame_size, MAX_FRAME_SIZE_LIMIT);

        let builder = UnixConnectionBuilder::new().max_frame_size(1024);
        assert_eq!(builder.limits.max_frame_size, 1024);
    }
}

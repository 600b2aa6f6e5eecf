use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::address::Address;
use crate::conn::{
    clamp_frame_size, read_frame, write_frame, Connection, ConnectionListener, FrameLimits,
    FrameReader, FrameWriter,
};
use crate::error::{Error, Result};

/// TCP connection with length-prefix framing
pub struct TcpConnection {
    stream: TcpStream,
    limits: FrameLimits,
}

impl TcpConnection {
    /// Connect to a remote TCP address with no timeouts
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::builder().address(addr).connect().await
    }

    /// Create a builder for configuring the connection
    pub fn builder() -> TcpConnectionBuilder {
        TcpConnectionBuilder::new()
    }

    /// Create from an existing TcpStream
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream,
            limits: FrameLimits::default(),
        }
    }

    pub(crate) fn with_max_frame_size(mut self, max: usize) -> Self {
        self.limits.max_frame_size = clamp_frame_size(max);
        self
    }

    /// Get the remote address of this connection
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.stream.peer_addr().map_err(Into::into)
    }

    /// Get the local address of this connection
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.stream.local_addr().map_err(Into::into)
    }
}

#[async_trait::async_trait]
impl Connection for TcpConnection {
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
        self.stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "tcp:unknown".to_string())
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

/// TCP listener for accepting incoming connections
pub struct TcpConnectionListener {
    listener: TcpListener,
    max_frame_size: usize,
}

impl TcpConnectionListener {
    /// Bind to a local address such as `127.0.0.1:0`
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            max_frame_size: FrameLimits::default().max_frame_size,
        })
    }

    pub(crate) fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = clamp_frame_size(max);
        self
    }

    /// Get the local address this listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Into::into)
    }
}

#[async_trait::async_trait]
impl ConnectionListener for TcpConnectionListener {
    async fn accept(&self) -> Result<Box<dyn Connection>> {
        let (stream, _) = self.listener.accept().await?;
        let conn = TcpConnection::from_stream(stream).with_max_frame_size(self.max_frame_size);
        Ok(Box::new(conn))
    }

    fn local_address(&self) -> Result<Address> {
        Ok(Address::Tcp(self.local_addr()?.to_string()))
    }
}

/// Builder for configuring a TCP connection
#[derive(Default)]
pub struct TcpConnectionBuilder {
    address: Option<String>,
    connect_timeout: Option<Duration>,
    limits: FrameLimits,
}

impl TcpConnectionBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `host:port` to connect to
    pub fn address(mut self, addr: impl Into<String>) -> Self {
        self.address = Some(addr.into());
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
    pub async fn connect(self) -> Result<TcpConnection> {
        let addr = self
            .address
            .ok_or_else(|| Error::Address("address not set".to_string()))?;

        let connect_op = TcpStream::connect(addr.as_str());

        let stream = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect_op)
                .await
                .map_err(|_| Error::Timeout("Connect"))??,
            None => connect_op.await?,
        };

        Ok(TcpConnection {
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
        let builder = TcpConnectionBuilder::new().max_frame_size(usize::MAX);
        assert_eq!(builder.limits.max_frame_size, MAX_FRAME_SIZE_LIMIT);

        let builder = TcpConnectionBuilder::new().max_frame_size(1024);
        assert_eq!(builder.limits.max_frame_size, 1024);
    }
}

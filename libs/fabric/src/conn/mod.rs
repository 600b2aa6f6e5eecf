use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::address::Address;
use crate::error::{Error, Result};

pub mod tcp;
pub mod unix;

pub use self::tcp::{TcpConnection, TcpConnectionBuilder, TcpConnectionListener};
pub use self::unix::{UnixConnection, UnixConnectionBuilder, UnixConnectionListener};

/// Largest frame accepted unless configured otherwise (100MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Largest frame the 4-byte length prefix can describe
pub const MAX_FRAME_SIZE_LIMIT: usize = u32::MAX as usize;

/// Cap a configured frame size at what the length prefix can carry
pub(crate) fn clamp_frame_size(max: usize) -> usize {
    max.min(MAX_FRAME_SIZE_LIMIT)
}

/// A single framed byte connection
///
/// Every frame is sent with a 4-byte big-endian length prefix.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Send one frame
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Receive one frame
    async fn receive(&mut self) -> Result<Vec<u8>>;

    /// Shut the connection down
    async fn close(&mut self) -> Result<()>;

    /// Remote end, for logging
    fn peer(&self) -> String;

    /// Split into independently owned read and write halves
    fn into_split(self: Box<Self>) -> (FrameReader, FrameWriter);
}

/// Accepts incoming connections
#[async_trait::async_trait]
pub trait ConnectionListener: Send + Sync {
    async fn accept(&self) -> Result<Box<dyn Connection>>;

    /// Address clients can reach this listener on
    fn local_address(&self) -> Result<Address>;
}

/// Limits shared by both connection kinds
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameLimits {
    pub max_frame_size: usize,
    pub send_timeout: Option<Duration>,
    pub receive_timeout: Option<Duration>,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            send_timeout: None,
            receive_timeout: None,
        }
    }
}

pub(crate) async fn write_frame<W>(writer: &mut W, bytes: &[u8], limits: &FrameLimits) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if bytes.len() > limits.max_frame_size {
        return Err(Error::InvalidFrame(format!(
            "Message too large: {} bytes",
            bytes.len()
        )));
    }

    let send_op = async {
        // Write length prefix (4 bytes, big-endian)
        writer.write_u32(bytes.len() as u32).await?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok::<(), Error>(())
    };

    match limits.send_timeout {
        Some(timeout) => tokio::time::timeout(timeout, send_op)
            .await
            .map_err(|_| Error::Timeout("Send"))?,
        None => send_op.await,
    }
}

pub(crate) async fn read_frame<R>(reader: &mut R, limits: &FrameLimits) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let receive_op = async {
        let len = reader.read_u32().await.map_err(closed_on_eof)? as usize;

        if len > limits.max_frame_size {
            return Err(Error::InvalidFrame(format!(
                "Message too large: {} bytes",
                len
            )));
        }

        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await.map_err(closed_on_eof)?;
        Ok::<Vec<u8>, Error>(buf)
    };

    match limits.receive_timeout {
        Some(timeout) => tokio::time::timeout(timeout, receive_op)
            .await
            .map_err(|_| Error::Timeout("Receive"))?,
        None => receive_op.await,
    }
}

fn closed_on_eof(err: std::io::Error) -> Error {
    match err.kind() {
        std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset => {
            Error::ConnectionClosed
        }
        _ => err.into(),
    }
}

/// Owned read half of a split connection
pub struct FrameReader {
    inner: Box<dyn AsyncRead + Send + Unpin>,
    limits: FrameLimits,
}

impl FrameReader {
    pub(crate) fn new(inner: Box<dyn AsyncRead + Send + Unpin>, limits: FrameLimits) -> Self {
        Self { inner, limits }
    }

    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        read_frame(&mut self.inner, &self.limits).await
    }
}

/// Owned write half of a split connection
pub struct FrameWriter {
    inner: Box<dyn AsyncWrite + Send + Unpin>,
    limits: FrameLimits,
}

impl FrameWriter {
    pub(crate) fn new(inner: Box<dyn AsyncWrite + Send + Unpin>, limits: FrameLimits) -> Self {
        Self { inner, limits }
    }

    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        write_frame(&mut self.inner, bytes, &self.limits).await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

use std::path::Path;

use crate::address::{Address, DialOptions};
use crate::conn::{Connection, FrameReader, FrameWriter, TcpConnection, UnixConnection};
use crate::error::Result;
use crate::frame::Frame;

/// A connection speaking [`Frame`]s
pub struct FrameChannel {
    conn: Box<dyn Connection>,
}

impl FrameChannel {
    /// Create a channel from an existing connection
    pub fn from_connection(conn: impl Connection + 'static) -> Self {
        Self {
            conn: Box::new(conn),
        }
    }

    pub fn from_boxed(conn: Box<dyn Connection>) -> Self {
        Self { conn }
    }

    /// Dial an address
    pub async fn connect(address: &Address, opts: DialOptions) -> Result<Self> {
        Ok(Self::from_boxed(address.connect(opts).await?))
    }

    /// Open a TCP channel
    pub async fn tcp(addr: &str) -> Result<Self> {
        Ok(Self::from_connection(TcpConnection::connect(addr).await?))
    }

    /// Open a Unix socket channel
    pub async fn unix(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_connection(UnixConnection::connect(path).await?))
    }

    pub fn peer(&self) -> String {
        self.conn.peer()
    }

    /// Send a frame over the channel
    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode()?;
        self.conn.send(&bytes).await
    }

    /// Receive a frame from the channel
    pub async fn receive(&mut self) -> Result<Frame> {
        let bytes = self.conn.receive().await?;
        Frame::decode(&bytes)
    }

    /// Close the channel
    pub async fn close(mut self) -> Result<()> {
        self.conn.close().await
    }

    /// Split into a receiving and a sending half for full-duplex use
    pub fn into_split(self) -> (FrameSource, FrameSink) {
        let (reader, writer) = self.conn.into_split();
        (FrameSource { reader }, FrameSink { writer })
    }
}

/// Receiving half of a split [`FrameChannel`]
pub struct FrameSource {
    reader: FrameReader,
}

impl FrameSource {
    pub async fn receive(&mut self) -> Result<Frame> {
        let bytes = self.reader.receive().await?;
        Frame::decode(&bytes)
    }
}

/// Sending half of a split [`FrameChannel`]
pub struct FrameSink {
    writer: FrameWriter,
}

impl FrameSink {
    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode()?;
        self.writer.send(&bytes).await
    }

    pub async fn close(mut self) -> Result<()> {
        self.writer.close().await
    }
}

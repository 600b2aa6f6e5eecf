//! Talk Fabric - socket transport for talk services
//!
//! Serves and calls talk endpoints over Unix domain sockets and TCP using
//! length-prefixed frames. Call [`register`] once to make the `unix` and
//! `tcp` transport types available to configuration-driven construction.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use talk_core::{Client, Context, Transport};
//! use talk_fabric::SocketTransport;
//!
//! # async fn example() -> talk_core::Result<()> {
//! let transport: Arc<dyn Transport> = Arc::new(SocketTransport::unix("/tmp/talk.sock"));
//! let client = Client::new(transport);
//! let total: u64 = client.call(Context::background(), "CountWords", "one two").await?;
//!
//! // One-off request without a client
//! let total: u64 = talk_fabric::request_unix("/tmp/talk.sock", "CountWords", "one two").await?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod channel;
pub mod conn;
pub mod error;
pub mod frame;
pub mod request;
pub mod socket;

// Re-exports for convenience
pub use address::{Address, DialOptions};
pub use channel::FrameChannel;
pub use error::{Error, Result};
pub use frame::Frame;
pub use request::{request_tcp, request_unix};
pub use socket::{register, SocketConfig, SocketTransport};

//! Talk Core - protocol-agnostic service exposure
//!
//! Describes a service once and lets any transport serve it: methods become
//! [`Endpoint`]s through an [`Extractor`], a [`Server`] hands them to a
//! [`Transport`], and a [`Client`] calls them back by name. Errors carry a
//! canonical [`ErrorCode`] that maps onto HTTP, gRPC and WebSocket.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use talk_core::{service, Client, Context, DefaultExtractor, LocalTransport, Server};
//!
//! struct Greeter;
//!
//! #[service]
//! impl Greeter {
//!     pub async fn get_greeting(&self, _ctx: Context, name: String) -> talk_core::Result<String> {
//!         Ok(format!("hello, {name}"))
//!     }
//! }
//!
//! # async fn example() -> talk_core::Result<()> {
//! let transport = LocalTransport::named("greeter");
//! let mut server = Server::builder(transport.clone())
//!     .extractor(DefaultExtractor::new())
//!     .build();
//! server.register(Arc::new(Greeter))?;
//!
//! let ctx = Context::background();
//! tokio::spawn(async move { server.serve(Context::background()).await });
//!
//! let client = Client::new(transport);
//! let greeting: String = client.call(ctx, "GetGreeting", "world").await?;
//! # Ok(())
//! # }
//! ```

extern crate self as talk_core;

pub mod annotation;
pub mod client;
pub mod codec;
pub mod context;
pub mod descriptor;
pub mod endpoint;
pub mod error;
pub mod extract;
pub mod naming;
pub mod server;
pub mod stream;
pub mod transport;

/// Codec-neutral dynamic payload exchanged between transports and handlers.
pub type Message = serde_json::Value;

// Re-exports for convenience
pub use client::{Client, ClientBuilder};
pub use codec::{default_codec, Codec, JsonCodec};
pub use context::Context;
pub use descriptor::{TypeDescriptor, TypeKind};
pub use endpoint::{
    middleware_fn, stream_handler, unary_handler, Endpoint, EndpointBuilder, Handler, Middleware,
    StreamHandler, StreamMode,
};
pub use error::{is_error, to_error, Error, ErrorCode, Result};
pub use extract::{DefaultExtractor, Extractor, MethodInfo, MethodMapping, Service};
pub use server::{RegisterOptions, Server, ServerBuilder};
pub use stream::{ChanStream, Stream, TypedStream};
pub use talk_core_derive::service;
pub use transport::{LocalTransport, Transport, TransportConfig};

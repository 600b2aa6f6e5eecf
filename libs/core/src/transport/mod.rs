use std::sync::Arc;

use async_trait::async_trait;

use crate::codec::Codec;
use crate::context::Context;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::stream::Stream;
use crate::Message;

pub mod local;
pub mod registry;

pub use self::local::LocalTransport;
pub use self::registry::{
    create_client_transport, create_server_transport, register_transport, ClientCreator,
    ServerCreator, TransportConfig,
};

/// Binds endpoints to one concrete protocol.
///
/// The server side serves a fixed set of endpoints; the client side invokes
/// them by name. One transport value may play either role.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable transport name, e.g. `unix(/run/app.sock)`
    fn name(&self) -> String;

    /// Serve `endpoints` until `ctx` is done, shutdown is requested, or a fatal error occurs
    async fn serve(&self, ctx: Context, endpoints: Vec<Endpoint>) -> Result<()>;

    /// Stop accepting work and drain in-flight calls until `ctx` is done
    async fn shutdown(&self, ctx: Context) -> Result<()>;

    /// Unary client call
    async fn invoke(&self, ctx: Context, endpoint: &str, request: Message) -> Result<Message>;

    /// Streaming client call
    async fn invoke_stream(
        &self,
        ctx: Context,
        endpoint: &str,
        request: Message,
    ) -> Result<Arc<dyn Stream>>;

    /// Release client-side resources
    async fn close(&self) -> Result<()>;

    /// Codec the transport encodes payloads with, if it has one
    fn codec(&self) -> Option<Arc<dyn Codec>> {
        None
    }

    /// Install a codec; transports without payload encoding ignore it
    fn set_codec(&self, _codec: Arc<dyn Codec>) {}
}

/// Install `codec` unless the transport already carries its own.
pub(crate) fn adopt_codec(transport: &dyn Transport, codec: &Arc<dyn Codec>) {
    if transport.codec().is_none() {
        tracing::debug!(
            transport = %transport.name(),
            codec = codec.name(),
            "installing codec on transport"
        );
        transport.set_codec(Arc::clone(codec));
    }
}

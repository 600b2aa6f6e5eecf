//! Client side: named calls over any transport.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{default_codec, Codec};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::stream::Stream;
use crate::transport::{adopt_codec, create_client_transport, Transport, TransportConfig};
use crate::Message;

pub struct Client {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        ClientBuilder::new(transport).build()
    }

    pub fn builder(transport: Arc<dyn Transport>) -> ClientBuilder {
        ClientBuilder::new(transport)
    }

    pub fn from_config(cfg: &TransportConfig) -> Result<Client> {
        Ok(Client::new(create_client_transport(cfg)?))
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// Typed unary call.
    pub async fn call<Req, Resp>(&self, ctx: Context, endpoint: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let request = serde_json::to_value(request)
            .map_err(|e| Error::invalid_argument(format!("encode request: {e}")))?;
        let response = self.call_raw(ctx, endpoint, request).await?;
        serde_json::from_value(response)
            .map_err(|e| Error::invalid_argument(format!("decode response: {e}")))
    }

    pub async fn call_raw(
        &self,
        ctx: Context,
        endpoint: &str,
        request: Message,
    ) -> Result<Message> {
        tracing::debug!(transport = %self.transport.name(), endpoint, "call");
        self.transport.invoke(ctx, endpoint, request).await
    }

    /// Open a streaming call. The initial request may be `()` for pure client streams.
    pub async fn stream<Req>(
        &self,
        ctx: Context,
        endpoint: &str,
        request: &Req,
    ) -> Result<Arc<dyn Stream>>
    where
        Req: Serialize + ?Sized,
    {
        let request = serde_json::to_value(request)
            .map_err(|e| Error::invalid_argument(format!("encode request: {e}")))?;
        tracing::debug!(transport = %self.transport.name(), endpoint, "open stream");
        self.transport.invoke_stream(ctx, endpoint, request).await
    }

    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }
}

pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    codec: Option<Arc<dyn Codec>>,
}

impl ClientBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            codec: None,
        }
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn build(self) -> Client {
        let codec = self.codec.unwrap_or_else(default_codec);
        adopt_codec(self.transport.as_ref(), &codec);
        Client {
            transport: self.transport,
            codec,
        }
    }
}

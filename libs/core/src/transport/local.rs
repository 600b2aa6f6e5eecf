//! In-process transport.
//!
//! Dispatches calls straight to the served endpoints, optionally passing
//! every payload through the installed codec so that encoding problems show
//! up the same way they would on a wire. Named instances are shared process
//! wide, which lets a server and its clients find each other by name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::codec::Codec;
use crate::context::Context;
use crate::endpoint::Endpoint;
use crate::error::{to_error, Error, Result};
use crate::stream::{ChanStream, Stream, DEFAULT_STREAM_BUFFER};
use crate::transport::Transport;
use crate::Message;

static NAMED: Lazy<Mutex<HashMap<String, Arc<LocalTransport>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Settings decoded from a `local` transport config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub name: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
        }
    }
}

pub struct LocalTransport {
    name: String,
    endpoints: RwLock<Option<Arc<HashMap<String, Endpoint>>>>,
    codec: RwLock<Option<Arc<dyn Codec>>>,
    stop: Mutex<CancellationToken>,
    tracker: TaskTracker,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::with_name("anonymous")
    }

    fn with_name(name: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoints: RwLock::new(None),
            codec: RwLock::new(None),
            stop: Mutex::new(CancellationToken::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// The process-wide instance called `name`, created on first use.
    pub fn named(name: &str) -> Arc<LocalTransport> {
        let mut named = NAMED.lock();
        Arc::clone(
            named
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(LocalTransport::with_name(name))),
        )
    }

    pub fn is_serving(&self) -> bool {
        self.endpoints.read().is_some()
    }

    fn endpoint(&self, name: &str) -> Result<Endpoint> {
        let endpoints = self
            .endpoints
            .read()
            .clone()
            .ok_or_else(|| Error::unavailable(format!("{} is not serving", self.name())))?;
        endpoints
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("endpoint not found: {name}")))
    }

    /// Pass a payload through the codec, when one is installed.
    fn round_trip(&self, msg: Message) -> Result<Message> {
        let codec = self.codec.read().clone();
        match codec {
            Some(codec) => {
                let bytes = codec.marshal(&msg)?;
                codec.unmarshal(&bytes)
            }
            None => Ok(msg),
        }
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn name(&self) -> String {
        format!("local({})", self.name)
    }

    async fn serve(&self, ctx: Context, endpoints: Vec<Endpoint>) -> Result<()> {
        let mut table = HashMap::with_capacity(endpoints.len());
        for endpoint in endpoints {
            endpoint.validate()?;
            if table.contains_key(&endpoint.name) {
                return Err(Error::already_exists(format!(
                    "duplicate endpoint name: {}",
                    endpoint.name
                )));
            }
            table.insert(endpoint.name.clone(), endpoint);
        }

        // A shutdown requested before serve is honoured once.
        let stop = {
            let mut stop = self.stop.lock();
            if stop.is_cancelled() {
                *stop = CancellationToken::new();
                tracing::info!(transport = %self.name(), "shutdown already requested; not serving");
                return Ok(());
            }
            stop.clone()
        };
        self.tracker.reopen();

        tracing::info!(transport = %self.name(), endpoints = table.len(), "serving");
        *self.endpoints.write() = Some(Arc::new(table));

        let stopped = tokio::select! {
            _ = ctx.done() => false,
            _ = stop.cancelled() => true,
        };

        *self.endpoints.write() = None;
        if stopped {
            *self.stop.lock() = CancellationToken::new();
        }
        tracing::info!(transport = %self.name(), "stopped serving");
        Ok(())
    }

    async fn shutdown(&self, ctx: Context) -> Result<()> {
        self.stop.lock().cancel();
        self.tracker.close();
        tokio::select! {
            _ = self.tracker.wait() => Ok(()),
            _ = ctx.done() => Err(ctx.done_err()),
        }
    }

    async fn invoke(&self, ctx: Context, endpoint: &str, request: Message) -> Result<Message> {
        let endpoint = self.endpoint(endpoint)?;
        let handler = endpoint.wrapped_handler().ok_or_else(|| {
            Error::failed_precondition(format!(
                "endpoint {} streams ({}); use a streaming call",
                endpoint.name, endpoint.stream_mode
            ))
        })?;

        let request = self.round_trip(request)?;
        let call_ctx = ctx.child();
        let call = self.tracker.track_future(handler(call_ctx.clone(), request));
        let response = tokio::select! {
            result = call => result.map_err(to_error)?,
            _ = ctx.done() => {
                call_ctx.cancel();
                return Err(ctx.done_err());
            }
        };
        self.round_trip(response)
    }

    async fn invoke_stream(
        &self,
        ctx: Context,
        endpoint: &str,
        request: Message,
    ) -> Result<Arc<dyn Stream>> {
        let endpoint = self.endpoint(endpoint)?;
        let handler = endpoint.stream_handler.clone().ok_or_else(|| {
            Error::failed_precondition(format!("endpoint {} does not stream", endpoint.name))
        })?;
        let request = self.round_trip(request)?;

        // The handler's context derives from the client's, so closing or
        // dropping the client stream cancels the handler.
        let client = ChanStream::<Message>::new(&ctx, DEFAULT_STREAM_BUFFER);
        let server = ChanStream::<Message>::new(client.context(), DEFAULT_STREAM_BUFFER);
        if let Some(rx) = client.take_send_chan() {
            server.set_recv_chan(rx);
        }
        if let Some(rx) = server.take_send_chan() {
            client.set_recv_chan(rx);
        }
        let client = Arc::new(client);
        let server = Arc::new(server);
        let handler_ctx = server.context().clone();
        let peer = Arc::clone(&client);
        let name = endpoint.name.clone();

        self.tracker.spawn(async move {
            let server_stream: Arc<dyn Stream> = Arc::clone(&server) as Arc<dyn Stream>;
            if let Err(err) = handler(handler_ctx, request, server_stream).await {
                tracing::debug!(endpoint = %name, error = %err, "stream handler failed");
                peer.fail_recv(err);
            }
            server.close_stream();
        });

        Ok(client)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn codec(&self) -> Option<Arc<dyn Codec>> {
        self.codec.read().clone()
    }

    fn set_codec(&self, codec: Arc<dyn Codec>) {
        *self.codec.write() = Some(codec);
    }
}

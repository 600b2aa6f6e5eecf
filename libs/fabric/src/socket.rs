//! Socket transport: serves and calls endpoints over Unix or TCP sockets.
//!
//! Each call opens its own connection and speaks the [`Frame`] protocol.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use talk_core::stream::DEFAULT_STREAM_BUFFER;
use talk_core::transport::registry::register_transport;
use talk_core::{
    default_codec, ChanStream, Codec, Context, Endpoint, Error, Message, Stream, Transport,
    TransportConfig,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::address::{Address, DialOptions};
use crate::channel::{FrameChannel, FrameSink, FrameSource};
use crate::conn::DEFAULT_MAX_FRAME_SIZE;
use crate::frame::{CallHeader, Frame};
use crate::request;

type EndpointTable = HashMap<String, Endpoint>;

/// Settings decoded from a `unix` or `tcp` transport config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub address: String,
    pub connect_timeout_ms: Option<u64>,
    /// Deadline applied to unary calls that arrive without a shorter one
    pub request_timeout_ms: Option<u64>,
    pub max_frame_size: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            connect_timeout_ms: None,
            request_timeout_ms: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl SocketConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    fn dial_options(&self) -> DialOptions {
        DialOptions {
            connect_timeout: self.connect_timeout_ms.map(Duration::from_millis),
            max_frame_size: Some(self.max_frame_size),
        }
    }
}

pub struct SocketTransport {
    config: SocketConfig,
    address: Address,
    codec: RwLock<Option<Arc<dyn Codec>>>,
    stop: Mutex<CancellationToken>,
    active: Mutex<Option<Context>>,
    tracker: TaskTracker,
    bound: watch::Sender<Option<Address>>,
}

impl SocketTransport {
    /// Build from a config whose address is in any form [`Address`] parses
    pub fn new(config: SocketConfig) -> talk_core::Result<Self> {
        let address: Address = config.address.parse()?;
        Ok(Self::with_address(config, address))
    }

    pub fn with_address(config: SocketConfig, address: Address) -> Self {
        let (bound, _) = watch::channel(None);
        Self {
            config,
            address,
            codec: RwLock::new(None),
            stop: Mutex::new(CancellationToken::new()),
            active: Mutex::new(None),
            tracker: TaskTracker::new(),
            bound,
        }
    }

    /// Transport on a Unix socket path with default settings
    pub fn unix(path: impl Into<std::path::PathBuf>) -> Self {
        let address = Address::unix(path);
        Self::with_address(SocketConfig::new(address.to_string()), address)
    }

    /// Transport on a TCP `host:port` with default settings
    pub fn tcp(addr: &str) -> talk_core::Result<Self> {
        let address = Address::tcp(addr)?;
        Ok(Self::with_address(SocketConfig::new(address.to_string()), address))
    }

    /// Configured address
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Address actually bound while serving; resolves port 0 for TCP
    pub fn local_address(&self) -> Option<Address> {
        self.bound.borrow().clone()
    }

    /// Wait until the transport is accepting connections
    pub async fn wait_bound(&self) -> Option<Address> {
        let mut rx = self.bound.subscribe();
        let bound = match rx.wait_for(|addr| addr.is_some()).await {
            Ok(addr) => addr.clone(),
            Err(_) => None,
        };
        bound
    }

    fn codec_or_default(&self) -> Arc<dyn Codec> {
        self.codec.read().clone().unwrap_or_else(default_codec)
    }

    /// Where clients connect: the bound address when serving in-process
    fn target(&self) -> Address {
        self.local_address().unwrap_or_else(|| self.address.clone())
    }

    fn call_context(&self, ctx: &Context) -> Context {
        match self.config.request_timeout_ms {
            Some(ms) => ctx.with_timeout(Duration::from_millis(ms)),
            None => ctx.clone(),
        }
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn name(&self) -> String {
        format!("socket({})", self.address)
    }

    async fn serve(&self, ctx: Context, endpoints: Vec<Endpoint>) -> talk_core::Result<()> {
        let mut table = EndpointTable::with_capacity(endpoints.len());
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
        let table = Arc::new(table);
        let codec = self.codec_or_default();

        // A shutdown requested before serve is honoured once.
        let stop = {
            let mut stop = self.stop.lock();
            if stop.is_cancelled() {
                *stop = CancellationToken::new();
                info!(address = %self.address, "shutdown already requested; not serving");
                return Ok(());
            }
            stop.clone()
        };

        let listener = self
            .address
            .bind(Some(self.config.max_frame_size))
            .await
            .map_err(|e| {
                warn!(address = %self.address, error = %e, "bind failed");
                Error::from(e)
            })?;
        let local = listener.local_address()?;

        self.tracker.reopen();
        let root = ctx.child();
        *self.active.lock() = Some(root.clone());
        self.bound.send_replace(Some(local.clone()));
        info!(address = %local, endpoints = table.len(), "serving");

        let stopped = loop {
            tokio::select! {
                _ = ctx.done() => break false,
                _ = stop.cancelled() => break true,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => {
                        let peer = conn.peer();
                        let conn_ctx = root.child();
                        let table = Arc::clone(&table);
                        let codec = Arc::clone(&codec);
                        self.tracker.spawn(async move {
                            let channel = FrameChannel::from_boxed(conn);
                            let served = handle_connection(channel, conn_ctx, table, codec).await;
                            if let Err(err) = served {
                                debug!(peer, error = %err, "connection ended with error");
                            }
                        });
                    }
                    Err(err) => {
                        warn!(address = %local, error = %err, "accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        };

        drop(listener);
        if stopped {
            *self.stop.lock() = CancellationToken::new();
        }
        self.bound.send_replace(None);
        info!(address = %local, "stopped accepting");
        Ok(())
    }

    async fn shutdown(&self, ctx: Context) -> talk_core::Result<()> {
        self.stop.lock().cancel();
        self.tracker.close();
        tokio::select! {
            _ = self.tracker.wait() => Ok(()),
            _ = ctx.done() => {
                if let Some(root) = self.active.lock().take() {
                    root.cancel();
                }
                Err(ctx.done_err())
            }
        }
    }

    async fn invoke(
        &self,
        ctx: Context,
        endpoint: &str,
        request: Message,
    ) -> talk_core::Result<Message> {
        let ctx = self.call_context(&ctx);
        let codec = self.codec_or_default();
        request::call(
            &self.target(),
            self.config.dial_options(),
            &ctx,
            endpoint,
            &request,
            codec.as_ref(),
        )
        .await
    }

    async fn invoke_stream(
        &self,
        ctx: Context,
        endpoint: &str,
        request: Message,
    ) -> talk_core::Result<Arc<dyn Stream>> {
        let codec = self.codec_or_default();
        let payload = codec.marshal(&request)?;
        let mut channel = FrameChannel::connect(&self.target(), self.config.dial_options()).await?;
        channel
            .send(&Frame::Open(CallHeader::new(&ctx, endpoint, payload)))
            .await?;
        let (source, sink) = channel.into_split();

        let stream = Arc::new(ChanStream::<Message>::new(&ctx, DEFAULT_STREAM_BUFFER));
        let (Some(inbound), Some(outbound)) = (stream.take_recv_sender(), stream.take_send_chan())
        else {
            return Err(Error::internal("fresh stream without channels"));
        };
        let stream_ctx = stream.context().clone();
        let finished = CancellationToken::new();

        tokio::spawn(client_outbound(
            sink,
            outbound,
            Arc::clone(&codec),
            stream_ctx.clone(),
            finished.clone(),
        ));
        tokio::spawn(client_inbound(
            source,
            inbound,
            codec,
            Arc::downgrade(&stream),
            stream_ctx,
            finished,
        ));
        Ok(stream)
    }

    async fn close(&self) -> talk_core::Result<()> {
        Ok(())
    }

    fn codec(&self) -> Option<Arc<dyn Codec>> {
        self.codec.read().clone()
    }

    fn set_codec(&self, codec: Arc<dyn Codec>) {
        *self.codec.write() = Some(codec);
    }
}

async fn handle_connection(
    mut channel: FrameChannel,
    conn_ctx: Context,
    table: Arc<EndpointTable>,
    codec: Arc<dyn Codec>,
) -> talk_core::Result<()> {
    let first = channel.receive().await?;
    match first {
        Frame::Call(header) => {
            let (source, sink) = channel.into_split();
            serve_unary(header, conn_ctx, source, sink, &table, codec.as_ref()).await
        }
        Frame::Open(header) => {
            let (source, sink) = channel.into_split();
            serve_stream(header, conn_ctx, source, sink, &table, codec).await
        }
        other => {
            let err = Error::invalid_argument(format!("unexpected {} frame", other.kind()));
            channel.send(&Frame::fault(&err)).await?;
            Ok(())
        }
    }
}

fn lookup<'a>(table: &'a EndpointTable, name: &str) -> talk_core::Result<&'a Endpoint> {
    table
        .get(name)
        .ok_or_else(|| Error::not_found(format!("endpoint not found: {name}")))
}

async fn dispatch_unary(
    ctx: &Context,
    header: &CallHeader,
    table: &EndpointTable,
    codec: &dyn Codec,
) -> talk_core::Result<Message> {
    let endpoint = lookup(table, &header.endpoint)?;
    let handler = endpoint.wrapped_handler().ok_or_else(|| {
        Error::failed_precondition(format!(
            "endpoint {} streams ({}); use a streaming call",
            endpoint.name, endpoint.stream_mode
        ))
    })?;
    let request = codec.unmarshal(&header.payload)?;
    handler(ctx.clone(), request).await
}

async fn serve_unary(
    header: CallHeader,
    conn_ctx: Context,
    mut source: FrameSource,
    mut sink: FrameSink,
    table: &EndpointTable,
    codec: &dyn Codec,
) -> talk_core::Result<()> {
    let ctx = header.context(&conn_ctx);
    let outcome = {
        let call = dispatch_unary(&ctx, &header, table, codec);
        tokio::pin!(call);
        loop {
            tokio::select! {
                result = &mut call => break Some(result),
                frame = source.receive() => match frame {
                    Ok(Frame::Cancel) | Err(_) => {
                        // Nobody reads the reply; let the handler observe the cancellation.
                        ctx.cancel();
                        if let Err(err) = (&mut call).await {
                            debug!(
                                endpoint = %header.endpoint,
                                error = %err,
                                "abandoned call ended"
                            );
                        }
                        break None;
                    }
                    Ok(other) => debug!(frame = other.kind(), "ignoring frame during call"),
                },
            }
        }
    };

    let Some(result) = outcome else {
        debug!(endpoint = %header.endpoint, "caller abandoned call");
        return Ok(());
    };
    let frame = match result.and_then(|response| codec.marshal(&response)) {
        Ok(payload) => Frame::Reply { payload },
        Err(err) => {
            debug!(endpoint = %header.endpoint, error = %err, "call failed");
            Frame::fault(&err)
        }
    };
    sink.send(&frame).await?;
    Ok(())
}

async fn serve_stream(
    header: CallHeader,
    conn_ctx: Context,
    source: FrameSource,
    mut sink: FrameSink,
    table: &EndpointTable,
    codec: Arc<dyn Codec>,
) -> talk_core::Result<()> {
    let ctx = header.context(&conn_ctx);
    let prepared = lookup(table, &header.endpoint).and_then(|endpoint| {
        let handler = endpoint.stream_handler.clone().ok_or_else(|| {
            Error::failed_precondition(format!("endpoint {} does not stream", endpoint.name))
        })?;
        let request = codec.unmarshal(&header.payload)?;
        Ok((handler, request))
    });
    let (handler, request) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => {
            sink.send(&Frame::fault(&err)).await?;
            return Ok(());
        }
    };

    let stream = Arc::new(ChanStream::<Message>::new(&ctx, DEFAULT_STREAM_BUFFER));
    let (Some(inbound), Some(outbound)) = (stream.take_recv_sender(), stream.take_send_chan())
    else {
        return Err(Error::internal("fresh stream without channels"));
    };

    let reader = tokio::spawn(server_inbound(source, inbound, Arc::clone(&codec), ctx.clone()));
    let writer = tokio::spawn(server_outbound(sink, outbound, Arc::clone(&codec)));

    let handler_ctx = stream.context().clone();
    let result = handler(handler_ctx, request, Arc::clone(&stream) as Arc<dyn Stream>).await;
    stream.close_stream();
    reader.abort();

    let mut sink = writer
        .await
        .map_err(|e| Error::internal(format!("stream writer: {e}")))??;
    let last = match result {
        Ok(()) => Frame::End,
        Err(err) => {
            debug!(endpoint = %header.endpoint, error = %err, "stream handler failed");
            Frame::fault(&err)
        }
    };
    sink.send(&last).await?;
    Ok(())
}

/// Client frames into the handler's receive side
async fn server_inbound(
    mut source: FrameSource,
    tx: mpsc::Sender<Message>,
    codec: Arc<dyn Codec>,
    call_ctx: Context,
) {
    let mut tx = Some(tx);
    loop {
        match source.receive().await {
            Ok(Frame::Message { payload }) => {
                let Some(sender) = tx.as_ref() else {
                    continue;
                };
                let msg = match codec.unmarshal(&payload) {
                    Ok(msg) => msg,
                    Err(err) => {
                        debug!(error = %err, "dropping undecodable stream message");
                        continue;
                    }
                };
                let gone = tokio::select! {
                    _ = call_ctx.done() => return,
                    sent = sender.send(msg) => sent.is_err(),
                };
                if gone {
                    tx = None;
                }
            }
            Ok(Frame::End) => tx = None,
            Ok(Frame::Cancel) | Err(_) => {
                call_ctx.cancel();
                return;
            }
            Ok(other) => debug!(frame = other.kind(), "ignoring frame on stream"),
        }
    }
}

/// Handler output onto the wire; hands the sink back once the handler stops sending
async fn server_outbound(
    mut sink: FrameSink,
    mut rx: mpsc::Receiver<Message>,
    codec: Arc<dyn Codec>,
) -> talk_core::Result<FrameSink> {
    while let Some(msg) = rx.recv().await {
        let payload = codec.marshal(&msg)?;
        sink.send(&Frame::Message { payload }).await?;
    }
    Ok(sink)
}

async fn client_outbound(
    mut sink: FrameSink,
    rx: mpsc::Receiver<Message>,
    codec: Arc<dyn Codec>,
    stream_ctx: Context,
    finished: CancellationToken,
) {
    let mut rx = Some(rx);
    loop {
        let next = async {
            match rx.as_mut() {
                Some(rx) => rx.recv().await,
                None => std::future::pending().await,
            }
        };
        let msg = tokio::select! {
            biased;
            _ = finished.cancelled() => return,
            _ = stream_ctx.done() => {
                let _ = sink.send(&Frame::Cancel).await;
                return;
            }
            msg = next => msg,
        };
        match msg {
            Some(msg) => {
                let sent = match codec.marshal(&msg) {
                    Ok(payload) => sink
                        .send(&Frame::Message { payload })
                        .await
                        .map_err(Error::from),
                    Err(err) => Err(err),
                };
                if let Err(err) = sent {
                    debug!(error = %err, "stream send failed");
                    return;
                }
            }
            None => {
                rx = None;
                if sink.send(&Frame::End).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn client_inbound(
    mut source: FrameSource,
    tx: mpsc::Sender<Message>,
    codec: Arc<dyn Codec>,
    stream: Weak<ChanStream<Message>>,
    stream_ctx: Context,
    finished: CancellationToken,
) {
    let fail = |err: Error| {
        if let Some(stream) = stream.upgrade() {
            stream.fail_recv(err);
        }
    };
    loop {
        match source.receive().await {
            Ok(Frame::Message { payload }) => match codec.unmarshal(&payload) {
                Ok(msg) => {
                    let delivered = tokio::select! {
                        _ = stream_ctx.done() => false,
                        sent = tx.send(msg) => sent.is_ok(),
                    };
                    if !delivered {
                        break;
                    }
                }
                Err(err) => {
                    fail(err);
                    break;
                }
            },
            Ok(Frame::End) => break,
            Ok(Frame::Fault(wire)) => {
                fail(wire.into());
                break;
            }
            Ok(other) => {
                fail(Error::internal(format!("unexpected {} frame on stream", other.kind())));
                break;
            }
            Err(crate::error::Error::ConnectionClosed) => {
                fail(Error::unavailable("connection closed before end of stream"));
                break;
            }
            Err(err) => {
                fail(err.into());
                break;
            }
        }
    }
    finished.cancel();
}

fn unix_transport(cfg: &TransportConfig) -> talk_core::Result<Arc<dyn Transport>> {
    let config: SocketConfig = cfg.decode()?;
    let path = config
        .address
        .strip_prefix("unix://")
        .unwrap_or(&config.address)
        .to_string();
    if path.is_empty() {
        return Err(Error::invalid_argument("unix transport needs an address"));
    }
    Ok(Arc::new(SocketTransport::with_address(config, Address::unix(path))))
}

fn tcp_transport(cfg: &TransportConfig) -> talk_core::Result<Arc<dyn Transport>> {
    let config: SocketConfig = cfg.decode()?;
    let addr = config.address.strip_prefix("tcp://").unwrap_or(&config.address);
    let address = Address::tcp(addr)?;
    Ok(Arc::new(SocketTransport::with_address(config, address)))
}

/// Make the `unix` (aliases `uds`, `unix-socket`) and `tcp` transport types
/// available to [`TransportConfig`]-driven construction.
pub fn register() {
    register_transport(
        "unix",
        Arc::new(unix_transport),
        Arc::new(unix_transport),
        &["uds", "unix-socket"],
    );
    register_transport("tcp", Arc::new(tcp_transport), Arc::new(tcp_transport), &[]);
}

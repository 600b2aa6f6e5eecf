//! The routable unit every transport dispatches to.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use http::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::descriptor::TypeDescriptor;
use crate::error::{to_error, BoxError, Error, Result};
use crate::naming::kebab_case;
use crate::stream::Stream;
use crate::Message;

/// Unary handler: `(ctx, request) -> response`.
pub type Handler =
    Arc<dyn Fn(Context, Message) -> BoxFuture<'static, Result<Message>> + Send + Sync>;

/// Streaming handler: `(ctx, request, stream) -> ()`.
pub type StreamHandler =
    Arc<dyn Fn(Context, Message, Arc<dyn Stream>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wraps a handler into another handler.
pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Streaming shape of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    #[default]
    None,
    ClientSide,
    ServerSide,
    Bidirectional,
}

impl StreamMode {
    /// Mode from the two directions a call streams in.
    pub fn from_directions(client_streams: bool, server_streams: bool) -> Self {
        match (client_streams, server_streams) {
            (true, true) => StreamMode::Bidirectional,
            (true, false) => StreamMode::ClientSide,
            (false, true) => StreamMode::ServerSide,
            (false, false) => StreamMode::None,
        }
    }

    pub fn client_streams(self) -> bool {
        matches!(self, StreamMode::ClientSide | StreamMode::Bidirectional)
    }

    pub fn server_streams(self) -> bool {
        matches!(self, StreamMode::ServerSide | StreamMode::Bidirectional)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamMode::None => "none",
            StreamMode::ClientSide => "client",
            StreamMode::ServerSide => "server",
            StreamMode::Bidirectional => "bidi",
        }
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" | "server-side" | "sse" => Ok(StreamMode::ServerSide),
            "client" | "client-side" => Ok(StreamMode::ClientSide),
            "bidi" | "bidirectional" | "duplex" => Ok(StreamMode::Bidirectional),
            "none" | "unary" => Ok(StreamMode::None),
            other => Err(Error::invalid_argument(format!("unknown stream mode: {other}"))),
        }
    }
}

/// One callable, routable, optionally streaming unit.
#[derive(Clone)]
pub struct Endpoint {
    pub name: String,
    pub path: String,
    pub method: Method,
    pub handler: Option<Handler>,
    pub stream_handler: Option<StreamHandler>,
    pub stream_mode: StreamMode,
    pub request_type: Option<TypeDescriptor>,
    pub response_type: Option<TypeDescriptor>,
    pub middleware: Vec<Middleware>,
    pub metadata: Option<HashMap<String, Value>>,
}

impl Endpoint {
    pub fn builder(name: impl Into<String>) -> EndpointBuilder {
        EndpointBuilder::new(name)
    }

    pub fn is_streaming(&self) -> bool {
        self.stream_mode != StreamMode::None
    }

    /// The handler with every middleware applied, `middleware[0]` outermost.
    pub fn wrapped_handler(&self) -> Option<Handler> {
        let handler = self.handler.clone()?;
        Some(
            self.middleware
                .iter()
                .rev()
                .fold(handler, |next, mw| mw(next)),
        )
    }

    /// Check that the handler matching the stream mode is present.
    pub fn validate(&self) -> Result<()> {
        match (self.is_streaming(), &self.handler, &self.stream_handler) {
            (true, _, None) => Err(Error::failed_precondition(format!(
                "endpoint {} streams ({}) but has no stream handler",
                self.name, self.stream_mode
            ))),
            (false, None, _) => Err(Error::failed_precondition(format!(
                "endpoint {} has no handler",
                self.name
            ))),
            _ => Ok(()),
        }
    }

    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("stream_mode", &self.stream_mode)
            .field("request_type", &self.request_type)
            .field("response_type", &self.response_type)
            .field("middleware", &self.middleware.len())
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Adapt a typed async function into a [`Handler`].
///
/// The request is decoded from the message (`InvalidArgument` on mismatch),
/// and the function's error goes through [`to_error`].
pub fn unary_handler<Req, Resp, E, F, Fut>(f: F) -> Handler
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    E: Into<BoxError> + Send + 'static,
    F: Fn(Context, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Resp, E>> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |ctx: Context, msg: Message| -> BoxFuture<'static, Result<Message>> {
        let f = Arc::clone(&f);
        Box::pin(async move {
            let req: Req = decode_request(msg)?;
            let resp = f(ctx, req).await.map_err(to_error)?;
            serde_json::to_value(resp).map_err(|e| Error::internal(format!("encode response: {e}")))
        })
    })
}

/// Adapt a typed async function into a [`StreamHandler`].
pub fn stream_handler<Req, E, F, Fut>(f: F) -> StreamHandler
where
    Req: DeserializeOwned + Send + 'static,
    E: Into<BoxError> + Send + 'static,
    F: Fn(Context, Req, Arc<dyn Stream>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(
        move |ctx: Context,
              msg: Message,
              stream: Arc<dyn Stream>|
              -> BoxFuture<'static, Result<()>> {
            let f = Arc::clone(&f);
            Box::pin(async move {
                let req: Req = decode_request(msg)?;
                f(ctx, req, stream).await.map_err(to_error)
            })
        },
    )
}

/// Build a [`Middleware`] from `(ctx, request, next)`.
pub fn middleware_fn<F, Fut>(f: F) -> Middleware
where
    F: Fn(Context, Message, Handler) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Message>> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |next: Handler| -> Handler {
        let f = Arc::clone(&f);
        Arc::new(move |ctx: Context, msg: Message| -> BoxFuture<'static, Result<Message>> {
            Box::pin(f(ctx, msg, Arc::clone(&next)))
        })
    })
}

fn decode_request<Req: DeserializeOwned>(msg: Message) -> Result<Req> {
    serde_json::from_value(msg).map_err(|e| Error::invalid_argument(format!("decode request: {e}")))
}

/// Explicit registration API for endpoints.
///
/// ```
/// use talk_core::{Context, Endpoint, Error};
///
/// let ep = Endpoint::builder("GetUser")
///     .get("/user/{id}")
///     .unary(|_ctx: Context, id: String| async move { Ok::<_, Error>(format!("user {id}")) })
///     .build()
///     .unwrap();
/// assert_eq!(ep.path, "/user/{id}");
/// ```
pub struct EndpointBuilder {
    endpoint: Endpoint,
}

impl EndpointBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let path = format!("/{}", kebab_case(&name));
        Self {
            endpoint: Endpoint {
                name,
                path,
                method: Method::POST,
                handler: None,
                stream_handler: None,
                stream_mode: StreamMode::None,
                request_type: None,
                response_type: None,
                middleware: Vec::new(),
                metadata: None,
            },
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.endpoint.path = path.into();
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.endpoint.method = method;
        self
    }

    pub fn get(self, path: impl Into<String>) -> Self {
        self.method(Method::GET).path(path)
    }

    pub fn post(self, path: impl Into<String>) -> Self {
        self.method(Method::POST).path(path)
    }

    pub fn put(self, path: impl Into<String>) -> Self {
        self.method(Method::PUT).path(path)
    }

    pub fn delete(self, path: impl Into<String>) -> Self {
        self.method(Method::DELETE).path(path)
    }

    pub fn handler(mut self, handler: Handler) -> Self {
        self.endpoint.handler = Some(handler);
        self
    }

    pub fn unary<Req, Resp, E, F, Fut>(self, f: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        E: Into<BoxError> + Send + 'static,
        F: Fn(Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Resp, E>> + Send + 'static,
    {
        self.handler(unary_handler(f))
    }

    pub fn stream_handler(mut self, mode: StreamMode, handler: StreamHandler) -> Self {
        self.endpoint.stream_mode = mode;
        self.endpoint.stream_handler = Some(handler);
        self
    }

    pub fn streaming<Req, E, F, Fut>(self, mode: StreamMode, f: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        E: Into<BoxError> + Send + 'static,
        F: Fn(Context, Req, Arc<dyn Stream>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    {
        self.stream_handler(mode, stream_handler(f))
    }

    pub fn request_type(mut self, ty: TypeDescriptor) -> Self {
        self.endpoint.request_type = Some(ty);
        self
    }

    pub fn response_type(mut self, ty: TypeDescriptor) -> Self {
        self.endpoint.response_type = Some(ty);
        self
    }

    pub fn middleware(mut self, mw: Middleware) -> Self {
        self.endpoint.middleware.push(mw);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.endpoint.set_metadata(key, value);
        self
    }

    pub fn build(self) -> Result<Endpoint> {
        self.endpoint.validate()?;
        Ok(self.endpoint)
    }
}

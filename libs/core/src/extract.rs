//! Endpoint derivation from a service's method set.
//!
//! A service describes its methods through [`Service`]: names, parameter and
//! result [`TypeDescriptor`]s, doc lines carrying `@talk` annotations, and an
//! [`Invoker`] that calls the method. `#[talk_core::service]` writes that
//! description at compile time. [`DefaultExtractor`] then applies the naming
//! heuristics and overrides to produce one [`Endpoint`] per eligible method.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use http::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::annotation::Annotation;
use crate::context::Context;
use crate::descriptor::TypeDescriptor;
use crate::endpoint::{Endpoint, Handler, StreamHandler, StreamMode};
use crate::error::{to_error, BoxError, Error, Result};
use crate::naming::{kebab_case, pascal_case};
use crate::stream::{Stream, DEFAULT_STREAM_BUFFER};
use crate::Message;

/// A value whose methods can be exposed as endpoints.
pub trait Service: Send + Sync + 'static {
    fn service_name(&self) -> &str;

    /// Describe every public method, eligible or not.
    fn methods(self: Arc<Self>) -> Vec<MethodInfo>;
}

/// Calls one service method.
pub type Invoker = Arc<dyn Fn(Context, Args) -> BoxFuture<'static, Result<Output>> + Send + Sync>;

/// Wrap an async closure as an [`Invoker`].
pub fn invoker<F, Fut>(f: F) -> Invoker
where
    F: Fn(Context, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Output>> + Send + 'static,
{
    Arc::new(move |ctx: Context, args: Args| -> BoxFuture<'static, Result<Output>> {
        Box::pin(f(ctx, args))
    })
}

/// Description of one method, the stand-in for reflected method information.
#[derive(Clone)]
pub struct MethodInfo {
    /// Method name as declared, `snake_case` or `PascalCase`.
    pub name: String,
    /// Parameter types after the receiver.
    pub params: Vec<TypeDescriptor>,
    /// Result types; an error result is always last.
    pub results: Vec<TypeDescriptor>,
    /// Doc lines and rendered `#[talk(..)]` attributes.
    pub docs: Vec<String>,
    pub invoker: Option<Invoker>,
}

impl MethodInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            results: Vec::new(),
            docs: Vec::new(),
            invoker: None,
        }
    }

    pub fn param(mut self, ty: TypeDescriptor) -> Self {
        self.params.push(ty);
        self
    }

    pub fn result(mut self, ty: TypeDescriptor) -> Self {
        self.results.push(ty);
        self
    }

    pub fn doc(mut self, line: impl Into<String>) -> Self {
        self.docs.push(line.into());
        self
    }

    pub fn invoke_with(mut self, invoker: Invoker) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Context first, error last.
    pub fn is_eligible(&self) -> bool {
        self.params.first().is_some_and(TypeDescriptor::is_context)
            && self.results.last().is_some_and(TypeDescriptor::is_error)
    }

    /// Parameters after the leading context.
    fn call_params(&self) -> &[TypeDescriptor] {
        self.params.get(1..).unwrap_or_default()
    }
}

/// Decoded arguments for one invocation.
pub struct Args {
    pub request: Message,
    pub inbound: Option<mpsc::Receiver<Message>>,
}

impl Args {
    pub fn new(request: Message) -> Self {
        Self {
            request,
            inbound: None,
        }
    }

    pub fn with_inbound(mut self, inbound: mpsc::Receiver<Message>) -> Self {
        self.inbound = Some(inbound);
        self
    }

    /// Decode the request argument.
    pub fn request<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.request.clone())
            .map_err(|e| Error::invalid_argument(format!("decode request: {e}")))
    }

    /// Typed view of the inbound message channel.
    ///
    /// Messages that do not decode as `T` end the typed channel.
    pub fn inbound<T>(&mut self) -> mpsc::Receiver<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(DEFAULT_STREAM_BUFFER);
        if let Some(mut inbound) = self.inbound.take() {
            tokio::spawn(async move {
                while let Some(msg) = inbound.recv().await {
                    match serde_json::from_value::<T>(msg) {
                        Ok(value) => {
                            if tx.send(value).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "dropping undecodable inbound message");
                            break;
                        }
                    }
                }
            });
        }
        rx
    }
}

/// What a method returned on success.
pub enum Output {
    Value(Message),
    Channel(mpsc::Receiver<Message>),
}

impl Output {
    pub fn value<T: Serialize>(value: T) -> Result<Output> {
        serde_json::to_value(value)
            .map(Output::Value)
            .map_err(|e| Error::internal(format!("encode response: {e}")))
    }

    /// Erase a typed output channel into a message channel.
    pub fn channel<T>(mut rx: mpsc::Receiver<T>) -> Result<Output>
    where
        T: Serialize + Send + 'static,
    {
        let (tx, out) = mpsc::channel(DEFAULT_STREAM_BUFFER);
        tokio::spawn(async move {
            while let Some(value) = rx.recv().await {
                let msg = match serde_json::to_value(value) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping unencodable stream item");
                        continue;
                    }
                };
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
        });
        Ok(Output::Channel(out))
    }
}

/// Convert a method's error through [`to_error`].
pub fn method_error<E: Into<BoxError>>(err: E) -> Error {
    to_error(err)
}

/// Caller-supplied routing for one method. Set fields override derived ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodMapping {
    pub path: Option<String>,
    pub method: Option<Method>,
    pub stream_mode: Option<StreamMode>,
    pub skip: bool,
}

impl MethodMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn stream_mode(mut self, mode: StreamMode) -> Self {
        self.stream_mode = Some(mode);
        self
    }

    pub fn skip() -> Self {
        Self {
            skip: true,
            ..Self::default()
        }
    }
}

/// Turns a service into endpoints.
pub trait Extractor: Send + Sync {
    fn extract(&self, service: Arc<dyn Service>) -> Result<Vec<Endpoint>>;
}

/// Route derived from a method name and signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: Method,
    pub path: String,
    pub stream_mode: StreamMode,
}

const VERBS: [&str; 6] = ["Get", "List", "Create", "Update", "Delete", "Watch"];

/// Split a PascalCase name into a recognised verb and the lower-cased resource.
pub fn split_verb(name: &str) -> Option<(&'static str, String)> {
    VERBS.iter().find_map(|&verb| {
        let rest = name.strip_prefix(verb)?;
        rest.chars()
            .next()
            .filter(|c| c.is_uppercase())
            .map(|_| (verb, rest.to_lowercase()))
    })
}

/// Apply the naming heuristics to a method.
pub fn derive_route(info: &MethodInfo) -> Route {
    let name = pascal_case(&info.name);
    let params = info.call_params();

    let client_streams = params.iter().any(TypeDescriptor::is_channel);
    let server_streams = info
        .results
        .iter()
        .filter(|r| !r.is_error())
        .any(TypeDescriptor::is_channel);
    let stream_mode = StreamMode::from_directions(client_streams, server_streams);

    let (method, path) = match split_verb(&name) {
        Some(("Get", resource)) => {
            if params.len() == 1 && params[0].is_simple() {
                (Method::GET, format!("/{resource}/{{id}}"))
            } else {
                (Method::GET, format!("/{resource}"))
            }
        }
        Some(("List", resource)) => (Method::GET, format!("/{resource}")),
        Some(("Create", resource)) => (Method::POST, format!("/{resource}")),
        Some(("Update", resource)) => (Method::PUT, format!("/{resource}/{{id}}")),
        Some(("Delete", resource)) => (Method::DELETE, format!("/{resource}/{{id}}")),
        Some(("Watch", resource)) => (Method::GET, format!("/{resource}/watch")),
        _ => (Method::POST, format!("/{}", kebab_case(&name))),
    };

    Route {
        method,
        path,
        stream_mode,
    }
}

/// The standard extractor: naming heuristics, then annotations, then explicit mappings.
#[derive(Debug, Clone, Default)]
pub struct DefaultExtractor {
    mappings: HashMap<String, MethodMapping>,
}

impl DefaultExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit routing for a method, keyed by its PascalCase or declared name.
    pub fn with_mapping(mut self, name: impl Into<String>, mapping: MethodMapping) -> Self {
        self.mappings.insert(pascal_case(&name.into()), mapping);
        self
    }

    fn endpoint_for(&self, service: &str, info: MethodInfo) -> Option<Endpoint> {
        let name = pascal_case(&info.name);

        if !info.is_eligible() {
            tracing::debug!(
                service,
                method = %name,
                "skipping method without (Context, ..) -> Result shape"
            );
            return None;
        }
        let Some(invoke) = info.invoker.clone() else {
            tracing::debug!(service, method = %name, "skipping method that cannot be invoked");
            return None;
        };

        let annotation = Annotation::parse_lines(&info.docs).unwrap_or_default();
        let mapping = self.mappings.get(&name);
        if annotation.skip || mapping.is_some_and(|m| m.skip) {
            tracing::debug!(service, method = %name, "method excluded by annotation");
            return None;
        }

        let mut route = derive_route(&info);
        if let Some(path) = annotation.path.filter(|p| !p.is_empty()) {
            route.path = path;
        }
        if let Some(method) = annotation.method.as_deref() {
            match Method::from_bytes(method.as_bytes()) {
                Ok(method) => route.method = method,
                Err(_) => {
                    tracing::warn!(
                        service,
                        method = %name,
                        value = method,
                        "ignoring invalid @talk method"
                    )
                }
            }
        }
        if let Some(mode) = annotation.stream {
            route.stream_mode = mode;
        }
        if let Some(mapping) = mapping {
            if let Some(path) = mapping.path.clone().filter(|p| !p.is_empty()) {
                route.path = path;
            }
            if let Some(method) = mapping.method.clone() {
                route.method = method;
            }
            if let Some(mode) = mapping.stream_mode {
                route.stream_mode = mode;
            }
        }

        let request_type = info.call_params().first().cloned();
        let response_type = info
            .results
            .iter()
            .find(|r| !r.is_error())
            .map(|r| r.unwrap_channel().clone());

        let (handler, stream_handler) = if route.stream_mode == StreamMode::None {
            (Some(unary_from(invoke)), None)
        } else {
            (None, Some(streaming_from(invoke, route.stream_mode)))
        };

        let mut metadata: Option<HashMap<String, serde_json::Value>> = None;
        for (key, value) in annotation.tags {
            metadata
                .get_or_insert_with(HashMap::new)
                .insert(key, serde_json::Value::String(value));
        }

        Some(Endpoint {
            name,
            path: route.path,
            method: route.method,
            handler,
            stream_handler,
            stream_mode: route.stream_mode,
            request_type,
            response_type,
            middleware: Vec::new(),
            metadata,
        })
    }
}

impl Extractor for DefaultExtractor {
    fn extract(&self, service: Arc<dyn Service>) -> Result<Vec<Endpoint>> {
        let service_name = service.service_name().to_string();
        let endpoints: Vec<Endpoint> = Arc::clone(&service)
            .methods()
            .into_iter()
            .filter_map(|info| self.endpoint_for(&service_name, info))
            .collect();
        tracing::debug!(service = %service_name, count = endpoints.len(), "extracted endpoints");
        Ok(endpoints)
    }
}

fn unary_from(invoke: Invoker) -> Handler {
    Arc::new(move |ctx: Context, req: Message| -> BoxFuture<'static, Result<Message>> {
        let invoke = Arc::clone(&invoke);
        Box::pin(async move {
            match invoke(ctx, Args::new(req)).await? {
                Output::Value(msg) => Ok(msg),
                Output::Channel(mut rx) => {
                    let mut items = Vec::new();
                    while let Some(msg) = rx.recv().await {
                        items.push(msg);
                    }
                    Ok(Message::Array(items))
                }
            }
        })
    })
}

fn streaming_from(invoke: Invoker, mode: StreamMode) -> StreamHandler {
    Arc::new(
        move |ctx: Context,
              req: Message,
              stream: Arc<dyn Stream>|
              -> BoxFuture<'static, Result<()>> {
            let invoke = Arc::clone(&invoke);
            Box::pin(async move {
                let mut args = Args::new(req);
                if mode.client_streams() {
                    args = args.with_inbound(pump_inbound(ctx.clone(), Arc::clone(&stream)));
                }
                match invoke(ctx.clone(), args).await? {
                    Output::Value(msg) => stream.send(msg).await,
                    Output::Channel(rx) => forward(ctx, rx, stream.as_ref()).await,
                }
            })
        },
    )
}

/// Forward every item of `rx` to the stream until it ends or `ctx` is done.
async fn forward(ctx: Context, mut rx: mpsc::Receiver<Message>, stream: &dyn Stream) -> Result<()> {
    loop {
        tokio::select! {
            _ = ctx.done() => return Err(ctx.done_err()),
            item = rx.recv() => match item {
                Some(msg) => stream.send(msg).await?,
                None => return Ok(()),
            },
        }
    }
}

/// Feed messages received on the stream into a channel for the method.
fn pump_inbound(ctx: Context, stream: Arc<dyn Stream>) -> mpsc::Receiver<Message> {
    let (tx, rx) = mpsc::channel(DEFAULT_STREAM_BUFFER);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = ctx.done() => break,
                received = stream.recv() => match received {
                    Ok(Some(msg)) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(error = %e, "inbound stream ended with error");
                        break;
                    }
                },
            }
        }
    });
    rx
}

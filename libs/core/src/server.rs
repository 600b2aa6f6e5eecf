//! Server orchestration: services in, endpoints out, transport serves them.

use std::sync::Arc;

use crate::codec::{default_codec, Codec};
use crate::context::Context;
use crate::endpoint::{Endpoint, Middleware};
use crate::error::{Error, Result};
use crate::extract::{Extractor, Service};
use crate::transport::{adopt_codec, create_server_transport, Transport, TransportConfig};

/// Per-registration adjustments.
#[derive(Clone, Default)]
pub struct RegisterOptions {
    /// Prepended to every extracted path; overrides the server default.
    pub prefix: Option<String>,
    /// Wrapped around each extracted endpoint's existing chain, outermost first.
    pub middleware: Vec<Middleware>,
}

impl RegisterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn middleware(mut self, mw: Middleware) -> Self {
        self.middleware.push(mw);
        self
    }
}

pub struct Server {
    transport: Arc<dyn Transport>,
    extractor: Option<Arc<dyn Extractor>>,
    codec: Arc<dyn Codec>,
    prefix: Option<String>,
    endpoints: Vec<Endpoint>,
}

impl Server {
    pub fn builder(transport: Arc<dyn Transport>) -> ServerBuilder {
        ServerBuilder::new(transport)
    }

    /// Server with the JSON codec and no extractor.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        ServerBuilder::new(transport).build()
    }

    /// Build the transport named by `cfg` through the registry.
    pub fn from_config(cfg: &TransportConfig) -> Result<ServerBuilder> {
        Ok(ServerBuilder::new(create_server_transport(cfg)?))
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// Extract and register every eligible method of `service`.
    pub fn register(&mut self, service: Arc<dyn Service>) -> Result<usize> {
        self.register_with(service, RegisterOptions::default())
    }

    pub fn register_with(
        &mut self,
        service: Arc<dyn Service>,
        opts: RegisterOptions,
    ) -> Result<usize> {
        let extractor = self
            .extractor
            .as_ref()
            .ok_or_else(|| Error::failed_precondition("no extractor configured"))?;

        let service_name = service.service_name().to_string();
        let extracted = extractor.extract(service)?;
        let prefix = opts.prefix.as_deref().or(self.prefix.as_deref());

        let count = extracted.len();
        for mut endpoint in extracted {
            if let Some(prefix) = prefix {
                endpoint.path = join_path(prefix, &endpoint.path);
            }
            if !opts.middleware.is_empty() {
                let mut chain = opts.middleware.clone();
                chain.append(&mut endpoint.middleware);
                endpoint.middleware = chain;
            }
            self.endpoints.push(endpoint);
        }

        tracing::info!(service = %service_name, endpoints = count, "registered service");
        Ok(count)
    }

    /// Register a hand-built endpoint.
    pub fn add_endpoint(&mut self, endpoint: Endpoint) -> Result<()> {
        endpoint.validate()?;
        tracing::debug!(endpoint = %endpoint.name, path = %endpoint.path, "added endpoint");
        self.endpoints.push(endpoint);
        Ok(())
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Serve the registered endpoints until `ctx` is done or the transport stops.
    pub async fn serve(&self, ctx: Context) -> Result<()> {
        adopt_codec(self.transport.as_ref(), &self.codec);
        tracing::info!(
            transport = %self.transport.name(),
            endpoints = self.endpoints.len(),
            "server starting"
        );
        let result = self.transport.serve(ctx, self.endpoints.clone()).await;
        if let Err(e) = &result {
            tracing::error!(
                transport = %self.transport.name(),
                error = %e,
                "server stopped with error"
            );
        }
        result
    }

    pub async fn shutdown(&self, ctx: Context) -> Result<()> {
        tracing::info!(transport = %self.transport.name(), "server shutting down");
        self.transport.shutdown(ctx).await
    }
}

pub struct ServerBuilder {
    transport: Arc<dyn Transport>,
    extractor: Option<Arc<dyn Extractor>>,
    codec: Option<Arc<dyn Codec>>,
    prefix: Option<String>,
}

impl ServerBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            extractor: None,
            codec: None,
            prefix: None,
        }
    }

    pub fn extractor(mut self, extractor: impl Extractor + 'static) -> Self {
        self.extractor = Some(Arc::new(extractor));
        self
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Default path prefix for registered services.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn build(self) -> Server {
        Server {
            transport: self.transport,
            extractor: self.extractor,
            codec: self.codec.unwrap_or_else(default_codec),
            prefix: self.prefix,
            endpoints: Vec::new(),
        }
    }
}

fn join_path(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return path.to_string();
    }
    let prefix = if prefix.starts_with('/') {
        prefix.to_string()
    } else {
        format!("/{prefix}")
    };
    if path.starts_with('/') {
        format!("{prefix}{path}")
    } else {
        format!("{prefix}/{path}")
    }
}

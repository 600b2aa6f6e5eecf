//! Transport construction from configuration.
//!
//! Transports register a server and a client creator under a name (plus
//! aliases). A [`TransportConfig`] names the transport and carries its
//! settings undecoded; the creator decodes them into its own type.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::transport::local::{LocalConfig, LocalTransport};
use crate::transport::Transport;

pub type ServerCreator = Arc<dyn Fn(&TransportConfig) -> Result<Arc<dyn Transport>> + Send + Sync>;
pub type ClientCreator = Arc<dyn Fn(&TransportConfig) -> Result<Arc<dyn Transport>> + Send + Sync>;

/// Transport selection plus its not-yet-decoded settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: Value,
}

impl TransportConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            config: Value::Null,
        }
    }

    pub fn with_config<T: Serialize>(mut self, config: &T) -> Result<Self> {
        self.config = serde_json::to_value(config)?;
        Ok(self)
    }

    /// Decode the settings; a missing section decodes as `T::default()`.
    pub fn decode<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        if self.config.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.config.clone()).map_err(|e| {
            Error::invalid_argument(format!("invalid {} transport config: {e}", self.kind))
        })
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s)
            .map_err(|e| Error::invalid_argument(format!("transport config: {e}")))
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yaml::from_str(s)
            .map_err(|e| Error::invalid_argument(format!("transport config: {e}")))
    }

    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml_str(&text),
            _ => Self::from_json_str(&text),
        }
    }
}

struct Creators {
    server: ServerCreator,
    client: ClientCreator,
}

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<Creators>>>> = Lazy::new(|| {
    let mut map = HashMap::new();
    let local = Arc::new(Creators {
        server: Arc::new(local_transport),
        client: Arc::new(local_transport),
    });
    for name in ["local", "inproc", "memory"] {
        map.insert(name.to_string(), Arc::clone(&local));
    }
    RwLock::new(map)
});

fn local_transport(cfg: &TransportConfig) -> Result<Arc<dyn Transport>> {
    let settings: LocalConfig = cfg.decode()?;
    Ok(LocalTransport::named(&settings.name))
}

/// Register creators under `name` and every alias. Later registrations replace earlier ones.
pub fn register_transport(
    name: &str,
    server: ServerCreator,
    client: ClientCreator,
    aliases: &[&str],
) {
    let creators = Arc::new(Creators { server, client });
    let mut registry = REGISTRY.write();
    for key in std::iter::once(name).chain(aliases.iter().copied()) {
        registry.insert(key.to_ascii_lowercase(), Arc::clone(&creators));
    }
    tracing::debug!(name, ?aliases, "registered transport");
}

fn lookup(kind: &str) -> Result<Arc<Creators>> {
    REGISTRY
        .read()
        .get(&kind.to_ascii_lowercase())
        .cloned()
        .ok_or_else(|| Error::invalid_argument(format!("unknown transport type: {kind}")))
}

pub fn create_server_transport(cfg: &TransportConfig) -> Result<Arc<dyn Transport>> {
    let creators = lookup(&cfg.kind)?;
    (creators.server)(cfg)
}

pub fn create_client_transport(cfg: &TransportConfig) -> Result<Arc<dyn Transport>> {
    let creators = lookup(&cfg.kind)?;
    (creators.client)(cfg)
}

/// Names currently registered, aliases included.
pub fn registered_transports() -> Vec<String> {
    let mut names: Vec<String> = REGISTRY.read().keys().cloned().collect();
    names.sort();
    names
}

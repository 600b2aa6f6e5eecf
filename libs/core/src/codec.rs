use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::Message;

/// Codec trait for turning messages into wire payloads and back
pub trait Codec: Send + Sync {
    /// Short identifier, e.g. `json`
    fn name(&self) -> &'static str;

    /// MIME type transports advertise for payloads
    fn content_type(&self) -> &'static str;

    /// Encode a message into bytes
    fn marshal(&self, msg: &Message) -> Result<Vec<u8>>;

    /// Decode bytes into a message
    fn unmarshal(&self, bytes: &[u8]) -> Result<Message>;
}

impl dyn Codec {
    /// Encode any serializable value
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let msg = serde_json::to_value(value)?;
        self.marshal(&msg)
    }

    /// Decode bytes into a typed value
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let msg = self.unmarshal(bytes)?;
        serde_json::from_value(msg).map_err(Error::from)
    }
}

/// JSON codec, the default for servers and clients
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn marshal(&self, msg: &Message) -> Result<Vec<u8>> {
        serde_json::to_vec(msg).map_err(|e| Error::internal(format!("json encode: {e}")))
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<Message> {
        if bytes.is_empty() {
            return Ok(Message::Null);
        }
        serde_json::from_slice(bytes)
            .map_err(|e| Error::invalid_argument(format!("json decode: {e}")))
    }
}

pub fn default_codec() -> Arc<dyn Codec> {
    Arc::new(JsonCodec)
}

//! Wire envelope for socket RPC.
//!
//! Every call uses its own connection. A unary call is `Call` answered by
//! `Reply` or `Fault`. A streaming call opens with `Open`; both sides then
//! exchange `Message` frames, each direction finishes with `End`, and the
//! server may finish with `Fault` instead. `Cancel` from the client abandons
//! the call. Payloads are encoded with the transport's codec; the envelope
//! itself is bincode.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use talk_core::{Context, ErrorCode};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Call(CallHeader),
    Open(CallHeader),
    Reply { payload: Vec<u8> },
    Message { payload: Vec<u8> },
    Fault(WireError),
    End,
    Cancel,
}

/// Opening frame of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallHeader {
    pub endpoint: String,
    pub metadata: HashMap<String, String>,
    /// Time the caller is still willing to wait.
    pub timeout_ms: Option<u64>,
    pub payload: Vec<u8>,
}

impl CallHeader {
    pub fn new(ctx: &Context, endpoint: &str, payload: Vec<u8>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            metadata: ctx.metadata().clone(),
            timeout_ms: ctx.remaining().map(|d| d.as_millis() as u64),
            payload,
        }
    }

    /// Server-side context carrying the caller's metadata and deadline.
    pub fn context(&self, parent: &Context) -> Context {
        let mut ctx = match self.timeout_ms {
            Some(ms) => parent.with_timeout(Duration::from_millis(ms)),
            None => parent.child(),
        };
        for (key, value) in &self.metadata {
            ctx = ctx.with_metadata(key.clone(), value.clone());
        }
        ctx
    }
}

/// [`talk_core::Error`] as it travels in a `Fault` frame.
///
/// Details go as JSON text since the envelope format cannot carry
/// self-describing values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: i32,
    pub message: String,
    pub details: Option<String>,
}

impl From<&talk_core::Error> for WireError {
    fn from(err: &talk_core::Error) -> Self {
        Self {
            code: err.code.grpc_code(),
            message: err.message.clone(),
            details: err.details.as_ref().map(|d| d.to_string()),
        }
    }
}

impl From<WireError> for talk_core::Error {
    fn from(wire: WireError) -> Self {
        let mut err = talk_core::Error::new(ErrorCode::from_grpc_code(wire.code), wire.message);
        if let Some(details) = wire.details.and_then(|d| serde_json::from_str(&d).ok()) {
            err = err.with_details(details);
        }
        err
    }
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Frame> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn fault(err: &talk_core::Error) -> Frame {
        Frame::Fault(WireError::from(err))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Call(_) => "call",
            Frame::Open(_) => "open",
            Frame::Reply { .. } => "reply",
            Frame::Message { .. } => "message",
            Frame::Fault(_) => "fault",
            Frame::End => "end",
            Frame::Cancel => "cancel",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fault_keeps_code_and_details() {
        let err = talk_core::Error::not_found("user 9").with_details(json!({"id": 9}));
        let frame = Frame::decode(&Frame::fault(&err).encode().unwrap()).unwrap();
        let wire = match frame {
            Frame::Fault(wire) => wire,
            other => panic!("expected fault, got {}", other.kind()),
        };
        assert_eq!(talk_core::Error::from(wire), err);
    }

    #[tokio::test]
    async fn header_carries_metadata_and_deadline() {
        let ctx = Context::background()
            .with_metadata("request-id", "abc")
            .with_timeout(Duration::from_secs(30));
        let header = CallHeader::new(&ctx, "GetUser", b"\"7\"".to_vec());
        assert!(header.timeout_ms.is_some_and(|ms| ms > 29_000));

        let server_ctx = header.context(&Context::background());
        assert_eq!(server_ctx.metadata_value("request-id"), Some("abc"));
        assert!(server_ctx.deadline().is_some());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Frame::decode(&[0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
    }
}

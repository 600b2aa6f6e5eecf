use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use talk_core::{Codec, Context, Error, JsonCodec, Message};

use crate::address::{Address, DialOptions};
use crate::channel::FrameChannel;
use crate::frame::{CallHeader, Frame};

/// Perform one unary call on a fresh connection
///
/// Opens a connection, sends a `Call` frame, waits for the `Reply` or `Fault`,
/// and closes the connection. When `ctx` ends first, a `Cancel` frame is sent
/// and the context error is returned.
pub async fn call(
    address: &Address,
    opts: DialOptions,
    ctx: &Context,
    endpoint: &str,
    request: &Message,
    codec: &dyn Codec,
) -> talk_core::Result<Message> {
    if let Some(err) = ctx.err() {
        return Err(err);
    }
    let payload = codec.marshal(request)?;

    let mut channel = tokio::select! {
        connected = FrameChannel::connect(address, opts) => connected?,
        _ = ctx.done() => return Err(ctx.done_err()),
    };
    channel
        .send(&Frame::Call(CallHeader::new(ctx, endpoint, payload)))
        .await?;

    let reply = tokio::select! {
        frame = channel.receive() => Some(frame),
        _ = ctx.done() => None,
    };
    let Some(reply) = reply else {
        let _ = channel.send(&Frame::Cancel).await;
        return Err(ctx.done_err());
    };
    let _ = channel.close().await;

    match reply? {
        Frame::Reply { payload } => codec.unmarshal(&payload),
        Frame::Fault(wire) => Err(wire.into()),
        other => Err(Error::internal(format!(
            "unexpected {} frame in reply to {endpoint}",
            other.kind()
        ))),
    }
}

async fn typed_call<Req, Res>(
    address: Address,
    endpoint: &str,
    request: &Req,
) -> talk_core::Result<Res>
where
    Req: Serialize + ?Sized,
    Res: DeserializeOwned,
{
    let codec = JsonCodec;
    let request = serde_json::to_value(request)?;
    let response = call(
        &address,
        DialOptions::default(),
        &Context::background(),
        endpoint,
        &request,
        &codec,
    )
    .await?;
    serde_json::from_value(response)
        .map_err(|e| Error::invalid_argument(format!("decode response: {e}")))
}

/// Perform a one-off TCP call with JSON payloads
pub async fn request_tcp<Req, Res>(
    addr: &str,
    endpoint: &str,
    request: &Req,
) -> talk_core::Result<Res>
where
    Req: Serialize + ?Sized,
    Res: DeserializeOwned,
{
    let address = Address::tcp(addr)?;
    typed_call(address, endpoint, request).await
}

/// Perform a one-off Unix socket call with JSON payloads
pub async fn request_unix<Req, Res>(
    path: impl AsRef<Path>,
    endpoint: &str,
    request: &Req,
) -> talk_core::Result<Res>
where
    Req: Serialize + ?Sized,
    Res: DeserializeOwned,
{
    let address = Address::Unix(path.as_ref().to_path_buf());
    typed_call(address, endpoint, request).await
}

//! Protocol-neutral message streams.
//!
//! [`Stream`] is what business logic and transports exchange for streaming
//! calls. [`ChanStream`] is the channel-backed implementation used in-process
//! and as the building block transport adapters plug their own delivery into.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::Message;

/// Default buffer size of the channels behind a [`ChanStream`].
pub const DEFAULT_STREAM_BUFFER: usize = 16;

/// Bidirectional message channel.
#[async_trait]
pub trait Stream: Send + Sync {
    /// Send a message, blocking until it is accepted or the context is done.
    async fn send(&self, msg: Message) -> Result<()>;

    /// Receive the next message. `Ok(None)` marks the end of the stream.
    async fn recv(&self) -> Result<Option<Message>>;

    /// Stop sending while still receiving.
    async fn close_send(&self) -> Result<()>;

    /// Close both directions and cancel the stream context. Idempotent.
    async fn close(&self) -> Result<()>;

    fn context(&self) -> &Context;
}

/// Typed helpers over any [`Stream`].
#[async_trait]
pub trait TypedStream: Stream {
    async fn send_as<T>(&self, value: &T) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let msg = serde_json::to_value(value)?;
        self.send(msg).await
    }

    async fn recv_as<T>(&self) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.recv().await? {
            Some(msg) => serde_json::from_value(msg)
                .map(Some)
                .map_err(|e| Error::invalid_argument(format!("stream message: {e}"))),
            None => Ok(None),
        }
    }
}

impl<S: Stream + ?Sized> TypedStream for S {}

/// Channel-backed stream of `T` values.
///
/// The send side and the receive side are independent channels. The
/// outbound receiver is handed to whoever drains the stream
/// ([`ChanStream::take_send_chan`]); the inbound side can be fed through
/// [`ChanStream::take_recv_sender`] or replaced wholesale with
/// [`ChanStream::set_recv_chan`].
pub struct ChanStream<T> {
    ctx: Context,
    send_tx: Mutex<Option<mpsc::Sender<T>>>,
    send_rx: Mutex<Option<mpsc::Receiver<T>>>,
    recv_tx: Mutex<Option<mpsc::Sender<T>>>,
    recv_rx: tokio::sync::Mutex<mpsc::Receiver<T>>,
    recv_fault: Mutex<Option<Error>>,
    closed: AtomicBool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> ChanStream<T> {
    pub fn new(parent: &Context, buffer: usize) -> Self {
        let (send_tx, send_rx) = mpsc::channel(buffer.max(1));
        let (recv_tx, recv_rx) = mpsc::channel(buffer.max(1));
        Self {
            ctx: parent.child(),
            send_tx: Mutex::new(Some(send_tx)),
            send_rx: Mutex::new(Some(send_rx)),
            recv_tx: Mutex::new(Some(recv_tx)),
            recv_rx: tokio::sync::Mutex::new(recv_rx),
            recv_fault: Mutex::new(None),
            closed: AtomicBool::new(false),
            _marker: PhantomData,
        }
    }

    /// Two streams wired back to back: what one sends the other receives.
    pub fn pipe(parent: &Context, buffer: usize) -> (Self, Self) {
        let left = Self::new(parent, buffer);
        let right = Self::new(parent, buffer);
        if let Some(rx) = left.take_send_chan() {
            right.set_recv_chan(rx);
        }
        if let Some(rx) = right.take_send_chan() {
            left.set_recv_chan(rx);
        }
        (left, right)
    }

    /// Take the receiver draining everything sent on this stream.
    pub fn take_send_chan(&self) -> Option<mpsc::Receiver<T>> {
        self.send_rx.lock().take()
    }

    /// Take the sender feeding this stream's receive side.
    ///
    /// Once taken, the stream reaches end-of-stream when every clone of the
    /// sender is dropped.
    pub fn take_recv_sender(&self) -> Option<mpsc::Sender<T>> {
        self.recv_tx.lock().take()
    }

    /// Replace the receive side with an externally produced channel.
    pub fn set_recv_chan(&self, rx: mpsc::Receiver<T>) {
        self.recv_tx.lock().take();
        match self.recv_rx.try_lock() {
            Ok(mut guard) => *guard = rx,
            Err(_) => {
                tracing::warn!("set_recv_chan called while a receive is in flight; ignored");
            }
        }
    }

    /// Record the error the receive side ended with.
    ///
    /// It is reported by `recv` once the buffered messages are drained,
    /// instead of the plain end-of-stream.
    pub fn fail_recv(&self, err: Error) {
        *self.recv_fault.lock() = Some(err);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn send_value(&self, value: T) -> Result<()> {
        if self.is_closed() {
            return Err(Error::closed_pipe());
        }
        let tx = self.send_tx.lock().clone().ok_or_else(Error::closed_pipe)?;
        tokio::select! {
            biased;
            _ = self.ctx.done() => Err(self.ctx.done_err()),
            sent = tx.send(value) => sent.map_err(|_| Error::closed_pipe()),
        }
    }

    pub async fn recv_value(&self) -> Result<Option<T>> {
        if self.is_closed() {
            return Ok(None);
        }
        let mut rx = self.recv_rx.lock().await;
        tokio::select! {
            biased;
            item = rx.recv() => match item {
                Some(value) => Ok(Some(value)),
                None => {
                    let fault = self.recv_fault.lock().take();
                    fault.map_or(Ok(None), Err)
                }
            },
            _ = self.ctx.done() => {
                if self.is_closed() {
                    Ok(None)
                } else {
                    Err(self.ctx.done_err())
                }
            }
        }
    }

    pub fn close_send_side(&self) {
        self.send_tx.lock().take();
    }

    pub fn close_stream(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.ctx.cancel();
        self.send_tx.lock().take();
    }
}

#[async_trait]
impl<T> Stream for ChanStream<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    async fn send(&self, msg: Message) -> Result<()> {
        let value: T = serde_json::from_value(msg).map_err(|e| {
            Error::invalid_argument(format!(
                "stream expects {}: {e}",
                std::any::type_name::<T>()
            ))
        })?;
        self.send_value(value).await
    }

    async fn recv(&self) -> Result<Option<Message>> {
        match self.recv_value().await? {
            Some(value) => Ok(Some(serde_json::to_value(value).map_err(|e| {
                Error::internal(format!("encode stream message: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    async fn close_send(&self) -> Result<()> {
        self.close_send_side();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_stream();
        Ok(())
    }

    fn context(&self) -> &Context {
        &self.ctx
    }
}

impl<T> Drop for ChanStream<T> {
    fn drop(&mut self) {
        self.ctx.cancel();
    }
}

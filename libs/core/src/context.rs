//! Call context: cancellation, deadline and request metadata.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Carried into every handler and stream.
///
/// Cloning is cheap and clones observe the same cancellation. Use
/// [`Context::child`] to derive a context that can be cancelled on its own.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    metadata: Arc<HashMap<String, String>>,
}

impl Context {
    /// A root context that is never cancelled unless [`Context::cancel`] is called.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context cancelled together with `self`, or on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            metadata: Arc::clone(&self.metadata),
        }
    }

    /// Derive a child context that is done after `timeout` at the latest.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child context with a deadline. An earlier parent deadline wins.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut ctx = self.child();
        ctx.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        ctx
    }

    pub fn with_metadata(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut metadata = (*self.metadata).clone();
        metadata.insert(key.into(), value.into());
        Self {
            token: self.token.clone(),
            deadline: self.deadline,
            metadata: Arc::new(metadata),
        }
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<Error> {
        if self.token.is_cancelled() {
            return Some(Error::cancelled("context canceled"));
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Some(Error::deadline_exceeded("context deadline exceeded"))
            }
            _ => None,
        }
    }

    /// Like [`Context::err`], for call sites that already know the context is done.
    pub fn done_err(&self) -> Error {
        self.err()
            .unwrap_or_else(|| Error::cancelled("context canceled"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn child_is_cancelled_with_parent() {
        let parent = Context::background();
        let child = parent.child();
        parent.cancel();
        child.done().await;
        assert_eq!(child.err().map(|e| e.code), Some(ErrorCode::Cancelled));
    }

    #[tokio::test]
    async fn cancelling_child_leaves_parent_live() {
        let parent = Context::background();
        let child = parent.child();
        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[tokio::test]
    async fn deadline_reports_deadline_exceeded() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        ctx.done().await;
        assert_eq!(ctx.err().map(|e| e.code), Some(ErrorCode::DeadlineExceeded));
    }

    #[test]
    fn metadata_is_copy_on_write() {
        let base = Context::background().with_metadata("a", "1");
        let derived = base.with_metadata("b", "2");
        assert_eq!(base.metadata().len(), 1);
        assert_eq!(derived.metadata_value("a"), Some("1"));
        assert_eq!(derived.metadata_value("b"), Some("2"));
    }
}

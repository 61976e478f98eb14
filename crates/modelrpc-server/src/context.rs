//! Per-call context and cooperative cancellation

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

/// Cooperative cancellation signal shared between a caller and a running call
///
/// Clones observe the same state. Cancelling is one-way.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    signal: Arc<watch::Sender<bool>>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self {
            signal: Arc::new(watch::Sender::new(false)),
        }
    }

    /// Request cancellation. Calling it again has no effect.
    pub fn cancel(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.signal.borrow()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        let mut rx = self.signal.subscribe();
        // The sender lives as long as self
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Call metadata handed to `*_with_context` methods
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    method: String,
    metadata: HashMap<String, String>,
    cancellation: CancellationHandle,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationHandle) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub(crate) fn for_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Wire name of the method being served; empty until dispatch
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn all_metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn cancellation(&self) -> &CancellationHandle {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::status::{Code, Status};

    async fn slow_reply(ctx: CallContext) -> Result<String, Status> {
        tokio::select! {
            _ = ctx.cancellation().cancelled() => Err(Status::cancelled(ctx.method())),
            _ = tokio::time::sleep(Duration::from_secs(60)) => Ok("done".to_string()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancels_running_call() {
        let cancel = CancellationHandle::new();
        let ctx = CallContext::new()
            .with_cancellation(cancel.clone())
            .for_method("SlowReply");

        let call = tokio::spawn(slow_reply(ctx));
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let Err(status) = call.await.unwrap() else {
            panic!("Expected the call to be cancelled");
        };
        assert_eq!(status.code(), Code::Cancelled);
        assert_eq!(status.message(), "SlowReply");
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let cancel = CancellationHandle::new();
        cancel.cancel();
        cancel.cancel();

        let ctx = CallContext::new()
            .with_cancellation(cancel)
            .for_method("SlowReply");
        assert!(ctx.is_cancelled());
        tokio::time::timeout(Duration::from_millis(10), slow_reply(ctx))
            .await
            .unwrap()
            .unwrap_err();
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncancelled_call_completes() {
        let ctx = CallContext::new().for_method("SlowReply");
        assert_eq!(slow_reply(ctx).await.unwrap(), "done");
    }

    #[test]
    fn test_calls_do_not_share_cancellation() {
        let first = CallContext::new();
        let second = CallContext::new();
        first.cancellation().cancel();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[test]
    fn test_context_metadata() {
        let ctx = CallContext::new()
            .with_metadata("x-request-id", "42")
            .for_method("SayHello");
        assert_eq!(ctx.metadata("x-request-id"), Some("42"));
        assert_eq!(ctx.metadata("missing"), None);
        assert_eq!(ctx.method(), "SayHello");
        assert_eq!(ctx.all_metadata().len(), 1);
    }
}

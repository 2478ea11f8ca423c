//! # Request Context
//!
//! Per-request state threaded through composition: the caller-supplied data
//! map (exposed to expressions and interpolation as `context`) and a
//! cancellation token that aborts in-flight provider calls and backoff sleeps.

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Per-request data and cancellation
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    data: Map<String, Value>,
    cancellation: CancellationToken,
}

impl RequestContext {
    /// Create a context over the given request data
    pub fn new(data: Map<String, Value>) -> Self {
        Self {
            data,
            cancellation: CancellationToken::new(),
        }
    }

    /// Replace the cancellation token, e.g. with a child of a server-wide token
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Request data visible as `context` in expressions
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Derive a context sharing the data whose token is cancelled with this one
    pub fn child(&self) -> Self {
        Self {
            data: self.data.clone(),
            cancellation: self.cancellation.child_token(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_context_is_empty_and_live() {
        let ctx = RequestContext::default();
        assert!(ctx.data().is_empty());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_child_is_cancelled_with_parent() {
        let data = json!({"limit": 50}).as_object().cloned().unwrap();
        let parent = RequestContext::new(data);
        let child = parent.child();
        assert_eq!(child.data().get("limit"), Some(&json!(50)));

        parent.cancellation().cancel();
        assert!(child.is_cancelled());
    }
}

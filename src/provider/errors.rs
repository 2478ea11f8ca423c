//! Provider error types

use std::time::Duration;
use thiserror::Error;
use tonic::Code;

use crate::expression::ExpressionError;

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors from provider parsing, registration and execution
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider {name} not found")]
    NotFound { name: String },

    #[error("method {method} not found in provider {provider}")]
    MethodNotFound { provider: String, method: String },

    #[error("failed to parse provider spec: {0}")]
    Document(String),

    #[error("invalid provider spec: {0}")]
    InvalidSpec(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("failed to evaluate filter for method {method}: {source}")]
    Filter {
        method: String,
        #[source]
        source: ExpressionError,
    },

    #[error("failed to build request: {0}")]
    Encode(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("call failed with status {code:?}: {message}")]
    Call { code: Code, message: String },

    #[error("failed after {attempts} attempts, last error: {code:?}: {message}")]
    RetriesExhausted {
        attempts: u32,
        code: Code,
        message: String,
    },

    #[error("method {method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("call cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn method_not_found(provider: impl Into<String>, method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            provider: provider.into(),
            method: method.into(),
        }
    }

    pub fn invalid_spec(message: impl Into<String>) -> Self {
        Self::InvalidSpec(message.into())
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    /// Terminal status failure from a call
    pub fn from_status(status: &tonic::Status) -> Self {
        Self::Call {
            code: status.code(),
            message: status.message().to_string(),
        }
    }

    /// gRPC status code carried by this error, if any
    pub fn status_code(&self) -> Option<Code> {
        match self {
            Self::Call { code, .. } | Self::RetriesExhausted { code, .. } => Some(*code),
            Self::Timeout { .. } => Some(Code::DeadlineExceeded),
            Self::Cancelled => Some(Code::Cancelled),
            _ => None,
        }
    }

    /// Whether the failure was raised before any call was attempted
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::MethodNotFound { .. }
                | Self::Document(_)
                | Self::InvalidSpec(_)
                | Self::Schema(_)
        )
    }
}

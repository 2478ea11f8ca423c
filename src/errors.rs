//! # Composer Error Types
//!
//! Top-level error for the binary and for callers that wire several
//! subsystems together. Each subsystem keeps its own error enum; this one
//! only unifies them.

use thiserror::Error;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::expression::ExpressionError;
use crate::provider::ProviderError;
use crate::repository::StorageError;
use crate::template::TemplateError;

/// Result type for composer operations
pub type ComposerResult<T> = Result<T, ComposerError>;

/// Errors surfaced across subsystem boundaries
#[derive(Debug, Error)]
pub enum ComposerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("Template not found: {template_id}")]
    TemplateNotFound { template_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ComposerError {
    /// Create a template-not-found error
    pub fn template_not_found(template_id: impl Into<String>) -> Self {
        Self::TemplateNotFound {
            template_id: template_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_not_found_constructor() {
        let err = ComposerError::template_not_found("feed-card");
        match &err {
            ComposerError::TemplateNotFound { template_id } => assert_eq!(template_id, "feed-card"),
            _ => panic!("Expected TemplateNotFound variant"),
        }
        assert_eq!(err.to_string(), "Template not found: feed-card");
    }

    #[test]
    fn test_provider_error_conversion() {
        let err: ComposerError = ProviderError::not_found("reaction").into();
        assert!(matches!(err, ComposerError::Provider(_)));
        assert!(err.to_string().contains("provider reaction not found"));
    }
}

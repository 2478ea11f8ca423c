//! Template engine error types

use thiserror::Error;

use crate::provider::ProviderError;

pub type TemplateResult<T> = Result<T, TemplateError>;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("error parsing YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unsupported instruction kind {kind:?}")]
    UnsupportedKind { kind: String },

    #[error("invalid template document: {0}")]
    InvalidDocument(String),

    #[error("error registering provider: {0}")]
    Provider(#[from] ProviderError),

    #[error("error marshaling final result: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl TemplateError {
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument(message.into())
    }

    /// Metric label for this error
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Yaml(_) | Self::UnsupportedKind { .. } | Self::InvalidDocument(_) => {
                "parse_error"
            }
            Self::Provider(_) => "provider_parse_error",
            Self::Serialize(_) => "compose_error",
        }
    }
}

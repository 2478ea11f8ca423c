//! Storage error types

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::cache::CacheError;
use crate::template::TemplateError;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parse template {template_id}: {source}")]
    Parse {
        template_id: String,
        #[source]
        source: TemplateError,
    },

    #[error("{}", join(.0))]
    Multiple(Vec<StorageError>),

    #[error("all storage backends failed: {}", join(.0))]
    AllBackendsFailed(Vec<StorageError>),

    #[error("no storage backends configured")]
    NoBackends,

    #[error("template cache: {0}")]
    Cache(#[from] CacheError),
}

impl StorageError {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// `Ok` when empty, the error itself when there is one, `Multiple` otherwise
    pub fn collect(mut errors: Vec<StorageError>) -> StorageResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }
}

fn join(errors: &[StorageError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

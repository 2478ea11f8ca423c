//! Filesystem template storage.
//!
//! Every `*.yaml` file in the template directory is one template source,
//! keyed by its file stem (`feed-card.yaml` is template `feed-card`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::errors::{StorageError, StorageResult};
use super::{Storage, Templates};
use crate::cache::SetGetter;
use crate::metrics::storage::StorageMetrics;
use crate::template::TemplateEngine;

const TEMPLATE_EXTENSION: &str = "yaml";

#[derive(Debug)]
pub struct LocalStorage {
    template_dir: PathBuf,
    engine: Arc<TemplateEngine>,
    metrics: StorageMetrics,
}

/// A candidate template file found in the directory
struct TemplateFile {
    id: String,
    path: PathBuf,
    entry: tokio::fs::DirEntry,
}

impl LocalStorage {
    pub fn new(template_dir: impl Into<PathBuf>, engine: Arc<TemplateEngine>) -> Self {
        Self {
            template_dir: template_dir.into(),
            engine,
            metrics: StorageMetrics::new("local"),
        }
    }

    pub fn template_dir(&self) -> &Path {
        &self.template_dir
    }

    async fn template_files(&self) -> StorageResult<Vec<TemplateFile>> {
        let read_dir_error = |source| {
            self.metrics.error("read_dir");
            StorageError::io("read template dir", &self.template_dir, source)
        };
        let mut entries = tokio::fs::read_dir(&self.template_dir)
            .await
            .map_err(read_dir_error)?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_dir_error)? {
            let path = entry.path();
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(TEMPLATE_EXTENSION) {
                debug!(
                    component = "local_storage",
                    path = %path.display(),
                    "Skipping file with unsupported extension"
                );
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            files.push(TemplateFile { id, path, entry });
        }
        files.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(files)
    }

    async fn load(
        &self,
        store: &dyn SetGetter<String, Templates>,
        id: String,
        path: &Path,
    ) -> StorageResult<()> {
        let read_time = Utc::now();
        let started = Instant::now();
        let bytes = tokio::fs::read(path).await.map_err(|source| {
            self.metrics.error("read_file");
            StorageError::io("read template file", path, source)
        })?;
        self.metrics.read(started.elapsed());

        let instructions = self.engine.parse(&bytes).map_err(|source| {
            self.metrics.error("parse_template");
            StorageError::Parse {
                template_id: id.clone(),
                source,
            }
        })?;

        debug!(
            component = "local_storage",
            template_id = %id,
            instructions = instructions.len(),
            "Loaded template"
        );
        store.set(id, Arc::from(instructions), read_time);
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn name(&self) -> &str {
        "local"
    }

    async fn full_refresh(&self, store: &dyn SetGetter<String, Templates>) -> StorageResult<()> {
        self.metrics.update("full");
        let mut errors = Vec::new();

        for file in self.template_files().await? {
            if let Some(last_updated) = store.last_updated(&file.id) {
                let modified = match file.entry.metadata().await.and_then(|m| m.modified()) {
                    Ok(modified) => DateTime::<Utc>::from(modified),
                    Err(source) => {
                        self.metrics.error("read_file_stat");
                        errors.push(StorageError::io("stat template file", &file.path, source));
                        continue;
                    }
                };
                if modified < last_updated {
                    debug!(
                        component = "local_storage",
                        template_id = %file.id,
                        "Template unchanged since last load"
                    );
                    // Re-stamp so the age sweep keeps files that still exist
                    if let Some(templates) = store.get(&file.id) {
                        store.set(file.id, templates, Utc::now());
                    }
                    continue;
                }
            }

            if let Err(e) = self.load(store, file.id, &file.path).await {
                errors.push(e);
            }
        }

        StorageError::collect(errors)
    }

    async fn incremental_refresh(
        &self,
        store: &dyn SetGetter<String, Templates>,
        key: &String,
    ) -> StorageResult<()> {
        self.metrics.update("incremental");
        let mut errors = Vec::new();

        for file in self.template_files().await? {
            if &file.id != key {
                continue;
            }
            if let Err(e) = self.load(store, file.id, &file.path).await {
                errors.push(e);
            }
        }

        StorageError::collect(errors)
    }
}

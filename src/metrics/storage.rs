//! # Storage Metrics
//!
//! Labels:
//! - kind: template
//! - type: full, incremental (updates); read_dir, read_file_stat, read_file, parse_template (errors)

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;
use std::time::Duration;

static STORAGE_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    STORAGE_METER
        .get_or_init(|| opentelemetry::global::meter_provider().meter("item-composer-storage"))
}

pub fn reads_total() -> Counter<u64> {
    meter()
        .u64_counter("composer.storage.reads")
        .with_description("Template sources read from a backend")
        .build()
}

pub fn updates_total() -> Counter<u64> {
    meter()
        .u64_counter("composer.storage.updates")
        .with_description("Refresh requests served by a backend")
        .build()
}

pub fn errors_total() -> Counter<u64> {
    meter()
        .u64_counter("composer.storage.errors")
        .with_description("Backend failures by type")
        .build()
}

pub fn read_duration_seconds() -> Histogram<f64> {
    meter()
        .f64_histogram("composer.storage.read.duration")
        .with_unit("s")
        .build()
}

/// Instruments for one storage backend
#[derive(Debug, Clone)]
pub struct StorageMetrics {
    backend: KeyValue,
    reads: Counter<u64>,
    updates: Counter<u64>,
    errors: Counter<u64>,
    read_duration: Histogram<f64>,
}

impl StorageMetrics {
    pub fn new(backend: &'static str) -> Self {
        Self {
            backend: KeyValue::new("backend", backend),
            reads: reads_total(),
            updates: updates_total(),
            errors: errors_total(),
            read_duration: read_duration_seconds(),
        }
    }

    pub fn update(&self, update_type: &'static str) {
        self.updates.add(
            1,
            &[
                self.backend.clone(),
                KeyValue::new("kind", "template"),
                KeyValue::new("type", update_type),
            ],
        );
    }

    pub fn read(&self, elapsed: Duration) {
        let labels = [self.backend.clone(), KeyValue::new("kind", "template")];
        self.reads.add(1, &labels);
        self.read_duration.record(elapsed.as_secs_f64(), &labels);
    }

    pub fn error(&self, error_type: &'static str) {
        self.errors.add(
            1,
            &[
                self.backend.clone(),
                KeyValue::new("kind", "template"),
                KeyValue::new("type", error_type),
            ],
        );
    }
}

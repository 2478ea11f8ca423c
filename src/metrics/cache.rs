//! # Cache Metrics
//!
//! Labels:
//! - cache_name: the configured cache name
//! - error_type: full_update_error, full_update_timeout, incremental_update_error

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;
use std::time::Duration;

static CACHE_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    CACHE_METER.get_or_init(|| opentelemetry::global::meter_provider().meter("item-composer-cache"))
}

pub fn cache_hits_total() -> Counter<u64> {
    meter()
        .u64_counter("composer.cache.hits")
        .with_description("Total number of cache hits")
        .build()
}

pub fn cache_misses_total() -> Counter<u64> {
    meter()
        .u64_counter("composer.cache.misses")
        .with_description("Total number of cache misses, including stale reads")
        .build()
}

pub fn cache_evictions_total() -> Counter<u64> {
    meter()
        .u64_counter("composer.cache.evictions")
        .with_description("Entries removed by the periodic sweep")
        .build()
}

pub fn cache_errors_total() -> Counter<u64> {
    meter()
        .u64_counter("composer.cache.errors")
        .with_description("Refresh failures by error type")
        .build()
}

pub fn cache_full_updates_total() -> Counter<u64> {
    meter()
        .u64_counter("composer.cache.full_updates")
        .with_description("Successful full refreshes")
        .build()
}

pub fn cache_incremental_updates_total() -> Counter<u64> {
    meter()
        .u64_counter("composer.cache.incremental_updates")
        .with_description("Successful incremental refreshes")
        .build()
}

pub fn cache_size() -> Gauge<u64> {
    meter()
        .u64_gauge("composer.cache.size")
        .with_description("Number of entries currently held")
        .build()
}

pub fn full_update_duration_seconds() -> Histogram<f64> {
    meter()
        .f64_histogram("composer.cache.full_update.duration")
        .with_description("Duration of full refreshes")
        .with_unit("s")
        .build()
}

pub fn incremental_update_duration_seconds() -> Histogram<f64> {
    meter()
        .f64_histogram("composer.cache.incremental_update.duration")
        .with_description("Duration of incremental refreshes")
        .with_unit("s")
        .build()
}

/// Instruments for one named cache
#[derive(Debug, Clone)]
pub struct CacheMetrics {
    name: KeyValue,
    hits: Counter<u64>,
    misses: Counter<u64>,
    evictions: Counter<u64>,
    errors: Counter<u64>,
    full_updates: Counter<u64>,
    incremental_updates: Counter<u64>,
    size: Gauge<u64>,
    full_duration: Histogram<f64>,
    incremental_duration: Histogram<f64>,
}

impl CacheMetrics {
    pub fn new(cache_name: &str) -> Self {
        Self {
            name: KeyValue::new("cache_name", cache_name.to_string()),
            hits: cache_hits_total(),
            misses: cache_misses_total(),
            evictions: cache_evictions_total(),
            errors: cache_errors_total(),
            full_updates: cache_full_updates_total(),
            incremental_updates: cache_incremental_updates_total(),
            size: cache_size(),
            full_duration: full_update_duration_seconds(),
            incremental_duration: incremental_update_duration_seconds(),
        }
    }

    pub fn hit(&self) {
        self.hits.add(1, std::slice::from_ref(&self.name));
    }

    pub fn miss(&self) {
        self.misses.add(1, std::slice::from_ref(&self.name));
    }

    pub fn evicted(&self, count: usize) {
        self.evictions
            .add(count as u64, std::slice::from_ref(&self.name));
    }

    pub fn error(&self, error_type: &'static str) {
        self.errors.add(
            1,
            &[self.name.clone(), KeyValue::new("error_type", error_type)],
        );
    }

    pub fn full_update(&self, elapsed: Duration, success: bool) {
        self.full_duration
            .record(elapsed.as_secs_f64(), std::slice::from_ref(&self.name));
        if success {
            self.full_updates.add(1, std::slice::from_ref(&self.name));
        }
    }

    pub fn incremental_update(&self, elapsed: Duration, success: bool) {
        self.incremental_duration
            .record(elapsed.as_secs_f64(), std::slice::from_ref(&self.name));
        if success {
            self.incremental_updates
                .add(1, std::slice::from_ref(&self.name));
        }
    }

    pub fn size(&self, len: usize) {
        self.size.record(len as u64, std::slice::from_ref(&self.name));
    }
}

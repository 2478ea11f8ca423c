//! # Provider Metrics
//!
//! Labels:
//! - provider, method: provider and method name from the provider document
//! - outcome: success, no_match, error

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;
use std::time::Duration;

static PROVIDER_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    PROVIDER_METER
        .get_or_init(|| opentelemetry::global::meter_provider().meter("item-composer-provider"))
}

pub fn calls_total() -> Counter<u64> {
    meter()
        .u64_counter("composer.provider.calls")
        .with_description("Provider method executions by outcome")
        .build()
}

pub fn retries_total() -> Counter<u64> {
    meter()
        .u64_counter("composer.provider.retries")
        .with_description("Attempts beyond the first for retryable failures")
        .build()
}

pub fn call_duration_seconds() -> Histogram<f64> {
    meter()
        .f64_histogram("composer.provider.call.duration")
        .with_description("End-to-end method execution time including retries")
        .with_unit("s")
        .build()
}

/// Instruments for one provider
#[derive(Debug, Clone)]
pub struct ProviderMetrics {
    provider: KeyValue,
    calls: Counter<u64>,
    retries: Counter<u64>,
    duration: Histogram<f64>,
}

impl ProviderMetrics {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: KeyValue::new("provider", provider.to_string()),
            calls: calls_total(),
            retries: retries_total(),
            duration: call_duration_seconds(),
        }
    }

    pub fn call(&self, method: &str, outcome: &'static str, elapsed: Duration) {
        let labels = [
            self.provider.clone(),
            KeyValue::new("method", method.to_string()),
            KeyValue::new("outcome", outcome),
        ];
        self.calls.add(1, &labels);
        self.duration.record(elapsed.as_secs_f64(), &labels);
    }

    pub fn retry(&self, method: &str) {
        self.retries.add(
            1,
            &[
                self.provider.clone(),
                KeyValue::new("method", method.to_string()),
            ],
        );
    }
}

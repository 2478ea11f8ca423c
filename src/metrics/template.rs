//! # Template Engine Metrics
//!
//! Labels:
//! - error_type: parse_error, provider_parse_error, provider_create_error, compose_error
//! - reason: path, interpolation, invalid_field, provider

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;
use std::time::Duration;

static TEMPLATE_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    TEMPLATE_METER
        .get_or_init(|| opentelemetry::global::meter_provider().meter("item-composer-template"))
}

pub fn parse_requests_total() -> Counter<u64> {
    meter()
        .u64_counter("composer.template.parse.requests")
        .with_description("Template documents parsed")
        .build()
}

pub fn compose_requests_total() -> Counter<u64> {
    meter()
        .u64_counter("composer.template.compose.requests")
        .with_description("Compose calls")
        .build()
}

pub fn errors_total() -> Counter<u64> {
    meter()
        .u64_counter("composer.template.errors")
        .with_description("Parse and compose failures by error type")
        .build()
}

pub fn field_failures_total() -> Counter<u64> {
    meter()
        .u64_counter("composer.template.field_failures")
        .with_description("Fields degraded to null during composition")
        .build()
}

pub fn parse_duration_seconds() -> Histogram<f64> {
    meter()
        .f64_histogram("composer.template.parse.duration")
        .with_unit("s")
        .build()
}

pub fn compose_duration_seconds() -> Histogram<f64> {
    meter()
        .f64_histogram("composer.template.compose.duration")
        .with_unit("s")
        .build()
}

/// Instruments for one template engine
#[derive(Debug, Clone)]
pub struct TemplateMetrics {
    parse_requests: Counter<u64>,
    compose_requests: Counter<u64>,
    errors: Counter<u64>,
    field_failures: Counter<u64>,
    parse_duration: Histogram<f64>,
    compose_duration: Histogram<f64>,
}

impl TemplateMetrics {
    pub fn new() -> Self {
        Self {
            parse_requests: parse_requests_total(),
            compose_requests: compose_requests_total(),
            errors: errors_total(),
            field_failures: field_failures_total(),
            parse_duration: parse_duration_seconds(),
            compose_duration: compose_duration_seconds(),
        }
    }

    pub fn parse_started(&self) {
        self.parse_requests.add(1, &[]);
    }

    pub fn parse_finished(&self, elapsed: Duration) {
        self.parse_duration.record(elapsed.as_secs_f64(), &[]);
    }

    pub fn compose_started(&self) {
        self.compose_requests.add(1, &[]);
    }

    pub fn compose_finished(&self, elapsed: Duration) {
        self.compose_duration.record(elapsed.as_secs_f64(), &[]);
    }

    pub fn error(&self, error_type: &'static str) {
        self.errors.add(1, &[KeyValue::new("error_type", error_type)]);
    }

    pub fn field_failure(&self, reason: &'static str) {
        self.field_failures
            .add(1, &[KeyValue::new("reason", reason)]);
    }
}

impl Default for TemplateMetrics {
    fn default() -> Self {
        Self::new()
    }
}

//! # Metrics
//!
//! OpenTelemetry instruments grouped by domain. Every instrument comes from
//! the global meter provider, so nothing is exported until the embedding
//! process installs one; without it all instruments are no-ops.
//!
//! Components build their instruments once at construction and keep them in
//! a small struct, so the hot paths (cache reads, field resolution) only pay
//! for the `add`/`record` call.

pub mod cache;
pub mod provider;
pub mod storage;
pub mod template;

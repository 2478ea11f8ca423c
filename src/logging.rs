//! # Structured Logging
//!
//! Console logging through `tracing-subscriber`.
//!
//! - Filter: `RUST_LOG` when set, otherwise `COMPOSER_LOG_LEVEL`, otherwise `info`
//! - Format: human readable, or JSON lines with `COMPOSER_LOG_FORMAT=json`
//! - ANSI colours only when stderr is a terminal
//!
//! Logs go to stderr so rendered output on stdout stays clean.

use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

const LEVEL_ENV: &str = "COMPOSER_LOG_LEVEL";
const FORMAT_ENV: &str = "COMPOSER_LOG_FORMAT";
const DEFAULT_LEVEL: &str = "info";

/// Install the global subscriber; later calls are no-ops
pub fn init_tracing() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let json = std::env::var(FORMAT_ENV).is_ok_and(|format| format.eq_ignore_ascii_case("json"));
        let ansi = std::io::stderr().is_terminal();

        let layer = if json {
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_filter(env_filter())
                .boxed()
        } else {
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(ansi)
                .with_filter(env_filter())
                .boxed()
        };

        // A subscriber may already be installed by an embedding application
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
            return;
        }

        tracing::debug!(json, ansi, "Logging initialized");
    });
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive()))
}

fn default_directive() -> String {
    std::env::var(LEVEL_ENV)
        .ok()
        .filter(|level| !level.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string())
}

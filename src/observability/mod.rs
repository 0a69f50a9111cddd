//! Observability for the engine
//!
//! This module provides:
//! - Structured logging through `tracing`, with an optional subscriber
//!   installer for binaries and tests
//! - Engine counters (`EngineMetrics`)
//!
//! Library code only emits events; installing a subscriber is left to the
//! embedding application.
//!
//! # Usage
//!
//! ```ignore
//! use aerocache::observability::{init_logging, EngineMetrics, LogFormat};
//!
//! init_logging(LogFormat::Json);
//!
//! let metrics = EngineMetrics::new();
//! metrics.increment_range_hits();
//! ```

mod metrics;

pub use metrics::{EngineMetrics, MetricsSnapshot};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info";

/// Log line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Plain,
    /// One JSON object per line
    Json,
}

/// Installs a global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`. Returns false
/// when a subscriber was already installed, so calling this more than once
/// is harmless.
pub fn init_logging(format: LogFormat) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match format {
        LogFormat::Plain => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}

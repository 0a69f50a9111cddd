//! Engine Configuration
//!
//! Tunables for the cursor pool, the range cache, the read path and the
//! write engine. Every field has a default, so a partial JSON document (or
//! `{}`) is a valid configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::LogFormat;

/// Server-side idle timeout of remote cursors. Pooled cursors must expire
/// before this.
pub const SERVER_CURSOR_TIMEOUT_MS: u64 = 10 * 60 * 1000;

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Cursor pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPoolConfig {
    /// Maximum pooled cursors (default: 100)
    #[serde(default = "default_pool_size")]
    pub pool_size: u64,

    /// Idle time before a pooled cursor is dropped, in ms (default: 8 min)
    #[serde(default = "default_pool_ttl_ms")]
    pub ttl_ms: u64,

    /// Skip distance between slices; shallower reads never use the pool
    /// (default: 1000)
    #[serde(default = "default_slice_width")]
    pub slice_width: u64,

    /// Linear policy: slices sit this far before each multiple of the width
    /// (default: 100)
    #[serde(default = "default_linear_delta")]
    pub linear_delta: u64,

    /// Linear policy: cursors per slice, nearest slice first
    /// (default: [4, 2, 1])
    #[serde(default = "default_linear_heights")]
    pub linear_heights: Vec<usize>,

    /// Random policy: minimum distance between slices (default: 1000)
    #[serde(default = "default_rnd_min_width")]
    pub rnd_min_width: u64,

    /// Random policy: maximum slices per query (default: 50)
    #[serde(default = "default_rnd_max_cursors")]
    pub rnd_max_cursors: u64,

    /// Largest remaining skip, as a fraction of the requested skip, worth
    /// finishing by iteration (default: 0.10)
    #[serde(default = "default_reuse_tolerance")]
    pub reuse_tolerance: f64,

    /// Background population workers, 1 or 2 (default: 2)
    #[serde(default = "default_populator_threads")]
    pub populator_threads: usize,

    /// Lifetime of cached collection-size estimates, in ms (default: 60 s)
    #[serde(default = "default_collection_size_ttl_ms")]
    pub collection_size_ttl_ms: u64,
}

fn default_pool_size() -> u64 {
    100
}

fn default_pool_ttl_ms() -> u64 {
    8 * 60 * 1000
}

fn default_slice_width() -> u64 {
    1000
}

fn default_linear_delta() -> u64 {
    100
}

fn default_linear_heights() -> Vec<usize> {
    vec![4, 2, 1]
}

fn default_rnd_min_width() -> u64 {
    1000
}

fn default_rnd_max_cursors() -> u64 {
    50
}

fn default_reuse_tolerance() -> f64 {
    0.10
}

fn default_populator_threads() -> usize {
    2
}

fn default_collection_size_ttl_ms() -> u64 {
    60_000
}

impl Default for CursorPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            ttl_ms: default_pool_ttl_ms(),
            slice_width: default_slice_width(),
            linear_delta: default_linear_delta(),
            linear_heights: default_linear_heights(),
            rnd_min_width: default_rnd_min_width(),
            rnd_max_cursors: default_rnd_max_cursors(),
            reuse_tolerance: default_reuse_tolerance(),
            populator_threads: default_populator_threads(),
            collection_size_ttl_ms: default_collection_size_ttl_ms(),
        }
    }
}

impl CursorPoolConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn collection_size_ttl(&self) -> Duration {
        Duration::from_millis(self.collection_size_ttl_ms)
    }
}

/// Range result cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeCacheConfig {
    /// Serve pages from cached windows (default: true)
    #[serde(default = "default_range_enabled")]
    pub enabled: bool,

    /// Maximum cached windows (default: 100)
    #[serde(default = "default_range_size")]
    pub size: u64,

    /// Window lifetime after it was cached, in ms (default: 10 s)
    #[serde(default = "default_range_ttl_ms")]
    pub ttl_ms: u64,
}

fn default_range_enabled() -> bool {
    true
}

fn default_range_size() -> u64 {
    100
}

fn default_range_ttl_ms() -> u64 {
    10_000
}

impl Default for RangeCacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_range_enabled(),
            size: default_range_size(),
            ttl_ms: default_range_ttl_ms(),
        }
    }
}

impl RangeCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Read path configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Batch size of direct queries; also the size of captured windows
    /// (default: 1000)
    #[serde(default = "default_cursor_batch_size")]
    pub cursor_batch_size: usize,

    /// Per-query time limit in ms, 0 for none (default: 0)
    #[serde(default)]
    pub query_time_limit_ms: u64,
}

fn default_cursor_batch_size() -> usize {
    1000
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            cursor_batch_size: default_cursor_batch_size(),
            query_time_limit_ms: 0,
        }
    }
}

impl QueryConfig {
    pub fn max_time(&self) -> Option<Duration> {
        match self.query_time_limit_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Write engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteConfig {
    /// Patch payloads set nested fields by dotted path instead of replacing
    /// whole sub-documents (default: false)
    #[serde(default)]
    pub flatten_patch: bool,
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub cursor_pool: CursorPoolConfig,

    #[serde(default)]
    pub range_cache: RangeCacheConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub write: WriteConfig,

    /// Format used by `observability::init_logging` (default: plain)
    #[serde(default)]
    pub log_format: LogFormat,
}

impl EngineConfig {
    /// Parses and validates a JSON configuration
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Checks cross-field constraints
    pub fn validate(&self) -> ConfigResult<()> {
        let pool = &self.cursor_pool;

        if pool.ttl_ms >= SERVER_CURSOR_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "cursor_pool.ttl_ms must be below the server cursor timeout ({} ms)",
                SERVER_CURSOR_TIMEOUT_MS
            )));
        }
        if pool.slice_width == 0 {
            return Err(ConfigError::Invalid(
                "cursor_pool.slice_width must be positive".to_string(),
            ));
        }
        if pool.linear_delta >= pool.slice_width {
            return Err(ConfigError::Invalid(
                "cursor_pool.linear_delta must be smaller than slice_width".to_string(),
            ));
        }
        if pool.rnd_min_width == 0 || pool.rnd_max_cursors == 0 {
            return Err(ConfigError::Invalid(
                "cursor_pool.rnd_min_width and rnd_max_cursors must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&pool.reuse_tolerance) {
            return Err(ConfigError::Invalid(
                "cursor_pool.reuse_tolerance must be between 0 and 1".to_string(),
            ));
        }
        if self.query.cursor_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "query.cursor_batch_size must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

//! Configuration constants and structures for the oracle host
//!
//! Limits and error codes live in submodules; `PipelineConfig` gathers the
//! tunables a host reads from the environment at startup.

pub mod errors;
pub mod limits;

use std::time::Duration;

use self::limits::{
    DEFAULT_CACHE_CAPACITY, DEFAULT_LOOP_ITERATION_LIMIT, DEFAULT_MAX_RENDER_PASSES,
    FALLBACK_TIMEOUT_MS, WORKER_TIMEOUT_MS,
};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of compiled components kept by the LRU cache.
    pub cache_capacity: usize,
    /// Offload transpilation to the dedicated worker thread when it is available.
    pub use_worker: bool,
    pub worker_timeout: Duration,
    pub fallback_timeout: Duration,
    /// When false, nested-virtualized-list findings are logged instead of rejected.
    pub structural_issues_fatal: bool,
    pub max_render_passes: u32,
    pub loop_iteration_limit: u64,
    /// Artificial latency added to every transform. Only meant for timeout drills.
    pub debug_transpile_delay: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            use_worker: true,
            worker_timeout: Duration::from_millis(WORKER_TIMEOUT_MS),
            fallback_timeout: Duration::from_millis(FALLBACK_TIMEOUT_MS),
            structural_issues_fatal: true,
            max_render_passes: DEFAULT_MAX_RENDER_PASSES,
            loop_iteration_limit: DEFAULT_LOOP_ITERATION_LIMIT,
            debug_transpile_delay: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - ORACLE_CACHE_CAPACITY: compiled component cache size (default: 10, minimum 1)
    /// - ORACLE_TRANSPILE_WORKER: "0"/"false" disables the worker thread (default: enabled)
    /// - ORACLE_WORKER_TIMEOUT_MS: worker round-trip budget (default: 30000)
    /// - ORACLE_FALLBACK_TIMEOUT_MS: in-process transform budget (default: 20000)
    /// - ORACLE_STRUCTURAL_FATAL: "0"/"false" turns layout findings into warnings
    /// - ORACLE_MAX_RENDER_PASSES: re-render ceiling per flush (default: 25)
    /// - ORACLE_LOOP_ITERATION_LIMIT: engine loop guard (default: 10000000)
    /// - ORACLE_DEBUG_TRANSPILE_DELAY_MS: artificial transform latency (unset by default)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_capacity: env_parse::<usize>("ORACLE_CACHE_CAPACITY")
                .map(|v| v.max(1))
                .unwrap_or(defaults.cache_capacity),
            use_worker: env_flag("ORACLE_TRANSPILE_WORKER").unwrap_or(defaults.use_worker),
            worker_timeout: env_parse::<u64>("ORACLE_WORKER_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.worker_timeout),
            fallback_timeout: env_parse::<u64>("ORACLE_FALLBACK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.fallback_timeout),
            structural_issues_fatal: env_flag("ORACLE_STRUCTURAL_FATAL")
                .unwrap_or(defaults.structural_issues_fatal),
            max_render_passes: env_parse::<u32>("ORACLE_MAX_RENDER_PASSES")
                .unwrap_or(defaults.max_render_passes),
            loop_iteration_limit: env_parse::<u64>("ORACLE_LOOP_ITERATION_LIMIT")
                .unwrap_or(defaults.loop_iteration_limit),
            debug_transpile_delay: env_parse::<u64>("ORACLE_DEBUG_TRANSPILE_DELAY_MS")
                .map(Duration::from_millis),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

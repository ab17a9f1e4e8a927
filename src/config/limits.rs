//! System limits and capacity configuration

/// Compiled component cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 10;

/// Transpile budgets.
pub const WORKER_TIMEOUT_MS: u64 = 30_000;
pub const FALLBACK_TIMEOUT_MS: u64 = 20_000;
/// Worker thread stack; the CST rewriters recurse once per syntax level.
pub const WORKER_STACK_BYTES: usize = 8 * 1024 * 1024;
pub const WORKER_QUEUE_DEPTH: usize = 64;
/// Deepest syntax tree the pipeline walks. Deeper input is a parse error.
pub const MAX_SYNTAX_DEPTH: usize = 512;

/// Diagnostics.
pub const SOURCE_PREVIEW_CHARS: usize = 800;
pub const TRIMMED_PREFIX_LOG_CHARS: usize = 160;

/// Component runtime.
pub const DEFAULT_MAX_RENDER_PASSES: u32 = 25;
pub const DEFAULT_LOOP_ITERATION_LIMIT: u64 = 10_000_000;
pub const ENGINE_RECURSION_LIMIT: usize = 2_048;
/// Promise-job / re-render rounds drained after a single host call.
pub const MAX_SETTLE_ROUNDS: usize = 32;
/// Timer firings processed by one `advance_timers` call.
pub const MAX_TIMER_FIRINGS: usize = 10_000;

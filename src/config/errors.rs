//! Error code constants
//!
//! Library errors carry their codes inline in the `thiserror` messages
//! (E-ORC-11xx pipeline stages, E-ORC-12xx component runtime, E-ORC-13xx host
//! API). The constants below are the codes raised from plain `anyhow` paths.

/// CLI error codes (1400-1499)
pub const ERR_CLI_USAGE: &str = "E-ORC-1401";
pub const ERR_CLI_INPUT: &str = "E-ORC-1402";
pub const ERR_CLI_HOST: &str = "E-ORC-1403";

/// Transpile worker plumbing (1500-1599)
pub const ERR_WORKER_SPAWN: &str = "E-ORC-1501";

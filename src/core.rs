use sha2::{Digest, Sha256};

pub static APP_NAME: &str = "oracle-host";

/// Install the fmt subscriber. `RUST_LOG` wins; otherwise crate logs at info.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("oracle_host=info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
    tracing::info!(target = "oracle", app = APP_NAME, "tracing initialized");
}

/// Short stable identifier for a source text in logs. Never log the source.
pub fn source_digest(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

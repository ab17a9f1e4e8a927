//! TSX to engine-ready JavaScript, with single-flight deduplication, a
//! dedicated worker thread and an in-process fallback queue.

pub mod guards;
pub mod lower;
pub mod worker;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Semaphore};

use crate::config::limits::WORKER_STACK_BYTES;
use crate::config::{errors::ERR_WORKER_SPAWN, PipelineConfig};
use crate::core::source_digest;
use crate::error::TranspileError;

pub use self::worker::{PendingTranspile, TranspileWorker, WorkerHandle};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TranspileOptions {
    pub jsx_factory: String,
    pub jsx_fragment: String,
    /// Route collection reads through `__seq`/`__len`.
    pub defensive_rewrites: bool,
    pub filename: Option<String>,
}

impl Default for TranspileOptions {
    fn default() -> Self {
        Self {
            jsx_factory: "__h".to_string(),
            jsx_fragment: "__h.Fragment".to_string(),
            defensive_rewrites: true,
            filename: None,
        }
    }
}

/// A source-to-source lowering the transpiler can run on any thread.
pub trait Transform: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn transform(&self, source: &str, options: &TranspileOptions) -> Result<String, TranspileError>;
}

/// The built-in tree-sitter lowering.
#[derive(Debug, Default, Clone, Copy)]
pub struct TsxLowering;

impl Transform for TsxLowering {
    fn name(&self) -> &'static str {
        "tsx-lowering"
    }

    fn transform(&self, source: &str, options: &TranspileOptions) -> Result<String, TranspileError> {
        lower::lower(source, options)
    }
}

/// Runs the configured transform plus post-processing; shared by the worker
/// thread and the fallback path.
#[derive(Clone)]
pub struct TransformRunner {
    transform: Arc<dyn Transform>,
    runs: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl TransformRunner {
    pub fn new(transform: Arc<dyn Transform>, delay: Option<Duration>) -> Self {
        Self {
            transform,
            runs: Arc::new(AtomicUsize::new(0)),
            delay,
        }
    }

    pub fn run(&self, source: &str, options: &TranspileOptions) -> Result<String, TranspileError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let started = Instant::now();
        let lowered = self.transform.transform(source, options)?;
        if lowered.trim().is_empty() {
            return Err(TranspileError::Empty);
        }
        let out = if options.defensive_rewrites {
            guards::apply_guards(&lowered)?
        } else {
            lowered
        };
        tracing::debug!(
            target = "oracle",
            transform = self.transform.name(),
            digest = %source_digest(source),
            duration_ms = started.elapsed().as_millis() as u64,
            "transform finished"
        );
        Ok(out)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

pub type TranspileFuture = Shared<BoxFuture<'static, Result<String, TranspileError>>>;

type FlightKey = (String, String);

pub struct Transpiler {
    runner: TransformRunner,
    worker: Option<WorkerHandle>,
    gate: Arc<Semaphore>,
    inflight: Arc<Mutex<HashMap<FlightKey, TranspileFuture>>>,
    fallback_timeout: Duration,
}

impl Transpiler {
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_transform(config, Arc::new(TsxLowering))
    }

    pub fn with_transform(config: &PipelineConfig, transform: Arc<dyn Transform>) -> Self {
        let runner = TransformRunner::new(transform, config.debug_transpile_delay);
        let worker = if config.use_worker {
            match TranspileWorker::start(runner.clone(), config.worker_timeout) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    tracing::warn!(
                        target = "oracle",
                        code = ERR_WORKER_SPAWN,
                        error = %err,
                        "transpile worker unavailable; transforms run in-process"
                    );
                    None
                }
            }
        } else {
            None
        };
        Self {
            runner,
            worker,
            gate: Arc::new(Semaphore::new(1)),
            inflight: Arc::new(Mutex::new(HashMap::new())),
            fallback_timeout: config.fallback_timeout,
        }
    }

    /// Transpile `source`. Identical concurrent requests (same source and
    /// options) share one computation; the entry is dropped once it settles.
    pub fn transpile(&self, source: &str, options: &TranspileOptions) -> TranspileFuture {
        let options_json = serde_json::to_string(options).unwrap_or_default();
        let key: FlightKey = (source.to_owned(), options_json);

        let mut inflight = self.inflight.lock();
        if let Some(existing) = inflight.get(&key) {
            tracing::debug!(target = "oracle", digest = %source_digest(source), "joined in-flight transpile");
            return existing.clone();
        }

        let work = run_transform(
            self.runner.clone(),
            self.worker.clone(),
            Arc::clone(&self.gate),
            self.fallback_timeout,
            source.to_owned(),
            options.clone(),
        );
        let registry = Arc::clone(&self.inflight);
        let settled_key = key.clone();
        let shared = async move {
            let result = work.await;
            registry.lock().remove(&settled_key);
            result
        }
        .boxed()
        .shared();
        inflight.insert(key, shared.clone());
        shared
    }

    /// Number of times the transform itself ran.
    pub fn transform_count(&self) -> usize {
        self.runner.runs()
    }

    pub fn inflight_len(&self) -> usize {
        self.inflight.lock().len()
    }

    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }
}

async fn run_transform(
    runner: TransformRunner,
    worker: Option<WorkerHandle>,
    gate: Arc<Semaphore>,
    fallback_timeout: Duration,
    source: String,
    options: TranspileOptions,
) -> Result<String, TranspileError> {
    if let Some(worker) = worker {
        match worker.submit(&source, &options) {
            Ok(pending) => return pending.wait().await,
            Err(err) => {
                tracing::warn!(target = "oracle", error = %err, "posting to transpile worker failed; using fallback");
            }
        }
    }

    tokio::task::yield_now().await;
    let queued = async move {
        let permit = gate
            .acquire_owned()
            .await
            .map_err(|_| TranspileError::Failed("transpile queue closed".to_string()))?;
        let (reply, done) = oneshot::channel();
        thread::Builder::new()
            .name("transpile-fallback".into())
            .stack_size(WORKER_STACK_BYTES)
            .spawn(move || {
                let _permit = permit;
                let _ = reply.send(runner.run(&source, &options));
            })
            .map_err(|err| TranspileError::Failed(format!("{ERR_WORKER_SPAWN}: spawn fallback transpile thread: {err}")))?;
        done.await
            .map_err(|_| TranspileError::Failed("transpile thread exited without replying".to_string()))?
    };
    match tokio::time::timeout(fallback_timeout, queued).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                target = "oracle",
                timeout_ms = fallback_timeout.as_millis() as u64,
                "in-process transpile timed out"
            );
            Err(TranspileError::Timeout(fallback_timeout))
        }
    }
}

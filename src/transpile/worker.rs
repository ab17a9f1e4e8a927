use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::{self, Receiver, SyncSender, TrySendError},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::Context;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{TransformRunner, TranspileOptions};
use crate::config::errors::ERR_WORKER_SPAWN;
use crate::config::limits::{WORKER_QUEUE_DEPTH, WORKER_STACK_BYTES};
use crate::error::TranspileError;

type Reply = oneshot::Sender<Result<String, TranspileError>>;
type PendingMap = Arc<Mutex<HashMap<u64, Reply>>>;

#[derive(Debug)]
struct WorkerRequest {
    id: u64,
    source: String,
    options_json: String,
}

/// Handle to the dedicated transpile thread. The thread exits once every
/// clone of the handle is dropped.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: SyncSender<WorkerRequest>,
    pending: PendingMap,
    next_id: Arc<AtomicU64>,
    timeout: Duration,
}

/// A request the worker accepted; resolves with its response or times out.
pub struct PendingTranspile {
    id: u64,
    rx: oneshot::Receiver<Result<String, TranspileError>>,
    pending: PendingMap,
    timeout: Duration,
}

pub struct TranspileWorker;

impl TranspileWorker {
    pub fn start(runner: TransformRunner, timeout: Duration) -> anyhow::Result<WorkerHandle> {
        let (tx, rx) = mpsc::sync_channel(WORKER_QUEUE_DEPTH);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let worker_pending = Arc::clone(&pending);

        thread::Builder::new()
            .name("transpile-worker".into())
            .stack_size(WORKER_STACK_BYTES)
            .spawn(move || worker_loop(runner, rx, worker_pending))
            .with_context(|| format!("{ERR_WORKER_SPAWN}: spawn transpile worker thread"))?;

        Ok(WorkerHandle {
            tx,
            pending,
            next_id: Arc::new(AtomicU64::new(1)),
            timeout,
        })
    }
}

impl WorkerHandle {
    /// Post a request. Fails without blocking when the queue is full or the
    /// thread is gone; callers fall back to the in-process path.
    pub fn submit(&self, source: &str, options: &TranspileOptions) -> anyhow::Result<PendingTranspile> {
        let options_json = serde_json::to_string(options).context("serialize transpile options")?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().insert(id, reply_tx);

        let request = WorkerRequest {
            id,
            source: source.to_owned(),
            options_json,
        };
        if let Err(err) = self.tx.try_send(request) {
            self.pending.lock().remove(&id);
            return Err(match err {
                TrySendError::Full(_) => anyhow::anyhow!("transpile worker queue is full"),
                TrySendError::Disconnected(_) => anyhow::anyhow!("transpile worker has exited"),
            });
        }
        tracing::trace!(target = "oracle", request_id = id, "transpile request posted to worker");

        Ok(PendingTranspile {
            id,
            rx: reply_rx,
            pending: Arc::clone(&self.pending),
            timeout: self.timeout,
        })
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

impl PendingTranspile {
    pub async fn wait(self) -> Result<String, TranspileError> {
        match tokio::time::timeout(self.timeout, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TranspileError::Failed(
                "transpile worker dropped the request".to_string(),
            )),
            Err(_) => {
                self.pending.lock().remove(&self.id);
                tracing::warn!(
                    target = "oracle",
                    request_id = self.id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "transpile worker timed out"
                );
                Err(TranspileError::Timeout(self.timeout))
            }
        }
    }
}

fn worker_loop(runner: TransformRunner, rx: Receiver<WorkerRequest>, pending: PendingMap) {
    while let Ok(request) = rx.recv() {
        let result = match serde_json::from_str::<TranspileOptions>(&request.options_json) {
            Ok(options) => runner.run(&request.source, &options),
            Err(err) => Err(TranspileError::Failed(format!("invalid transpile options: {err}"))),
        };
        let reply = pending.lock().remove(&request.id);
        match reply {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                tracing::debug!(
                    target = "oracle",
                    request_id = request.id,
                    "late transpile response ignored"
                );
            }
        }
    }
    tracing::debug!(target = "oracle", "transpile worker stopped");
}

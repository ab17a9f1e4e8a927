//! Per-mount state machine.

use serde_json::Value;

use crate::element::RenderTree;
use crate::error::PipelineError;

pub type MountId = u64;

/// Monotonic per-mount token. Work started under an older generation is stale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    #[must_use]
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub enum Phase {
    /// No source yet, or a pipeline run is in flight.
    Loading,
    Ready(RenderTree),
    Failed(PipelineError),
    Crashed(String),
}

/// Borrowed snapshot handed to the UI layer.
#[derive(Debug, Clone, Copy)]
pub enum MountView<'a> {
    Loading,
    Ready(&'a RenderTree),
    Failed { message: &'a str },
    Crashed { message: &'a str },
}

impl MountView<'_> {
    pub fn is_ready(&self) -> bool {
        matches!(self, MountView::Ready(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            MountView::Loading => "loading",
            MountView::Ready(_) => "ready",
            MountView::Failed { .. } => "failed",
            MountView::Crashed { .. } => "crashed",
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            MountView::Loading => serde_json::json!({ "state": "loading" }),
            MountView::Ready(tree) => serde_json::json!({ "state": "ready", "tree": tree }),
            MountView::Failed { message } => serde_json::json!({ "state": "failed", "message": message }),
            MountView::Crashed { message } => serde_json::json!({ "state": "crashed", "message": message }),
        }
    }
}

pub type ErrorCallback = Box<dyn FnMut(&PipelineError)>;

pub struct Mount {
    pub generation: Generation,
    pub phase: Phase,
    pub props: Value,
    pub source: Option<String>,
    /// User-facing text for `Failed`, computed once on entry.
    pub failure_summary: Option<String>,
    /// Whether the engine holds a live instance for this mount.
    pub live: bool,
    pub on_error: Option<ErrorCallback>,
}

impl Mount {
    pub fn new(props: Value, on_error: Option<ErrorCallback>) -> Self {
        Self {
            generation: Generation::default(),
            phase: Phase::Loading,
            props,
            source: None,
            failure_summary: None,
            live: false,
            on_error,
        }
    }

    pub fn view(&self) -> MountView<'_> {
        match &self.phase {
            Phase::Loading => MountView::Loading,
            Phase::Ready(tree) => MountView::Ready(tree),
            Phase::Failed(_) => MountView::Failed {
                message: self.failure_summary.as_deref().unwrap_or_default(),
            },
            Phase::Crashed(message) => MountView::Crashed { message },
        }
    }

    /// Enter `Failed` and notify the error callback.
    pub fn fail(&mut self, err: PipelineError) {
        self.failure_summary = Some(err.summary());
        self.live = false;
        if let Some(callback) = self.on_error.as_mut() {
            callback(&err);
        }
        self.phase = Phase::Failed(err);
    }

    /// Enter `Crashed`. Only a `Ready` mount can crash.
    pub fn crash(&mut self, raw: &str) {
        if !matches!(self.phase, Phase::Ready(_)) {
            return;
        }
        let err = PipelineError::Crashed(raw.to_string());
        self.live = false;
        if let Some(callback) = self.on_error.as_mut() {
            callback(&err);
        }
        self.phase = Phase::Crashed(crate::boundary::crash_message(raw));
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.phase, Phase::Ready(_))
    }
}

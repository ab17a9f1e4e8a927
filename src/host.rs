//! The orchestrator: owns the engine, the compiled-component cache and every
//! mount, and moves mounts through `Loading → Ready | Failed`, `Ready → Crashed`.
//!
//! `OracleHost` is single-threaded. Only transpilation leaves the host thread;
//! its completions are collected by [`OracleHost::settle`] and checked against
//! the mount's generation before anything is executed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::{FutureExt, LocalBoxFuture};
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;

use crate::autofix::autofix_with_report;
use crate::component_cache::ComponentCache;
use crate::config::PipelineConfig;
use crate::core::source_digest;
use crate::element::RenderTree;
use crate::error::{ExecutionError, HostError, PipelineError, TranspileError};
use crate::executor::{Component, Sandbox};
use crate::mount::{ErrorCallback, Generation, Mount, MountId, MountView, Phase};
use crate::preprocess::preprocess_with_report;
use crate::sanitize::sanitize_with;
use crate::services::HostServices;
use crate::transpile::{Transform, TranspileOptions, Transpiler, TsxLowering};

struct Completion {
    mount: MountId,
    generation: Generation,
    source: String,
    result: Result<String, TranspileError>,
}

pub struct OracleHost {
    mounts: HashMap<MountId, Mount>,
    next_id: MountId,
    cache: ComponentCache<Component>,
    pending: FuturesUnordered<LocalBoxFuture<'static, Completion>>,
    transpiler: Transpiler,
    options: TranspileOptions,
    structural_fatal: bool,
    sandbox: Sandbox,
}

impl OracleHost {
    pub fn new(config: PipelineConfig) -> Result<Self, HostError> {
        Self::with_services(config, HostServices::in_memory())
    }

    pub fn with_services(config: PipelineConfig, services: HostServices) -> Result<Self, HostError> {
        Self::with_transform(config, services, Arc::new(TsxLowering))
    }

    pub fn with_transform(
        config: PipelineConfig,
        services: HostServices,
        transform: Arc<dyn Transform>,
    ) -> Result<Self, HostError> {
        let sandbox = Sandbox::new(&config, services)?;
        tracing::info!(
            target = "oracle",
            transform = transform.name(),
            cache_capacity = config.cache_capacity,
            worker = config.use_worker,
            "oracle host ready"
        );
        Ok(Self {
            mounts: HashMap::new(),
            next_id: 1,
            cache: ComponentCache::new(config.cache_capacity),
            pending: FuturesUnordered::new(),
            transpiler: Transpiler::with_transform(&config, transform),
            options: TranspileOptions::default(),
            structural_fatal: config.structural_issues_fatal,
            sandbox,
        })
    }

    /// Create an empty mount. It stays `Loading` until a source is set.
    pub fn mount(&mut self, props: Value, on_error: Option<ErrorCallback>) -> MountId {
        let id = self.next_id;
        self.next_id += 1;
        self.mounts.insert(id, Mount::new(props, on_error));
        id
    }

    /// Replace the mount's source. Tears down whatever was running, then
    /// either mounts a cached component right away or starts the pipeline.
    pub fn set_source(&mut self, id: MountId, code: &str) -> Result<(), HostError> {
        let mount = self.mounts.get_mut(&id).ok_or(HostError::UnknownMount(id))?;
        mount.generation = mount.generation.next();
        let generation = mount.generation;
        mount.live = false;
        mount.source = Some(code.to_owned());
        mount.failure_summary = None;
        mount.phase = Phase::Loading;
        self.sandbox.unmount(id);

        let digest = source_digest(code);
        if let Some(component) = self.cache.get(code).cloned() {
            tracing::info!(target = "oracle", mount = id, digest = %digest, "component cache hit");
            self.start(id, &component);
            return Ok(());
        }

        let span = tracing::info_span!("oracle.pipeline", mount = id, generation = generation.value(), digest = %digest);
        let _entered = span.enter();
        let started = Instant::now();
        let prepared = match self.prepare(code) {
            Ok(prepared) => prepared,
            Err(err) => {
                tracing::warn!(target = "oracle", error = %err, "source rejected before transpile");
                self.fail(id, err);
                return Ok(());
            }
        };
        tracing::debug!(
            target = "oracle",
            elapsed_ms = started.elapsed().as_millis() as u64,
            "source prepared"
        );

        let transpiled = self.transpiler.transpile(&prepared, &self.options);
        let source = code.to_owned();
        self.pending.push(
            async move {
                Completion {
                    mount: id,
                    generation,
                    source,
                    result: transpiled.await,
                }
            }
            .boxed_local(),
        );
        Ok(())
    }

    /// Stages that run synchronously on the host thread.
    fn prepare(&self, code: &str) -> Result<String, PipelineError> {
        let (cleaned, report) = preprocess_with_report(code);
        if let Some(prefix) = report.trimmed_prefix.as_deref() {
            tracing::debug!(target = "oracle", trimmed_chars = prefix.chars().count(), "leading prose trimmed");
        }
        let (fixed, fixes) = autofix_with_report(&cleaned);
        if fixes.total() > 0 {
            tracing::debug!(target = "oracle", fixes = fixes.total(), "auto-fixes applied");
        }
        let warnings = sanitize_with(&fixed, self.structural_fatal)?;
        for issue in &warnings {
            tracing::warn!(target = "oracle", line = issue.line, column = issue.column, issue = %issue.message, "layout issue allowed");
        }
        Ok(fixed)
    }

    /// Wait for every in-flight transpile, run what is still current, and
    /// drain engine work.
    pub async fn settle(&mut self) {
        while let Some(done) = self.pending.next().await {
            self.complete(done);
        }
        self.apply_engine();
    }

    /// Pipeline runs whose transpile has not come back yet.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn complete(&mut self, done: Completion) {
        let Some(mount) = self.mounts.get(&done.mount) else {
            tracing::debug!(target = "oracle", mount = done.mount, "completion for a removed mount dropped");
            return;
        };
        if mount.generation != done.generation {
            tracing::debug!(
                target = "oracle",
                mount = done.mount,
                stale = done.generation.value(),
                current = mount.generation.value(),
                "stale completion discarded"
            );
            return;
        }
        let js = match done.result {
            Ok(js) => js,
            Err(err) => {
                self.fail(done.mount, PipelineError::Transpile(err));
                return;
            }
        };
        if let Some(component) = self.cache.get(&done.source).cloned() {
            self.start(done.mount, &component);
            return;
        }
        match self.sandbox.execute(&js, done.mount) {
            Ok(component) => {
                self.cache.set(done.source, component.clone());
                self.start(done.mount, &component);
            }
            Err(err) => {
                // Disposers registered while the module body ran still belong to this mount.
                self.sandbox.unmount(done.mount);
                self.fail(done.mount, PipelineError::Execution(err));
            }
        }
    }

    fn start(&mut self, id: MountId, component: &Component) {
        let props = match self.mounts.get(&id) {
            Some(mount) => mount.props.clone(),
            None => return,
        };
        match self.sandbox.mount(id, component, &props) {
            Ok(()) => {
                if let Some(mount) = self.mounts.get_mut(&id) {
                    mount.live = true;
                    mount.phase = Phase::Ready(RenderTree::default());
                }
                self.apply_engine();
            }
            Err(err) => self.fail(id, PipelineError::Execution(ExecutionError::Threw(err.to_string()))),
        }
    }

    fn fail(&mut self, id: MountId, err: PipelineError) {
        if let Some(mount) = self.mounts.get_mut(&id) {
            tracing::warn!(target = "oracle", mount = id, error = %err, "mount failed");
            mount.fail(err);
        }
    }

    fn apply_engine(&mut self) {
        let settled = self.sandbox.settle();
        for (id, tree) in settled.trees {
            if let Some(mount) = self.mounts.get_mut(&id) {
                if mount.is_ready() {
                    mount.phase = Phase::Ready(tree);
                }
            }
        }
        for crash in settled.crashed {
            if let Some(mount) = self.mounts.get_mut(&crash.mount) {
                tracing::warn!(
                    target = "oracle",
                    mount = crash.mount,
                    phase = %crash.phase,
                    error = %crash.message,
                    "component crashed"
                );
                mount.crash(&crash.message);
            }
        }
    }

    pub fn view(&self, id: MountId) -> Result<MountView<'_>, HostError> {
        self.mounts
            .get(&id)
            .map(Mount::view)
            .ok_or(HostError::UnknownMount(id))
    }

    fn live_mount(&self, id: MountId) -> Result<(), HostError> {
        match self.mounts.get(&id) {
            None => Err(HostError::UnknownMount(id)),
            Some(mount) if mount.live && mount.is_ready() => Ok(()),
            Some(_) => Err(HostError::NotReady(id)),
        }
    }

    /// Invoke an event handler from the current tree, e.g. `"0/1#onPress"`.
    pub fn dispatch(&mut self, id: MountId, handler: &str, args: &[Value]) -> Result<(), HostError> {
        self.live_mount(id)?;
        let outcome = self.sandbox.dispatch(id, handler, args);
        self.apply_engine();
        outcome
    }

    /// Press the innermost element whose text contains `label`.
    pub fn press(&mut self, id: MountId, label: &str) -> Result<(), HostError> {
        let handler = match self.view(id)? {
            MountView::Ready(tree) => tree
                .handler_for_text(label, "onPress")
                .ok_or_else(|| HostError::UnknownHandler(format!("onPress for '{label}'")))?,
            _ => return Err(HostError::NotReady(id)),
        };
        self.dispatch(id, &handler, &[])
    }

    /// Advance the mount's virtual clock, firing due timers in order.
    pub fn advance_timers(&mut self, id: MountId, by: Duration) -> Result<(), HostError> {
        self.live_mount(id)?;
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        let outcome = self.sandbox.advance(id, millis);
        self.apply_engine();
        outcome
    }

    pub fn set_props(&mut self, id: MountId, props: Value) -> Result<(), HostError> {
        let mount = self.mounts.get_mut(&id).ok_or(HostError::UnknownMount(id))?;
        mount.props = props.clone();
        if !mount.live {
            return Ok(());
        }
        let outcome = self.sandbox.set_props(id, &props);
        self.apply_engine();
        outcome
    }

    /// Run the current source again under a new generation. Recovers a
    /// crashed mount; a cached component skips the pipeline.
    pub fn remount(&mut self, id: MountId) -> Result<(), HostError> {
        let source = self
            .mounts
            .get(&id)
            .ok_or(HostError::UnknownMount(id))?
            .source
            .clone();
        match source {
            Some(code) => self.set_source(id, &code),
            None => Ok(()),
        }
    }

    pub fn unmount(&mut self, id: MountId) -> Result<(), HostError> {
        let mut mount = self.mounts.remove(&id).ok_or(HostError::UnknownMount(id))?;
        mount.generation = mount.generation.next();
        mount.live = false;
        self.sandbox.unmount(id);
        tracing::debug!(target = "oracle", mount = id, "unmounted");
        Ok(())
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_cached(&self, code: &str) -> bool {
        self.cache.has(code)
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// How many times the transform actually ran (cache and single-flight
    /// hits do not count).
    pub fn transform_count(&self) -> usize {
        self.transpiler.transform_count()
    }
}

impl std::fmt::Debug for OracleHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleHost")
            .field("mounts", &self.mounts.len())
            .field("cached", &self.cache.len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

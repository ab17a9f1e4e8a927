//! Sandboxed execution of lowered component modules.
//!
//! One boa context per host. The prelude builds the component runtime and
//! hands back a host API object; Rust drives every mount through it with
//! JSON-encoded arguments. Native services reach the engine only through the
//! `__native` bridge installed before the prelude runs.

pub mod capabilities;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use boa_engine::context::ContextBuilder;
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::vm::RuntimeLimits;
use boa_engine::{
    Context, JsArgs, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue, NativeFunction,
    Source,
};
use boa_gc::{empty_trace, Finalize, Trace};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::boundary::CleanupRegistry;
use crate::config::limits::{ENGINE_RECURSION_LIMIT, MAX_SETTLE_ROUNDS, MAX_TIMER_FIRINGS};
use crate::config::PipelineConfig;
use crate::element::RenderTree;
use crate::error::{ExecutionError, HostError};
use crate::mount::MountId;
use crate::notifications::normalize_trigger;
use crate::services::HostServices;

const PRELUDE: &str = include_str!("prelude.js");

type Registries = Rc<RefCell<HashMap<MountId, CleanupRegistry<JsObject>>>>;

/// A component value returned by a successful module load.
#[derive(Debug, Clone)]
pub struct Component(JsObject);

#[derive(Debug, Clone, Deserialize)]
pub struct CrashReport {
    pub mount: MountId,
    pub message: String,
    pub phase: String,
}

/// Outcome of draining engine work.
#[derive(Debug, Default)]
pub struct Settled {
    /// Newly committed trees, keyed by mount.
    pub trees: HashMap<MountId, RenderTree>,
    pub crashed: Vec<CrashReport>,
}

impl Settled {
    fn absorb(&mut self, report: FlushReport) {
        for (key, tree) in report.trees {
            match key.parse::<MountId>() {
                Ok(id) => {
                    self.trees.insert(id, tree);
                }
                Err(_) => tracing::warn!(target = "oracle", key = %key, "flush returned a non-numeric mount key"),
            }
        }
        for crash in report.crashed {
            self.trees.remove(&crash.mount);
            self.crashed.push(crash);
        }
    }
}

#[derive(Debug, Deserialize)]
struct FlushReport {
    rendered: usize,
    #[serde(default)]
    trees: HashMap<String, RenderTree>,
    #[serde(default)]
    crashed: Vec<CrashReport>,
}

#[derive(Debug, Deserialize)]
struct ConfigureReport {
    #[serde(default)]
    missing: Vec<String>,
}

/// State reachable from native functions.
#[derive(Clone, Finalize)]
struct NativeBridge {
    services: HostServices,
    cleanups: Registries,
}

// Holds no engine values that need tracing: disposers are kept alive as
// rooted handles inside the registries.
unsafe impl Trace for NativeBridge {
    empty_trace!();
}

type NativeOp = fn(&[JsValue], &NativeBridge, &mut Context) -> JsResult<JsValue>;

fn native(op: NativeOp, bridge: &NativeBridge) -> NativeFunction {
    NativeFunction::from_copy_closure_with_captures(
        move |_this, args, bridge: &NativeBridge, context| op(args, bridge, context),
        bridge.clone(),
    )
}

fn arg_string(args: &[JsValue], index: usize, context: &mut Context) -> JsResult<String> {
    Ok(args.get_or_undefined(index).to_string(context)?.to_std_string_escaped())
}

fn arg_json(args: &[JsValue], index: usize, context: &mut Context) -> JsResult<Value> {
    let raw = arg_string(args, index, context)?;
    serde_json::from_str(&raw).map_err(|err| type_error(&format!("invalid JSON argument: {err}")))
}

fn js_str(value: &str) -> JsValue {
    JsValue::from(JsString::from(value))
}

fn type_error(message: &str) -> JsError {
    JsNativeError::typ().with_message(message.to_string()).into()
}

fn service_error(err: anyhow::Error) -> JsError {
    let message = format!("{err:#}");
    JsNativeError::error().with_message(message).into()
}

fn to_json_string(value: &impl serde::Serialize) -> JsResult<JsValue> {
    serde_json::to_string(value)
        .map(|json| js_str(&json))
        .map_err(|err| type_error(&err.to_string()))
}

fn op_log(args: &[JsValue], _: &NativeBridge, context: &mut Context) -> JsResult<JsValue> {
    let level = arg_string(args, 0, context)?;
    let message = arg_string(args, 1, context)?;
    match level.as_str() {
        "error" => tracing::error!(target = "oracle", script = true, "{message}"),
        "warn" => tracing::warn!(target = "oracle", script = true, "{message}"),
        "debug" => tracing::debug!(target = "oracle", script = true, "{message}"),
        _ => tracing::info!(target = "oracle", script = true, "{message}"),
    }
    Ok(JsValue::undefined())
}

fn op_kv_get(args: &[JsValue], bridge: &NativeBridge, context: &mut Context) -> JsResult<JsValue> {
    let key = arg_string(args, 0, context)?;
    match bridge.services.kv.get(&key).map_err(service_error)? {
        Some(value) => Ok(js_str(&value)),
        None => Ok(JsValue::null()),
    }
}

fn op_kv_set(args: &[JsValue], bridge: &NativeBridge, context: &mut Context) -> JsResult<JsValue> {
    let key = arg_string(args, 0, context)?;
    let value = arg_string(args, 1, context)?;
    bridge.services.kv.set(&key, &value).map_err(service_error)?;
    Ok(JsValue::undefined())
}

fn op_kv_remove(args: &[JsValue], bridge: &NativeBridge, context: &mut Context) -> JsResult<JsValue> {
    let key = arg_string(args, 0, context)?;
    bridge.services.kv.remove(&key).map_err(service_error)?;
    Ok(JsValue::undefined())
}

fn op_kv_keys(_: &[JsValue], bridge: &NativeBridge, _: &mut Context) -> JsResult<JsValue> {
    let keys = bridge.services.kv.keys().map_err(service_error)?;
    to_json_string(&keys)
}

/// Never throws: a notification that cannot be scheduled resolves to `null`.
fn op_notify_schedule(args: &[JsValue], bridge: &NativeBridge, context: &mut Context) -> JsResult<JsValue> {
    let request = match arg_json(args, 0, context) {
        Ok(request) => request,
        Err(_) => return Ok(JsValue::null()),
    };
    let content = request.get("content").cloned().unwrap_or(Value::Object(Map::new()));
    let trigger = normalize_trigger(request.get("trigger").unwrap_or(&Value::Null));
    match bridge.services.notifications.schedule(content, trigger) {
        Ok(id) => Ok(js_str(&id)),
        Err(err) => {
            tracing::warn!(target = "oracle", error = %err, "notification not scheduled");
            Ok(JsValue::null())
        }
    }
}

fn op_notify_cancel(args: &[JsValue], bridge: &NativeBridge, context: &mut Context) -> JsResult<JsValue> {
    let id = arg_string(args, 0, context)?;
    bridge.services.notifications.cancel(&id).map_err(service_error)?;
    Ok(JsValue::undefined())
}

fn op_notify_cancel_all(_: &[JsValue], bridge: &NativeBridge, _: &mut Context) -> JsResult<JsValue> {
    bridge.services.notifications.cancel_all().map_err(service_error)?;
    Ok(JsValue::undefined())
}

fn op_notify_list(_: &[JsValue], bridge: &NativeBridge, _: &mut Context) -> JsResult<JsValue> {
    let scheduled = bridge.services.notifications.scheduled().map_err(service_error)?;
    to_json_string(&scheduled)
}

fn op_notify_permission(_: &[JsValue], bridge: &NativeBridge, _: &mut Context) -> JsResult<JsValue> {
    let status = bridge.services.notifications.permission().map_err(service_error)?;
    Ok(js_str(status.as_str()))
}

fn op_notify_request_permission(_: &[JsValue], bridge: &NativeBridge, _: &mut Context) -> JsResult<JsValue> {
    let status = bridge
        .services
        .notifications
        .request_permission()
        .map_err(service_error)?;
    Ok(js_str(status.as_str()))
}

fn op_doc_get(args: &[JsValue], bridge: &NativeBridge, context: &mut Context) -> JsResult<JsValue> {
    let path = arg_string(args, 0, context)?;
    match bridge.services.documents.get(&path).map_err(service_error)? {
        Value::Null => Ok(JsValue::null()),
        value => to_json_string(&value),
    }
}

fn op_doc_set(args: &[JsValue], bridge: &NativeBridge, context: &mut Context) -> JsResult<JsValue> {
    let path = arg_string(args, 0, context)?;
    let value = arg_json(args, 1, context)?;
    bridge.services.documents.set(&path, value).map_err(service_error)?;
    Ok(JsValue::undefined())
}

fn op_doc_update(args: &[JsValue], bridge: &NativeBridge, context: &mut Context) -> JsResult<JsValue> {
    let path = arg_string(args, 0, context)?;
    let fields = match arg_json(args, 1, context)? {
        Value::Object(fields) => fields,
        _ => return Err(type_error("update expects an object of fields")),
    };
    bridge.services.documents.update(&path, fields).map_err(service_error)?;
    Ok(JsValue::undefined())
}

fn op_doc_remove(args: &[JsValue], bridge: &NativeBridge, context: &mut Context) -> JsResult<JsValue> {
    let path = arg_string(args, 0, context)?;
    bridge.services.documents.remove(&path).map_err(service_error)?;
    Ok(JsValue::undefined())
}

fn op_doc_push(args: &[JsValue], bridge: &NativeBridge, context: &mut Context) -> JsResult<JsValue> {
    let path = arg_string(args, 0, context)?;
    let value = arg_json(args, 1, context)?;
    let key = bridge.services.documents.push(&path, value).map_err(service_error)?;
    Ok(js_str(&key))
}

fn op_register_cleanup(args: &[JsValue], bridge: &NativeBridge, _: &mut Context) -> JsResult<JsValue> {
    let mount = args
        .get_or_undefined(0)
        .as_number()
        .filter(|n| n.is_finite() && *n >= 0.0)
        .ok_or_else(|| type_error("cleanup registered without a mount"))? as MountId;
    let disposer = args
        .get_or_undefined(1)
        .as_callable()
        .cloned()
        .ok_or_else(|| type_error("__registerCleanup expects a function"))?;
    bridge
        .cleanups
        .borrow_mut()
        .entry(mount)
        .or_default()
        .register(disposer);
    Ok(JsValue::undefined())
}

const NATIVE_OPS: &[(&str, NativeOp, usize)] = &[
    ("log", op_log, 2),
    ("kvGet", op_kv_get, 1),
    ("kvSet", op_kv_set, 2),
    ("kvRemove", op_kv_remove, 1),
    ("kvKeys", op_kv_keys, 0),
    ("notifySchedule", op_notify_schedule, 1),
    ("notifyCancel", op_notify_cancel, 1),
    ("notifyCancelAll", op_notify_cancel_all, 0),
    ("notifyList", op_notify_list, 0),
    ("notifyPermission", op_notify_permission, 0),
    ("notifyRequestPermission", op_notify_request_permission, 0),
    ("docGet", op_doc_get, 1),
    ("docSet", op_doc_set, 2),
    ("docUpdate", op_doc_update, 2),
    ("docRemove", op_doc_remove, 1),
    ("docPush", op_doc_push, 2),
    ("registerCleanup", op_register_cleanup, 2),
];

/// The engine and the mounts living in it. Not `Send`: it stays on the
/// thread that drives the host.
pub struct Sandbox {
    host: JsObject,
    cleanups: Registries,
    names: Vec<&'static str>,
    context: Context,
}

impl Sandbox {
    pub fn new(config: &PipelineConfig, services: HostServices) -> Result<Self, HostError> {
        let mut context = ContextBuilder::new()
            .build()
            .map_err(|err| HostError::EngineSetup(format!("failed to construct JS context: {err}")))?;
        let mut limits = RuntimeLimits::default();
        limits.set_loop_iteration_limit(config.loop_iteration_limit);
        limits.set_recursion_limit(ENGINE_RECURSION_LIMIT);
        context.set_runtime_limits(limits);

        let cleanups: Registries = Rc::default();
        let bridge = NativeBridge {
            services,
            cleanups: Rc::clone(&cleanups),
        };
        let mut init = ObjectInitializer::new(&mut context);
        for (name, op, length) in NATIVE_OPS {
            init.function(native(*op, &bridge), JsString::from(*name), *length);
        }
        let native_object = init.build();
        context
            .register_global_property(JsString::from("__native"), native_object, Attribute::all())
            .map_err(|err| HostError::EngineSetup(format!("installing native bridge failed: {err}")))?;

        let host = context
            .eval(Source::from_bytes(PRELUDE.as_bytes()))
            .map_err(|err| HostError::EngineSetup(format!("evaluating prelude failed: {err}")))?
            .as_object()
            .cloned()
            .ok_or_else(|| HostError::EngineSetup("prelude did not return a host object".into()))?;

        let mut sandbox = Self {
            host,
            cleanups,
            names: capabilities::capability_names(),
            context,
        };
        sandbox.configure(config)?;
        Ok(sandbox)
    }

    fn configure(&mut self, config: &PipelineConfig) -> Result<(), HostError> {
        let options = serde_json::json!({
            "capabilities": self.names,
            "maxRenderPasses": config.max_render_passes,
        });
        let raw = self
            .call_host("configure", &[js_str(&options.to_string())])
            .and_then(|value| self.string_of(&value))
            .map_err(|err| HostError::EngineSetup(format!("configuring runtime failed: {err}")))?;
        let report: ConfigureReport =
            serde_json::from_str(&raw).map_err(|err| HostError::Protocol(err.to_string()))?;
        if !report.missing.is_empty() {
            return Err(HostError::EngineSetup(format!(
                "runtime lacks capabilities: {}",
                report.missing.join(", ")
            )));
        }
        Ok(())
    }

    fn call_host(&mut self, method: &str, args: &[JsValue]) -> JsResult<JsValue> {
        let function = self.host.get(JsString::from(method), &mut self.context)?;
        let callable = function
            .as_callable()
            .cloned()
            .ok_or_else(|| type_error(&format!("host.{method} is not callable")))?;
        callable.call(&JsValue::from(self.host.clone()), args, &mut self.context)
    }

    fn string_of(&mut self, value: &JsValue) -> JsResult<String> {
        Ok(value.to_string(&mut self.context)?.to_std_string_escaped())
    }

    /// Call a host method that answers with a status word.
    fn call_status(&mut self, method: &str, args: &[JsValue]) -> Result<String, HostError> {
        let outcome = self
            .call_host(method, args)
            .and_then(|value| self.string_of(&value));
        match outcome {
            Ok(status) => Ok(status),
            Err(err) => {
                let message = err.to_string();
                self.abandon(&message);
                Err(HostError::Protocol(format!("host.{method} aborted: {message}")))
            }
        }
    }

    /// Reset after a call the engine aborted without unwinding.
    fn abandon(&mut self, message: &str) {
        tracing::warn!(target = "oracle", error = %message, "engine call aborted");
        if let Err(err) = self.call_host("abandonCurrent", &[js_str(message)]) {
            tracing::error!(target = "oracle", error = %err, "engine recovery failed");
        }
    }

    /// Evaluate a lowered module and extract its component.
    pub fn execute(&mut self, js: &str, mount: MountId) -> Result<Component, ExecutionError> {
        let wrapped = capabilities::wrap_module(js, &self.names);
        let factory = self
            .context
            .eval(Source::from_bytes(wrapped.as_bytes()))
            .map_err(|err| ExecutionError::Threw(err.to_string()))?;

        let result = match self.call_host("load", &[factory, JsValue::from(mount as f64)]) {
            Ok(result) => result,
            Err(err) => {
                let message = err.to_string();
                self.abandon(&message);
                return Err(ExecutionError::Threw(message));
            }
        };
        let Some(result) = result.as_object().cloned() else {
            return Err(ExecutionError::Threw("module loader returned no result".into()));
        };
        let field = |sandbox: &mut Self, name: &str| -> Result<JsValue, ExecutionError> {
            result
                .get(JsString::from(name), &mut sandbox.context)
                .map_err(|err| ExecutionError::Threw(err.to_string()))
        };
        let status = field(self, "status")?;
        let status = self
            .string_of(&status)
            .map_err(|err| ExecutionError::Threw(err.to_string()))?;
        match status.as_str() {
            "ok" => field(self, "component")?
                .as_object()
                .cloned()
                .map(Component)
                .ok_or_else(|| ExecutionError::NotComponent("undefined".into())),
            "missing" => Err(ExecutionError::NotExported),
            "invalid" => {
                let kind = field(self, "type")?;
                let kind = self
                    .string_of(&kind)
                    .unwrap_or_else(|_| "unknown".into());
                Err(ExecutionError::NotComponent(kind))
            }
            _ => {
                let message = field(self, "message")?;
                let message = self
                    .string_of(&message)
                    .unwrap_or_else(|err| err.to_string());
                Err(ExecutionError::Threw(message))
            }
        }
    }

    /// Start rendering `component` for `mount`. Trees arrive on the next
    /// [`Sandbox::settle`].
    pub fn mount(&mut self, mount: MountId, component: &Component, props: &Value) -> Result<(), HostError> {
        let args = [
            JsValue::from(mount as f64),
            JsValue::from(component.0.clone()),
            js_str(&props.to_string()),
        ];
        self.call_status("mount", &args).map(|_| ())
    }

    pub fn set_props(&mut self, mount: MountId, props: &Value) -> Result<(), HostError> {
        let args = [JsValue::from(mount as f64), js_str(&props.to_string())];
        match self.call_status("setProps", &args)?.as_str() {
            "ok" => Ok(()),
            _ => Err(HostError::NotReady(mount)),
        }
    }

    /// Invoke a handler from the last committed tree.
    pub fn dispatch(&mut self, mount: MountId, handler: &str, args: &[Value]) -> Result<(), HostError> {
        let payload = Value::Array(args.to_vec()).to_string();
        let call = [JsValue::from(mount as f64), js_str(handler), js_str(&payload)];
        match self.call_status("dispatch", &call)?.as_str() {
            "ok" => Ok(()),
            "unknown_handler" => Err(HostError::UnknownHandler(handler.to_string())),
            _ => Err(HostError::NotReady(mount)),
        }
    }

    /// Move the mount's virtual clock forward, firing due timers.
    pub fn advance(&mut self, mount: MountId, millis: u64) -> Result<(), HostError> {
        let args = [
            JsValue::from(mount as f64),
            JsValue::from(millis as f64),
            JsValue::from(MAX_TIMER_FIRINGS as f64),
        ];
        match self.call_status("advance", &args)?.as_str() {
            "ok" => Ok(()),
            _ => Err(HostError::NotReady(mount)),
        }
    }

    /// Tear down the mount's component, then run its registered disposers.
    pub fn unmount(&mut self, mount: MountId) {
        if let Err(err) = self.call_status("unmount", &[JsValue::from(mount as f64)]) {
            tracing::warn!(target = "oracle", mount, error = %err, "component teardown aborted");
        }
        self.run_cleanups(mount);
    }

    /// Disposers still pending for `mount`.
    pub fn pending_cleanups(&self, mount: MountId) -> usize {
        self.cleanups.borrow().get(&mount).map_or(0, CleanupRegistry::len)
    }

    fn run_cleanups(&mut self, mount: MountId) {
        let Some(mut registry) = self.cleanups.borrow_mut().remove(&mount) else {
            return;
        };
        let context = &mut self.context;
        let failures = registry.run_all(|disposer| {
            disposer
                .call(&JsValue::undefined(), &[], context)
                .map(|_| ())
        });
        tracing::debug!(target = "oracle", mount, failures, "cleanups drained");
    }

    /// Drain promise jobs and re-render dirty mounts until quiet.
    pub fn settle(&mut self) -> Settled {
        let mut settled = Settled::default();
        for _ in 0..MAX_SETTLE_ROUNDS {
            let _ = self.context.run_jobs();
            // A job aborted by a runtime limit leaves its guard open.
            if let Err(err) = self.call_host("abandonCurrent", &[js_str("execution aborted: runtime limit exceeded")]) {
                tracing::error!(target = "oracle", error = %err, "engine recovery failed");
            }
            let flushed = self
                .call_host("flush", &[])
                .and_then(|value| self.string_of(&value));
            let raw = match flushed {
                Ok(raw) => raw,
                Err(err) => {
                    self.abandon(&err.to_string());
                    continue;
                }
            };
            let report: FlushReport = match serde_json::from_str(&raw) {
                Ok(report) => report,
                Err(err) => {
                    tracing::error!(target = "oracle", error = %err, "unreadable flush report");
                    break;
                }
            };
            let rendered = report.rendered;
            settled.absorb(report);
            if rendered == 0 {
                break;
            }
        }
        for crash in &settled.crashed {
            self.run_cleanups(crash.mount);
        }
        settled
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("capabilities", &self.names.len())
            .field("registries", &self.cleanups.borrow().len())
            .finish_non_exhaustive()
    }
}

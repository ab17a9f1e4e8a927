use std::sync::Arc;
use std::time::Duration;

use oracle_host::{
    HostServices, OracleHost, PipelineConfig, Transform, TranspileError, TranspileOptions,
};
use serde_json::json;

use super::support::{self, error_sink, host, host_with, label, message, render, render_with, text, COUNTER};

const GREETING: &str = r#"export default function Greeting() {
  return <Text>Hello</Text>;
}
"#;

struct Broken;

impl Transform for Broken {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn transform(&self, _source: &str, _options: &TranspileOptions) -> Result<String, TranspileError> {
        Err(TranspileError::Failed("unsupported syntax".into()))
    }
}

#[tokio::test]
async fn concurrent_identical_sources_share_one_transpile() {
    let (mut host, _) = host();
    let a = host.mount(json!({}), None);
    let b = host.mount(json!({}), None);
    host.set_source(a, COUNTER).expect("a");
    host.set_source(b, COUNTER).expect("b");
    assert_eq!(host.pending_len(), 2);
    host.settle().await;

    assert_eq!(host.transform_count(), 1);
    assert_eq!(host.cache_len(), 1);
    assert_eq!(text(&host, a), "Count: 0Add");
    assert_eq!(text(&host, b), "Count: 0Add");
}

#[tokio::test]
async fn a_shared_failure_reaches_every_waiter() {
    let services = HostServices::in_memory();
    let mut host = OracleHost::with_transform(support::config(), services, Arc::new(Broken)).expect("host");
    let (first_cb, first_seen) = error_sink();
    let (second_cb, second_seen) = error_sink();
    let a = host.mount(json!({}), Some(first_cb));
    let b = host.mount(json!({}), Some(second_cb));
    host.set_source(a, GREETING).expect("a");
    host.set_source(b, GREETING).expect("b");
    host.settle().await;

    assert_eq!(host.transform_count(), 1);
    assert_eq!(label(&host, a), "failed");
    assert_eq!(label(&host, b), "failed");
    assert_eq!(host.cache_len(), 0);
    assert!(first_seen.borrow()[0].contains("E-ORC-1103"));
    assert!(second_seen.borrow()[0].contains("unsupported syntax"));
}

#[tokio::test]
async fn superseded_pipeline_results_are_discarded() {
    let config = PipelineConfig {
        debug_transpile_delay: Some(Duration::from_millis(30)),
        ..support::config()
    };
    let (mut host, _) = host_with(config, HostServices::in_memory());
    let id = host.mount(json!({}), None);
    host.set_source(id, COUNTER).expect("first");
    host.set_source(id, GREETING).expect("second");
    host.settle().await;

    assert_eq!(text(&host, id), "Hello");
    assert_eq!(host.transform_count(), 2);
    assert!(host.is_cached(GREETING));
    assert!(!host.is_cached(COUNTER));
}

#[tokio::test]
async fn unmount_before_completion_leaves_nothing_behind() {
    let (mut host, _) = host();
    let id = host.mount(json!({}), None);
    host.set_source(id, GREETING).expect("set source");
    host.unmount(id).expect("unmount");
    host.settle().await;

    assert!(host.view(id).is_err());
    assert_eq!(host.cache_len(), 0);
}

#[tokio::test]
async fn slow_fallback_transpile_times_out() {
    let config = PipelineConfig {
        use_worker: false,
        fallback_timeout: Duration::from_millis(20),
        debug_transpile_delay: Some(Duration::from_millis(200)),
        ..support::config()
    };
    let (mut host, _) = host_with(config, HostServices::in_memory());
    let (callback, seen) = error_sink();
    let id = render_with(&mut host, GREETING, json!({}), Some(callback)).await;

    assert_eq!(label(&host, id), "failed");
    assert!(message(&host, id).contains("took too long"));
    assert!(seen.borrow()[0].contains("E-ORC-1105"));
    assert_eq!(host.cache_len(), 0);
}

#[tokio::test]
async fn cleanups_run_once_in_order_even_when_one_throws() {
    let (mut host, services) = host();
    let code = r#"const KEY = 'last';
__registerCleanup(() => { throw new Error('first disposer failed'); });
__registerCleanup(() => AsyncStorage.setItem(KEY, 'second'));
__registerCleanup(() => AsyncStorage.setItem(KEY, 'third'));

export default function Tracker() {
  return <Text>tracking</Text>;
}
"#;
    let id = render(&mut host, code).await;
    assert_eq!(text(&host, id), "tracking");
    assert_eq!(services.kv.get("last").expect("get"), None);

    host.set_source(id, GREETING).expect("replace");
    assert_eq!(services.kv.get("last").expect("get").as_deref(), Some("third"));

    services.kv.remove("last").expect("reset");
    host.settle().await;
    host.unmount(id).expect("unmount");
    assert_eq!(services.kv.get("last").expect("get"), None);
}

#[tokio::test]
async fn unmount_runs_effect_cleanups() {
    let (mut host, services) = host();
    let code = r#"export default function Session() {
  useEffect(() => {
    return () => { AsyncStorage.setItem('session', 'closed'); };
  }, []);
  return <Text>open</Text>;
}
"#;
    let id = render(&mut host, code).await;
    assert_eq!(text(&host, id), "open");
    host.unmount(id).expect("unmount");
    assert_eq!(services.kv.get("session").expect("get").as_deref(), Some("closed"));
}

#[tokio::test]
async fn remount_recovers_a_crashed_mount_from_cache() {
    let (mut host, _) = host();
    let code = r#"export default function Summary({ data }) {
  return <Text>{data.items.length} items</Text>;
}
"#;
    let (callback, seen) = error_sink();
    let id = render_with(&mut host, code, json!({}), Some(callback)).await;
    assert_eq!(label(&host, id), "crashed");
    assert!(message(&host, id).contains("before it finished loading"));
    assert!(seen.borrow()[0].contains("E-ORC-1201"));

    host.set_props(id, json!({ "data": { "items": [1, 2, 3] } })).expect("props");
    host.remount(id).expect("remount");
    assert_eq!(text(&host, id), "3 items");
    assert_eq!(host.transform_count(), 1);
}

#[tokio::test]
async fn props_flow_into_a_live_mount() {
    let (mut host, _) = host();
    let code = r#"export default function Hello({ name }) {
  return <Text>Hi {name}</Text>;
}
"#;
    let id = render_with(&mut host, code, json!({ "name": "Ada" }), None).await;
    assert_eq!(text(&host, id), "Hi Ada");
    host.set_props(id, json!({ "name": "Grace" })).expect("props");
    assert_eq!(text(&host, id), "Hi Grace");
}

#[tokio::test]
async fn host_api_misuse_is_reported() {
    let (mut host, _) = host();
    assert!(host.set_source(99, GREETING).is_err());
    let id = host.mount(json!({}), None);
    assert!(matches!(host.dispatch(id, "0#onPress", &[]), Err(oracle_host::HostError::NotReady(_))));
    host.set_source(id, GREETING).expect("set source");
    host.settle().await;
    assert!(matches!(
        host.dispatch(id, "0#onPress", &[]),
        Err(oracle_host::HostError::UnknownHandler(_))
    ));
}

#[tokio::test]
async fn cache_evicts_least_recently_used_sources() {
    let config = PipelineConfig {
        cache_capacity: 2,
        ..support::config()
    };
    let (mut host, _) = host_with(config, HostServices::in_memory());
    let sources: Vec<String> = (0..3)
        .map(|n| format!("export default function V{n}() {{ return <Text>v{n}</Text>; }}\n"))
        .collect();
    for source in &sources {
        render(&mut host, source).await;
    }
    assert_eq!(host.cache_len(), 2);
    assert!(!host.is_cached(&sources[0]));
    assert!(host.is_cached(&sources[2]));

    host.clear_cache();
    assert_eq!(host.cache_len(), 0);
}

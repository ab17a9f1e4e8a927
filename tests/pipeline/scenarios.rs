use oracle_host::{autofix, preprocess, IssueKind, PipelineConfig};

use super::support::{self, error_sink, host, label, message, render, render_with, text, COUNTER};

const FIREBASE_SAVER: &str = r#"import { initializeApp } from 'firebase/app';
import { getDatabase, ref, set } from 'firebase/database';

const firebaseConfig = {
  apiKey: "x",
  appId: "1:206306883902:android:1878b63e74585e92abd46f",
};
const app = initializeApp(firebaseConfig);

export default function Saver() {
  const [saved, setSaved] = useState(false);
  const save = () => {
    set(ref(getDatabase(), 'flags/saved'), true).then(() => setSaved(true));
  };
  return (
    <View>
      <Text>{saved ? 'Saved' : 'Not saved'}</Text>
      <Button title="Save" onPress={save} />
    </View>
  );
}
"#;

#[test]
fn backing_service_config_is_stripped_before_anything_else() {
    let out = preprocess(FIREBASE_SAVER);
    assert!(!out.contains("firebaseConfig"), "{out}");
    assert!(!out.contains("1:206306883902:android"), "{out}");
    assert!(out.contains("export default function Saver()"), "{out}");
}

#[tokio::test]
async fn stripped_component_still_runs_against_the_document_store() {
    let (mut host, services) = host();
    let id = render(&mut host, FIREBASE_SAVER).await;
    assert_eq!(text(&host, id), "Not saved");

    host.press(id, "Save").expect("press");
    assert_eq!(text(&host, id), "Saved");
    assert_eq!(
        services.documents.get("flags/saved").expect("get"),
        serde_json::json!(true)
    );
}

#[test]
fn stray_quote_after_font_weight_is_repaired() {
    let out = autofix("const styles = StyleSheet.create({ title: { fontWeight:600\" } });");
    assert!(out.contains("fontWeight: '600'"), "{out}");
}

#[test]
fn dangling_dot_before_paren_is_removed() {
    assert_eq!(autofix("console.log(obj.)"), "console.log(obj)");
}

#[tokio::test]
async fn eval_fails_the_pipeline_without_caching() {
    let (mut host, _) = host();
    let code = r#"export default function Calc() {
  const result = eval("1 + 1");
  return <Text>{result}</Text>;
}
"#;
    let (callback, seen) = error_sink();
    let id = render_with(&mut host, code, serde_json::json!({}), Some(callback)).await;

    assert_eq!(label(&host, id), "failed");
    assert!(message(&host, id).contains("isn't allowed"));
    assert_eq!(host.cache_len(), 0);
    assert_eq!(host.transform_count(), 0);
    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("E-ORC-1102"), "{}", seen[0]);
    assert!(seen[0].contains("eval"), "{}", seen[0]);
}

#[test]
fn sanitizer_reports_every_offending_construct() {
    let code = r#"const fs = require('fs');
export default function Bad() {
  const f = new Function('return 1');
  return <Text>{process.env.HOME}</Text>;
}
"#;
    match oracle_host::sanitize(code) {
        Err(oracle_host::SanitizeError::Rejected(err)) => {
            let kinds: Vec<_> = err.issues.iter().map(|i| &i.kind).collect();
            assert!(kinds.iter().any(|k| matches!(k, IssueKind::ModuleLoad)), "{kinds:?}");
            assert!(kinds.iter().any(|k| matches!(k, IssueKind::DynamicFunction)), "{kinds:?}");
            assert!(kinds.iter().any(|k| matches!(k, IssueKind::ProcessAccess)), "{kinds:?}");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn identical_source_on_a_second_mount_is_a_cache_hit() {
    let (mut host, _) = host();
    let first = render(&mut host, COUNTER).await;
    assert_eq!(text(&host, first), "Count: 0Add");
    assert_eq!(host.transform_count(), 1);
    assert_eq!(host.cache_len(), 1);

    let second = host.mount(serde_json::json!({}), None);
    host.set_source(second, COUNTER).expect("set source");
    // Ready without settling: nothing went through the transpiler.
    assert_eq!(label(&host, second), "ready");
    assert_eq!(text(&host, second), "Count: 0Add");
    assert_eq!(host.transform_count(), 1);
    assert_eq!(host.pending_len(), 0);
}

#[tokio::test]
async fn nested_lists_are_fatal_unless_downgraded() {
    let code = r#"export default function Feed() {
  return (
    <ScrollView>
      <FlatList data={[1, 2]} renderItem={({ item }) => <Text>{item}</Text>} />
    </ScrollView>
  );
}
"#;
    let (mut strict, _) = host();
    let id = render(&mut strict, code).await;
    assert_eq!(label(&strict, id), "failed");
    assert!(message(&strict, id).contains("layout"), "{}", message(&strict, id));

    let lenient_config = PipelineConfig {
        structural_issues_fatal: false,
        ..support::config()
    };
    let (mut lenient, _) = support::host_with(lenient_config, oracle_host::HostServices::in_memory());
    let id = render(&mut lenient, code).await;
    assert_eq!(text(&lenient, id), "12");
}

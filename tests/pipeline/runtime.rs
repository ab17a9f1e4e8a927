use std::time::Duration;

use serde_json::json;

use super::support::{error_sink, host, label, message, render, render_with, text, tree, COUNTER};

#[tokio::test]
async fn state_survives_re_renders() {
    let (mut host, _) = host();
    let id = render(&mut host, COUNTER).await;
    let root = tree(&host, id);
    assert_eq!(root.find_by_test_id("count").map(|e| e.text()).as_deref(), Some("Count: 0"));
    let views = root.find_by_type("View");
    assert_eq!(views[0].props["style"], json!({ "flex": 1, "padding": 16 }));

    host.press(id, "Add").expect("press");
    host.press(id, "Add").expect("press");
    assert_eq!(text(&host, id), "Count: 2Add");
}

#[tokio::test]
async fn interval_timers_follow_the_virtual_clock() {
    let (mut host, _) = host();
    let code = r#"export default function Ticker() {
  const [ticks, setTicks] = useState(0);
  useEffect(() => {
    const id = setInterval(() => setTicks((t) => t + 1), 1000);
    return () => clearInterval(id);
  }, []);
  return <Text>Ticks: {ticks}</Text>;
}
"#;
    let id = render(&mut host, code).await;
    assert_eq!(text(&host, id), "Ticks: 0");
    host.advance_timers(id, Duration::from_millis(3_500)).expect("advance");
    assert_eq!(text(&host, id), "Ticks: 3");
    host.advance_timers(id, Duration::from_millis(500)).expect("advance");
    assert_eq!(text(&host, id), "Ticks: 4");
}

#[tokio::test]
async fn one_crashing_mount_leaves_its_neighbours_alone() {
    let (mut host, _) = host();
    let healthy = render(&mut host, COUNTER).await;
    let (callback, seen) = error_sink();
    let broken = render_with(
        &mut host,
        r#"export default function Report({ data }) {
  const rows = data.items.map((item) => <Text key={item.id}>{item.name}</Text>);
  return <View>{rows}</View>;
}
"#,
        json!({}),
        Some(callback),
    )
    .await;

    assert_eq!(label(&host, broken), "crashed");
    assert_eq!(seen.borrow().len(), 1);
    assert!(message(&host, broken).contains("TypeError"), "{}", message(&host, broken));

    host.press(healthy, "Add").expect("press");
    assert_eq!(text(&host, healthy), "Count: 1Add");
}

#[tokio::test]
async fn handler_errors_crash_the_mount() {
    let (mut host, _) = host();
    let code = r#"export default function Fragile() {
  const explode = () => { throw new Error('kaboom'); };
  return <Button title="Explode" onPress={explode} />;
}
"#;
    let id = render(&mut host, code).await;
    host.press(id, "Explode").expect("press");
    assert_eq!(label(&host, id), "crashed");
    assert!(message(&host, id).contains("kaboom"));
}

#[tokio::test]
async fn defensive_rewrites_tolerate_missing_collections() {
    let (mut host, _) = host();
    let code = r#"export default function Todos() {
  const [items] = useState(null);
  const done = items.filter((i) => i.done);
  return <Text>{done.length} done of {items.length}</Text>;
}
"#;
    let id = render(&mut host, code).await;
    assert_eq!(text(&host, id), "0 done of 0");
}

#[tokio::test]
async fn defensive_rewrites_cover_objects_numbers_and_undefined() {
    let (mut host, _) = host();
    let code = r#"export default function Odd() {
  const obj = {};
  const n = 5;
  let missing;
  const mapped = obj.map((x) => x * 2);
  const kept = n.filter(Boolean);
  const none = missing.map((x) => x);
  return (
    <View>
      <Text testID="lengths">{String(obj.length)}|{String(n.length)}|{String(missing.length)}</Text>
      <Text testID="sizes">{mapped.length}|{kept.length}|{none.length}</Text>
      <Text testID="real">{'abc'.length}|{[1, 2].length}</Text>
    </View>
  );
}
"#;
    let id = render(&mut host, code).await;
    let root = tree(&host, id);
    let line = |test_id: &str| root.find_by_test_id(test_id).map(|e| e.text()).unwrap_or_default();
    assert_eq!(line("lengths"), "0|0|0");
    assert_eq!(line("sizes"), "0|0|0");
    assert_eq!(line("real"), "3|2");
}

#[tokio::test]
async fn folding_a_missing_collection_yields_the_initial_value() {
    let (mut host, _) = host();
    let code = r#"export default function Totals() {
  const [data] = useState(null);
  const bare = data.reduce((a, b) => a + b);
  const seeded = data.reduce((a, b) => a + b, 10);
  const fromObject = ({}).reduce((a, b) => a + b, 'none');
  return <Text>{String(bare)}|{seeded}|{fromObject}</Text>;
}
"#;
    let id = render(&mut host, code).await;
    assert_eq!(label(&host, id), "ready");
    assert_eq!(text(&host, id), "undefined|10|none");
}

#[tokio::test]
async fn setting_state_during_render_is_cut_off() {
    let (mut host, _) = host();
    let code = r#"export default function Runaway() {
  const [n, setN] = useState(0);
  setN(n + 1);
  return <Text>{n}</Text>;
}
"#;
    let id = render(&mut host, code).await;
    assert_eq!(label(&host, id), "crashed");
    assert!(message(&host, id).contains("Too many re-renders"));
}

#[tokio::test]
async fn class_components_update_through_set_state() {
    let (mut host, _) = host();
    let code = r#"class Toggle extends React.Component {
  state = { on: false };
  flip = () => this.setState({ on: !this.state.on });
  render() {
    return <Button title={this.state.on ? 'On' : 'Off'} onPress={this.flip} />;
  }
}

export default Toggle;
"#;
    let id = render(&mut host, code).await;
    let button = tree(&host, id).find_by_type("Button")[0].clone();
    assert_eq!(button.prop_str("title"), Some("Off"));
    host.press(id, "Off").expect("press");
    let button = tree(&host, id).find_by_type("Button")[0].clone();
    assert_eq!(button.prop_str("title"), Some("On"));
}

#[tokio::test]
async fn context_reaches_nested_consumers() {
    let (mut host, _) = host();
    let code = r#"const Mode = createContext('light');

function Label() {
  const mode = useContext(Mode);
  return <Text>Mode: {mode}</Text>;
}

export default function App() {
  return (
    <Mode.Provider value="dark">
      <Label />
    </Mode.Provider>
  );
}
"#;
    let id = render(&mut host, code).await;
    assert_eq!(text(&host, id), "Mode: dark");
}

#[tokio::test]
async fn lists_render_items_in_order() {
    let (mut host, _) = host();
    let code = r#"interface Item { id: string; title: string }

const DATA: Item[] = [
  { id: 'a', title: 'Milk' },
  { id: 'b', title: 'Eggs' },
];

export default function Groceries() {
  return (
    <FlatList
      data={DATA}
      keyExtractor={(item: Item) => item.id}
      renderItem={({ item }: { item: Item }) => <Text>{item.title}</Text>}
      ListEmptyComponent={<Text>Nothing yet</Text>}
    />
  );
}
"#;
    let id = render(&mut host, code).await;
    let list = tree(&host, id);
    assert_eq!(list.text(), "MilkEggs");
    assert_eq!(list.find_by_type("Text").len(), 2);
}

#[tokio::test]
async fn unknown_names_fail_at_load_time() {
    let (mut host, _) = host();
    let code = r#"const client = createClient();

export default function App() {
  return <Text>{client.name}</Text>;
}
"#;
    let (callback, seen) = error_sink();
    let id = render_with(&mut host, code, json!({}), Some(callback)).await;
    assert_eq!(label(&host, id), "failed");
    assert!(seen.borrow()[0].contains("E-ORC-1108"));
    assert!(seen.borrow()[0].contains("createClient"));
    assert_eq!(host.cache_len(), 0);
}

#[tokio::test]
async fn modules_without_a_component_fail() {
    let (mut host, _) = host();
    let id = render(&mut host, "export const answer = 42;\n").await;
    assert_eq!(label(&host, id), "failed");
    assert!(message(&host, id).contains("didn't export a component"));
}

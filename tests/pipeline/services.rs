use std::sync::Arc;

use oracle_host::services::MemoryNotificationCenter;
use oracle_host::{HostServices, PermissionStatus, Trigger};
use serde_json::json;

use super::support::{self, host, host_with, label, render, text, tree};

const REMINDER: &str = r#"import * as Notifications from 'expo-notifications';

export default function Reminder() {
  const [status, setStatus] = useState('idle');
  const schedule = async () => {
    const id = await Notifications.scheduleNotificationAsync({
      content: { title: 'Stretch', body: 'Time to move' },
      trigger: { seconds: 90 },
    });
    setStatus(id ? 'scheduled' : 'failed');
  };
  return (
    <View>
      <Text testID="status">{status}</Text>
      <Button title="Remind me" onPress={schedule} />
    </View>
  );
}
"#;

fn status(host: &oracle_host::OracleHost, id: oracle_host::MountId) -> String {
    tree(host, id)
        .find_by_test_id("status")
        .map(|e| e.text())
        .unwrap_or_default()
}

#[tokio::test]
async fn async_storage_reads_and_writes_through_the_store() {
    let (mut host, services) = host();
    services.kv.set("visits", "4").expect("seed");
    let code = r#"import AsyncStorage from '@react-native-async-storage/async-storage';

export default function Visits() {
  const [visits, setVisits] = useState(0);
  useEffect(() => {
    AsyncStorage.getItem('visits').then((raw) => {
      const next = (raw ? parseInt(raw, 10) : 0) + 1;
      setVisits(next);
      return AsyncStorage.setItem('visits', String(next));
    });
  }, []);
  return <Text>Visits: {visits}</Text>;
}
"#;
    let id = render(&mut host, code).await;
    assert_eq!(text(&host, id), "Visits: 5");
    assert_eq!(services.kv.get("visits").expect("get").as_deref(), Some("5"));
}

#[tokio::test]
async fn notifications_are_scheduled_with_normalized_triggers() {
    let (mut host, services) = host();
    let id = render(&mut host, REMINDER).await;
    assert_eq!(status(&host, id), "idle");

    host.press(id, "Remind me").expect("press");
    assert_eq!(status(&host, id), "scheduled");

    let scheduled = services.notifications.scheduled().expect("list");
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].content["title"], json!("Stretch"));
    assert_eq!(
        scheduled[0].trigger,
        Trigger::TimeInterval {
            seconds: 90,
            repeats: false
        }
    );
}

#[tokio::test]
async fn a_refused_notification_resolves_to_null() {
    let services = HostServices {
        notifications: Arc::new(MemoryNotificationCenter::with_permission(PermissionStatus::Denied)),
        ..HostServices::in_memory()
    };
    let (mut host, services) = host_with(support::config(), services);
    let id = render(&mut host, REMINDER).await;

    host.press(id, "Remind me").expect("press");
    assert_eq!(status(&host, id), "failed");
    assert!(services.notifications.scheduled().expect("list").is_empty());
}

#[tokio::test]
async fn document_listeners_see_pushed_children() {
    let (mut host, services) = host();
    let code = r#"import { getDatabase, ref, push, onValue } from 'firebase/database';

export default function Notes() {
  const [notes, setNotes] = useState([]);
  useEffect(() => {
    const unsubscribe = onValue(ref(getDatabase(), 'notes'), (snapshot) => {
      setNotes(Object.values(snapshot.val() || {}));
    });
    return unsubscribe;
  }, []);
  const add = () => push(ref(getDatabase(), 'notes'), { text: 'note ' + (notes.length + 1) });
  return (
    <View>
      <Text testID="count">{notes.length} notes</Text>
      {notes.map((note, index) => <Text key={index}>{note.text}</Text>)}
      <Button title="Add note" onPress={add} />
    </View>
  );
}
"#;
    let id = render(&mut host, code).await;
    let count = |host: &oracle_host::OracleHost| {
        tree(host, id)
            .find_by_test_id("count")
            .map(|e| e.text())
            .unwrap_or_default()
    };
    assert_eq!(count(&host), "0 notes");

    host.press(id, "Add note").expect("press");
    host.press(id, "Add note").expect("press");
    assert_eq!(count(&host), "2 notes");
    assert!(text(&host, id).contains("note 1note 2"), "{}", text(&host, id));

    let stored = services.documents.get("notes").expect("get");
    assert_eq!(stored.as_object().map(|m| m.len()), Some(2));
}

#[tokio::test]
async fn parent_updates_reach_listeners_on_nested_paths() {
    let (mut host, services) = host();
    services
        .documents
        .set("profile", json!({ "name": "Ada" }))
        .expect("seed");
    let code = r#"export default function Profile() {
  const [name, setName] = useState('');
  useEffect(() => onValue(ref(getDatabase(), 'profile/name'), (snap) => setName(snap.val() || '')), []);
  const rename = () => update(ref(getDatabase(), 'profile'), { name: 'Grace' });
  return (
    <View>
      <Text testID="name">{name}</Text>
      <Button title="Rename" onPress={rename} />
    </View>
  );
}
"#;
    let id = render(&mut host, code).await;
    let name = |host: &oracle_host::OracleHost| {
        tree(host, id)
            .find_by_test_id("name")
            .map(|e| e.text())
            .unwrap_or_default()
    };
    assert_eq!(name(&host), "Ada");
    host.press(id, "Rename").expect("press");
    assert_eq!(name(&host), "Grace");
}

#[tokio::test]
async fn unserializable_notification_content_resolves_to_null() {
    let (mut host, services) = host();
    let code = r#"export default function Loop() {
  const [status, setStatus] = useState('idle');
  const schedule = () => {
    const content = { title: 'Loop' };
    content.self = content;
    Notifications.scheduleNotificationAsync({ content, trigger: null })
      .then((id) => setStatus(id === null ? 'null' : 'scheduled'));
  };
  return (
    <View>
      <Text testID="status">{status}</Text>
      <Button title="Schedule" onPress={schedule} />
    </View>
  );
}
"#;
    let id = render(&mut host, code).await;
    host.press(id, "Schedule").expect("press");
    assert_eq!(label(&host, id), "ready");
    assert_eq!(status(&host, id), "null");
    assert!(services.notifications.scheduled().expect("list").is_empty());
}

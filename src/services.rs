//! Host-side services the sandbox reaches through `__native`.
//!
//! Each is a trait so embedders can back it with real storage; the in-memory
//! implementations here are what the CLI and tests use.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::notifications::Trigger;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
    fn keys(&self) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Granted,
    Denied,
    Undetermined,
}

impl PermissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionStatus::Granted => "granted",
            PermissionStatus::Denied => "denied",
            PermissionStatus::Undetermined => "undetermined",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub id: String,
    pub content: Value,
    pub trigger: Trigger,
}

pub trait NotificationCenter: Send + Sync {
    fn schedule(&self, content: Value, trigger: Trigger) -> anyhow::Result<String>;
    fn cancel(&self, id: &str) -> anyhow::Result<()>;
    fn cancel_all(&self) -> anyhow::Result<()>;
    fn scheduled(&self) -> anyhow::Result<Vec<ScheduledNotification>>;
    fn permission(&self) -> anyhow::Result<PermissionStatus>;
    fn request_permission(&self) -> anyhow::Result<PermissionStatus>;
}

/// Tree-shaped remote data addressed by slash-separated paths.
pub trait DocumentStore: Send + Sync {
    fn get(&self, path: &str) -> anyhow::Result<Value>;
    fn set(&self, path: &str, value: Value) -> anyhow::Result<()>;
    /// Shallow merge of `fields` into the object at `path`.
    fn update(&self, path: &str, fields: Map<String, Value>) -> anyhow::Result<()>;
    fn remove(&self, path: &str) -> anyhow::Result<()>;
    /// Store `value` under a fresh, time-ordered child key and return the key.
    fn push(&self, path: &str, value: Value) -> anyhow::Result<String>;
}

/// The services handed to one sandbox.
#[derive(Clone)]
pub struct HostServices {
    pub kv: Arc<dyn KeyValueStore>,
    pub notifications: Arc<dyn NotificationCenter>,
    pub documents: Arc<dyn DocumentStore>,
}

impl HostServices {
    pub fn in_memory() -> Self {
        Self {
            kv: Arc::new(MemoryKeyValueStore::default()),
            notifications: Arc::new(MemoryNotificationCenter::default()),
            documents: Arc::new(MemoryDocumentStore::default()),
        }
    }
}

impl Default for HostServices {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.entries.lock().keys().cloned().collect())
    }
}

pub struct MemoryNotificationCenter {
    scheduled: Mutex<Vec<ScheduledNotification>>,
    permission: Mutex<PermissionStatus>,
}

impl Default for MemoryNotificationCenter {
    fn default() -> Self {
        Self {
            scheduled: Mutex::new(Vec::new()),
            permission: Mutex::new(PermissionStatus::Undetermined),
        }
    }
}

impl MemoryNotificationCenter {
    pub fn with_permission(status: PermissionStatus) -> Self {
        Self {
            scheduled: Mutex::new(Vec::new()),
            permission: Mutex::new(status),
        }
    }
}

impl NotificationCenter for MemoryNotificationCenter {
    fn schedule(&self, content: Value, trigger: Trigger) -> anyhow::Result<String> {
        if *self.permission.lock() == PermissionStatus::Denied {
            anyhow::bail!("notification permission denied");
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.scheduled.lock().push(ScheduledNotification {
            id: id.clone(),
            content,
            trigger,
        });
        Ok(id)
    }

    fn cancel(&self, id: &str) -> anyhow::Result<()> {
        self.scheduled.lock().retain(|n| n.id != id);
        Ok(())
    }

    fn cancel_all(&self) -> anyhow::Result<()> {
        self.scheduled.lock().clear();
        Ok(())
    }

    fn scheduled(&self) -> anyhow::Result<Vec<ScheduledNotification>> {
        Ok(self.scheduled.lock().clone())
    }

    fn permission(&self) -> anyhow::Result<PermissionStatus> {
        Ok(*self.permission.lock())
    }

    fn request_permission(&self) -> anyhow::Result<PermissionStatus> {
        let mut status = self.permission.lock();
        if *status == PermissionStatus::Undetermined {
            *status = PermissionStatus::Granted;
        }
        Ok(*status)
    }
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    root: Mutex<Value>,
    push_seq: Mutex<HashMap<i64, u32>>,
}

impl MemoryDocumentStore {
    fn next_push_key(&self) -> String {
        let now = Utc::now().timestamp_millis();
        let mut seq = self.push_seq.lock();
        seq.retain(|ms, _| *ms == now);
        let n = seq.entry(now).or_insert(0);
        *n += 1;
        format!("-{now:013}{:04}", *n)
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn lookup<'v>(root: &'v Value, path: &[&str]) -> Option<&'v Value> {
    path.iter().try_fold(root, |node, seg| node.get(*seg))
}

/// Walk to `path`, turning anything that is not an object into one.
fn lookup_mut<'v>(root: &'v mut Value, path: &[&str]) -> &'v mut Value {
    let mut node = root;
    for seg in path {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map.entry((*seg).to_string()).or_insert(Value::Null),
            other => other,
        };
    }
    node
}

impl DocumentStore for MemoryDocumentStore {
    fn get(&self, path: &str) -> anyhow::Result<Value> {
        let root = self.root.lock();
        Ok(lookup(&root, &segments(path)).cloned().unwrap_or(Value::Null))
    }

    fn set(&self, path: &str, value: Value) -> anyhow::Result<()> {
        if value.is_null() {
            return self.remove(path);
        }
        let segs = segments(path);
        let mut root = self.root.lock();
        *lookup_mut(&mut root, &segs) = value;
        Ok(())
    }

    fn update(&self, path: &str, fields: Map<String, Value>) -> anyhow::Result<()> {
        let segs = segments(path);
        let mut root = self.root.lock();
        let target = lookup_mut(&mut root, &segs);
        if !target.is_object() {
            *target = Value::Object(Map::new());
        }
        if let Value::Object(map) = target {
            for (key, value) in fields {
                if value.is_null() {
                    map.remove(&key);
                } else {
                    map.insert(key, value);
                }
            }
        }
        Ok(())
    }

    fn remove(&self, path: &str) -> anyhow::Result<()> {
        let segs = segments(path);
        let mut root = self.root.lock();
        match segs.split_last() {
            None => *root = Value::Null,
            Some((last, parent)) => {
                let parent = parent
                    .iter()
                    .try_fold(&mut *root, |node, seg| node.get_mut(*seg));
                if let Some(Value::Object(map)) = parent {
                    map.remove(*last);
                }
            }
        }
        Ok(())
    }

    fn push(&self, path: &str, value: Value) -> anyhow::Result<String> {
        let key = self.next_push_key();
        let child = if path.trim_matches('/').is_empty() {
            key.clone()
        } else {
            format!("{}/{key}", path.trim_end_matches('/'))
        };
        self.set(&child, value)?;
        Ok(key)
    }
}

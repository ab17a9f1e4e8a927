use std::cell::RefCell;
use std::rc::Rc;

use oracle_host::{
    ErrorCallback, HostServices, MountId, MountView, OracleHost, PipelineConfig, PipelineError,
    RenderTree,
};
use serde_json::{json, Value};

pub const COUNTER: &str = r#"import React, { useState } from 'react';
import { View, Text, TouchableOpacity, StyleSheet } from 'react-native';

export default function Counter() {
  const [count, setCount] = useState<number>(0);
  return (
    <View style={styles.container}>
      <Text testID="count">Count: {count}</Text>
      <TouchableOpacity onPress={() => setCount(count + 1)}>
        <Text>Add</Text>
      </TouchableOpacity>
    </View>
  );
}

const styles = StyleSheet.create({
  container: { flex: 1, padding: 16 },
});
"#;

pub fn config() -> PipelineConfig {
    PipelineConfig::default()
}

pub fn host() -> (OracleHost, HostServices) {
    host_with(config(), HostServices::in_memory())
}

pub fn host_with(config: PipelineConfig, services: HostServices) -> (OracleHost, HostServices) {
    let host = OracleHost::with_services(config, services.clone()).expect("host");
    (host, services)
}

/// Mount `code` with no props and wait for the pipeline.
pub async fn render(host: &mut OracleHost, code: &str) -> MountId {
    render_with(host, code, json!({}), None).await
}

pub async fn render_with(
    host: &mut OracleHost,
    code: &str,
    props: Value,
    on_error: Option<ErrorCallback>,
) -> MountId {
    let id = host.mount(props, on_error);
    host.set_source(id, code).expect("set source");
    host.settle().await;
    id
}

pub fn tree(host: &OracleHost, id: MountId) -> RenderTree {
    match host.view(id).expect("view") {
        MountView::Ready(tree) => tree.clone(),
        other => panic!("mount {id} is {}: {}", other.label(), other.to_json()),
    }
}

pub fn text(host: &OracleHost, id: MountId) -> String {
    tree(host, id).text()
}

pub fn label(host: &OracleHost, id: MountId) -> &'static str {
    host.view(id).expect("view").label()
}

pub fn message(host: &OracleHost, id: MountId) -> String {
    match host.view(id).expect("view") {
        MountView::Failed { message } | MountView::Crashed { message } => message.to_string(),
        other => panic!("mount {id} is {}", other.label()),
    }
}

/// Error callback that records every error it sees.
pub fn error_sink() -> (ErrorCallback, Rc<RefCell<Vec<String>>>) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let callback: ErrorCallback = Box::new(move |err: &PipelineError| sink.borrow_mut().push(err.to_string()));
    (callback, seen)
}

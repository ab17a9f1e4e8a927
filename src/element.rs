//! Committed render output as seen by the UI layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Props key under which function props are replaced by a dispatch handle.
pub const HANDLER_KEY: &str = "$handler";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderTree(pub Vec<Node>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Text(String),
    Element(Element),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub props: Map<String, Value>,
    #[serde(default)]
    pub children: Vec<Node>,
}

impl RenderTree {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every element in document order.
    pub fn elements(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        for node in &self.0 {
            node.collect_elements(&mut out);
        }
        out
    }

    pub fn find_by_type(&self, kind: &str) -> Vec<&Element> {
        self.elements().into_iter().filter(|e| e.kind == kind).collect()
    }

    pub fn find_by_test_id(&self, id: &str) -> Option<&Element> {
        self.elements()
            .into_iter()
            .find(|e| e.props.get("testID").and_then(Value::as_str) == Some(id))
    }

    /// Concatenated text of the whole tree.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.0 {
            node.collect_text(&mut out);
        }
        out
    }

    /// Innermost element carrying `prop` as a handler whose text (or `title`,
    /// for `Button`) contains `label`. This is how a test or the CLI "presses
    /// a button".
    pub fn handler_for_text(&self, label: &str, prop: &str) -> Option<String> {
        self.elements()
            .into_iter()
            .filter(|e| e.handler(prop).is_some() && e.label().contains(label))
            .min_by_key(|e| e.label().len())
            .and_then(|e| e.handler(prop))
    }
}

impl Node {
    fn collect_elements<'a>(&'a self, out: &mut Vec<&'a Element>) {
        if let Node::Element(el) = self {
            out.push(el);
            for child in &el.children {
                child.collect_elements(out);
            }
        }
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            Node::Text(t) => out.push_str(t),
            Node::Element(el) => {
                for child in &el.children {
                    child.collect_text(out);
                }
            }
        }
    }
}

impl Element {
    pub fn text(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            child.collect_text(&mut out);
        }
        out
    }

    /// Handle id for a function prop such as `onPress`.
    pub fn handler(&self, prop: &str) -> Option<String> {
        self.props
            .get(prop)?
            .get(HANDLER_KEY)?
            .as_str()
            .map(str::to_owned)
    }

    pub fn prop_str(&self, prop: &str) -> Option<&str> {
        self.props.get(prop).and_then(Value::as_str)
    }

    fn label(&self) -> String {
        match self.prop_str("title") {
            Some(title) if self.children.is_empty() => title.to_owned(),
            _ => self.text(),
        }
    }
}

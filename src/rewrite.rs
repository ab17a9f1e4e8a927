//! Source-to-source rewriting over a tree-sitter syntax tree.
//!
//! A pass walks the tree and copies source text through unchanged, except
//! where `rewrite` claims a node and writes its own replacement. Text between
//! sibling nodes (whitespace, punctuation outside any child) is copied
//! verbatim, so unclaimed regions round-trip byte for byte.

use tree_sitter::Node;

use crate::error::TranspileError;

pub(crate) trait Rewrite<'s> {
    fn source(&self) -> &'s str;

    fn out(&mut self) -> &mut String;

    /// Write a replacement for `node` and return `true`, or return `false` to
    /// copy it through with its children visited.
    fn rewrite(&mut self, node: Node<'_>) -> Result<bool, TranspileError>;

    fn emit(&mut self, node: Node<'_>) -> Result<(), TranspileError> {
        if self.rewrite(node)? {
            return Ok(());
        }
        self.emit_filtered(node, |_| true)
    }

    /// Copy `node`, visiting children for which `keep` holds and dropping the rest.
    fn emit_filtered<F>(&mut self, node: Node<'_>, keep: F) -> Result<(), TranspileError>
    where
        F: Fn(Node<'_>) -> bool,
    {
        let src = self.source();
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        if children.is_empty() {
            self.push(&src[node.start_byte()..node.end_byte()]);
            return Ok(());
        }
        let mut pos = node.start_byte();
        for child in children {
            self.push(&src[pos..child.start_byte()]);
            if keep(child) {
                self.emit(child)?;
            }
            pos = child.end_byte();
        }
        self.push(&src[pos..node.end_byte()]);
        Ok(())
    }

    fn push(&mut self, text: &str) {
        self.out().push_str(text);
    }

    fn text(&self, node: Node<'_>) -> &'s str {
        &self.source()[node.start_byte()..node.end_byte()]
    }
}

/// Named children, skipping comments.
pub(crate) fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect()
}

pub(crate) fn has_token(node: Node<'_>, token: &str) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|child| !child.is_named() && child.kind() == token);
    found
}

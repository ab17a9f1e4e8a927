//! Defensive rewrites over lowered JavaScript.
//!
//! Collection methods and `.length` reads are routed through prelude helpers
//! that substitute an empty array when the receiver is missing, so data that
//! has not loaded yet renders as nothing instead of crashing the boundary.

use tree_sitter::Node;

use crate::error::TranspileError;
use crate::rewrite::Rewrite;
use crate::sanitize::parse_tsx;

pub const GUARDED_METHODS: &[&str] = &[
    "filter", "map", "reduce", "find", "forEach", "some", "every", "includes",
];

pub fn apply_guards(js: &str) -> Result<String, TranspileError> {
    let tree = parse_tsx(js).map_err(|err| TranspileError::Failed(format!("lowered output did not reparse: {err}")))?;
    let mut pass = Guarding {
        src: js,
        out: String::with_capacity(js.len() + js.len() / 8),
        rewrites: 0,
    };
    pass.emit(tree.root_node())?;
    if pass.rewrites > 0 {
        tracing::trace!(target = "oracle", rewrites = pass.rewrites, "defensive guards inserted");
    }
    Ok(pass.out)
}

struct Guarding<'s> {
    src: &'s str,
    out: String,
    rewrites: usize,
}

impl<'s> Rewrite<'s> for Guarding<'s> {
    fn source(&self) -> &'s str {
        self.src
    }

    fn out(&mut self) -> &mut String {
        &mut self.out
    }

    fn rewrite(&mut self, node: Node<'_>) -> Result<bool, TranspileError> {
        if node.kind() != "member_expression" || node.child_by_field_name("optional_chain").is_some() {
            return Ok(false);
        }
        let (Some(object), Some(property)) = (node.child_by_field_name("object"), node.child_by_field_name("property"))
        else {
            return Ok(false);
        };
        if property.kind() != "property_identifier" || object.kind() == "super" || is_write_target(node) {
            return Ok(false);
        }
        let name = self.text(property);
        if name == "length" {
            self.push("__len(");
            self.emit(object)?;
            self.push(")");
        } else if GUARDED_METHODS.contains(&name) {
            self.push("__seq(");
            self.emit(object)?;
            self.push(&format!(", \"{name}\").{name}"));
        } else {
            return Ok(false);
        }
        self.rewrites += 1;
        Ok(true)
    }
}

fn is_write_target(node: Node<'_>) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    match parent.kind() {
        "assignment_expression" | "augmented_assignment_expression" => {
            parent.child_by_field_name("left").map(|l| l.id()) == Some(node.id())
        }
        "update_expression" => true,
        "unary_expression" => parent
            .child_by_field_name("operator")
            .map(|op| op.kind() == "delete")
            .unwrap_or(false),
        _ => false,
    }
}

//! TSX to plain JavaScript.
//!
//! Type syntax is erased, enums become objects, JSX becomes factory calls and
//! module statements become `exports.*` assignments. Module loading does not
//! exist in the sandbox: imports only introduce local aliases for names the
//! capability table already binds.

use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::Node;

use super::TranspileOptions;
use crate::error::TranspileError;
use crate::rewrite::{has_token, named_children, Rewrite};
use crate::sanitize::parse_tsx;

/// Nodes that exist only for the type checker.
const ERASED_KINDS: &[&str] = &[
    "type_annotation",
    "type_arguments",
    "type_parameters",
    "interface_declaration",
    "type_alias_declaration",
    "ambient_declaration",
    "function_signature",
    "method_signature",
    "abstract_method_signature",
    "index_signature",
    "implements_clause",
    "accessibility_modifier",
    "override_modifier",
    "asserts_annotation",
    "type_predicate_annotation",
    "opting_type_annotation",
    "omitting_type_annotation",
    "adding_type_annotation",
    "decorator",
    "import_alias",
];

/// Tokens dropped wherever they appear inside the given node kinds.
const MODIFIER_TOKENS: &[&str] = &["?", "!", "readonly", "abstract", "declare", "override"];

/// Local name bound for a module's default (or namespace) import.
const DEFAULT_IMPORTS: &[(&str, &str)] = &[
    ("react", "React"),
    ("@react-native-async-storage/async-storage", "AsyncStorage"),
    ("expo-notifications", "Notifications"),
    ("expo-permissions", "Permissions"),
    ("expo-router", "router"),
];

const ICON_FAMILIES: &[&str] = &[
    "Ionicons",
    "MaterialIcons",
    "MaterialCommunityIcons",
    "Feather",
    "FontAwesome",
    "FontAwesome5",
    "AntDesign",
    "Entypo",
];

static ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[xX][0-9a-fA-F]{1,6}|#[0-9]{1,7}|[A-Za-z][A-Za-z0-9]{1,31});").expect("entity regex"));

pub fn lower(src: &str, options: &TranspileOptions) -> Result<String, TranspileError> {
    let tree = parse_tsx(src).map_err(|err| TranspileError::Failed(err.to_string()))?;
    let mut lowering = Lowering {
        src,
        out: String::with_capacity(src.len() + src.len() / 4),
        options,
    };
    lowering.emit(tree.root_node())?;
    Ok(lowering.out)
}

struct Lowering<'s> {
    src: &'s str,
    out: String,
    options: &'s TranspileOptions,
}

impl<'s> Rewrite<'s> for Lowering<'s> {
    fn source(&self) -> &'s str {
        self.src
    }

    fn out(&mut self) -> &mut String {
        &mut self.out
    }

    fn rewrite(&mut self, node: Node<'_>) -> Result<bool, TranspileError> {
        let kind = node.kind();
        if ERASED_KINDS.contains(&kind) {
            return Ok(true);
        }
        match kind {
            "as_expression" | "satisfies_expression" | "non_null_expression" | "instantiation_expression" => {
                if let Some(inner) = named_children(node).first() {
                    self.emit(*inner)?;
                }
                Ok(true)
            }
            "required_parameter"
            | "optional_parameter"
            | "public_field_definition"
            | "method_definition"
            | "variable_declarator"
            | "abstract_class_declaration"
            | "property_signature" => {
                if kind == "public_field_definition" && has_token(node, "declare") {
                    return Ok(true);
                }
                self.emit_filtered(node, |child| {
                    child.is_named() || !MODIFIER_TOKENS.contains(&child.kind())
                })?;
                Ok(true)
            }
            "enum_declaration" => {
                self.lower_enum(node)?;
                Ok(true)
            }
            "import_statement" => {
                self.lower_import(node);
                Ok(true)
            }
            "export_statement" => {
                self.lower_export(node)?;
                Ok(true)
            }
            "jsx_element" | "jsx_self_closing_element" => {
                self.lower_jsx(node)?;
                Ok(true)
            }
            "internal_module" | "module" => {
                tracing::debug!(target = "oracle", "namespace declaration dropped during lowering");
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl<'s> Lowering<'s> {
    /// `enum E { A, B = 5, C = "c" }` becomes a `var` holding the usual
    /// two-way mapping for numeric members.
    fn lower_enum(&mut self, node: Node<'_>) -> Result<(), TranspileError> {
        let name = node
            .child_by_field_name("name")
            .map(|n| self.text(n))
            .ok_or_else(|| TranspileError::Failed("enum without a name".to_string()))?;
        self.push(&format!("var {name} = (function (e) {{"));
        let mut previous: Option<String> = None;
        if let Some(body) = node.child_by_field_name("body") {
            for member in named_children(body) {
                let (key_node, value) = if member.kind() == "enum_assignment" {
                    (member.child_by_field_name("name"), member.child_by_field_name("value"))
                } else {
                    (Some(member), None)
                };
                let Some(key_node) = key_node else { continue };
                let key = quote_property(self.text(key_node));
                match value {
                    Some(value) if matches!(value.kind(), "string" | "template_string") => {
                        self.push(&format!(" e[{key}] = "));
                        self.emit(value)?;
                        self.push(";");
                    }
                    Some(value) => {
                        self.push(&format!(" e[e[{key}] = ("));
                        self.emit(value)?;
                        self.push(&format!(")] = {key};"));
                    }
                    None => {
                        let next = match &previous {
                            Some(prev) => format!("e[{prev}] + 1"),
                            None => "0".to_string(),
                        };
                        self.push(&format!(" e[e[{key}] = {next}] = {key};"));
                    }
                }
                previous = Some(key);
            }
        }
        self.push(" return e; })({});");
        Ok(())
    }

    fn lower_import(&mut self, node: Node<'_>) {
        if self.text(node).starts_with("import type") {
            return;
        }
        let module = node
            .child_by_field_name("source")
            .map(|s| unquote(self.text(s)))
            .unwrap_or_default();
        let Some(clause) = named_children(node).into_iter().find(|c| c.kind() == "import_clause") else {
            return;
        };
        let mut bindings = Vec::new();
        for part in named_children(clause) {
            match part.kind() {
                "identifier" => {
                    if let Some(target) = default_binding(module) {
                        bindings.push((self.text(part).to_string(), target));
                    }
                }
                "namespace_import" => {
                    let local = named_children(part).first().map(|n| self.text(*n).to_string());
                    if let (Some(local), Some(target)) = (local, default_binding(module)) {
                        bindings.push((local, target));
                    }
                }
                "named_imports" => {
                    for spec in named_children(part) {
                        if spec.kind() != "import_specifier" || self.text(spec).starts_with("type ") {
                            continue;
                        }
                        let Some(name) = spec.child_by_field_name("name").map(|n| self.text(n)) else {
                            continue;
                        };
                        let local = spec
                            .child_by_field_name("alias")
                            .map(|n| self.text(n))
                            .unwrap_or(name);
                        if name == "default" {
                            if let Some(target) = default_binding(module) {
                                bindings.push((local.to_string(), target));
                            }
                        } else {
                            bindings.push((local.to_string(), name.to_string()));
                        }
                    }
                }
                _ => {}
            }
        }
        let statements: Vec<String> = bindings
            .into_iter()
            .filter(|(local, target)| local != target)
            .map(|(local, target)| format!("const {local} = {target};"))
            .collect();
        self.push(&statements.join(" "));
    }

    fn lower_export(&mut self, node: Node<'_>) -> Result<(), TranspileError> {
        let is_default = has_token(node, "default");

        if let Some(decl) = node.child_by_field_name("declaration") {
            match decl.kind() {
                "function_declaration"
                | "generator_function_declaration"
                | "class_declaration"
                | "abstract_class_declaration" => {
                    self.emit(decl)?;
                    if let Some(name) = decl.child_by_field_name("name").map(|n| self.text(n)) {
                        let key = if is_default { "default" } else { name };
                        self.push(&format!("\nexports.{key} = {name};"));
                    }
                }
                "lexical_declaration" | "variable_declaration" => {
                    self.emit(decl)?;
                    let mut names = Vec::new();
                    for declarator in named_children(decl) {
                        if let Some(pattern) = declarator.child_by_field_name("name") {
                            collect_binding_names(pattern, self.src, &mut names);
                        }
                    }
                    for name in names {
                        self.push(&format!("\nexports.{name} = {name};"));
                    }
                }
                "enum_declaration" => {
                    self.lower_enum(decl)?;
                    if let Some(name) = decl.child_by_field_name("name").map(|n| self.text(n)) {
                        self.push(&format!("\nexports.{name} = {name};"));
                    }
                }
                _ => {
                    self.emit(decl)?;
                }
            }
            return Ok(());
        }

        if let Some(value) = node.child_by_field_name("value") {
            self.push("exports.default = ");
            self.emit(value)?;
            self.push(";");
            return Ok(());
        }

        if has_token(node, "=") {
            if let Some(value) = named_children(node).first() {
                self.push("module.exports = ");
                self.emit(*value)?;
                self.push(";");
            }
            return Ok(());
        }

        if node.child_by_field_name("source").is_some() {
            tracing::debug!(target = "oracle", "re-export dropped during lowering");
            return Ok(());
        }

        if let Some(clause) = named_children(node).into_iter().find(|c| c.kind() == "export_clause") {
            let mut lines = Vec::new();
            for spec in named_children(clause) {
                if spec.kind() != "export_specifier" || self.text(spec).starts_with("type ") {
                    continue;
                }
                let Some(name) = spec.child_by_field_name("name").map(|n| self.text(n)) else {
                    continue;
                };
                let exported = spec.child_by_field_name("alias").map(|n| self.text(n)).unwrap_or(name);
                lines.push(format!("exports.{exported} = {name};"));
            }
            self.push(&lines.join(" "));
        }
        Ok(())
    }

    fn lower_jsx(&mut self, node: Node<'_>) -> Result<(), TranspileError> {
        let (open, close) = if node.kind() == "jsx_element" {
            let open = node
                .child_by_field_name("open_tag")
                .ok_or_else(|| TranspileError::Failed("JSX element without opening tag".to_string()))?;
            (open, node.child_by_field_name("close_tag"))
        } else {
            (node, None)
        };

        let factory = self.options.jsx_factory.clone();
        self.push(&factory);
        self.push("(");
        match open.child_by_field_name("name") {
            Some(name) => self.emit_jsx_name(name),
            None => {
                let fragment = self.options.jsx_fragment.clone();
                self.push(&fragment);
            }
        }
        self.push(", ");
        self.emit_jsx_props(open)?;
        if let Some(close) = close {
            self.emit_jsx_children(node, open, close)?;
        }
        self.push(")");
        Ok(())
    }

    fn emit_jsx_name(&mut self, name: Node<'_>) {
        let text = self.text(name);
        let intrinsic = name.kind() == "jsx_namespace_name"
            || (name.kind() == "identifier"
                && (text.starts_with(|c: char| c.is_ascii_lowercase()) || text.contains('-')));
        if intrinsic {
            self.push(&json_string(text));
        } else {
            self.push(text);
        }
    }

    fn emit_jsx_props(&mut self, open: Node<'_>) -> Result<(), TranspileError> {
        let name_id = open.child_by_field_name("name").map(|n| n.id());
        let attributes: Vec<Node<'_>> = named_children(open)
            .into_iter()
            .filter(|c| Some(c.id()) != name_id && matches!(c.kind(), "jsx_attribute" | "jsx_expression"))
            .collect();
        if attributes.is_empty() {
            self.push("null");
            return Ok(());
        }
        self.push("{");
        for (idx, attr) in attributes.into_iter().enumerate() {
            if idx > 0 {
                self.push(", ");
            }
            if attr.kind() == "jsx_expression" {
                if let Some(spread) = named_children(attr).into_iter().find(|c| c.kind() == "spread_element") {
                    self.emit(spread)?;
                }
                continue;
            }
            let parts = named_children(attr);
            let Some(key) = parts.first() else { continue };
            self.push(&json_string(self.text(*key)));
            self.push(": ");
            match parts.get(1) {
                None => self.push("true"),
                Some(value) => self.emit_jsx_attr_value(*value)?,
            }
        }
        self.push("}");
        Ok(())
    }

    fn emit_jsx_attr_value(&mut self, value: Node<'_>) -> Result<(), TranspileError> {
        match value.kind() {
            "string" => {
                let raw = self.text(value);
                let inner = raw.get(1..raw.len().saturating_sub(1)).unwrap_or_default();
                self.push(&json_string(&decode_entities(inner)));
            }
            "jsx_expression" => match named_children(value).first() {
                Some(inner) => self.emit(*inner)?,
                None => self.push("undefined"),
            },
            _ => self.emit(value)?,
        }
        Ok(())
    }

    fn emit_jsx_children(&mut self, element: Node<'_>, open: Node<'_>, close: Node<'_>) -> Result<(), TranspileError> {
        let src = self.src;
        let mut pos = open.end_byte();
        let mut cursor = element.walk();
        let children: Vec<Node<'_>> = element.children(&mut cursor).collect();
        for child in children {
            if child.id() == open.id() || child.id() == close.id() {
                continue;
            }
            match child.kind() {
                "jsx_element" | "jsx_self_closing_element" => {
                    self.emit_jsx_text(&src[pos..child.start_byte()]);
                    self.push(", ");
                    self.emit(child)?;
                    pos = child.end_byte();
                }
                "jsx_expression" => {
                    self.emit_jsx_text(&src[pos..child.start_byte()]);
                    if let Some(inner) = named_children(child).first() {
                        self.push(", ");
                        self.emit(*inner)?;
                    }
                    pos = child.end_byte();
                }
                _ => {}
            }
        }
        self.emit_jsx_text(&src[pos..close.start_byte()]);
        Ok(())
    }

    fn emit_jsx_text(&mut self, raw: &str) {
        let cleaned = clean_jsx_text(raw);
        if !cleaned.is_empty() {
            self.push(", ");
            self.push(&json_string(&decode_entities(&cleaned)));
        }
    }
}

fn default_binding(module: &str) -> Option<String> {
    if let Some((_, target)) = DEFAULT_IMPORTS.iter().find(|(m, _)| *m == module) {
        return Some((*target).to_string());
    }
    let family = module.strip_prefix("@expo/vector-icons/")?;
    ICON_FAMILIES.contains(&family).then(|| family.to_string())
}

fn collect_binding_names(node: Node<'_>, src: &str, out: &mut Vec<String>) {
    match node.kind() {
        "identifier" | "shorthand_property_identifier_pattern" => {
            out.push(src[node.start_byte()..node.end_byte()].to_string());
        }
        "pair_pattern" => {
            if let Some(value) = node.child_by_field_name("value") {
                collect_binding_names(value, src, out);
            }
        }
        "assignment_pattern" | "object_assignment_pattern" => {
            if let Some(left) = node.child_by_field_name("left") {
                collect_binding_names(left, src, out);
            }
        }
        _ => {
            for child in named_children(node) {
                collect_binding_names(child, src, out);
            }
        }
    }
}

/// JSX text whitespace: lines are trimmed where they meet a line break, blank
/// lines disappear and the survivors are joined with single spaces.
fn clean_jsx_text(raw: &str) -> String {
    let lines: Vec<&str> = raw.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    let last_non_empty = lines.iter().rposition(|l| l.chars().any(|c| c != ' ' && c != '\t'));
    let mut out = String::new();
    for (idx, line) in lines.iter().enumerate() {
        let mut piece = line.replace('\t', " ");
        if idx != 0 {
            piece = piece.trim_start_matches(' ').to_string();
        }
        if idx != lines.len() - 1 {
            piece = piece.trim_end_matches(' ').to_string();
        }
        if piece.is_empty() {
            continue;
        }
        out.push_str(&piece);
        if Some(idx) != last_non_empty {
            out.push(' ');
        }
    }
    out
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    ENTITY_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                named_entity(body)
            };
            decoded.map(String::from).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "copy" => '©',
        "reg" => '®',
        "trade" => '™',
        "hellip" => '…',
        "mdash" => '—',
        "ndash" => '–',
        "bull" => '•',
        "middot" => '·',
        "times" => '×',
        "divide" => '÷',
        "deg" => '°',
        "plusmn" => '±',
        "rarr" => '→',
        "larr" => '←',
        "uarr" => '↑',
        "darr" => '↓',
        "hearts" => '♥',
        "star" => '☆',
        "check" => '✓',
        "euro" => '€',
        "pound" => '£',
        _ => return None,
    })
}

fn json_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

fn quote_property(text: &str) -> String {
    if text.starts_with('"') || text.starts_with('\'') {
        json_string(&unquote(text))
    } else {
        json_string(text)
    }
}

fn unquote(text: &str) -> &str {
    text.trim_matches(|c| c == '\'' || c == '"' || c == '`')
}

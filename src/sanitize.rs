//! Static safety pass over repaired source.
//!
//! The source is parsed with the tree-sitter TSX grammar and walked once; all
//! findings are collected before deciding, so a rejection reports every
//! offending construct. Name resolution at run time is what actually confines
//! generated code; this pass exists to fail early with a precise diagnostic.

use serde::Serialize;
use tree_sitter::{Node, Parser, Tree};
use tree_sitter_typescript::LANGUAGE_TSX;

use crate::config::limits::MAX_SYNTAX_DEPTH;
use crate::error::{source_preview, ParseError, SanitizationError, SanitizeError};

/// Modules generated code may import. Everything they provide is bound from
/// the capability table at execution time.
const ALLOWED_MODULES: &[&str] = &[
    "react",
    "react-native",
    "react-native-safe-area-context",
    "react-native-chart-kit",
    "@react-native-async-storage/async-storage",
    "expo-notifications",
    "expo-permissions",
    "expo-router",
    "expo-status-bar",
    "@expo/vector-icons",
];
const ALLOWED_MODULE_PREFIXES: &[&str] = &["@expo/vector-icons/", "@react-navigation/", "firebase/"];

const VIRTUALIZED_LISTS: &[&str] = &["FlatList", "SectionList", "VirtualizedList"];
const SCROLL_CONTAINERS: &[&str] = &["ScrollView", "FlatList", "SectionList", "VirtualizedList"];
const GLOBAL_OBJECTS: &[&str] = &["window", "globalThis", "global", "self"];

pub fn is_allowed_module(specifier: &str) -> bool {
    ALLOWED_MODULES.contains(&specifier)
        || ALLOWED_MODULE_PREFIXES
            .iter()
            .any(|prefix| specifier.starts_with(prefix))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    /// Could escape the sandbox or reach host facilities.
    Security,
    /// Safe but known to break at run time (layout, virtualization).
    Structural,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueKind {
    DynamicEval,
    DynamicFunction,
    ModuleLoad,
    ProcessAccess,
    DisallowedImport { module: String },
    NestedVirtualizedList { list: String, container: String },
}

impl IssueKind {
    pub fn severity(&self) -> IssueSeverity {
        match self {
            IssueKind::NestedVirtualizedList { .. } => IssueSeverity::Structural,
            _ => IssueSeverity::Security,
        }
    }

    fn describe(&self) -> String {
        match self {
            IssueKind::DynamicEval => "eval() is not allowed".to_string(),
            IssueKind::DynamicFunction => "constructing functions from strings is not allowed".to_string(),
            IssueKind::ModuleLoad => "loading modules at run time is not allowed".to_string(),
            IssueKind::ProcessAccess => "access to `process` is not allowed".to_string(),
            IssueKind::DisallowedImport { module } => format!("import from '{module}' is not available"),
            IssueKind::NestedVirtualizedList { list, container } => {
                format!("{list} nested inside {container} with the same orientation")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SanitizerIssue {
    #[serde(flatten)]
    pub kind: IssueKind,
    pub severity: IssueSeverity,
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl SanitizerIssue {
    pub fn new(kind: IssueKind, line: usize, column: usize) -> Self {
        Self {
            severity: kind.severity(),
            message: kind.describe(),
            kind,
            line,
            column,
        }
    }

    fn at(kind: IssueKind, node: Node<'_>) -> Self {
        let pos = node.start_position();
        Self::new(kind, pos.row + 1, pos.column + 1)
    }
}

/// Reject-on-any-issue entry point with structural issues fatal.
pub fn sanitize(src: &str) -> Result<(), SanitizeError> {
    sanitize_with(src, true).map(|_| ())
}

/// Runs the pass and returns the non-fatal findings. With
/// `structural_fatal == false` nested-list findings are returned instead of
/// failing the artifact.
pub fn sanitize_with(src: &str, structural_fatal: bool) -> Result<Vec<SanitizerIssue>, SanitizeError> {
    let tree = parse_tsx(src)?;
    let mut walker = Walker {
        src,
        containers: Vec::new(),
        issues: Vec::new(),
    };
    walker.visit(tree.root_node());

    let (fatal, warnings): (Vec<_>, Vec<_>) = walker
        .issues
        .into_iter()
        .partition(|issue| structural_fatal || issue.severity == IssueSeverity::Security);

    if !fatal.is_empty() {
        tracing::warn!(
            target = "oracle",
            issues = fatal.len(),
            first = %fatal[0].message,
            "sanitizer rejected generated code"
        );
        return Err(SanitizationError {
            issues: fatal,
            preview: source_preview(src),
        }
        .into());
    }
    for issue in &warnings {
        tracing::warn!(target = "oracle", line = issue.line, "{}", issue.message);
    }
    Ok(warnings)
}

/// Parse with the TSX grammar; a tree with any error or missing node is a
/// `ParseError` located at the first such node.
pub fn parse_tsx(src: &str) -> Result<Tree, ParseError> {
    let mut parser = Parser::new();
    parser
        .set_language(&LANGUAGE_TSX.into())
        .map_err(|err| parse_error(src, format!("failed to load TSX grammar: {err}"), 0, 0))?;
    let tree = parser
        .parse(src, None)
        .ok_or_else(|| parse_error(src, "parser produced no tree".to_string(), 0, 0))?;
    let root = tree.root_node();
    if nesting_exceeds(root, MAX_SYNTAX_DEPTH) {
        return Err(parse_error(
            src,
            format!("code is nested more than {MAX_SYNTAX_DEPTH} levels deep"),
            0,
            0,
        ));
    }
    if root.has_error() {
        let (message, line, column) = match first_error(root) {
            Some(node) => {
                let pos = node.start_position();
                let message = if node.is_missing() {
                    format!("missing `{}`", node.kind())
                } else {
                    let text = node.utf8_text(src.as_bytes()).unwrap_or_default();
                    let snippet: String = text.chars().take(40).collect();
                    format!("unexpected `{}`", snippet.trim())
                };
                (message, pos.row + 1, pos.column + 1)
            }
            None => ("syntax error".to_string(), 0, 0),
        };
        return Err(parse_error(src, message, line, column));
    }
    Ok(tree)
}

fn parse_error(src: &str, message: String, line: usize, column: usize) -> ParseError {
    ParseError {
        message,
        line,
        column,
        preview: source_preview(src),
    }
}

/// Iterative depth check; the recursive walkers below rely on it.
fn nesting_exceeds(root: Node<'_>, limit: usize) -> bool {
    let mut cursor = root.walk();
    let mut depth = 0usize;
    loop {
        if cursor.goto_first_child() {
            depth += 1;
            if depth > limit {
                return true;
            }
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return false;
            }
            depth -= 1;
        }
    }
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() || child.is_missing() {
            if let Some(found) = first_error(child) {
                return Some(found);
            }
        }
    }
    None
}

struct ScrollContainer {
    name: String,
    horizontal: bool,
}

struct Walker<'s> {
    src: &'s str,
    containers: Vec<ScrollContainer>,
    issues: Vec<SanitizerIssue>,
}

impl<'s> Walker<'s> {
    fn visit(&mut self, node: Node<'_>) {
        match node.kind() {
            "call_expression" => self.check_call(node),
            "new_expression" => {
                if let Some(ctor) = node.child_by_field_name("constructor") {
                    if self.is_identifier(ctor, "Function") {
                        self.issues.push(SanitizerIssue::at(IssueKind::DynamicFunction, node));
                    }
                }
            }
            "member_expression" | "subscript_expression" => {
                if let Some(object) = node.child_by_field_name("object") {
                    if self.is_identifier(object, "process") {
                        self.issues.push(SanitizerIssue::at(IssueKind::ProcessAccess, node));
                    }
                }
            }
            "import_statement" => self.check_import(node),
            _ => {}
        }

        let pushed = self.enter_jsx(node);
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child);
        }
        if pushed {
            self.containers.pop();
        }
    }

    fn check_call(&mut self, node: Node<'_>) {
        let Some(callee) = node.child_by_field_name("function") else {
            return;
        };
        let kind = match callee.kind() {
            "import" => Some(IssueKind::ModuleLoad),
            "identifier" => match self.text(callee) {
                "eval" => Some(IssueKind::DynamicEval),
                "Function" => Some(IssueKind::DynamicFunction),
                "require" => Some(IssueKind::ModuleLoad),
                _ => None,
            },
            "member_expression" => {
                let object = callee.child_by_field_name("object").map(|n| self.text(n));
                let property = callee.child_by_field_name("property").map(|n| self.text(n));
                match (object, property) {
                    (Some(obj), Some("eval")) if GLOBAL_OBJECTS.contains(&obj) => Some(IssueKind::DynamicEval),
                    (Some(obj), Some("Function")) if GLOBAL_OBJECTS.contains(&obj) => {
                        Some(IssueKind::DynamicFunction)
                    }
                    _ => None,
                }
            }
            _ => None,
        };
        if let Some(kind) = kind {
            self.issues.push(SanitizerIssue::at(kind, node));
        }
    }

    fn check_import(&mut self, node: Node<'_>) {
        if self.text(node).starts_with("import type ") {
            return;
        }
        let Some(source) = node.child_by_field_name("source") else {
            return;
        };
        let module = self.text(source).trim_matches(|c| c == '\'' || c == '"');
        if !is_allowed_module(module) {
            let kind = IssueKind::DisallowedImport {
                module: module.to_string(),
            };
            self.issues.push(SanitizerIssue::at(kind, node));
        }
    }

    /// Pushes scrollable JSX elements onto the ancestor stack and reports a
    /// virtualized list under a container scrolling the same way.
    fn enter_jsx(&mut self, node: Node<'_>) -> bool {
        let tag = match node.kind() {
            "jsx_element" => node.child_by_field_name("open_tag"),
            "jsx_self_closing_element" => Some(node),
            _ => None,
        };
        let Some(tag) = tag else {
            return false;
        };
        let Some(name_node) = tag.child_by_field_name("name") else {
            return false;
        };
        let full = self.text(name_node);
        let name = full.rsplit('.').next().unwrap_or(full);
        if !SCROLL_CONTAINERS.contains(&name) {
            return false;
        }
        let horizontal = self.is_horizontal(tag);
        if VIRTUALIZED_LISTS.contains(&name) {
            if let Some(container) = self.containers.iter().rev().find(|c| c.horizontal == horizontal) {
                let kind = IssueKind::NestedVirtualizedList {
                    list: name.to_string(),
                    container: container.name.clone(),
                };
                self.issues.push(SanitizerIssue::at(kind, node));
            }
        }
        self.containers.push(ScrollContainer {
            name: name.to_string(),
            horizontal,
        });
        true
    }

    fn is_horizontal(&self, tag: Node<'_>) -> bool {
        let mut cursor = tag.walk();
        for attr in tag.named_children(&mut cursor) {
            if attr.kind() != "jsx_attribute" {
                continue;
            }
            let mut inner = attr.walk();
            let mut parts = attr.named_children(&mut inner);
            let Some(key) = parts.next() else {
                continue;
            };
            if self.text(key) != "horizontal" {
                continue;
            }
            return match parts.next() {
                None => true,
                Some(value) => self.text(value).replace(' ', "") != "{false}",
            };
        }
        false
    }

    fn is_identifier(&self, node: Node<'_>, name: &str) -> bool {
        node.kind() == "identifier" && self.text(node) == name
    }

    fn text(&self, node: Node<'_>) -> &'s str {
        node.utf8_text(self.src.as_bytes()).unwrap_or_default()
    }
}

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config::limits::SOURCE_PREVIEW_CHARS;
use crate::sanitize::{IssueSeverity, SanitizerIssue};

/// First `SOURCE_PREVIEW_CHARS` characters of a source, cut on a char boundary.
pub fn source_preview(src: &str) -> String {
    match src.char_indices().nth(SOURCE_PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}…", &src[..idx]),
        None => src.to_string(),
    }
}

#[derive(Debug, Clone, Error, Serialize)]
#[error("E-ORC-1101: generated code could not be parsed: {message} (line {line}, column {column})")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub preview: String,
}

#[derive(Debug, Clone, Error, Serialize)]
#[error("E-ORC-1102: generated code uses disallowed constructs: {}", describe_issues(.issues))]
pub struct SanitizationError {
    pub issues: Vec<SanitizerIssue>,
    pub preview: String,
}

fn describe_issues(issues: &[SanitizerIssue]) -> String {
    issues
        .iter()
        .map(|issue| issue.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure of the static pass: either the text did not parse or it parsed
/// and contained prohibited constructs.
#[derive(Debug, Clone, Error)]
pub enum SanitizeError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Rejected(#[from] SanitizationError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TranspileError {
    #[error("E-ORC-1103: transpilation failed: {0}")]
    Failed(String),
    #[error("E-ORC-1104: transpilation produced no output")]
    Empty,
    #[error("E-ORC-1105: transpilation did not finish within {}ms", .0.as_millis())]
    Timeout(Duration),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("E-ORC-1106: component not exported")]
    NotExported,
    #[error("E-ORC-1107: exported value is not a component (found {0})")]
    NotComponent(String),
    #[error("E-ORC-1108: executing generated code failed: {0}")]
    Threw(String),
}

/// Any error that moves a mount to `Failed` (or, for `Crashed`, the runtime
/// fault that tripped the boundary).
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(ParseError),
    #[error(transparent)]
    Sanitization(SanitizationError),
    #[error(transparent)]
    Transpile(#[from] TranspileError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("E-ORC-1201: component crashed: {0}")]
    Crashed(String),
}

impl From<SanitizeError> for PipelineError {
    fn from(err: SanitizeError) -> Self {
        match err {
            SanitizeError::Parse(e) => PipelineError::Parse(e),
            SanitizeError::Rejected(e) => PipelineError::Sanitization(e),
        }
    }
}

impl PipelineError {
    /// Short user-facing diagnosis; never includes stack traces or source.
    pub fn summary(&self) -> String {
        match self {
            PipelineError::Parse(e) => format!(
                "Couldn't understand the generated code (syntax error near line {}).",
                e.line
            ),
            PipelineError::Sanitization(e) => {
                let security = e
                    .issues
                    .iter()
                    .filter(|i| i.severity == IssueSeverity::Security)
                    .count();
                let first = e
                    .issues
                    .first()
                    .map(|i| i.message.as_str())
                    .unwrap_or("unknown construct");
                if security > 0 {
                    format!("The generated code used a feature that isn't allowed: {first}.")
                } else {
                    format!("The generated layout isn't supported: {first}.")
                }
            }
            PipelineError::Transpile(TranspileError::Timeout(_)) => {
                "Preparing the generated code took too long.".to_string()
            }
            PipelineError::Transpile(_) => "Couldn't prepare the generated code to run.".to_string(),
            PipelineError::Execution(ExecutionError::NotExported) => {
                "The generated code didn't export a component.".to_string()
            }
            PipelineError::Execution(_) => "The generated code failed while loading.".to_string(),
            PipelineError::Crashed(_) => crate::boundary::CRASH_HINT.to_string(),
        }
    }
}

/// Misuse of the host API or a broken engine, as opposed to a bad oracle.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("E-ORC-1301: unknown mount {0}")]
    UnknownMount(u64),
    #[error("E-ORC-1302: handler '{0}' is not registered on the current render")]
    UnknownHandler(String),
    #[error("E-ORC-1303: mount {0} has no live component")]
    NotReady(u64),
    #[error("E-ORC-1304: {0}")]
    EngineSetup(String),
    #[error("E-ORC-1305: {0}")]
    Protocol(String),
}

pub mod autofix;
pub mod boundary;
pub mod component_cache;
pub mod config;
pub mod core;
pub mod element;
pub mod error;
pub mod executor;
pub mod host;
pub mod mount;
pub mod notifications;
pub mod preprocess;
pub mod sanitize;
pub mod services;
pub mod transpile;

mod rewrite;

pub use crate::autofix::{autofix, AutofixReport};
pub use crate::component_cache::ComponentCache;
pub use crate::config::PipelineConfig;
pub use crate::core::{init_tracing, source_digest, APP_NAME};
pub use crate::element::{Element, Node, RenderTree};
pub use crate::error::{
    ExecutionError, HostError, ParseError, PipelineError, SanitizationError, SanitizeError,
    TranspileError,
};
pub use crate::host::OracleHost;
pub use crate::mount::{ErrorCallback, MountId, MountView};
pub use crate::notifications::{normalize_trigger, Trigger};
pub use crate::preprocess::{preprocess, PreprocessReport};
pub use crate::sanitize::{sanitize, IssueKind, IssueSeverity, SanitizerIssue};
pub use crate::services::{
    DocumentStore, HostServices, KeyValueStore, NotificationCenter, PermissionStatus,
};
pub use crate::transpile::{Transform, TranspileOptions, Transpiler};

//! Error taxonomy for the export pipeline.
//!
//! Fatal errors unwind the whole export; warnings are collected and returned
//! next to a successful result.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// STAGE CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const STAGE_UNKNOWN_COMPONENT: &str = "UnknownComponentType";
pub const STAGE_THEME_PATH: &str = "ThemePathError";
pub const STAGE_STRUCTURAL: &str = "StructuralIntegrityError";
pub const STAGE_IO: &str = "IOError";
pub const STAGE_TEMPLATE: &str = "TemplateError";
pub const STAGE_EDITOR_LEAK: &str = "EditorLeakError";
pub const STAGE_INVALID_REQUEST: &str = "InvalidRequest";

pub fn get_guarantee(code: &str) -> &'static str {
    match code {
        STAGE_UNKNOWN_COMPONENT => "Every node renders through a registered component template.",
        STAGE_THEME_PATH => "Every theme reference resolves to a literal from the export snapshot.",
        STAGE_STRUCTURAL => "The exported page mirrors a well-formed tree rooted at ROOT.",
        STAGE_IO => "A package is either fully written or not visible at its destination.",
        STAGE_TEMPLATE => "Registry templates are valid JSX fragments.",
        STAGE_EDITOR_LEAK => "Exported files never depend on the editing framework.",
        STAGE_INVALID_REQUEST => "Export requests carry a page state, a theme and an asset snapshot.",
        _ => "Unknown stage.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STRUCTURAL VIOLATIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("document has no ROOT node")]
    MissingRoot,
    #[error("ROOT must not have a parent, found \"{parent}\"")]
    RootHasParent { parent: String },
    #[error("node \"{parent}\" lists child \"{child}\" which does not exist")]
    DanglingChild { parent: String, child: String },
    #[error("node \"{node}\" points at parent \"{parent}\" which does not exist")]
    DanglingParent { node: String, parent: String },
    #[error("node \"{node}\" is listed under \"{listed_under}\" but its parent is {declared}")]
    ParentMismatch {
        node: String,
        listed_under: String,
        declared: String,
    },
    #[error("node \"{child}\" is listed as a child more than once")]
    DuplicateChild { child: String },
    #[error("node \"{node}\" is not a canvas but has {count} children")]
    ChildrenOnLeaf { node: String, count: usize },
    #[error("node \"{node}\" is part of a cycle")]
    Cycle { node: String },
    #[error("node \"{node}\" is not reachable from ROOT")]
    Unreachable { node: String },
    #[error("node \"{node}\" has children but template \"{component}\" has no children region")]
    MissingCanvasRegion { node: String, component: String },
}

impl Violation {
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Violation::MissingRoot => None,
            Violation::RootHasParent { .. } => Some(crate::tree::ROOT_ID),
            Violation::DanglingChild { parent, .. } => Some(parent),
            Violation::DanglingParent { node, .. }
            | Violation::ParentMismatch { node, .. }
            | Violation::ChildrenOnLeaf { node, .. }
            | Violation::Cycle { node }
            | Violation::Unreachable { node }
            | Violation::MissingCanvasRegion { node, .. } => Some(node),
            Violation::DuplicateChild { child } => Some(child),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXPORT ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("node \"{node_id}\" uses unknown component type \"{component_type}\"")]
    UnknownComponentType {
        node_id: String,
        component_type: String,
    },

    #[error("theme path \"{path}\" referenced by template \"{template}\" does not exist")]
    ThemePath {
        path: String,
        template: String,
        node_id: Option<String>,
    },

    #[error("structural integrity violation: {0}")]
    StructuralIntegrity(Violation),

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template \"{template}\" failed to parse: {message}")]
    TemplateSyntax { template: String, message: String },

    #[error("{path} still contains editor-only construct `{construct}`")]
    EditorLeak { path: String, construct: String },

    #[error("invalid export request: {0}")]
    InvalidRequest(String),
}

impl ExportError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ExportError::Io {
            path: path.into(),
            source,
        }
    }

    /// Stage name reported to callers.
    pub fn code(&self) -> &'static str {
        match self {
            ExportError::UnknownComponentType { .. } => STAGE_UNKNOWN_COMPONENT,
            ExportError::ThemePath { .. } => STAGE_THEME_PATH,
            ExportError::StructuralIntegrity(_) => STAGE_STRUCTURAL,
            ExportError::Io { .. } => STAGE_IO,
            ExportError::TemplateSyntax { .. } => STAGE_TEMPLATE,
            ExportError::EditorLeak { .. } => STAGE_EDITOR_LEAK,
            ExportError::InvalidRequest(_) => STAGE_INVALID_REQUEST,
        }
    }

    pub fn guarantee(&self) -> &'static str {
        get_guarantee(self.code())
    }

    pub fn node_id(&self) -> Option<&str> {
        match self {
            ExportError::UnknownComponentType { node_id, .. } => Some(node_id),
            ExportError::ThemePath { node_id, .. } => node_id.as_deref(),
            ExportError::StructuralIntegrity(v) => v.node_id(),
            _ => None,
        }
    }

    /// Offending path: a theme path, a file path or a template name.
    pub fn path(&self) -> Option<String> {
        match self {
            ExportError::ThemePath { path, .. } => Some(path.clone()),
            ExportError::Io { path, .. } => Some(path.display().to_string()),
            ExportError::EditorLeak { path, .. } => Some(path.clone()),
            ExportError::TemplateSyntax { template, .. } => Some(template.clone()),
            _ => None,
        }
    }

    /// Only I/O failures are worth retrying with the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExportError::Io { .. })
    }
}

impl From<Violation> for ExportError {
    fn from(v: Violation) -> Self {
        ExportError::StructuralIntegrity(v)
    }
}

pub type ExportResult<T> = Result<T, ExportError>;

// ═══════════════════════════════════════════════════════════════════════════════
// WARNINGS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all_fields = "camelCase")]
pub enum ExportWarning {
    /// The asset store snapshot has no entry for this reference. The prop keeps
    /// its original string.
    AssetNotFound { reference: String, node_id: String },
    /// The asset store has the key but its payload is not valid base64.
    AssetDecodeFailed {
        reference: String,
        node_id: String,
        reason: String,
    },
}

impl ExportWarning {
    pub fn reference(&self) -> &str {
        match self {
            ExportWarning::AssetNotFound { reference, .. }
            | ExportWarning::AssetDecodeFailed { reference, .. } => reference,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ExportWarning::AssetNotFound { reference, node_id } => format!(
                "asset \"{}\" used by node \"{}\" is not in the asset store; left as-is",
                reference, node_id
            ),
            ExportWarning::AssetDecodeFailed {
                reference,
                node_id,
                reason,
            } => format!(
                "asset \"{}\" used by node \"{}\" could not be decoded ({}); left as-is",
                reference, node_id, reason
            ),
        }
    }
}

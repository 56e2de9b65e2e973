//! # Site Export Pipeline
//!
//! Converts a visual-builder page (a tree of component instances, a theme
//! snapshot and the editor's asset store) into a standalone Next.js project.
//!
//! ## Pipeline
//!
//! 1. **Validate**: the node tree must be a single rooted tree with consistent
//!    parent/child links ([`validate_tree`]).
//! 2. **Collect assets**: image props are resolved against the asset store and
//!    either written under `public/` or inlined ([`AssetCollector`]).
//! 3. **Compile**: each node's template is stripped of editor-only wiring, its
//!    theme fallbacks are resolved to literals, and its props are bound; canvas
//!    nodes splice their compiled children into the template's `{children}`
//!    region ([`PageCompiler`]).
//! 4. **Scaffold**: layout, global stylesheet and project configuration
//!    ([`scaffold_files`]).
//! 5. **Verify**: every emitted module is re-parsed and must not contain an
//!    editor-only construct ([`scan_for_editor_leaks`]).
//! 6. **Emit**: the file set is written atomically to a directory or a zip
//!    archive ([`emit`]).
//!
//! Every fatal error aborts the export before any file is written; missing
//! assets are collected as warnings.

#[cfg(feature = "napi")]
use napi_derive::napi;

mod assets;
mod compiler;
mod config;
mod edits;
mod error;
mod export;
mod package;
mod registry;
mod rewriter;
mod scaffold;
mod theme;
mod tree;
mod validate;

#[cfg(test)]
mod rewriter_tests;

pub use assets::{AssetCollection, AssetCollector, AssetEntry, AssetStatus, AssetStore, ImageData, MANIFEST_PATH};
pub use compiler::{bind_props, compile_tree, normalize_imports, PageCompiler, PAGE_PATH};
pub use config::ExportOptions;
pub use error::{get_guarantee, ExportError, ExportResult, ExportWarning, Violation};
pub use export::{handle_export_request, ErrorReport, ExportOutput, ExportRequest, ExportResponse, Exporter};
pub use package::{
    check_relative_path, emit, emit_archive, emit_archive_bytes, emit_directory, ExportedFile, FileContents,
    PackageTarget,
};
pub use registry::{
    builtin_templates, ComponentRegistry, EditorMarker, MarkerSet, PropKind, PropSchema, Template,
};
pub use rewriter::{
    check_fragment, inline_theme_references, rewrite_template, scan_for_editor_leaks, strip_editor_constructs,
    PropScope,
};
pub use scaffold::{scaffold_files, SeoMetadata};
pub use theme::{resolve_reference, Theme, ThemePathError};
pub use tree::{is_set, Node, NodeTree, ROOT_ID};
pub use validate::validate_tree;

/// Node bridge: export request JSON in, `ExportResponse` JSON out.
#[cfg(feature = "napi")]
#[napi]
pub fn export_site_native(request_json: String) -> String {
    handle_export_request(&Exporter::default(), &request_json).to_json()
}

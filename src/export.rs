//! Export pipeline
//!
//! One export call takes an immutable snapshot (tree, theme, asset store, SEO
//! data) and produces the complete file set of a standalone project, or a
//! single fatal error and no files at all.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::assets::{AssetCollector, AssetStore, ImageData};
use crate::compiler::{compile_tree, PAGE_PATH};
use crate::config::ExportOptions;
use crate::error::{ExportError, ExportResult, ExportWarning};
use crate::package::{emit, emit_archive_bytes, ExportedFile, PackageTarget};
use crate::registry::ComponentRegistry;
use crate::rewriter::scan_for_editor_leaks;
use crate::scaffold::{scaffold_files, SeoMetadata};
use crate::theme::Theme;
use crate::tree::NodeTree;
use crate::validate::validate_tree;

/// Emitted files that are parsed back and scanned for editor constructs.
const SCANNED_EXTENSIONS: &[&str] = &[".tsx", ".ts", ".jsx", ".js", ".mjs"];

// ═══════════════════════════════════════════════════════════════════════════════
// REQUEST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    /// The editor document, as an object or as a JSON string.
    pub page_state: Value,
    #[serde(default)]
    pub theme: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub image_data: Vec<ImageData>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub seo: SeoMetadata,
    /// Remaining top-level keys; `radius` and the spacing values override the
    /// theme snapshot.
    #[serde(flatten)]
    pub overrides: Map<String, Value>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ExportRequest {
    pub fn from_json(json: &str) -> ExportResult<Self> {
        serde_json::from_str(json).map_err(|e| ExportError::InvalidRequest(e.to_string()))
    }

    /// The theme snapshot with request-level overrides applied. A request
    /// without a theme exports against the stock theme.
    pub fn theme(&self) -> ExportResult<Theme> {
        let base = match &self.theme {
            Value::Null => Theme::stock(),
            Value::Object(_) => Theme::from_value(self.theme.clone()),
            other => {
                return Err(ExportError::InvalidRequest(format!(
                    "theme must be an object, got {}",
                    other
                )))
            }
        };
        Ok(base.with_overrides(&self.overrides))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct ExportOutput {
    /// Sorted by path.
    pub files: Vec<ExportedFile>,
    pub warnings: Vec<ExportWarning>,
}

impl ExportOutput {
    pub fn file(&self, path: &str) -> Option<&ExportedFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

pub struct Exporter {
    registry: ComponentRegistry,
    options: ExportOptions,
}

impl Default for Exporter {
    fn default() -> Self {
        Exporter::new(ComponentRegistry::builtin(), ExportOptions::default())
    }
}

impl Exporter {
    pub fn new(registry: ComponentRegistry, options: ExportOptions) -> Self {
        Exporter { registry, options }
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Run the whole pipeline in memory.
    pub fn export(&self, request: &ExportRequest) -> ExportResult<ExportOutput> {
        self.options.validate()?;

        let mut tree = NodeTree::from_value(request.page_state.clone())?;
        validate_tree(&tree)?;
        self.registry.resolve_all(&tree)?;
        let theme = request.theme()?;
        info!(
            nodes = tree.len(),
            components = self.registry.len(),
            images = request.image_data.len(),
            "export started"
        );

        let image_keys = self.registry.image_prop_names();
        let store = AssetStore::new(&request.image_data);
        let assets = AssetCollector::new(&store, &self.options, &image_keys).collect(&tree);
        for warning in &assets.warnings {
            warn!(reference = warning.reference(), "{}", warning.message());
        }
        assets.rewrite_tree(&mut tree, &image_keys);

        let page = compile_tree(&tree, &theme, &self.registry)?;
        let mut files = vec![ExportedFile::text(PAGE_PATH, page)];
        files.extend(scaffold_files(&theme, &request.seo, &self.options));

        if self.options.verify_output {
            let markers = self.registry.editor_markers();
            for file in &files {
                if !SCANNED_EXTENSIONS.iter().any(|ext| file.path.ends_with(ext)) {
                    continue;
                }
                if let Some(text) = file.as_text() {
                    scan_for_editor_leaks(&file.path, text, &markers)?;
                }
            }
            debug!(files = files.len(), "leak scan passed");
        }

        if self.options.manifest {
            files.push(assets.manifest_file());
        }
        let warnings = assets.warnings;
        files.extend(assets.files);
        files.sort_by(|a, b| a.path.cmp(&b.path));

        info!(files = files.len(), warnings = warnings.len(), "export finished");
        Ok(ExportOutput { files, warnings })
    }

    /// Run the pipeline and write the package. Nothing is written when any
    /// stage fails.
    pub fn export_to(&self, request: &ExportRequest, target: &PackageTarget) -> ExportResult<ExportOutput> {
        let output = self.export(request)?;
        emit(&output.files, target)?;
        info!(target = %target.path().display(), "package emitted");
        Ok(output)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESPONSE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub stage: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub retryable: bool,
}

impl From<&ExportError> for ErrorReport {
    fn from(error: &ExportError) -> Self {
        ErrorReport {
            stage: error.code().to_string(),
            message: error.to_string(),
            node_id: error.node_id().map(str::to_string),
            path: error.path(),
            retryable: error.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    pub ok: bool,
    pub files: Vec<String>,
    /// Base64 zip of the package.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
    pub warnings: Vec<ExportWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

impl ExportResponse {
    pub fn failure(error: &ExportError) -> Self {
        ExportResponse {
            ok: false,
            files: Vec::new(),
            archive: None,
            warnings: Vec::new(),
            error: Some(ErrorReport::from(error)),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                "{{\"ok\":false,\"files\":[],\"warnings\":[],\"error\":{{\"stage\":\"InvalidRequest\",\"message\":\"{}\",\"retryable\":false}}}}",
                e.to_string().replace('"', "'")
            )
        })
    }
}

fn archive_response(exporter: &Exporter, request_json: &str) -> ExportResult<ExportResponse> {
    let request = ExportRequest::from_json(request_json)?;
    let output = exporter.export(&request)?;
    let archive = emit_archive_bytes(&output.files)?;
    Ok(ExportResponse {
        ok: true,
        files: output.paths(),
        archive: Some(STANDARD.encode(archive)),
        warnings: output.warnings,
        error: None,
    })
}

/// Request JSON in, response out: the downloadable archive on success, the
/// failing stage otherwise.
pub fn handle_export_request(exporter: &Exporter, request_json: &str) -> ExportResponse {
    match archive_response(exporter, request_json) {
        Ok(response) => response,
        Err(error) => {
            tracing::error!(stage = error.code(), node = ?error.node_id(), "export failed: {}", error);
            ExportResponse::failure(&error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(page_state: Value) -> ExportRequest {
        ExportRequest {
            page_state,
            ..ExportRequest::default()
        }
    }

    #[test]
    fn test_request_deserializes_overrides() {
        let req = ExportRequest::from_json(
            r#"{ "pageState": {}, "theme": null, "imageData": null, "radius": 2, "seo": { "title": "X" } }"#,
        )
        .unwrap();
        assert_eq!(req.seo.title.as_deref(), Some("X"));
        assert_eq!(req.theme().unwrap().resolve("radius").unwrap(), &json!(2));
        assert!(req.image_data.is_empty());
    }

    #[test]
    fn test_theme_must_be_object() {
        let mut req = request(json!({}));
        req.theme = json!("dark");
        assert_eq!(req.theme().unwrap_err().code(), "InvalidRequest");
    }

    #[test]
    fn test_minimal_export_file_set() {
        let req = request(json!({
            "ROOT": { "type": "Container", "isCanvas": true, "props": {}, "nodes": [] }
        }));
        let output = Exporter::default().export(&req).unwrap();
        assert_eq!(
            output.paths(),
            vec![
                ".gitignore",
                "app/globals.css",
                "app/layout.tsx",
                "app/page.tsx",
                "export-manifest.json",
                "next.config.mjs",
                "package.json",
                "tsconfig.json",
            ]
        );
        assert!(output.warnings.is_empty());
    }

    #[test]
    fn test_manifest_can_be_disabled() {
        let options = ExportOptions {
            manifest: false,
            ..ExportOptions::default()
        };
        let exporter = Exporter::new(ComponentRegistry::builtin(), options);
        let req = request(json!({ "ROOT": { "type": "Container", "isCanvas": true, "nodes": [] } }));
        let output = exporter.export(&req).unwrap();
        assert!(output.file("export-manifest.json").is_none());
    }

    #[test]
    fn test_failure_response_reports_stage() {
        let response = handle_export_request(&Exporter::default(), r#"{ "pageState": { "ROOT": { "type": "Nope" } } }"#);
        assert!(!response.ok);
        assert!(response.files.is_empty());
        assert!(response.archive.is_none());
        let error = response.error.unwrap();
        assert_eq!(error.stage, "UnknownComponentType");
        assert_eq!(error.node_id.as_deref(), Some("ROOT"));
        assert!(!error.retryable);
    }

    #[test]
    fn test_malformed_request_is_invalid() {
        let response = handle_export_request(&Exporter::default(), "{ not json");
        assert_eq!(response.error.unwrap().stage, "InvalidRequest");
    }

    #[test]
    fn test_success_response_carries_archive() {
        let response = handle_export_request(
            &Exporter::default(),
            r#"{ "pageState": { "ROOT": { "type": "Container", "isCanvas": true, "nodes": [] } } }"#,
        );
        assert!(response.ok);
        assert!(response.files.contains(&"app/page.tsx".to_string()));
        let bytes = STANDARD.decode(response.archive.as_deref().unwrap()).unwrap();
        let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), response.files.len());

        let json: Value = serde_json::from_str(&response.to_json()).unwrap();
        assert_eq!(json["ok"], true);
        assert!(json.get("error").is_none());
    }
}

//! Export configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{ExportError, ExportResult};

fn default_asset_dir() -> String {
    "images".to_string()
}

fn default_project_name() -> String {
    "exported-site".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    /// Sub-directory of `public/` receiving externalized assets.
    #[serde(default = "default_asset_dir")]
    pub asset_dir: String,
    /// Assets up to this many bytes are inlined as data URIs. 0 never inlines.
    #[serde(default)]
    pub inline_asset_limit: u64,
    #[serde(default = "default_project_name")]
    pub project_name: String,
    /// Re-parse emitted modules and fail on any editor-only construct.
    #[serde(default = "default_true")]
    pub verify_output: bool,
    /// Emit `export-manifest.json`.
    #[serde(default = "default_true")]
    pub manifest: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions {
            asset_dir: default_asset_dir(),
            inline_asset_limit: 0,
            project_name: default_project_name(),
            verify_output: true,
            manifest: true,
        }
    }
}

impl ExportOptions {
    pub fn from_file(path: &Path) -> ExportResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| ExportError::io(path, e))?;
        let options: ExportOptions = serde_json::from_str(&raw)
            .map_err(|e| ExportError::InvalidRequest(format!("{}: {}", path.display(), e)))?;
        options.validate()?;
        Ok(options)
    }

    /// The asset directory becomes a path segment and the project name a
    /// package name; both must be plain.
    pub fn validate(&self) -> ExportResult<()> {
        let dir_ok = !self.asset_dir.is_empty()
            && self
                .asset_dir
                .split('/')
                .all(|seg| !seg.is_empty() && seg != "." && seg != "..");
        if !dir_ok {
            return Err(ExportError::InvalidRequest(format!(
                "assetDir \"{}\" must be a relative path",
                self.asset_dir
            )));
        }
        if self.project_name.trim().is_empty() {
            return Err(ExportError::InvalidRequest("projectName must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let options: ExportOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, ExportOptions::default());
        assert_eq!(options.asset_dir, "images");
        assert!(options.verify_output);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        fs::write(&path, r#"{ "assetDir": "media", "inlineAssetLimit": 1024 }"#).unwrap();
        let options = ExportOptions::from_file(&path).unwrap();
        assert_eq!(options.asset_dir, "media");
        assert_eq!(options.inline_asset_limit, 1024);
        assert_eq!(options.project_name, "exported-site");
    }

    #[test]
    fn test_rejects_escaping_asset_dir() {
        let options = ExportOptions {
            asset_dir: "../up".to_string(),
            ..ExportOptions::default()
        };
        assert_eq!(options.validate().unwrap_err().code(), "InvalidRequest");
    }
}

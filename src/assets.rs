//! Asset Collector
//!
//! Finds every image reference among the visible nodes' props, resolves it
//! against the asset store snapshot handed over with the request, and decides
//! per asset whether it is written as a public file or inlined as a data URI.
//! References the store does not know stay untouched and produce a warning.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::ExportOptions;
use crate::error::ExportWarning;
use crate::package::ExportedFile;
use crate::tree::NodeTree;

/// Path of the asset manifest inside the package.
pub const MANIFEST_PATH: &str = "export-manifest.json";

lazy_static! {
    static ref UNSAFE_NAME_CHARS: Regex = Regex::new(r"[^A-Za-z0-9._-]+").unwrap();
    static ref EXTERNAL_URL: Regex = Regex::new(r"^(?i)(https?:)?//").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// ASSET STORE SNAPSHOT
// ═══════════════════════════════════════════════════════════════════════════════

/// One entry of the client-side asset store: a key and its base64 payload,
/// optionally wrapped in a `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    pub key: String,
    pub base64: String,
}

#[derive(Debug, Clone, Default)]
pub struct AssetStore {
    entries: HashMap<String, String>,
}

impl AssetStore {
    /// Later entries win when a key appears twice.
    pub fn new(images: &[ImageData]) -> Self {
        let mut entries = HashMap::with_capacity(images.len());
        for image in images {
            entries.insert(image.key.clone(), image.base64.clone());
        }
        AssetStore { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look a prop value up, tolerating the leading `/` and `public/` prefix
    /// differences between how the editor stores keys and how props point at them.
    pub fn get(&self, reference: &str) -> Option<(&str, &str)> {
        let trimmed = reference.trim_start_matches('/');
        let candidates = [
            reference.to_string(),
            trimmed.to_string(),
            format!("public/{}", trimmed),
        ];
        candidates.iter().find_map(|candidate| {
            self.entries
                .get_key_value(candidate.as_str())
                .map(|(k, v)| (k.as_str(), v.as_str()))
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Externalized,
    Inlined,
    Missing,
    Undecodable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetEntry {
    pub reference: String,
    pub status: AssetStatus,
    /// Nodes whose props use this reference, in render order.
    pub nodes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Package path of the written file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    /// What the prop is rewritten to: a public URL or a data URI.
    #[serde(skip)]
    pub replacement: Option<String>,
}

impl AssetEntry {
    pub fn found(&self) -> bool {
        matches!(self.status, AssetStatus::Externalized | AssetStatus::Inlined)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssetCollection {
    pub entries: BTreeMap<String, AssetEntry>,
    pub files: Vec<ExportedFile>,
    pub warnings: Vec<ExportWarning>,
}

impl AssetCollection {
    /// Point every resolved reference in the tree at its exported location.
    pub fn rewrite_tree(&self, tree: &mut NodeTree, image_keys: &BTreeSet<String>) {
        let replacements: HashMap<&str, &str> = self
            .entries
            .values()
            .filter_map(|entry| {
                entry
                    .replacement
                    .as_deref()
                    .map(|r| (entry.reference.as_str(), r))
            })
            .collect();
        if replacements.is_empty() {
            return;
        }

        let ids: Vec<String> = tree.iter().map(|(id, _)| id.clone()).collect();
        for id in ids {
            if let Some(node) = tree.get_mut(&id) {
                rewrite_props(&mut node.props, image_keys, &replacements);
            }
        }
    }

    pub fn manifest(&self) -> Value {
        let assets: Vec<&AssetEntry> = self.entries.values().collect();
        json!({ "assets": assets })
    }

    pub fn manifest_file(&self) -> ExportedFile {
        let body = serde_json::to_string_pretty(&self.manifest()).unwrap_or_else(|_| "{}".to_string());
        ExportedFile::text(MANIFEST_PATH, format!("{}\n", body))
    }
}

fn rewrite_props(
    props: &mut Map<String, Value>,
    image_keys: &BTreeSet<String>,
    replacements: &HashMap<&str, &str>,
) {
    for (key, value) in props.iter_mut() {
        rewrite_value(image_keys.contains(key), value, image_keys, replacements);
    }
}

fn rewrite_value(
    is_image: bool,
    value: &mut Value,
    image_keys: &BTreeSet<String>,
    replacements: &HashMap<&str, &str>,
) {
    match value {
        Value::String(s) if is_image => {
            if let Some(replacement) = replacements.get(s.as_str()) {
                *s = replacement.to_string();
            }
        }
        Value::Object(map) => rewrite_props(map, image_keys, replacements),
        Value::Array(items) => {
            for item in items {
                rewrite_value(is_image, item, image_keys, replacements);
            }
        }
        _ => {}
    }
}

pub struct AssetCollector<'c> {
    store: &'c AssetStore,
    options: &'c ExportOptions,
    image_keys: &'c BTreeSet<String>,
}

impl<'c> AssetCollector<'c> {
    pub fn new(store: &'c AssetStore, options: &'c ExportOptions, image_keys: &'c BTreeSet<String>) -> Self {
        AssetCollector {
            store,
            options,
            image_keys,
        }
    }

    /// Resolve every distinct image reference of the visible tree.
    pub fn collect(&self, tree: &NodeTree) -> AssetCollection {
        let mut order: Vec<String> = Vec::new();
        let mut users: HashMap<String, Vec<String>> = HashMap::new();
        for id in tree.visible_preorder() {
            let Some(node) = tree.get(id) else { continue };
            let mut found = Vec::new();
            for (key, value) in &node.props {
                scan_value(self.image_keys.contains(key), value, self.image_keys, &mut found);
            }
            for reference in found {
                let nodes = users.entry(reference.clone()).or_insert_with(|| {
                    order.push(reference.clone());
                    Vec::new()
                });
                if nodes.last().map(String::as_str) != Some(id) {
                    nodes.push(id.to_string());
                }
            }
        }

        let mut collection = AssetCollection::default();
        let mut written: HashMap<String, (String, String)> = HashMap::new();
        let mut taken: HashMap<String, String> = HashMap::new();

        for reference in order {
            let nodes = users.remove(&reference).unwrap_or_default();
            let first_node = nodes.first().cloned().unwrap_or_default();
            let mut entry = AssetEntry {
                reference: reference.clone(),
                status: AssetStatus::Missing,
                nodes,
                key: None,
                path: None,
                sha256: None,
                size: None,
                replacement: None,
            };

            let Some((key, payload)) = self.store.get(&reference) else {
                if EXTERNAL_URL.is_match(&reference) {
                    tracing::debug!(reference = %reference, "external asset reference left as-is");
                }
                collection.warnings.push(ExportWarning::AssetNotFound {
                    reference: reference.clone(),
                    node_id: first_node,
                });
                collection.entries.insert(reference, entry);
                continue;
            };
            entry.key = Some(key.to_string());

            let (mime, bytes) = match decode_payload(payload) {
                Ok(decoded) => decoded,
                Err(reason) => {
                    entry.status = AssetStatus::Undecodable;
                    collection.warnings.push(ExportWarning::AssetDecodeFailed {
                        reference: reference.clone(),
                        node_id: first_node,
                        reason,
                    });
                    collection.entries.insert(reference, entry);
                    continue;
                }
            };

            let digest = format!("{:x}", Sha256::digest(&bytes));
            entry.sha256 = Some(digest.clone());
            entry.size = Some(bytes.len());

            let limit = self.options.inline_asset_limit;
            if limit > 0 && bytes.len() as u64 <= limit {
                let mime = mime.unwrap_or_else(|| mime_from_name(key).to_string());
                entry.status = AssetStatus::Inlined;
                entry.replacement = Some(format!("data:{};base64,{}", mime, STANDARD.encode(&bytes)));
                tracing::debug!(reference = %reference, size = bytes.len(), "inlined asset");
            } else {
                // Two references to the same stored key share one file.
                let (path, url) = match written.get(key) {
                    Some(existing) => existing.clone(),
                    None => {
                        let name = unique_name(&mut taken, &file_name(key), &digest);
                        let path = format!("public/{}/{}", self.options.asset_dir, name);
                        let url = format!("/{}/{}", self.options.asset_dir, name);
                        collection.files.push(ExportedFile::binary(path.clone(), bytes));
                        written.insert(key.to_string(), (path.clone(), url.clone()));
                        (path, url)
                    }
                };
                tracing::debug!(reference = %reference, path = %path, "externalized asset");
                entry.status = AssetStatus::Externalized;
                entry.path = Some(path);
                entry.replacement = Some(url);
            }
            collection.entries.insert(reference, entry);
        }

        collection
    }
}

fn scan_value(is_image: bool, value: &Value, image_keys: &BTreeSet<String>, out: &mut Vec<String>) {
    match value {
        Value::String(s) if is_image => {
            if !s.is_empty() && !s.starts_with("data:") {
                out.push(s.clone());
            }
        }
        Value::Object(map) => {
            for (key, nested) in map {
                scan_value(image_keys.contains(key), nested, image_keys, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                scan_value(is_image, item, image_keys, out);
            }
        }
        _ => {}
    }
}

/// Split an optional `data:<mime>;base64,` prefix off and decode the rest.
fn decode_payload(payload: &str) -> Result<(Option<String>, Vec<u8>), String> {
    let (mime, data) = match payload.strip_prefix("data:") {
        Some(rest) => {
            let (meta, data) = rest
                .split_once(',')
                .ok_or_else(|| "data URL has no payload".to_string())?;
            let mime = meta.split(';').next().filter(|m| !m.is_empty()).map(str::to_string);
            (mime, data)
        }
        None => (None, payload),
    };
    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(cleaned.as_bytes())
        .map(|bytes| (mime, bytes))
        .map_err(|e| e.to_string())
}

fn file_name(key: &str) -> String {
    let last = key.rsplit('/').next().unwrap_or(key);
    let sanitized = UNSAFE_NAME_CHARS.replace_all(last, "-");
    let sanitized = sanitized.trim_matches('-');
    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        "asset".to_string()
    } else {
        sanitized.to_string()
    }
}

fn unique_name(taken: &mut HashMap<String, String>, name: &str, digest: &str) -> String {
    let candidate = match taken.get(name) {
        Some(owner) if owner != digest => format!("{}-{}", &digest[..8], name),
        _ => name.to_string(),
    };
    taken.insert(candidate.clone(), digest.to_string());
    candidate
}

fn mime_from_name(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DEFAULT_IMAGE_KEYS;

    fn keys() -> BTreeSet<String> {
        DEFAULT_IMAGE_KEYS.iter().map(|s| s.to_string()).collect()
    }

    fn tree_with_src(src: &str) -> NodeTree {
        NodeTree::from_value(json!({
            "ROOT": { "type": "Container", "isCanvas": true, "children": ["img"] },
            "img": { "type": "Image", "parent": "ROOT", "props": { "src": src } }
        }))
        .unwrap()
    }

    fn store(key: &str, payload: &str) -> AssetStore {
        AssetStore::new(&[ImageData {
            key: key.to_string(),
            base64: payload.to_string(),
        }])
    }

    #[test]
    fn test_store_lookup_normalizes_prefixes() {
        let store = store("public/a.png", "AAAA");
        assert_eq!(store.get("/public/a.png").map(|(k, _)| k), Some("public/a.png"));
        assert_eq!(store.get("public/a.png").map(|(k, _)| k), Some("public/a.png"));
        assert_eq!(store.get("/a.png").map(|(k, _)| k), Some("public/a.png"));
        assert!(store.get("/b.png").is_none());
    }

    #[test]
    fn test_duplicate_keys_last_wins() {
        let store = AssetStore::new(&[
            ImageData { key: "a".to_string(), base64: "AAAA".to_string() },
            ImageData { key: "a".to_string(), base64: "AQID".to_string() },
        ]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").map(|(_, v)| v), Some("AQID"));
    }

    #[test]
    fn test_externalizes_found_asset() {
        let options = ExportOptions::default();
        let keys = keys();
        let store = store("public/a.png", "data:image/png;base64,AAAA");
        let mut tree = tree_with_src("/public/a.png");

        let collection = AssetCollector::new(&store, &options, &keys).collect(&tree);
        assert!(collection.warnings.is_empty());
        assert_eq!(collection.files.len(), 1);
        assert_eq!(collection.files[0].path, "public/images/a.png");
        assert_eq!(collection.files[0].bytes(), &[0u8, 0, 0][..]);

        let entry = &collection.entries["/public/a.png"];
        assert!(entry.found());
        assert_eq!(entry.status, AssetStatus::Externalized);
        assert_eq!(entry.nodes, vec!["img".to_string()]);

        collection.rewrite_tree(&mut tree, &keys);
        assert_eq!(tree.get("img").unwrap().props["src"], json!("/images/a.png"));
    }

    #[test]
    fn test_missing_asset_warns_and_keeps_reference() {
        let options = ExportOptions::default();
        let keys = keys();
        let store = AssetStore::default();
        let mut tree = tree_with_src("/public/a.png");

        let collection = AssetCollector::new(&store, &options, &keys).collect(&tree);
        assert!(collection.files.is_empty());
        assert_eq!(
            collection.warnings,
            vec![ExportWarning::AssetNotFound {
                reference: "/public/a.png".to_string(),
                node_id: "img".to_string(),
            }]
        );
        collection.rewrite_tree(&mut tree, &keys);
        assert_eq!(tree.get("img").unwrap().props["src"], json!("/public/a.png"));
    }

    #[test]
    fn test_undecodable_payload_warns() {
        let options = ExportOptions::default();
        let keys = keys();
        let store = store("a.png", "data:image/png;base64,@@@");
        let tree = tree_with_src("a.png");
        let collection = AssetCollector::new(&store, &options, &keys).collect(&tree);
        assert!(matches!(
            collection.warnings.as_slice(),
            [ExportWarning::AssetDecodeFailed { .. }]
        ));
        assert_eq!(collection.entries["a.png"].status, AssetStatus::Undecodable);
    }

    #[test]
    fn test_small_assets_inline_under_limit() {
        let options = ExportOptions {
            inline_asset_limit: 16,
            ..ExportOptions::default()
        };
        let keys = keys();
        let store = store("public/a.png", "AAAA");
        let mut tree = tree_with_src("/public/a.png");
        let collection = AssetCollector::new(&store, &options, &keys).collect(&tree);
        assert!(collection.files.is_empty());
        collection.rewrite_tree(&mut tree, &keys);
        assert_eq!(
            tree.get("img").unwrap().props["src"],
            json!("data:image/png;base64,AAAA")
        );
    }

    #[test]
    fn test_nested_references_and_hidden_nodes() {
        let options = ExportOptions::default();
        let keys = keys();
        let store = AssetStore::new(&[
            ImageData { key: "public/x.png".to_string(), base64: "AAAA".to_string() },
            ImageData { key: "public/y.png".to_string(), base64: "AQID".to_string() },
        ]);
        let tree = NodeTree::from_value(json!({
            "ROOT": { "type": "Container", "isCanvas": true, "children": ["g", "h"] },
            "g": { "type": "Gallery", "parent": "ROOT", "props": {
                "images": [{ "src": "/public/x.png", "alt": "x" }, { "src": "/public/x.png" }]
            } },
            "h": { "type": "Image", "parent": "ROOT", "hidden": true, "props": { "src": "/public/y.png" } }
        }))
        .unwrap();
        let collection = AssetCollector::new(&store, &options, &keys).collect(&tree);
        assert_eq!(collection.entries.len(), 1);
        assert_eq!(collection.files.len(), 1);
        assert_eq!(collection.entries["/public/x.png"].nodes, vec!["g".to_string()]);
    }

    #[test]
    fn test_name_collisions_get_digest_prefix() {
        let options = ExportOptions::default();
        let keys = keys();
        let store = AssetStore::new(&[
            ImageData { key: "one/logo.png".to_string(), base64: "AAAA".to_string() },
            ImageData { key: "two/logo.png".to_string(), base64: "AQID".to_string() },
        ]);
        let tree = NodeTree::from_value(json!({
            "ROOT": { "type": "Container", "isCanvas": true, "children": ["a", "b"] },
            "a": { "type": "Image", "parent": "ROOT", "props": { "src": "one/logo.png" } },
            "b": { "type": "Image", "parent": "ROOT", "props": { "src": "two/logo.png" } }
        }))
        .unwrap();
        let collection = AssetCollector::new(&store, &options, &keys).collect(&tree);
        let paths: Vec<&str> = collection.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths[0], "public/images/logo.png");
        assert!(paths[1].starts_with("public/images/") && paths[1].ends_with("-logo.png"));
        assert_ne!(paths[0], paths[1]);
    }

    #[test]
    fn test_manifest_lists_statuses() {
        let options = ExportOptions::default();
        let keys = keys();
        let store = store("public/a.png", "AAAA");
        let tree = tree_with_src("/public/a.png");
        let collection = AssetCollector::new(&store, &options, &keys).collect(&tree);
        let manifest = collection.manifest();
        assert_eq!(manifest["assets"][0]["status"], "externalized");
        assert_eq!(manifest["assets"][0]["path"], "public/images/a.png");
        assert!(manifest["assets"][0]["sha256"].as_str().unwrap().len() == 64);
    }
}

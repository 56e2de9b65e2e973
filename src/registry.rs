//! Component Registry
//!
//! Maps a component type name to its template: a pure-render JSX fragment, a
//! typed prop schema with defaults, and the editor-only markers that must be
//! stripped before the fragment can leave the editor.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::{ExportError, ExportResult};
use crate::tree::NodeTree;

// ═══════════════════════════════════════════════════════════════════════════════
// EDITOR-ONLY MARKERS
// ═══════════════════════════════════════════════════════════════════════════════

/// JSX attributes that only make sense inside the editing surface.
const EDITOR_ATTRIBUTES: &[&str] = &[
    "contentEditable",
    "suppressContentEditableWarning",
    "draggable",
    "data-craft-node",
    "data-node-id",
];

/// Identifiers injected by the editing framework (connectors, selection state,
/// prop setters). Any attribute, style property or child that reads one of these
/// is editor wiring.
const EDITOR_BINDINGS: &[&str] = &[
    "connect",
    "drag",
    "connectors",
    "selected",
    "hovered",
    "enabled",
    "setProp",
    "actions",
    "query",
    "nodeId",
    "useNode",
    "useEditor",
    "isEditing",
    "setEditing",
];

/// Editor overlay components.
const EDITOR_ELEMENTS: &[&str] = &[
    "NodeToolbar",
    "SelectionOutline",
    "DragHandle",
    "ResizeHandle",
];

/// Prop names that hold image paths in every template, in addition to the props
/// a template declares with `PropKind::Image`.
pub const DEFAULT_IMAGE_KEYS: &[&str] = &["src", "image", "backgroundImage", "logo", "avatar", "poster"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EditorMarker {
    Attribute(String),
    Binding(String),
    StyleProperty(String),
    Element(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerSet {
    attributes: HashSet<String>,
    bindings: HashSet<String>,
    style_properties: HashSet<String>,
    elements: HashSet<String>,
}

impl MarkerSet {
    pub fn defaults() -> Self {
        let mut set = MarkerSet::default();
        set.attributes
            .extend(EDITOR_ATTRIBUTES.iter().map(|s| s.to_string()));
        set.bindings
            .extend(EDITOR_BINDINGS.iter().map(|s| s.to_string()));
        set.elements
            .extend(EDITOR_ELEMENTS.iter().map(|s| s.to_string()));
        set
    }

    pub fn insert(&mut self, marker: &EditorMarker) {
        match marker {
            EditorMarker::Attribute(name) => self.attributes.insert(name.clone()),
            EditorMarker::Binding(name) => self.bindings.insert(name.clone()),
            EditorMarker::StyleProperty(name) => self.style_properties.insert(name.clone()),
            EditorMarker::Element(name) => self.elements.insert(name.clone()),
        };
    }

    pub fn merge(&mut self, other: &MarkerSet) {
        self.attributes.extend(other.attributes.iter().cloned());
        self.bindings.extend(other.bindings.iter().cloned());
        self.style_properties
            .extend(other.style_properties.iter().cloned());
        self.elements.extend(other.elements.iter().cloned());
    }

    pub fn is_attribute(&self, name: &str) -> bool {
        self.attributes.contains(name)
    }

    pub fn is_binding(&self, name: &str) -> bool {
        self.bindings.contains(name)
    }

    pub fn is_style_property(&self, name: &str) -> bool {
        self.style_properties.contains(name)
    }

    pub fn is_element(&self, name: &str) -> bool {
        self.elements.contains(name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROP SCHEMA
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropKind {
    Color,
    Dimension,
    Number,
    Boolean,
    Enum,
    Text,
    Image,
    Object,
    List,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropSchema {
    pub name: String,
    pub kind: PropKind,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl PropSchema {
    pub fn new(name: &str, kind: PropKind) -> Self {
        PropSchema {
            name: name.to_string(),
            kind,
            default: None,
            options: Vec::new(),
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|s| s.to_string()).collect();
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEMPLATE
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    static ref CHILDREN_REGION_RE: Regex = Regex::new(r"\{\s*children\s*\}").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub name: String,
    pub source: String,
    pub props: Vec<PropSchema>,
    /// Markers specific to this template, on top of the framework defaults.
    pub editor_only: Vec<EditorMarker>,
    /// Module imports the rendered fragment needs on the exported page.
    pub imports: Vec<String>,
}

impl Template {
    pub fn new(name: &str, source: &str) -> Self {
        Template {
            name: name.to_string(),
            source: source.to_string(),
            props: Vec::new(),
            editor_only: Vec::new(),
            imports: Vec::new(),
        }
    }

    pub fn with_props(mut self, props: Vec<PropSchema>) -> Self {
        self.props = props;
        self
    }

    pub fn with_import(mut self, import: &str) -> Self {
        self.imports.push(import.to_string());
        self
    }

    pub fn with_marker(mut self, marker: EditorMarker) -> Self {
        self.editor_only.push(marker);
        self
    }

    pub fn prop_schema(&self, name: &str) -> Option<&PropSchema> {
        self.props.iter().find(|p| p.name == name)
    }

    pub fn declared_props(&self) -> impl Iterator<Item = &str> {
        self.props.iter().map(|p| p.name.as_str())
    }

    /// Schema defaults overlaid with the node's own props. Null node values do not
    /// hide a default.
    pub fn effective_props(&self, node_props: &Map<String, Value>) -> Map<String, Value> {
        let mut props = Map::new();
        for schema in &self.props {
            if let Some(default) = &schema.default {
                props.insert(schema.name.clone(), default.clone());
            }
        }
        for (key, value) in node_props {
            if value.is_null() && props.contains_key(key) {
                continue;
            }
            props.insert(key.clone(), value.clone());
        }
        props
    }

    pub fn marker_set(&self) -> MarkerSet {
        let mut set = MarkerSet::defaults();
        for marker in &self.editor_only {
            set.insert(marker);
        }
        set
    }

    pub fn has_children_region(&self) -> bool {
        CHILDREN_REGION_RE.is_match(&self.source)
    }
}

/// On-disk description of a template, stored as `<Name>.template.json` next to
/// `<Name>.tsx`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemplateManifest {
    name: String,
    #[serde(default)]
    props: Vec<PropSchema>,
    #[serde(default)]
    editor_only: Vec<EditorMarker>,
    #[serde(default)]
    imports: Vec<String>,
    /// Inline source; when absent the sibling `.tsx` file is read.
    #[serde(default)]
    source: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    templates: BTreeMap<String, Template>,
}

impl ComponentRegistry {
    pub fn empty() -> Self {
        ComponentRegistry::default()
    }

    /// The component library available in the editor's toolbox.
    pub fn builtin() -> Self {
        let mut registry = ComponentRegistry::empty();
        for template in builtin_templates() {
            registry.register(template);
        }
        registry
    }

    /// Register a template, returning the one it replaced.
    pub fn register(&mut self, template: Template) -> Option<Template> {
        self.templates.insert(template.name.clone(), template)
    }

    pub fn get(&self, component_type: &str) -> Option<&Template> {
        self.templates.get(component_type)
    }

    /// Resolve the template for a node. Unknown types are a hard failure.
    pub fn resolve(&self, node_id: &str, component_type: &str) -> ExportResult<&Template> {
        self.templates
            .get(component_type)
            .ok_or_else(|| ExportError::UnknownComponentType {
                node_id: node_id.to_string(),
                component_type: component_type.to_string(),
            })
    }

    /// Resolve the component type of every node, rendered or hidden.
    pub fn resolve_all(&self, tree: &NodeTree) -> ExportResult<()> {
        for (id, node) in tree.iter() {
            self.resolve(id, node.component_type())?;
        }
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Union of every template's editor-only markers.
    pub fn editor_markers(&self) -> MarkerSet {
        let mut set = MarkerSet::defaults();
        for template in self.templates.values() {
            set.merge(&template.marker_set());
        }
        set
    }

    pub fn image_prop_names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = DEFAULT_IMAGE_KEYS.iter().map(|s| s.to_string()).collect();
        for template in self.templates.values() {
            for schema in &template.props {
                if schema.kind == PropKind::Image {
                    names.insert(schema.name.clone());
                }
            }
        }
        names
    }

    /// Load every `*.template.json` manifest under `dir`, overriding builtins of
    /// the same name. A manifest that cannot be read or parsed fails the load.
    pub fn load_dir(&mut self, dir: &Path) -> ExportResult<usize> {
        let mut manifests = Vec::new();
        for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                ExportError::io(path, source)
            })?;
            let path = entry.path();
            if path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".template.json"))
            {
                manifests.push(path.to_path_buf());
            }
        }

        let mut loaded = 0;
        for manifest_path in manifests {
            let template = load_template_file(&manifest_path)?;
            tracing::debug!(
                template = %template.name,
                path = %manifest_path.display(),
                "loaded component template"
            );
            self.register(template);
            loaded += 1;
        }
        Ok(loaded)
    }
}

fn load_template_file(manifest_path: &Path) -> ExportResult<Template> {
    let raw = fs::read_to_string(manifest_path).map_err(|e| ExportError::io(manifest_path, e))?;
    let manifest: TemplateManifest =
        serde_json::from_str(&raw).map_err(|e| ExportError::TemplateSyntax {
            template: manifest_path.display().to_string(),
            message: e.to_string(),
        })?;

    let source = match manifest.source {
        Some(source) => source,
        None => {
            let file_name = manifest_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            let stem = file_name.trim_end_matches(".template.json");
            let source_path = manifest_path.with_file_name(format!("{}.tsx", stem));
            fs::read_to_string(&source_path).map_err(|e| ExportError::io(&source_path, e))?
        }
    };

    crate::rewriter::check_fragment(&manifest.name, &source)?;

    Ok(Template {
        name: manifest.name,
        source,
        props: manifest.props,
        editor_only: manifest.editor_only,
        imports: manifest.imports,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILTIN LIBRARY
// ═══════════════════════════════════════════════════════════════════════════════

fn style_props() -> PropSchema {
    PropSchema::new("style", PropKind::Object)
}

pub fn builtin_templates() -> Vec<Template> {
    use PropKind::*;

    vec![
        Template::new("Container", include_str!("templates/Container.tsx")).with_props(vec![
            PropSchema::new("background", Color),
            PropSchema::new("color", Color),
            PropSchema::new("paddingY", Dimension),
            PropSchema::new("paddingX", Dimension),
            PropSchema::new("margin", Dimension),
            PropSchema::new("radius", Dimension),
            PropSchema::new("flexDirection", Enum)
                .with_default(json!("column"))
                .with_options(&["row", "column"]),
            PropSchema::new("alignItems", Enum)
                .with_default(json!("stretch"))
                .with_options(&["flex-start", "center", "flex-end", "stretch"]),
            PropSchema::new("justifyContent", Enum)
                .with_default(json!("flex-start"))
                .with_options(&["flex-start", "center", "flex-end", "space-between", "space-around"]),
            PropSchema::new("gap", Dimension).with_default(json!(16)),
            PropSchema::new("minHeight", Dimension),
            PropSchema::new("className", Text),
            style_props(),
        ]),
        Template::new("Text", include_str!("templates/Text.tsx")).with_props(vec![
            PropSchema::new("text", Text).with_default(json!("Edit this text")),
            PropSchema::new("color", Color),
            PropSchema::new("fontFamily", Text),
            PropSchema::new("fontSize", Dimension).with_default(json!(16)),
            PropSchema::new("fontWeight", Number).with_default(json!(400)),
            PropSchema::new("textAlign", Enum)
                .with_default(json!("left"))
                .with_options(&["left", "center", "right", "justify"]),
            style_props(),
        ]),
        Template::new("Heading", include_str!("templates/Heading.tsx")).with_props(vec![
            PropSchema::new("text", Text).with_default(json!("Heading")),
            PropSchema::new("color", Color),
            PropSchema::new("fontFamily", Text),
            PropSchema::new("fontSize", Dimension).with_default(json!(36)),
            PropSchema::new("fontWeight", Number).with_default(json!(700)),
            PropSchema::new("textAlign", Enum)
                .with_default(json!("left"))
                .with_options(&["left", "center", "right"]),
            style_props(),
        ]),
        Template::new("Button", include_str!("templates/Button.tsx"))
            .with_import("import Link from \"next/link\";")
            .with_props(vec![
                PropSchema::new("text", Text).with_default(json!("Click me")),
                PropSchema::new("href", Text).with_default(json!("#")),
                PropSchema::new("target", Enum).with_options(&["_self", "_blank"]),
                PropSchema::new("background", Color),
                PropSchema::new("color", Color),
                PropSchema::new("radius", Dimension),
                style_props(),
            ]),
        Template::new("Image", include_str!("templates/Image.tsx")).with_props(vec![
            PropSchema::new("src", Image),
            PropSchema::new("alt", Text).with_default(json!("")),
            PropSchema::new("width", Dimension).with_default(json!("100%")),
            PropSchema::new("height", Dimension).with_default(json!("auto")),
            PropSchema::new("objectFit", Enum)
                .with_default(json!("cover"))
                .with_options(&["cover", "contain", "fill"]),
            PropSchema::new("radius", Dimension),
            style_props(),
        ]),
        Template::new("Card", include_str!("templates/Card.tsx")).with_props(vec![
            PropSchema::new("gap", Dimension).with_default(json!(12)),
            PropSchema::new("background", Color),
            PropSchema::new("borderColor", Color),
            PropSchema::new("radius", Dimension),
            PropSchema::new("padding", Dimension),
            PropSchema::new("shadow", Boolean).with_default(json!(true)),
            style_props(),
        ]),
        Template::new("Hero", include_str!("templates/Hero.tsx")).with_props(vec![
            PropSchema::new("title", Text).with_default(json!("Build something great")),
            PropSchema::new("subtitle", Text),
            PropSchema::new("image", Image),
            PropSchema::new("background", Color),
            PropSchema::new("titleColor", Color),
            PropSchema::new("subtitleColor", Color),
            PropSchema::new("titleSize", Dimension).with_default(json!(56)),
            PropSchema::new("paddingY", Dimension),
            PropSchema::new("textAlign", Enum)
                .with_default(json!("center"))
                .with_options(&["left", "center", "right"]),
            PropSchema::new("minHeight", Dimension).with_default(json!(420)),
            style_props(),
        ]),
        Template::new("Gallery", include_str!("templates/Gallery.tsx")).with_props(vec![
            PropSchema::new("images", List).with_default(json!([])),
            PropSchema::new("columns", Number).with_default(json!(3)),
            PropSchema::new("gap", Dimension),
            PropSchema::new("radius", Dimension),
            style_props(),
        ]),
        Template::new("Divider", include_str!("templates/Divider.tsx")).with_props(vec![
            PropSchema::new("thickness", Dimension).with_default(json!(1)),
            PropSchema::new("color", Color),
            PropSchema::new("spacing", Dimension),
            style_props(),
        ]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_resolves_library() {
        let registry = ComponentRegistry::builtin();
        for name in [
            "Container", "Text", "Heading", "Button", "Image", "Card", "Hero", "Gallery", "Divider",
        ] {
            assert!(registry.get(name).is_some(), "missing builtin {}", name);
        }
        assert_eq!(registry.len(), 9);
    }

    #[test]
    fn test_resolve_unknown_type_names_node() {
        let registry = ComponentRegistry::builtin();
        let err = registry.resolve("n7", "DoesNotExist").unwrap_err();
        assert_eq!(err.code(), "UnknownComponentType");
        assert_eq!(err.node_id(), Some("n7"));
    }

    #[test]
    fn test_effective_props_overlay() {
        let registry = ComponentRegistry::builtin();
        let text = registry.get("Text").unwrap();
        let mut node_props = Map::new();
        node_props.insert("text".to_string(), json!("Hi"));
        node_props.insert("fontSize".to_string(), Value::Null);
        let props = text.effective_props(&node_props);
        assert_eq!(props["text"], json!("Hi"));
        assert_eq!(props["fontSize"], json!(16));
        assert!(!props.contains_key("color"));
    }

    #[test]
    fn test_children_region_detection() {
        let registry = ComponentRegistry::builtin();
        assert!(registry.get("Container").unwrap().has_children_region());
        assert!(registry.get("Card").unwrap().has_children_region());
        assert!(!registry.get("Text").unwrap().has_children_region());
    }

    #[test]
    fn test_marker_sets() {
        let template = Template::new("X", "<div />")
            .with_marker(EditorMarker::StyleProperty("cursor".to_string()));
        let set = template.marker_set();
        assert!(set.is_style_property("cursor"));
        assert!(set.is_binding("connect"));
        assert!(set.is_attribute("contentEditable"));
        assert!(!set.is_binding("text"));
    }

    #[test]
    fn test_image_prop_names_include_schema_images() {
        let names = ComponentRegistry::builtin().image_prop_names();
        assert!(names.contains("src"));
        assert!(names.contains("image"));
    }

    #[test]
    fn test_load_dir_overlays_templates() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("Badge.template.json"),
            r#"{
                "name": "Badge",
                "props": [{ "name": "label", "kind": "text", "default": "New" }],
                "editorOnly": [{ "attribute": "data-badge-editor" }],
                "imports": []
            }"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("Badge.tsx"),
            "<span data-badge-editor style={{ color: theme.colors.primary }}>{label}</span>\n",
        )
        .unwrap();

        let mut registry = ComponentRegistry::builtin();
        assert_eq!(registry.load_dir(dir.path()).unwrap(), 1);
        let badge = registry.get("Badge").unwrap();
        assert_eq!(badge.prop_schema("label").unwrap().default, Some(json!("New")));
        assert!(badge.marker_set().is_attribute("data-badge-editor"));
        assert!(registry.editor_markers().is_attribute("data-badge-editor"));
    }

    #[test]
    fn test_load_dir_rejects_broken_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Broken.template.json"), "{ not json").unwrap();
        let mut registry = ComponentRegistry::empty();
        let err = registry.load_dir(dir.path()).unwrap_err();
        assert_eq!(err.code(), "TemplateError");
    }

    #[test]
    fn test_load_dir_rejects_unparseable_source() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("Bad.template.json"),
            r#"{ "name": "Bad", "source": "<div>" }"#,
        )
        .unwrap();
        let mut registry = ComponentRegistry::empty();
        let err = registry.load_dir(dir.path()).unwrap_err();
        assert_eq!(err.code(), "TemplateError");
    }
}

use crate::registry::{builtin_templates, ComponentRegistry, PropKind, PropSchema, Template};
use crate::rewriter::{inline_theme_references, rewrite_template, scan_for_editor_leaks, strip_editor_constructs, PropScope};
use crate::theme::Theme;
use serde_json::{json, Map, Value};

fn theme() -> Theme {
    Theme::from_value(json!({
        "colors": {
            "primary": "#0000ff",
            "background": { "primary": "#111111" },
            "text": { "body": "#222222" }
        },
        "fonts": { "body": "Inter" },
        "radius": 4
    }))
}

fn props(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn text_template() -> Template {
    Template::new(
        "Label",
        "<span\n  onClick={() => setProp((p) => (p.text = \"\"))}\n  style={{\n    color: color ?? theme.colors.text.body,\n    fontFamily: theme.fonts.body,\n  }}\n>\n  {text}\n</span>",
    )
    .with_props(vec![
        PropSchema::new("color", PropKind::Color),
        PropSchema::new("text", PropKind::Text),
    ])
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRECEDENCE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_explicit_prop_beats_theme() {
    let out = rewrite_template(&text_template(), &theme(), &props(json!({ "color": "#ff0000" }))).unwrap();
    assert!(out.contains("color: \"#ff0000\""), "{}", out);
    assert!(!out.contains("#222222"));
}

#[test]
fn test_absent_prop_falls_back_to_theme() {
    for value in [json!({}), json!({ "color": null }), json!({ "color": "" })] {
        let out = rewrite_template(&text_template(), &theme(), &props(value)).unwrap();
        assert!(out.contains("color: \"#222222\""), "{}", out);
        assert!(out.contains("fontFamily: \"Inter\""));
        assert!(!out.contains("theme"));
    }
}

#[test]
fn test_or_fallback_skips_falsy_prop() {
    let template = Template::new("Gap", "<div style={{ gap: gap || theme.radius }} />")
        .with_props(vec![PropSchema::new("gap", PropKind::Dimension)]);
    let out = rewrite_template(&template, &theme(), &props(json!({ "gap": 0 }))).unwrap();
    assert_eq!(out, "<div style={{ gap: 4 }} />");

    let template = Template::new("Gap", "<div style={{ gap: gap ?? theme.radius }} />")
        .with_props(vec![PropSchema::new("gap", PropKind::Dimension)]);
    let out = rewrite_template(&template, &theme(), &props(json!({ "gap": 0 }))).unwrap();
    assert_eq!(out, "<div style={{ gap: 0 }} />");
}

#[test]
fn test_missing_theme_path_fails_even_when_prop_is_set() {
    let template = Template::new("Bad", "<p style={{ color: color ?? theme.colors.nope }} />")
        .with_props(vec![PropSchema::new("color", PropKind::Color)]);
    let err = rewrite_template(&template, &theme(), &props(json!({ "color": "#fff" }))).unwrap_err();
    assert_eq!(err.code(), "ThemePathError");
    assert_eq!(err.path().as_deref(), Some("colors.nope"));
}

// ═══════════════════════════════════════════════════════════════════════════════
// IDEMPOTENCE & PASS-THROUGH
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_rewriting_twice_changes_nothing() {
    let values = props(json!({ "color": "#ff0000", "text": "Hi" }));
    let once = rewrite_template(&text_template(), &theme(), &values).unwrap();
    let again = Template::new("Label", &once).with_props(text_template().props.clone());
    let twice = rewrite_template(&again, &theme(), &values).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn test_builtin_rewrite_is_idempotent() {
    let registry = ComponentRegistry::builtin();
    let theme = Theme::stock();
    for template in builtin_templates() {
        let values = template.effective_props(&Map::new());
        let once = rewrite_template(&template, &theme, &values).unwrap();
        let again = Template::new(&template.name, &once).with_props(template.props.clone());
        assert_eq!(once, rewrite_template(&again, &theme, &values).unwrap(), "{}", template.name);
        assert!(registry.get(&template.name).is_some());
    }
}

#[test]
fn test_unrecognized_constructs_pass_through() {
    let source = "<section\n  data-testid=\"hero\"\n  aria-label={label}\n  onClick={() => track(\"hero\")}\n>\n  {items.map((item) => <b key={item}>{item}</b>)}\n</section>";
    let template = Template::new("Plain", source).with_props(vec![PropSchema::new("label", PropKind::Text)]);
    let stripped = strip_editor_constructs("Plain", source, &template.marker_set()).unwrap();
    assert_eq!(stripped, source);

    let values = Map::new();
    let scope = PropScope::new(&template, &values);
    assert_eq!(inline_theme_references("Plain", &stripped, &theme(), &scope).unwrap(), source);
}

#[test]
fn test_shadowed_theme_binding_is_left_alone() {
    let source = "<ul>{themes.map((theme) => <li>{theme.name}</li>)}</ul>";
    let template = Template::new("List", source).with_props(vec![PropSchema::new("themes", PropKind::List)]);
    let values = Map::new();
    let scope = PropScope::new(&template, &values);
    assert_eq!(inline_theme_references("List", source, &theme(), &scope).unwrap(), source);
}

// ═══════════════════════════════════════════════════════════════════════════════
// EDITOR STRIPPING
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_builtin_templates_strip_clean() {
    let registry = ComponentRegistry::builtin();
    let markers = registry.editor_markers();
    for template in builtin_templates() {
        let stripped = strip_editor_constructs(&template.name, &template.source, &template.marker_set()).unwrap();
        scan_for_editor_leaks(&template.name, &stripped, &markers)
            .unwrap_or_else(|e| panic!("{}: {}\n{}", template.name, e, stripped));
        assert!(!stripped.contains("connect("), "{}", template.name);
        assert!(!stripped.contains("selected"), "{}", template.name);
    }
}

#[test]
fn test_strips_editor_attributes_and_elements() {
    let source = "<div\n  ref={(ref) => connect(drag(ref))}\n  data-craft-node={nodeId}\n  className=\"box\"\n  style={{\n    color: \"red\",\n    outline: selected ? \"1px solid\" : \"none\",\n  }}\n>\n  {selected && <NodeToolbar />}\n  <DragHandle />\n  {children}\n</div>";
    let template = Template::new("Box", source);
    let out = strip_editor_constructs("Box", source, &template.marker_set()).unwrap();
    assert_eq!(
        out,
        "<div\n  className=\"box\"\n  style={{\n    color: \"red\",\n  }}\n>\n  {children}\n</div>"
    );
}

#[test]
fn test_template_specific_marker_is_stripped() {
    use crate::registry::EditorMarker;
    let source = "<div data-preview-only=\"1\" title=\"x\" />";
    let template = Template::new("Custom", source).with_marker(EditorMarker::Attribute("data-preview-only".to_string()));
    let out = strip_editor_constructs("Custom", source, &template.marker_set()).unwrap();
    assert_eq!(out, "<div title=\"x\" />");
}

//! Theme snapshot and reference resolution.
//!
//! A theme is an immutable nested mapping (`colors`, `fonts`, `radius`,
//! `horizontalSpacing`, `verticalSpacing`). Templates reference it with dotted
//! paths such as `colors.text.body`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::tree::is_set;

/// Top-level keys that may be overridden outside the theme object itself.
pub const GLOBAL_OVERRIDES: &[&str] = &["radius", "horizontalSpacing", "verticalSpacing"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("theme path \"{path}\" does not exist")]
pub struct ThemePathError {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Theme(Map<String, Value>);

impl Theme {
    pub fn new(values: Map<String, Value>) -> Self {
        Theme(values)
    }

    /// Build a snapshot from request JSON. Anything other than an object is an
    /// empty theme, which makes every reference fail loudly later.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Theme(map),
            _ => Theme(Map::new()),
        }
    }

    /// The builder's stock theme, used when an editor session never customized it.
    pub fn stock() -> Self {
        let value = json!({
            "colors": {
                "primary": "#3b82f6",
                "secondary": "#8b5cf6",
                "accent": "#f59e0b",
                "success": "#10b981",
                "warning": "#f59e0b",
                "danger": "#ef4444",
                "border": "#e2e8f0",
                "background": {
                    "primary": "#ffffff",
                    "secondary": "#f8fafc",
                    "tertiary": "#f1f5f9"
                },
                "text": {
                    "heading": "#0f172a",
                    "body": "#334155",
                    "muted": "#64748b",
                    "onPrimary": "#ffffff"
                }
            },
            "fonts": {
                "heading": "Inter",
                "body": "Inter"
            },
            "radius": 8,
            "horizontalSpacing": 24,
            "verticalSpacing": 48
        });
        Theme::from_value(value)
    }

    /// Apply `radius`/spacing overrides that the request carries next to the
    /// theme object. Unset overrides leave the snapshot alone.
    pub fn with_overrides(mut self, overrides: &Map<String, Value>) -> Self {
        for key in GLOBAL_OVERRIDES {
            if let Some(value) = overrides.get(*key).filter(|v| is_set(v)) {
                self.0.insert(key.to_string(), value.clone());
            }
        }
        self
    }

    /// Resolve a dotted path (`colors.text.body`) to its value in the snapshot.
    pub fn resolve(&self, path: &str) -> Result<&Value, ThemePathError> {
        let missing = || ThemePathError {
            path: path.to_string(),
        };

        let mut segments = path.split('.');
        let first = segments.next().filter(|s| !s.is_empty()).ok_or_else(missing)?;
        let mut current = self.0.get(first).ok_or_else(missing)?;
        for segment in segments {
            current = current
                .as_object()
                .and_then(|obj| obj.get(segment))
                .ok_or_else(missing)?;
        }
        Ok(current)
    }

    pub fn font(&self, role: &str) -> Option<&str> {
        self.resolve(&format!("fonts.{}", role))
            .ok()
            .and_then(Value::as_str)
    }

    /// Flatten `colors` into `(css-variable-name, value)` pairs in key order,
    /// e.g. `colors.text.onPrimary` becomes `--color-text-on-primary`.
    pub fn color_variables(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Some(Value::Object(colors)) = self.0.get("colors") {
            flatten_colors("--color", colors, &mut out);
        }
        out
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Resolve a theme reference on behalf of a style property: an explicitly set
/// prop wins, otherwise the theme value at `path`.
pub fn resolve_reference(
    theme: &Theme,
    path: &str,
    prop: Option<&Value>,
) -> Result<Value, ThemePathError> {
    let themed = theme.resolve(path)?;
    Ok(match prop.filter(|v| is_set(v)) {
        Some(value) => value.clone(),
        None => themed.clone(),
    })
}

fn flatten_colors(prefix: &str, colors: &Map<String, Value>, out: &mut Vec<(String, String)>) {
    let mut keys: Vec<&String> = colors.keys().collect();
    keys.sort();
    for key in keys {
        let name = format!("{}-{}", prefix, kebab_case(key));
        match &colors[key.as_str()] {
            Value::Object(nested) => flatten_colors(&name, nested, out),
            Value::String(s) => out.push((name, s.clone())),
            Value::Number(n) => out.push((name, n.to_string())),
            _ => {}
        }
    }
}

fn kebab_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

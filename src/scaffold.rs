//! Project scaffold around the compiled page: root layout with SEO metadata,
//! global stylesheet generated from the theme, and the package/config files
//! needed to build and run the export on its own.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

use crate::config::ExportOptions;
use crate::package::ExportedFile;
use crate::theme::Theme;

pub const LAYOUT_PATH: &str = "app/layout.tsx";
pub const GLOBALS_PATH: &str = "app/globals.css";

/// Font families the browser provides; never fetched from a font service.
const GENERIC_FONTS: &[&str] = &[
    "serif",
    "sans-serif",
    "monospace",
    "cursive",
    "system-ui",
    "ui-sans-serif",
    "ui-serif",
    "ui-monospace",
    "inherit",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SeoMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Comma-separated.
    pub keywords: Option<String>,
    pub og_title: Option<String>,
    pub og_description: Option<String>,
    pub og_image: Option<String>,
    pub og_url: Option<String>,
    pub og_type: Option<String>,
    pub twitter_card: Option<String>,
    pub twitter_title: Option<String>,
    pub twitter_description: Option<String>,
    pub twitter_image: Option<String>,
    pub twitter_site: Option<String>,
    pub favicon: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn insert_opt(map: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(v) = value {
        map.insert(key.to_string(), Value::String(v.to_string()));
    }
}

impl SeoMetadata {
    /// The `metadata` export of the root layout, in Next.js `Metadata` shape.
    pub fn to_metadata(&self, fallback_title: &str) -> Value {
        let mut meta = Map::new();
        let title = non_empty(&self.title).unwrap_or(fallback_title);
        meta.insert("title".to_string(), json!(title));
        insert_opt(&mut meta, "description", non_empty(&self.description));

        if let Some(keywords) = non_empty(&self.keywords) {
            let list: Vec<&str> = keywords
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .collect();
            meta.insert("keywords".to_string(), json!(list));
        }

        let mut og = Map::new();
        insert_opt(&mut og, "title", non_empty(&self.og_title));
        insert_opt(&mut og, "description", non_empty(&self.og_description));
        insert_opt(&mut og, "url", non_empty(&self.og_url));
        insert_opt(&mut og, "type", non_empty(&self.og_type));
        if let Some(image) = non_empty(&self.og_image) {
            og.insert("images".to_string(), json!([image]));
        }
        if !og.is_empty() {
            meta.insert("openGraph".to_string(), Value::Object(og));
        }

        let mut twitter = Map::new();
        insert_opt(&mut twitter, "card", non_empty(&self.twitter_card));
        insert_opt(&mut twitter, "title", non_empty(&self.twitter_title));
        insert_opt(&mut twitter, "description", non_empty(&self.twitter_description));
        insert_opt(&mut twitter, "site", non_empty(&self.twitter_site));
        if let Some(image) = non_empty(&self.twitter_image) {
            twitter.insert("images".to_string(), json!([image]));
        }
        if !twitter.is_empty() {
            meta.insert("twitter".to_string(), Value::Object(twitter));
        }

        if let Some(favicon) = non_empty(&self.favicon) {
            meta.insert("icons".to_string(), json!({ "icon": favicon }));
        }

        Value::Object(meta)
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILES
// ═══════════════════════════════════════════════════════════════════════════════

pub fn render_layout(seo: &SeoMetadata, fallback_title: &str) -> String {
    let metadata = pretty(&seo.to_metadata(fallback_title));
    format!(
        r#"import type {{ Metadata }} from "next";
import "./globals.css";

export const metadata: Metadata = {metadata};

export default function RootLayout({{
  children,
}}: {{
  children: React.ReactNode;
}}) {{
  return (
    <html lang="en">
      <body>{{children}}</body>
    </html>
  );
}}
"#
    )
}

fn css_font_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '"' | '\'' | ';' | '{' | '}' | '\\'))
        .collect::<String>()
        .trim()
        .to_string()
}

fn font_stack(name: &str, generic: &str) -> String {
    if GENERIC_FONTS.contains(&name) {
        name.to_string()
    } else {
        format!("\"{}\", {}", name, generic)
    }
}

/// `globals.css`: a font import for every named theme font, then a CSS custom
/// property per theme color, font role and spacing value.
pub fn render_globals_css(theme: &Theme) -> String {
    let heading = theme.font("heading").map(css_font_name).unwrap_or_default();
    let body = theme.font("body").map(css_font_name).unwrap_or_default();

    let families: BTreeSet<&str> = [heading.as_str(), body.as_str()]
        .into_iter()
        .filter(|f| !f.is_empty() && !GENERIC_FONTS.contains(f))
        .collect();

    let mut css = String::new();
    for family in &families {
        css.push_str(&format!(
            "@import url(\"https://fonts.googleapis.com/css2?family={}:wght@400;500;600;700&display=swap\");\n",
            family.replace(' ', "+")
        ));
    }
    if !families.is_empty() {
        css.push('\n');
    }

    css.push_str(":root {\n");
    for (name, value) in theme.color_variables() {
        css.push_str(&format!("  {}: {};\n", name, value));
    }
    if !heading.is_empty() {
        css.push_str(&format!("  --font-heading: {};\n", font_stack(&heading, "sans-serif")));
    }
    if !body.is_empty() {
        css.push_str(&format!("  --font-body: {};\n", font_stack(&body, "sans-serif")));
    }
    for (var, key) in [
        ("--radius", "radius"),
        ("--spacing-horizontal", "horizontalSpacing"),
        ("--spacing-vertical", "verticalSpacing"),
    ] {
        if let Some(n) = theme.resolve(key).ok().and_then(Value::as_f64) {
            css.push_str(&format!("  {}: {}px;\n", var, n));
        }
    }
    css.push_str("}\n\n");

    css.push_str(
        "*,\n*::before,\n*::after {\n  box-sizing: border-box;\n}\n\n\
         body {\n  margin: 0;\n  font-family: var(--font-body, sans-serif);\n  \
         color: var(--color-text-body, #111827);\n  \
         background: var(--color-background-primary, #ffffff);\n}\n\n\
         img {\n  max-width: 100%;\n}\n",
    );
    css
}

/// npm package names are lowercase and URL-safe.
pub fn package_name(project_name: &str) -> String {
    let mut name = String::with_capacity(project_name.len());
    for c in project_name.trim().chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
            name.push(c.to_ascii_lowercase());
        } else if !name.ends_with('-') {
            name.push('-');
        }
    }
    let name = name.trim_matches(|c| c == '-' || c == '.' || c == '_').to_string();
    if name.is_empty() {
        "exported-site".to_string()
    } else {
        name
    }
}

pub fn render_package_json(project_name: &str) -> String {
    let manifest = json!({
        "name": package_name(project_name),
        "version": "0.1.0",
        "private": true,
        "scripts": {
            "dev": "next dev",
            "build": "next build",
            "start": "next start"
        },
        "dependencies": {
            "next": "14.2.5",
            "react": "18.3.1",
            "react-dom": "18.3.1"
        },
        "devDependencies": {
            "@types/node": "20.14.10",
            "@types/react": "18.3.3",
            "@types/react-dom": "18.3.0",
            "typescript": "5.5.3"
        }
    });
    format!("{}\n", pretty(&manifest))
}

pub fn render_next_config() -> String {
    "/** @type {import('next').NextConfig} */\n\
     const nextConfig = {\n  reactStrictMode: true,\n};\n\n\
     export default nextConfig;\n"
        .to_string()
}

pub fn render_tsconfig() -> String {
    let tsconfig = json!({
        "compilerOptions": {
            "target": "ES2017",
            "lib": ["dom", "dom.iterable", "esnext"],
            "allowJs": true,
            "skipLibCheck": true,
            "strict": true,
            "noEmit": true,
            "esModuleInterop": true,
            "module": "esnext",
            "moduleResolution": "bundler",
            "resolveJsonModule": true,
            "isolatedModules": true,
            "jsx": "preserve",
            "incremental": true,
            "plugins": [{ "name": "next" }],
            "paths": { "@/*": ["./*"] }
        },
        "include": ["next-env.d.ts", "**/*.ts", "**/*.tsx", ".next/types/**/*.ts"],
        "exclude": ["node_modules"]
    });
    format!("{}\n", pretty(&tsconfig))
}

fn render_gitignore() -> String {
    "node_modules/\n.next/\nout/\nnext-env.d.ts\n".to_string()
}

/// Every boilerplate file of the exported project.
pub fn scaffold_files(theme: &Theme, seo: &SeoMetadata, options: &ExportOptions) -> Vec<ExportedFile> {
    vec![
        ExportedFile::text(LAYOUT_PATH, render_layout(seo, &options.project_name)),
        ExportedFile::text(GLOBALS_PATH, render_globals_css(theme)),
        ExportedFile::text("package.json", render_package_json(&options.project_name)),
        ExportedFile::text("next.config.mjs", render_next_config()),
        ExportedFile::text("tsconfig.json", render_tsconfig()),
        ExportedFile::text(".gitignore", render_gitignore()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_from_seo() {
        let seo = SeoMetadata {
            title: Some("Acme".to_string()),
            keywords: Some("rockets, anvils,".to_string()),
            og_image: Some("/images/og.png".to_string()),
            twitter_card: Some("summary_large_image".to_string()),
            favicon: Some("/favicon.ico".to_string()),
            ..SeoMetadata::default()
        };
        let meta = seo.to_metadata("fallback");
        assert_eq!(meta["title"], "Acme");
        assert_eq!(meta["keywords"], json!(["rockets", "anvils"]));
        assert_eq!(meta["openGraph"]["images"], json!(["/images/og.png"]));
        assert_eq!(meta["twitter"]["card"], "summary_large_image");
        assert_eq!(meta["icons"]["icon"], "/favicon.ico");
        assert!(meta.get("description").is_none());
    }

    #[test]
    fn test_layout_uses_fallback_title() {
        let layout = render_layout(&SeoMetadata::default(), "exported-site");
        assert!(layout.contains("export const metadata: Metadata = {\n  \"title\": \"exported-site\"\n};"));
        assert!(layout.contains("<body>{children}</body>"));
    }

    #[test]
    fn test_globals_css_from_theme() {
        let css = render_globals_css(&Theme::stock());
        assert!(css.starts_with("@import url(\"https://fonts.googleapis.com/css2?family=Inter:"));
        assert_eq!(css.matches("@import").count(), 1);
        assert!(css.contains("  --color-primary: #3b82f6;\n"));
        assert!(css.contains("  --color-text-on-primary: #ffffff;\n"));
        assert!(css.contains("  --font-body: \"Inter\", sans-serif;\n"));
        assert!(css.contains("  --radius: 8px;\n"));
    }

    #[test]
    fn test_generic_fonts_are_not_imported() {
        let theme = Theme::from_value(json!({ "fonts": { "heading": "system-ui", "body": "Open Sans" } }));
        let css = render_globals_css(&theme);
        assert!(css.contains("family=Open+Sans:"));
        assert!(!css.contains("family=system-ui"));
        assert!(css.contains("  --font-heading: system-ui;\n"));
    }

    #[test]
    fn test_package_name_sanitized() {
        assert_eq!(package_name("My Cool Site!"), "my-cool-site");
        assert_eq!(package_name("***"), "exported-site");
        let pkg: Value = serde_json::from_str(&render_package_json("Acme Site")).unwrap();
        assert_eq!(pkg["name"], "acme-site");
        assert_eq!(pkg["scripts"]["build"], "next build");
    }

    #[test]
    fn test_scaffold_paths() {
        let files = scaffold_files(&Theme::stock(), &SeoMetadata::default(), &ExportOptions::default());
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![LAYOUT_PATH, GLOBALS_PATH, "package.json", "next.config.mjs", "tsconfig.json", ".gitignore"]
        );
    }
}

//! Tree-to-Source Compiler
//!
//! Walks the validated node tree depth-first from ROOT and renders each visible
//! node through its component template: editor constructs stripped, theme
//! references inlined, props bound to literals and children spliced into the
//! template's `{children}` region. The result is one self-contained page module.

use lazy_static::lazy_static;
use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_ast_visit::walk_mut::{walk_expression, walk_jsx_attribute_item, walk_jsx_child, walk_object_property_kind};
use oxc_ast_visit::VisitMut;
use oxc_span::{GetSpan, Span};
use oxc_syntax::operator::LogicalOperator;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};

use crate::edits::{indent_block, jsx_item_removal, line_indent, list_item_removal, EditList};
use crate::error::{ExportError, ExportResult, Violation};
use crate::registry::{ComponentRegistry, Template};
use crate::rewriter::{
    finish_fragment, fragment_root, function_params, inline_theme_references, member_path,
    parse_fragment, property_key_name, render_literal, strip_editor_constructs, wrap_fragment,
    LocalScopes, PropScope, CHILDREN_BINDING,
};
use crate::theme::Theme;
use crate::tree::{NodeTree, ROOT_ID};
use crate::validate::validate_tree;

/// Where the compiled page lands in the exported project.
pub const PAGE_PATH: &str = "app/page.tsx";

lazy_static! {
    static ref IMPORT_RE: Regex =
        Regex::new(r#"^import\s+(.+?)\s+from\s+['"]([^'"]+)['"]\s*;?$"#).unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROP BINDING
// ═══════════════════════════════════════════════════════════════════════════════

/// Binds one template instance: prop reads become literals, reads of unset props
/// disappear, and `{children}` receives the already compiled child fragments.
struct PropBinder<'s> {
    source: &'s str,
    scope: &'s PropScope<'s>,
    children: &'s [String],
    locals: LocalScopes,
    edits: EditList,
}

impl<'s> PropBinder<'s> {
    fn new(source: &'s str, scope: &'s PropScope<'s>, children: &'s [String]) -> Self {
        PropBinder {
            source,
            scope,
            children,
            locals: LocalScopes::default(),
            edits: EditList::new(),
        }
    }

    fn is_prop(&self, name: &str) -> bool {
        self.scope.declares(name) && !self.locals.contains(name)
    }

    fn is_children(&self, expr: &Expression) -> bool {
        matches!(expr, Expression::Identifier(id) if id.name == CHILDREN_BINDING)
            && !self.locals.contains(CHILDREN_BINDING)
    }

    /// A bare read of a prop that resolves to nothing.
    fn is_unset_prop(&self, expr: &Expression) -> bool {
        match member_path(expr) {
            Some(path) => self.is_prop(path[0]) && self.scope.lookup(&path).is_none(),
            None => false,
        }
    }

    /// `prop ?? x` or `prop || x` whose left side is an unset prop.
    fn skips_left(&self, logical: &LogicalExpression) -> bool {
        matches!(logical.operator, LogicalOperator::Coalesce | LogicalOperator::Or)
            && self.is_unset_prop(&logical.left)
    }

    /// Whether `expr` evaluates to `undefined` once unset props are bound.
    fn folds_to_nothing(&self, expr: &Expression) -> bool {
        match expr {
            Expression::Identifier(id) => {
                (id.name == "undefined" && !self.locals.contains("undefined")) || self.is_unset_prop(expr)
            }
            Expression::ParenthesizedExpression(paren) => self.folds_to_nothing(&paren.expression),
            Expression::ConditionalExpression(cond) => {
                self.is_unset_prop(&cond.test) && self.folds_to_nothing(&cond.alternate)
            }
            Expression::LogicalExpression(logical) => {
                self.skips_left(logical) && self.folds_to_nothing(&logical.right)
            }
            _ => self.is_unset_prop(expr),
        }
    }

    /// Replacement text for a prop read (or a call on one), if `expr` is one.
    fn binding(&self, expr: &Expression) -> Option<(Span, String)> {
        if self.is_children(expr) {
            return Some((expr.span(), "null".to_string()));
        }

        // `items.map(...)` on an unset prop renders nothing at all.
        if let Expression::CallExpression(call) = expr {
            let path = member_path(&call.callee)?;
            if self.is_prop(path[0]) && self.scope.lookup(&path[..1]).is_none() {
                return Some((call.span, "undefined".to_string()));
            }
            return None;
        }

        let path = member_path(expr)?;
        if !self.is_prop(path[0]) {
            return None;
        }
        if let Some(value) = self.scope.lookup(&path) {
            return Some((expr.span(), render_literal(value)));
        }
        match self.scope.lookup(&path[..1]) {
            None => Some((expr.span(), "undefined".to_string())),
            Some(root) => {
                let literal = render_literal(root);
                let literal = if root.is_object() {
                    format!("({})", literal)
                } else {
                    literal
                };
                Some((root_identifier_span(expr)?, literal))
            }
        }
    }

    fn splice_children(&mut self, span: Span) {
        let (start, end) = (span.start as usize, span.end as usize);
        if self.children.is_empty() {
            let (start, end) = jsx_item_removal(self.source, start, end);
            self.edits.remove(start, end);
            return;
        }
        let indent = line_indent(self.source, start);
        let block = self
            .children
            .iter()
            .map(|child| indent_block(child, indent))
            .collect::<Vec<_>>()
            .join(&format!("\n{}", indent));
        self.edits.replace(start, end, block);
    }

    /// Remove everything in `outer` except `inner`.
    fn keep_only(&mut self, outer: Span, inner: Span) {
        self.edits.remove(outer.start as usize, inner.start as usize);
        if inner.end < outer.end {
            self.edits.remove(inner.end as usize, outer.end as usize);
        }
    }

    fn remove_jsx_item(&mut self, span: Span) {
        let (start, end) = jsx_item_removal(self.source, span.start as usize, span.end as usize);
        self.edits.remove(start, end);
    }

    fn remove_list_item(&mut self, span: Span) {
        let (start, end) = list_item_removal(self.source, span.start as usize, span.end as usize);
        self.edits.remove(start, end);
    }
}

fn root_identifier_span(expr: &Expression) -> Option<Span> {
    match expr {
        Expression::Identifier(id) => Some(id.span),
        Expression::StaticMemberExpression(member) => root_identifier_span(&member.object),
        Expression::ChainExpression(chain) => match &chain.expression {
            ChainElement::StaticMemberExpression(member) => root_identifier_span(&member.object),
            _ => None,
        },
        Expression::ParenthesizedExpression(paren) => root_identifier_span(&paren.expression),
        _ => None,
    }
}

enum ChildAction {
    Children(Span),
    Remove(Span),
}

impl<'a> VisitMut<'a> for PropBinder<'_> {
    fn visit_expression(&mut self, expr: &mut Expression<'a>) {
        if let Some(params) = function_params(expr) {
            self.locals.push(params);
            walk_expression(self, expr);
            self.locals.pop();
            return;
        }
        // An unset test or left operand leaves only the surviving branch.
        match expr {
            Expression::ConditionalExpression(cond) if self.is_unset_prop(&cond.test) => {
                self.keep_only(cond.span, cond.alternate.span());
                self.visit_expression(&mut cond.alternate);
                return;
            }
            Expression::LogicalExpression(logical) if self.skips_left(logical) => {
                self.keep_only(logical.span, logical.right.span());
                self.visit_expression(&mut logical.right);
                return;
            }
            _ => {}
        }
        match self.binding(expr) {
            Some((span, text)) => self.edits.replace(span.start as usize, span.end as usize, text),
            None => walk_expression(self, expr),
        }
    }

    fn visit_jsx_attribute_item(&mut self, item: &mut JSXAttributeItem<'a>) {
        let unset = match &*item {
            JSXAttributeItem::Attribute(attr) => match &attr.value {
                Some(JSXAttributeValue::ExpressionContainer(container)) => container
                    .expression
                    .as_expression()
                    .filter(|e| self.folds_to_nothing(e))
                    .map(|_| attr.span),
                _ => None,
            },
            JSXAttributeItem::SpreadAttribute(spread) => {
                self.folds_to_nothing(&spread.argument).then_some(spread.span)
            }
        };
        match unset {
            Some(span) => self.remove_jsx_item(span),
            None => walk_jsx_attribute_item(self, item),
        }
    }

    fn visit_object_property_kind(&mut self, kind: &mut ObjectPropertyKind<'a>) {
        match &*kind {
            ObjectPropertyKind::ObjectProperty(prop) if prop.shorthand => {
                if let Some(key) = property_key_name(&prop.key).filter(|k| self.is_prop(k)) {
                    let span = prop.span;
                    match self.scope.lookup(&[key.as_str()]) {
                        Some(value) => {
                            let text = format!("{}: {}", key, render_literal(value));
                            self.edits.replace(span.start as usize, span.end as usize, text);
                        }
                        None => self.remove_list_item(span),
                    }
                    return;
                }
            }
            ObjectPropertyKind::ObjectProperty(prop) => {
                if self.folds_to_nothing(&prop.value) {
                    let span = prop.span;
                    self.remove_list_item(span);
                    return;
                }
            }
            ObjectPropertyKind::SpreadProperty(spread) => {
                if self.folds_to_nothing(&spread.argument) {
                    let span = spread.span;
                    self.remove_list_item(span);
                    return;
                }
            }
        }
        walk_object_property_kind(self, kind);
    }

    fn visit_jsx_child(&mut self, child: &mut JSXChild<'a>) {
        let action = match &*child {
            JSXChild::ExpressionContainer(container) => match container.expression.as_expression() {
                Some(expr) if self.is_children(expr) => Some(ChildAction::Children(container.span)),
                Some(expr) if self.folds_to_nothing(expr) => Some(ChildAction::Remove(container.span)),
                _ => None,
            },
            _ => None,
        };
        match action {
            Some(ChildAction::Children(span)) => self.splice_children(span),
            Some(ChildAction::Remove(span)) => self.remove_jsx_item(span),
            None => walk_jsx_child(self, child),
        }
    }
}

/// Bind props and children into an already stripped and theme-inlined fragment.
pub fn bind_props(
    template: &str,
    source: &str,
    scope: &PropScope<'_>,
    children: &[String],
) -> ExportResult<String> {
    let wrapped = wrap_fragment(source);
    let allocator = Allocator::default();
    let mut program = parse_fragment(&allocator, template, &wrapped)?;

    let mut binder = PropBinder::new(&wrapped, scope, children);
    if let Some(root) = fragment_root(&mut program) {
        binder.visit_expression(root);
    }
    finish_fragment(template, source, &wrapped, binder.edits)
}

// ═══════════════════════════════════════════════════════════════════════════════
// PAGE COMPILER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct PageCompiler<'c> {
    tree: &'c NodeTree,
    theme: &'c Theme,
    registry: &'c ComponentRegistry,
    /// Stripped template source per component type; stripping does not depend
    /// on props.
    stripped: HashMap<String, String>,
    imports: Vec<String>,
    /// Nodes on the current render path.
    active: Vec<String>,
}

impl<'c> PageCompiler<'c> {
    pub fn new(tree: &'c NodeTree, theme: &'c Theme, registry: &'c ComponentRegistry) -> Self {
        PageCompiler {
            tree,
            theme,
            registry,
            stripped: HashMap::new(),
            imports: Vec::new(),
            active: Vec::new(),
        }
    }

    fn stripped_source(&mut self, template: &Template) -> ExportResult<String> {
        if let Some(cached) = self.stripped.get(&template.name) {
            return Ok(cached.clone());
        }
        let stripped = strip_editor_constructs(&template.name, &template.source, &template.marker_set())?;
        self.stripped.insert(template.name.clone(), stripped.clone());
        Ok(stripped)
    }

    /// Render the subtree rooted at `id` to a JSX fragment.
    pub fn compile_node(&mut self, id: &str) -> ExportResult<String> {
        if self.active.iter().any(|a| a == id) {
            return Err(Violation::Cycle { node: id.to_string() }.into());
        }
        self.active.push(id.to_string());
        let rendered = self.render_node(id);
        self.active.pop();
        rendered
    }

    fn render_node(&mut self, id: &str) -> ExportResult<String> {
        let tree = self.tree;
        let registry = self.registry;

        let node = tree.get(id).ok_or_else(|| Violation::Unreachable {
            node: id.to_string(),
        })?;
        if !node.is_canvas && !node.children.is_empty() {
            return Err(Violation::ChildrenOnLeaf {
                node: id.to_string(),
                count: node.children.len(),
            }
            .into());
        }
        let template = registry.resolve(id, node.component_type())?;
        let props = template.effective_props(&node.props);
        let scope = PropScope::new(template, &props);

        let stripped = self.stripped_source(template)?;
        let inlined = inline_theme_references(&template.name, &stripped, self.theme, &scope)
            .map_err(|e| attach_node(e, id))?;

        let mut children = Vec::new();
        for child_id in &node.children {
            if tree.get(child_id).is_some_and(|child| child.hidden) {
                continue;
            }
            children.push(self.compile_node(child_id)?);
        }
        if !children.is_empty() && !template.has_children_region() {
            return Err(Violation::MissingCanvasRegion {
                node: id.to_string(),
                component: template.name.clone(),
            }
            .into());
        }

        self.imports.extend(template.imports.iter().cloned());
        tracing::trace!(node = id, component = %template.name, children = children.len(), "compiled node");
        bind_props(&template.name, &inlined, &scope, &children)
    }

    /// Check the whole tree, then render it into the page module.
    pub fn compile_page(mut self) -> ExportResult<String> {
        validate_tree(self.tree)?;
        self.registry.resolve_all(self.tree)?;

        let root_visible = self.tree.root().is_some_and(|root| !root.hidden);
        let body = if root_visible {
            self.compile_node(ROOT_ID)?
        } else {
            "null".to_string()
        };
        Ok(render_page(&self.imports, &body))
    }
}

fn attach_node(error: ExportError, id: &str) -> ExportError {
    match error {
        ExportError::ThemePath {
            path,
            template,
            node_id: None,
        } => ExportError::ThemePath {
            path,
            template,
            node_id: Some(id.to_string()),
        },
        other => other,
    }
}

/// Compile a validated tree into the source of `app/page.tsx`.
pub fn compile_tree(tree: &NodeTree, theme: &Theme, registry: &ComponentRegistry) -> ExportResult<String> {
    PageCompiler::new(tree, theme, registry).compile_page()
}

/// Deduplicate and sort page imports, normalizing quotes and semicolons.
pub fn normalize_imports(imports: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    for import in imports {
        let trimmed = import.trim();
        let normalized = match IMPORT_RE.captures(trimmed) {
            Some(caps) => format!("import {} from \"{}\";", &caps[1], &caps[2]),
            None => trimmed.to_string(),
        };
        if !normalized.is_empty() {
            seen.insert(normalized);
        }
    }
    seen.into_iter().collect()
}

fn render_page(imports: &[String], body: &str) -> String {
    let mut out = String::new();
    let imports = normalize_imports(imports);
    for import in &imports {
        out.push_str(import);
        out.push('\n');
    }
    if !imports.is_empty() {
        out.push('\n');
    }
    out.push_str("export default function Page() {\n");
    out.push_str("  return (\n");
    out.push_str("    ");
    out.push_str(&indent_block(body, "    "));
    out.push_str("\n  );\n");
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{PropKind, PropSchema};
    use serde_json::{json, Map, Value};

    fn bind(template: &Template, props: Map<String, Value>, children: &[String]) -> String {
        let scope = PropScope::new(template, &props);
        bind_props(&template.name, &template.source, &scope, children).unwrap()
    }

    #[test]
    fn test_binds_set_props_and_drops_unset_ones() {
        let template = Template::new(
            "T",
            "<a href={href} title={title} style={{ color: color, margin: 0 }}>{text}</a>",
        )
        .with_props(vec![
            PropSchema::new("href", PropKind::Text),
            PropSchema::new("title", PropKind::Text),
            PropSchema::new("color", PropKind::Color),
            PropSchema::new("text", PropKind::Text),
        ]);
        let mut props = Map::new();
        props.insert("href".to_string(), json!("/about"));
        props.insert("text".to_string(), json!("About"));
        props.insert("title".to_string(), json!(""));
        let out = bind(&template, props, &[]);
        assert_eq!(out, "<a href={\"/about\"} style={{ margin: 0 }}>{\"About\"}</a>");
    }

    #[test]
    fn test_shorthand_property_expands() {
        let template = Template::new("T", "<div style={{ color }} />").with_props(vec![
            PropSchema::new("color", PropKind::Color),
        ]);
        let mut props = Map::new();
        props.insert("color".to_string(), json!("#111111"));
        assert_eq!(bind(&template, props, &[]), "<div style={{ color: \"#111111\" }} />");
    }

    #[test]
    fn test_children_region_receives_indented_children() {
        let template = Template::new("Box", "<div>\n  {children}\n</div>");
        let children = vec!["<p>\n  a\n</p>".to_string(), "<hr />".to_string()];
        let out = bind(&template, Map::new(), &children);
        assert_eq!(out, "<div>\n  <p>\n    a\n  </p>\n  <hr />\n</div>");
    }

    #[test]
    fn test_empty_children_region_is_removed() {
        let template = Template::new("Box", "<div>\n  {children}\n</div>");
        assert_eq!(bind(&template, Map::new(), &[]), "<div>\n</div>");
    }

    #[test]
    fn test_callback_parameters_shadow_props() {
        let template = Template::new(
            "G",
            "<ul>{items.map((image) => <li key={image}>{image}</li>)}</ul>",
        )
        .with_props(vec![
            PropSchema::new("items", PropKind::List),
            PropSchema::new("image", PropKind::Image),
        ]);
        let mut props = Map::new();
        props.insert("items".to_string(), json!(["a"]));
        props.insert("image".to_string(), json!("/hero.png"));
        let out = bind(&template, props, &[]);
        assert_eq!(out, "<ul>{[\"a\"].map((image) => <li key={image}>{image}</li>)}</ul>");
    }

    #[test]
    fn test_nested_prop_path_resolves() {
        let template = Template::new("L", "<a href={link.href}>{link.label}</a>").with_props(vec![
            PropSchema::new("link", PropKind::Object),
        ]);
        let mut props = Map::new();
        props.insert("link".to_string(), json!({ "href": "/x", "label": "X" }));
        let out = bind(&template, props, &[]);
        assert_eq!(out, "<a href={\"/x\"}>{\"X\"}</a>");
    }

    #[test]
    fn test_normalize_imports_dedupes_and_sorts() {
        let imports = vec![
            "import Link from 'next/link'".to_string(),
            "import Image from \"next/image\";".to_string(),
            "import Link from \"next/link\";".to_string(),
        ];
        assert_eq!(
            normalize_imports(&imports),
            vec![
                "import Image from \"next/image\";".to_string(),
                "import Link from \"next/link\";".to_string(),
            ]
        );
    }

    #[test]
    fn test_compile_single_text_page() {
        let tree = NodeTree::from_value(json!({
            "ROOT": { "type": "Text", "props": { "text": "Hello" } }
        }))
        .unwrap();
        let page = compile_tree(&tree, &Theme::stock(), &ComponentRegistry::builtin()).unwrap();
        assert!(page.starts_with("export default function Page() {\n  return (\n    <p\n"));
        assert!(page.contains("{\"Hello\"}"));
        assert!(page.contains("color: \"#334155\""));
        assert!(!page.contains("theme."));
    }

    #[test]
    fn test_hidden_root_renders_null() {
        let tree = NodeTree::from_value(json!({
            "ROOT": { "type": "Container", "isCanvas": true, "hidden": true }
        }))
        .unwrap();
        let page = compile_tree(&tree, &Theme::stock(), &ComponentRegistry::builtin()).unwrap();
        assert!(page.contains("    null\n"));
    }

    #[test]
    fn test_children_without_region_is_structural_error() {
        let mut registry = ComponentRegistry::builtin();
        registry.register(Template::new("Flat", "<div />"));
        let tree = NodeTree::from_value(json!({
            "ROOT": { "type": "Flat", "isCanvas": true, "children": ["a"] },
            "a": { "type": "Text", "parent": "ROOT" }
        }))
        .unwrap();
        let err = compile_tree(&tree, &Theme::stock(), &registry).unwrap_err();
        assert_eq!(err.code(), "StructuralIntegrityError");
        assert_eq!(err.node_id(), Some("ROOT"));
    }

    #[test]
    fn test_leaf_with_children_is_rejected_before_rendering() {
        let tree = NodeTree::from_value(json!({
            "ROOT": { "type": "Container", "isCanvas": false, "children": ["a"] },
            "a": { "type": "Text", "parent": "ROOT", "props": { "text": "hi" } }
        }))
        .unwrap();
        let err = compile_tree(&tree, &Theme::stock(), &ComponentRegistry::builtin()).unwrap_err();
        assert_eq!(err.code(), "StructuralIntegrityError");
        assert_eq!(err.node_id(), Some("ROOT"));
    }

    #[test]
    fn test_hidden_unknown_type_fails_compile() {
        let tree = NodeTree::from_value(json!({
            "ROOT": { "type": "Container", "isCanvas": true, "children": ["x"] },
            "x": { "type": "DoesNotExist", "parent": "ROOT", "hidden": true }
        }))
        .unwrap();
        let err = compile_tree(&tree, &Theme::stock(), &ComponentRegistry::builtin()).unwrap_err();
        assert_eq!(err.code(), "UnknownComponentType");
        assert_eq!(err.node_id(), Some("x"));
    }

    #[test]
    fn test_compile_node_stops_at_cycle() {
        let tree = NodeTree::from_value(json!({
            "a": { "type": "Container", "isCanvas": true, "children": ["b"], "parent": "b" },
            "b": { "type": "Container", "isCanvas": true, "children": ["a"], "parent": "a" }
        }))
        .unwrap();
        let theme = Theme::stock();
        let registry = ComponentRegistry::builtin();
        let err = PageCompiler::new(&tree, &theme, &registry).compile_node("a").unwrap_err();
        assert_eq!(err.code(), "StructuralIntegrityError");
        assert_eq!(err.node_id(), Some("a"));
    }

    #[test]
    fn test_unset_condition_folds_to_alternate() {
        let template = Template::new(
            "H",
            "<section\n  style={{\n    color: \"red\",\n    backgroundImage: image ? `url(${image})` : undefined,\n  }}\n/>",
        )
        .with_props(vec![PropSchema::new("image", PropKind::Image)]);
        let out = bind(&template, Map::new(), &[]);
        assert_eq!(out, "<section\n  style={{\n    color: \"red\",\n  }}\n/>");
        assert!(!out.contains("undefined"));

        let mut props = Map::new();
        props.insert("image".to_string(), json!("/assets/hero.png"));
        let out = bind(&template, props, &[]);
        assert!(out.contains("url(${\"/assets/hero.png\"})"), "{}", out);
    }

    #[test]
    fn test_unset_coalesce_keeps_fallback() {
        let template = Template::new(
            "D",
            "<hr style={{ margin: `${spacing ?? 48 / 2}px 0`, width: width || \"100%\" }} />",
        )
        .with_props(vec![
            PropSchema::new("spacing", PropKind::Dimension),
            PropSchema::new("width", PropKind::Dimension),
        ]);
        let out = bind(&template, Map::new(), &[]);
        assert_eq!(out, "<hr style={{ margin: `${48 / 2}px 0`, width: \"100%\" }} />");

        let mut props = Map::new();
        props.insert("spacing".to_string(), json!(8));
        let out = bind(&template, props, &[]);
        assert!(out.contains("`${8 ?? 48 / 2}px 0`"), "{}", out);
    }
}

//! AST Rewriter
//!
//! Turns an editor-coupled template fragment into a pure-render fragment in two
//! passes over the oxc AST:
//!
//! 1. `strip_editor_constructs` removes editor-only attributes, bindings, style
//!    properties and overlay elements.
//! 2. `inline_theme_references` replaces `prop ?? theme.path` chains and bare
//!    `theme.path` reads with the literal the export snapshot resolves them to.
//!
//! Both passes only splice spans (see `edits`), so any construct they do not
//! recognize passes through byte-for-byte. A pass that finds nothing to change
//! returns its input unchanged, which makes the rewrite idempotent.

use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_ast_visit::walk_mut::{walk_expression, walk_jsx_child, walk_object_property_kind};
use oxc_ast_visit::{walk, Visit, VisitMut};
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType, Span};
use oxc_syntax::operator::LogicalOperator;
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::edits::{jsx_item_removal, list_item_removal, EditList};
use crate::error::{ExportError, ExportResult};
use crate::registry::{MarkerSet, Template};
use crate::theme::{Theme, ThemePathError};
use crate::tree::is_set;

/// Identifier templates use to read the theme snapshot.
pub const THEME_BINDING: &str = "theme";
/// Identifier that marks a canvas template's children region.
pub const CHILDREN_BINDING: &str = "children";

/// Module specifiers of the editing framework. Importing one makes a file
/// editor-coupled.
const EDITOR_MODULES: &[&str] = &["@craftjs/core", "@craftjs/layers", "@craftjs/utils"];

const FRAGMENT_PREFIX: &str = "(\n";
const FRAGMENT_SUFFIX: &str = "\n);\n";

fn source_type() -> SourceType {
    SourceType::default()
        .with_module(true)
        .with_typescript(true)
        .with_jsx(true)
}

// ═══════════════════════════════════════════════════════════════════════════════
// FRAGMENT PARSING
// A template is a single JSX expression, not a module. It is wrapped in parens
// so the parser sees one expression statement; edits are applied to the
// wrapped text and the wrapper is peeled off again afterwards.
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) fn wrap_fragment(source: &str) -> String {
    format!("{}{}{}", FRAGMENT_PREFIX, source, FRAGMENT_SUFFIX)
}

pub(crate) fn parse_fragment<'a>(
    allocator: &'a Allocator,
    template: &str,
    wrapped: &'a str,
) -> ExportResult<Program<'a>> {
    let ret = Parser::new(allocator, wrapped, source_type()).parse();
    if let Some(error) = ret.errors.first() {
        return Err(ExportError::TemplateSyntax {
            template: template.to_string(),
            message: error.to_string(),
        });
    }
    let single_expression = ret.program.body.len() == 1
        && matches!(ret.program.body.first(), Some(Statement::ExpressionStatement(_)));
    if !single_expression {
        return Err(ExportError::TemplateSyntax {
            template: template.to_string(),
            message: "template must be a single JSX expression".to_string(),
        });
    }
    Ok(ret.program)
}

/// The fragment's own expression, inside the wrapping parens.
pub(crate) fn fragment_root<'p, 'a>(program: &'p mut Program<'a>) -> Option<&'p mut Expression<'a>> {
    match program.body.first_mut()? {
        Statement::ExpressionStatement(stmt) => match &mut stmt.expression {
            Expression::ParenthesizedExpression(paren) => Some(&mut paren.expression),
            other => Some(other),
        },
        _ => None,
    }
}

pub(crate) fn finish_fragment(
    template: &str,
    source: &str,
    wrapped: &str,
    edits: EditList,
) -> ExportResult<String> {
    if edits.is_empty() {
        return Ok(source.to_string());
    }
    let rewritten = edits.apply(wrapped);
    rewritten
        .strip_prefix(FRAGMENT_PREFIX)
        .and_then(|s| s.strip_suffix(FRAGMENT_SUFFIX))
        .map(str::to_string)
        .ok_or_else(|| ExportError::TemplateSyntax {
            template: template.to_string(),
            message: "rewrite touched the fragment boundary".to_string(),
        })
}

/// Check that a template source parses as a single JSX expression.
pub fn check_fragment(template: &str, source: &str) -> ExportResult<()> {
    let wrapped = wrap_fragment(source);
    let allocator = Allocator::default();
    parse_fragment(&allocator, template, &wrapped).map(|_| ())
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED AST HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) fn attribute_name(name: &JSXAttributeName) -> String {
    match name {
        JSXAttributeName::Identifier(id) => id.name.to_string(),
        JSXAttributeName::NamespacedName(ns) => format!("{}:{}", ns.namespace.name, ns.name.name),
    }
}

pub(crate) fn element_name(name: &JSXElementName) -> String {
    match name {
        JSXElementName::Identifier(id) => id.name.to_string(),
        JSXElementName::IdentifierReference(id) => id.name.to_string(),
        JSXElementName::NamespacedName(ns) => format!("{}:{}", ns.namespace.name, ns.name.name),
        JSXElementName::MemberExpression(member) => member_element_name(member),
        JSXElementName::ThisExpression(_) => "this".to_string(),
    }
}

fn member_element_name(member: &JSXMemberExpression) -> String {
    let object = match &member.object {
        JSXMemberExpressionObject::IdentifierReference(id) => id.name.to_string(),
        JSXMemberExpressionObject::MemberExpression(inner) => member_element_name(inner),
        JSXMemberExpressionObject::ThisExpression(_) => "this".to_string(),
    };
    format!("{}.{}", object, member.property.name)
}

pub(crate) fn property_key_name(key: &PropertyKey) -> Option<String> {
    match key {
        PropertyKey::StaticIdentifier(id) => Some(id.name.to_string()),
        PropertyKey::StringLiteral(s) => Some(s.value.to_string()),
        _ => None,
    }
}

/// Segments of a static member chain rooted at an identifier:
/// `theme.colors.primary` is `["theme", "colors", "primary"]`.
pub(crate) fn member_path<'e>(expr: &'e Expression<'_>) -> Option<Vec<&'e str>> {
    match expr {
        Expression::Identifier(id) => Some(vec![id.name.as_str()]),
        Expression::StaticMemberExpression(member) => {
            let mut path = member_path(&member.object)?;
            path.push(member.property.name.as_str());
            Some(path)
        }
        Expression::ChainExpression(chain) => match &chain.expression {
            ChainElement::StaticMemberExpression(member) => {
                let mut path = member_path(&member.object)?;
                path.push(member.property.name.as_str());
                Some(path)
            }
            _ => None,
        },
        Expression::ParenthesizedExpression(paren) => member_path(&paren.expression),
        _ => None,
    }
}

/// The literal value of a constant expression.
pub(crate) fn literal_value(expr: &Expression) -> Option<Value> {
    match expr {
        Expression::StringLiteral(s) => Some(Value::String(s.value.to_string())),
        Expression::NumericLiteral(n) => number_value(n.value),
        Expression::BooleanLiteral(b) => Some(Value::Bool(b.value)),
        Expression::NullLiteral(_) => Some(Value::Null),
        Expression::Identifier(id) if id.name == "undefined" => Some(Value::Null),
        Expression::TemplateLiteral(tpl) if tpl.expressions.is_empty() => tpl
            .quasis
            .first()
            .and_then(|q| q.value.cooked.as_ref())
            .map(|cooked| Value::String(cooked.to_string())),
        Expression::ParenthesizedExpression(paren) => literal_value(&paren.expression),
        _ => None,
    }
}

fn number_value(n: f64) -> Option<Value> {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        Some(Value::from(n as i64))
    } else {
        serde_json::Number::from_f64(n).map(Value::Number)
    }
}

/// Source text for a resolved value. Missing values render as `undefined`.
pub(crate) fn render_literal(value: &Value) -> String {
    match value {
        Value::Null => "undefined".to_string(),
        other => other.to_string(),
    }
}

pub(crate) fn collect_binding_names(pattern: &BindingPattern, names: &mut HashSet<String>) {
    match pattern {
        BindingPattern::BindingIdentifier(id) => {
            names.insert(id.name.to_string());
        }
        BindingPattern::ObjectPattern(obj) => {
            for prop in &obj.properties {
                collect_binding_names(&prop.value, names);
            }
            if let Some(rest) = &obj.rest {
                collect_binding_names(&rest.argument, names);
            }
        }
        BindingPattern::ArrayPattern(arr) => {
            for pattern in arr.elements.iter().flatten() {
                collect_binding_names(pattern, names);
            }
            if let Some(rest) = &arr.rest {
                collect_binding_names(&rest.argument, names);
            }
        }
        _ => {}
    }
}

/// Names bound by enclosing callback parameters. A prop name shadowed by a
/// parameter (`images.map((image) => ...)`) is not a prop read.
#[derive(Debug, Default)]
pub(crate) struct LocalScopes {
    frames: Vec<HashSet<String>>,
}

impl LocalScopes {
    pub(crate) fn push(&mut self, params: &FormalParameters) {
        let mut frame = HashSet::new();
        for param in &params.items {
            collect_binding_names(&param.pattern, &mut frame);
        }
        self.frames.push(frame);
    }

    pub(crate) fn pop(&mut self) {
        self.frames.pop();
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.frames.iter().any(|frame| frame.contains(name))
    }
}

/// Function parameters introduced by `expr`, if it is a function.
pub(crate) fn function_params<'e, 'a>(expr: &'e Expression<'a>) -> Option<&'e FormalParameters<'a>> {
    match expr {
        Expression::ArrowFunctionExpression(arrow) => Some(&arrow.params),
        Expression::FunctionExpression(func) => Some(&func.params),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROP SCOPE
// ═══════════════════════════════════════════════════════════════════════════════

/// The props a template instance renders with: its effective values plus the
/// names its schema declares (set or not).
#[derive(Debug)]
pub struct PropScope<'p> {
    values: &'p Map<String, Value>,
    declared: HashSet<&'p str>,
}

impl<'p> PropScope<'p> {
    pub fn new(template: &'p Template, values: &'p Map<String, Value>) -> Self {
        PropScope {
            values,
            declared: template.declared_props().collect(),
        }
    }

    pub fn declares(&self, name: &str) -> bool {
        name != THEME_BINDING
            && name != CHILDREN_BINDING
            && (self.declared.contains(name) || self.values.contains_key(name))
    }

    /// Value at `path`, if it is set.
    pub fn lookup(&self, path: &[&str]) -> Option<&'p Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.values.get(*first)?;
        for segment in rest {
            current = current.get(*segment)?;
        }
        Some(current).filter(|v| is_set(v))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MARKER SCAN
// ═══════════════════════════════════════════════════════════════════════════════

/// Read-only walk that reports the first editor-only construct it meets.
struct MarkerFinder<'m> {
    markers: &'m MarkerSet,
    /// Also flag marker attributes and editor module imports. Off while
    /// stripping, where a nested marker attribute is removed on its own rather
    /// than taking its whole enclosing expression with it.
    full_scan: bool,
    hit: Option<String>,
}

impl<'m> MarkerFinder<'m> {
    fn new(markers: &'m MarkerSet, full_scan: bool) -> Self {
        MarkerFinder {
            markers,
            full_scan,
            hit: None,
        }
    }

    fn record(&mut self, construct: String) {
        if self.hit.is_none() {
            self.hit = Some(construct);
        }
    }
}

impl<'a> Visit<'a> for MarkerFinder<'_> {
    fn visit_identifier_reference(&mut self, ident: &IdentifierReference<'a>) {
        if self.markers.is_binding(&ident.name) || self.markers.is_element(&ident.name) {
            self.record(ident.name.to_string());
        }
    }

    fn visit_jsx_opening_element(&mut self, element: &JSXOpeningElement<'a>) {
        let name = element_name(&element.name);
        if self.markers.is_element(&name) {
            self.record(format!("<{}>", name));
        }
        if self.full_scan {
            for item in &element.attributes {
                if let JSXAttributeItem::Attribute(attr) = item {
                    let attr_name = attribute_name(&attr.name);
                    if self.markers.is_attribute(&attr_name) {
                        self.record(attr_name);
                    }
                }
            }
        }
        walk::walk_jsx_opening_element(self, element);
    }

    fn visit_object_property(&mut self, prop: &ObjectProperty<'a>) {
        if self.full_scan {
            if let Some(key) = property_key_name(&prop.key) {
                if self.markers.is_style_property(&key) {
                    self.record(key);
                }
            }
        }
        walk::walk_object_property(self, prop);
    }

    fn visit_import_declaration(&mut self, decl: &ImportDeclaration<'a>) {
        if self.full_scan && EDITOR_MODULES.contains(&decl.source.value.as_str()) {
            self.record(format!("import \"{}\"", decl.source.value));
        }
        walk::walk_import_declaration(self, decl);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PASS 1: EDITOR STRIPPING
// ═══════════════════════════════════════════════════════════════════════════════

struct EditorStripper<'s> {
    source: &'s str,
    markers: &'s MarkerSet,
    edits: EditList,
}

impl<'s> EditorStripper<'s> {
    fn new(source: &'s str, markers: &'s MarkerSet) -> Self {
        EditorStripper {
            source,
            markers,
            edits: EditList::new(),
        }
    }

    fn references_marker(&self, walk: impl FnOnce(&mut MarkerFinder<'_>)) -> bool {
        let mut visitor = MarkerFinder::new(self.markers, false);
        walk(&mut visitor);
        visitor.hit.is_some()
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

impl<'a> VisitMut<'a> for EditorStripper<'_> {
    fn visit_jsx_opening_element(&mut self, element: &mut JSXOpeningElement<'a>) {
        for item in element.attributes.iter_mut() {
            match item {
                JSXAttributeItem::Attribute(attr) => {
                    let span = attr.span;
                    if self.markers.is_attribute(&attribute_name(&attr.name)) {
                        self.remove_jsx_item(span);
                        continue;
                    }
                    match &mut attr.value {
                        Some(JSXAttributeValue::ExpressionContainer(container)) => {
                            // Style objects are pruned property by property.
                            if matches!(container.expression, JSXExpression::ObjectExpression(_)) {
                                self.visit_jsx_expression(&mut container.expression);
                            } else if self.references_marker(|p| p.visit_jsx_expression(&container.expression)) {
                                self.remove_jsx_item(span);
                            } else {
                                self.visit_jsx_expression(&mut container.expression);
                            }
                        }
                        Some(JSXAttributeValue::Element(inner)) => self.visit_jsx_element(inner),
                        _ => {}
                    }
                }
                JSXAttributeItem::SpreadAttribute(spread) => {
                    let span = spread.span;
                    if self.references_marker(|p| p.visit_expression(&spread.argument)) {
                        self.remove_jsx_item(span);
                    }
                }
            }
        }
    }

    fn visit_object_property_kind(&mut self, kind: &mut ObjectPropertyKind<'a>) {
        let remove = match &*kind {
            ObjectPropertyKind::ObjectProperty(prop) => {
                let marker_key = property_key_name(&prop.key)
                    .is_some_and(|key| self.markers.is_style_property(&key));
                (marker_key || self.references_marker(|p| p.visit_expression(&prop.value)))
                    .then_some(prop.span)
            }
            ObjectPropertyKind::SpreadProperty(spread) => self
                .references_marker(|p| p.visit_expression(&spread.argument))
                .then_some(spread.span),
        };
        match remove {
            Some(span) => self.remove_list_item(span),
            None => walk_object_property_kind(self, kind),
        }
    }

    fn visit_jsx_child(&mut self, child: &mut JSXChild<'a>) {
        let remove = match &*child {
            JSXChild::ExpressionContainer(container) => self
                .references_marker(|p| p.visit_jsx_expression(&container.expression))
                .then_some(container.span),
            JSXChild::Element(element) => self
                .markers
                .is_element(&element_name(&element.opening_element.name))
                .then_some(element.span),
            JSXChild::Spread(spread) => self
                .references_marker(|p| p.visit_expression(&spread.expression))
                .then_some(spread.span),
            _ => None,
        };
        match remove {
            Some(span) => self.remove_jsx_item(span),
            None => walk_jsx_child(self, child),
        }
    }
}

/// Remove every editor-only construct from a template fragment.
pub fn strip_editor_constructs(
    template: &str,
    source: &str,
    markers: &MarkerSet,
) -> ExportResult<String> {
    let wrapped = wrap_fragment(source);
    let allocator = Allocator::default();
    let mut program = parse_fragment(&allocator, template, &wrapped)?;

    let mut stripper = EditorStripper::new(&wrapped, markers);
    if let Some(root) = fragment_root(&mut program) {
        stripper.visit_expression(root);
    }
    finish_fragment(template, source, &wrapped, stripper.edits)
}

// ═══════════════════════════════════════════════════════════════════════════════
// PASS 2: THEME INLINING
// ═══════════════════════════════════════════════════════════════════════════════

enum Operand<'e> {
    Prop(Vec<&'e str>),
    Theme(String),
    Literal(Value),
}

struct ThemeInliner<'s> {
    theme: &'s Theme,
    scope: &'s PropScope<'s>,
    locals: LocalScopes,
    edits: EditList,
    error: Option<ThemePathError>,
}

impl<'s> ThemeInliner<'s> {
    fn new(theme: &'s Theme, scope: &'s PropScope<'s>) -> Self {
        ThemeInliner {
            theme,
            scope,
            locals: LocalScopes::default(),
            edits: EditList::new(),
            error: None,
        }
    }

    fn is_prop(&self, name: &str) -> bool {
        self.scope.declares(name) && !self.locals.contains(name)
    }

    fn theme_path(&self, expr: &Expression) -> Option<String> {
        let segments = member_path(expr)?;
        if segments.len() < 2 || segments[0] != THEME_BINDING || self.locals.contains(THEME_BINDING) {
            return None;
        }
        Some(segments[1..].join("."))
    }

    fn classify<'e>(&self, expr: &'e Expression<'_>) -> Option<Operand<'e>> {
        if let Some(path) = self.theme_path(expr) {
            return Some(Operand::Theme(path));
        }
        if let Some(segments) = member_path(expr) {
            if self.is_prop(segments[0]) {
                return Some(Operand::Prop(segments));
            }
        }
        literal_value(expr).map(Operand::Literal)
    }

    /// Source text to substitute for `expr`, or `None` when it is not a theme
    /// construct this pass understands.
    fn resolve(&self, expr: &Expression) -> Result<Option<String>, ThemePathError> {
        if let Expression::LogicalExpression(logical) = expr {
            return match logical.operator {
                LogicalOperator::Coalesce | LogicalOperator::Or => {
                    let mut operands = Vec::new();
                    flatten_chain(expr, logical.operator, &mut operands);
                    self.resolve_chain(logical.operator, &operands)
                }
                _ => Ok(None),
            };
        }
        if let Expression::Identifier(id) = expr {
            if id.name == THEME_BINDING && !self.locals.contains(THEME_BINDING) {
                let snapshot = Value::Object(self.theme.as_map().clone());
                return Ok(Some(format!("({})", snapshot)));
            }
        }
        match self.theme_path(expr) {
            Some(path) => Ok(Some(render_literal(self.theme.resolve(&path)?))),
            None => Ok(None),
        }
    }

    fn resolve_chain(
        &self,
        operator: LogicalOperator,
        operands: &[&Expression],
    ) -> Result<Option<String>, ThemePathError> {
        let mut classified = Vec::with_capacity(operands.len());
        for operand in operands {
            match self.classify(operand) {
                Some(op) => classified.push(op),
                None => return Ok(None),
            }
        }
        if !classified.iter().any(|op| matches!(op, Operand::Theme(_))) {
            return Ok(None);
        }

        // Every theme path is checked, even ones a set prop makes unreachable.
        let mut candidates = Vec::with_capacity(classified.len());
        for op in &classified {
            candidates.push(match op {
                Operand::Prop(path) => self.scope.lookup(path).cloned(),
                Operand::Theme(path) => Some(self.theme.resolve(path)?.clone()),
                Operand::Literal(value) => Some(value.clone()),
            });
        }

        let chosen = candidates
            .into_iter()
            .flatten()
            .find(|value| operand_selected(operator, value));
        Ok(Some(
            chosen
                .map(|value| render_literal(&value))
                .unwrap_or_else(|| "undefined".to_string()),
        ))
    }
}

fn flatten_chain<'e, 'a>(expr: &'e Expression<'a>, operator: LogicalOperator, out: &mut Vec<&'e Expression<'a>>) {
    match expr {
        Expression::LogicalExpression(logical) if logical.operator == operator => {
            flatten_chain(&logical.left, operator, out);
            flatten_chain(&logical.right, operator, out);
        }
        other => out.push(other),
    }
}

/// Whether a chain stops at `value`: `??` skips nullish values, `||` skips
/// every falsy one.
fn operand_selected(operator: LogicalOperator, value: &Value) -> bool {
    match (operator, value) {
        (_, Value::Null) => false,
        (LogicalOperator::Or, Value::Bool(b)) => *b,
        (LogicalOperator::Or, Value::String(s)) => !s.is_empty(),
        (LogicalOperator::Or, Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

impl<'a> VisitMut<'a> for ThemeInliner<'_> {
    fn visit_expression(&mut self, expr: &mut Expression<'a>) {
        if self.error.is_some() {
            return;
        }

        if let Some(params) = function_params(expr) {
            self.locals.push(params);
            walk_expression(self, expr);
            self.locals.pop();
            return;
        }

        match self.resolve(expr) {
            Ok(Some(text)) => {
                let span = expr.span();
                self.edits.replace(span.start as usize, span.end as usize, text);
            }
            Ok(None) => walk_expression(self, expr),
            Err(e) => self.error = Some(e),
        }
    }
}

/// Replace theme fallback chains and bare theme reads with literals.
pub fn inline_theme_references(
    template: &str,
    source: &str,
    theme: &Theme,
    scope: &PropScope<'_>,
) -> ExportResult<String> {
    let wrapped = wrap_fragment(source);
    let allocator = Allocator::default();
    let mut program = parse_fragment(&allocator, template, &wrapped)?;

    let mut inliner = ThemeInliner::new(theme, scope);
    if let Some(root) = fragment_root(&mut program) {
        inliner.visit_expression(root);
    }
    if let Some(e) = inliner.error {
        return Err(ExportError::ThemePath {
            path: e.path,
            template: template.to_string(),
            node_id: None,
        });
    }
    finish_fragment(template, source, &wrapped, inliner.edits)
}

/// Strip editor constructs, then inline theme references for one instance.
pub fn rewrite_template(
    template: &Template,
    theme: &Theme,
    props: &Map<String, Value>,
) -> ExportResult<String> {
    let stripped = strip_editor_constructs(&template.name, &template.source, &template.marker_set())?;
    let scope = PropScope::new(template, props);
    inline_theme_references(&template.name, &stripped, theme, &scope)
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEAK SCAN
// ═══════════════════════════════════════════════════════════════════════════════

/// Fail if an emitted module still contains an editor-only construct.
pub fn scan_for_editor_leaks(path: &str, source: &str, markers: &MarkerSet) -> ExportResult<()> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, source_type()).parse();
    if let Some(error) = ret.errors.first() {
        return Err(ExportError::TemplateSyntax {
            template: path.to_string(),
            message: error.to_string(),
        });
    }

    let mut finder = MarkerFinder::new(markers, true);
    finder.visit_program(&ret.program);
    match finder.hit {
        Some(construct) => Err(ExportError::EditorLeak {
            path: path.to_string(),
            construct,
        }),
        None => Ok(()),
    }
}

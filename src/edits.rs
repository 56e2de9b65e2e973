//! Span-based source edits.
//!
//! Rewrites never regenerate code from the AST. They collect byte-range
//! replacements against the parsed source and splice them in from the back,
//! so everything the rewrite did not touch keeps its exact formatting.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl Edit {
    fn is_removal(&self) -> bool {
        self.text.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EditList {
    edits: Vec<Edit>,
}

impl EditList {
    pub fn new() -> Self {
        EditList::default()
    }

    pub fn replace(&mut self, start: usize, end: usize, text: impl Into<String>) {
        self.edits.push(Edit {
            start,
            end,
            text: text.into(),
        });
    }

    pub fn remove(&mut self, start: usize, end: usize) {
        self.replace(start, end, String::new());
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Apply every edit to `source`. An edit nested inside another is dropped in
    /// favour of the outer one; overlapping removals are merged.
    pub fn apply(mut self, source: &str) -> String {
        if self.edits.is_empty() {
            return source.to_string();
        }

        self.edits
            .sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

        let mut kept: Vec<Edit> = Vec::with_capacity(self.edits.len());
        for edit in self.edits {
            match kept.last_mut() {
                Some(last) if edit.start < last.end || (edit.start == last.start && edit.end <= last.end) => {
                    if edit.end > last.end && last.is_removal() && edit.is_removal() {
                        last.end = edit.end;
                    }
                }
                _ => kept.push(edit),
            }
        }

        let mut result = source.to_string();
        for edit in kept.into_iter().rev() {
            result.replace_range(edit.start..edit.end, &edit.text);
        }
        result
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REMOVAL WIDENING
// Removing a syntax node leaves its separators and indentation behind; these
// helpers grow the removed range so the result stays tidy.
// ═══════════════════════════════════════════════════════════════════════════════

fn line_start(source: &str, pos: usize) -> usize {
    source[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0)
}

/// Leading whitespace of the line containing `pos`.
pub fn line_indent(source: &str, pos: usize) -> &str {
    let begin = line_start(source, pos);
    let line = &source[begin..];
    let width = line.len() - line.trim_start_matches([' ', '\t']).len();
    &line[..width.min(pos - begin)]
}

/// Indent every line after the first of `block` by `indent`.
pub fn indent_block(block: &str, indent: &str) -> String {
    block
        .trim_end()
        .lines()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 || line.trim().is_empty() {
                line.to_string()
            } else {
                format!("{}{}", indent, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_blank(s: &str) -> bool {
    s.chars().all(|c| c == ' ' || c == '\t')
}

/// If `[start, end)` is the only thing on its line(s), the range covering those
/// whole lines including the trailing newline.
fn whole_lines(source: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    let begin = line_start(source, start);
    if !is_blank(&source[begin..start]) {
        return None;
    }
    let rest = &source[end..];
    let line_end = rest.find('\n').map(|i| end + i).unwrap_or(source.len());
    if !is_blank(&source[end..line_end]) {
        return None;
    }
    let finish = if line_end < source.len() { line_end + 1 } else { line_end };
    Some((begin, finish))
}

/// Range to remove for a JSX attribute or a JSX child.
pub fn jsx_item_removal(source: &str, start: usize, end: usize) -> (usize, usize) {
    if let Some(range) = whole_lines(source, start, end) {
        return range;
    }
    let trimmed = source[..start].trim_end_matches([' ', '\t', '\n', '\r']);
    (trimmed.len(), end)
}

/// Range to remove for an element of a comma-separated list (object property,
/// array element), including its separator.
pub fn list_item_removal(source: &str, start: usize, end: usize) -> (usize, usize) {
    let after = &source[end..];
    let spaces = after.len() - after.trim_start_matches([' ', '\t']).len();
    let has_comma = after[spaces..].starts_with(',');
    let item_end = if has_comma { end + spaces + 1 } else { end };

    if let Some(range) = whole_lines(source, start, item_end) {
        return range;
    }

    if has_comma {
        let tail = &source[item_end..];
        let gap = tail.len() - tail.trim_start_matches([' ', '\t']).len();
        return (start, item_end + gap);
    }

    let before = source[..start].trim_end_matches([' ', '\t', '\n', '\r']);
    match before.strip_suffix(',') {
        Some(without_comma) => (without_comma.len(), end),
        None => (start, end),
    }
}

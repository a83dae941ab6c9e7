use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

/// Shorthand reference accepted in marker comments.
pub const SHORTHAND_REF: &str = "$helmversionupdate";
/// Generic setter reference, as written by kpt-style tooling.
pub const OPENAPI_REF: &str = "$openapi";

// `key: value # comment` or `- value # comment`, with optional leading `- ` items.
static FIELD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r##"^(?P<prefix>[ \t]*(?:-[ \t]+)*(?:(?:"[^"]*"|'[^']*'|[^\s#'"\-][^#]*?|-[^\s#][^#]*?)[ \t]*:[ \t]+)?)(?P<value>"(?:[^"\\]|\\.)*"|'(?:[^']|'')*'|[^\s#][^#]*?)[ \t]+#(?P<comment>.*)$"##,
    )
    .expect("field line pattern is valid")
});

// A line whose value opens a block scalar: `key: |`, `- >-`, `key: |2 # note`.
static BLOCK_OPENER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r##"^(?P<lead>[ \t]*(?:-[ \t]+)*)(?P<key>(?:"[^"]*"|'[^']*'|[^\s#'"\-][^#]*?|-[^\s#][^#]*?)[ \t]*:[ \t]+)?[|>][0-9+\-]*[ \t]*(?:#.*)?$"##,
    )
    .expect("block opener pattern is valid")
});

/// Follows block scalars (`|`, `>`) line by line so their bodies are never
/// mistaken for fields.
#[derive(Debug, Default)]
pub struct BlockScalarTracker {
    parent_indent: Option<usize>,
}

impl BlockScalarTracker {
    /// Whether `line` belongs to the body of a block scalar opened earlier.
    pub fn is_content(&mut self, line: &str) -> bool {
        if let Some(parent) = self.parent_indent {
            if line.trim().is_empty() || indentation(line) > parent {
                return true;
            }
            self.parent_indent = None;
        }
        self.parent_indent = block_parent_indent(line);
        false
    }
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start_matches([' ', '\t']).len()
}

// Column of the key or sequence dash that owns a block scalar opened on `line`.
fn block_parent_indent(line: &str) -> Option<usize> {
    let captures = BLOCK_OPENER.captures(line)?;
    match captures.name("key") {
        Some(key) => Some(key.start()),
        None => captures["lead"].rfind('-'),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarStyle {
    Plain,
    SingleQuoted,
    DoubleQuoted,
}

/// A scalar value carrying a setter marker for the requested key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkedField {
    /// Zero-based line number.
    pub line: usize,
    /// Byte range of the scalar (quotes included) within the line.
    pub span: Range<usize>,
    pub style: ScalarStyle,
    /// Unquoted value.
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineMarker {
    /// No marker for the key on this line.
    None,
    /// Marker present but attached to something that is not a plain scalar.
    Unsupported(String),
    Field(MarkedField),
}

/// Setter name referenced by a marker comment, if the comment is one.
pub fn setter_name(comment: &str) -> Option<String> {
    let comment = comment.trim();
    if !comment.starts_with('{') {
        return None;
    }
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(comment).ok()?;
    [SHORTHAND_REF, OPENAPI_REF]
        .iter()
        .find_map(|reference| object.get(*reference))
        .and_then(|name| name.as_str())
        .map(str::to_string)
}

/// Recognise a marker for `key` on a single line (without its line terminator).
pub fn classify_line(line_number: usize, line: &str, key: &str) -> LineMarker {
    if !line.contains(SHORTHAND_REF) && !line.contains(OPENAPI_REF) {
        return LineMarker::None;
    }

    let Some(captures) = FIELD_LINE.captures(line) else {
        return match line.split_once('#') {
            Some((_, comment)) if setter_name(comment).as_deref() == Some(key) => {
                LineMarker::Unsupported("marker is not attached to a scalar value".to_string())
            }
            _ => LineMarker::None,
        };
    };

    let comment = &captures["comment"];
    if setter_name(comment).as_deref() != Some(key) {
        return LineMarker::None;
    }

    let value = &captures["value"];
    let span = captures
        .name("value")
        .map(|m| m.range())
        .unwrap_or_default();

    match scalar_style(value) {
        Ok(style) => LineMarker::Field(MarkedField {
            line: line_number,
            span,
            style,
            value: unquote(value, style),
        }),
        Err(reason) => LineMarker::Unsupported(reason),
    }
}

/// All fields in `text` whose marker names `key`; block scalar bodies are skipped.
pub fn find_markers(text: &str, key: &str) -> Vec<MarkedField> {
    let mut blocks = BlockScalarTracker::default();
    text.lines()
        .enumerate()
        .filter(|(_, line)| !blocks.is_content(line))
        .filter_map(|(n, line)| match classify_line(n, line, key) {
            LineMarker::Field(field) => Some(field),
            _ => None,
        })
        .collect()
}

fn scalar_style(value: &str) -> std::result::Result<ScalarStyle, String> {
    let first = value.chars().next().unwrap_or(' ');
    match first {
        '"' => Ok(ScalarStyle::DoubleQuoted),
        '\'' => Ok(ScalarStyle::SingleQuoted),
        '{' | '[' => Err(format!("flow collection '{value}' is not a scalar")),
        '|' | '>' => Err("block scalars are not supported".to_string()),
        '&' | '*' => Err(format!("anchors and aliases are not supported ('{value}')")),
        '!' => Err(format!("tagged values are not supported ('{value}')")),
        '%' | '@' | '`' => Err(format!("'{value}' is not a valid plain scalar")),
        _ if value.ends_with(':') => Err("marker is attached to a mapping key".to_string()),
        _ => Ok(ScalarStyle::Plain),
    }
}

fn unquote(value: &str, style: ScalarStyle) -> String {
    match style {
        ScalarStyle::Plain => value.to_string(),
        ScalarStyle::SingleQuoted => value[1..value.len() - 1].replace("''", "'"),
        ScalarStyle::DoubleQuoted => {
            let inner = &value[1..value.len() - 1];
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else {
                    out.push(c);
                }
            }
            out
        }
    }
}

/// Render `value` in `style`, falling back to double quotes for plain values
/// that would not survive as plain YAML.
pub fn render(value: &str, style: ScalarStyle) -> String {
    match style {
        ScalarStyle::Plain if is_plain_safe(value) => value.to_string(),
        ScalarStyle::SingleQuoted => format!("'{}'", value.replace('\'', "''")),
        _ => format!(
            "\"{}\"",
            value.replace('\\', "\\\\").replace('"', "\\\"")
        ),
    }
}

fn is_plain_safe(value: &str) -> bool {
    !value.is_empty()
        && value == value.trim()
        && !value.contains(": ")
        && !value.contains(" #")
        && !value.ends_with(':')
        && !value.starts_with([
            '-', '?', ':', ',', '[', ']', '{', '}', '#', '&', '*', '!', '|', '>', '\'', '"', '%',
            '@', '`',
        ])
}

//! Message templates bound to event payloads.
//!
//! Templates are plain text with `{{ ... }}` tags:
//!
//! ```text
//! {{ name }}            substitute a top-level field (leading `.` optional)
//! {{ .user.name }}      dotted access into nested objects
//! {{ items[0] }}        array index
//! {{ user["full name"] }}  bracketed key
//! {{ if .active }}A{{ else }}B{{ end }}
//! ```
//!
//! A field is truthy when present, non-null, non-empty and not `false`.
//! Substituted values are written verbatim; nothing is HTML-escaped since the
//! rendered body may go to non-HTML channels.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;

use crate::event::{PathSegment, Payload};

/// Errors from parsing or rendering a template.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("unclosed '{{{{' at byte {0}")]
    UnclosedTag(usize),

    #[error("empty tag at byte {0}")]
    EmptyTag(usize),

    #[error("'if' without a condition at byte {0}")]
    MissingCondition(usize),

    #[error("invalid field reference '{0}'")]
    InvalidPath(String),

    #[error("'else' at byte {0} has no matching 'if'")]
    UnexpectedElse(usize),

    #[error("'end' at byte {0} has no matching 'if'")]
    UnexpectedEnd(usize),

    #[error("second 'else' at byte {0} in the same 'if'")]
    DuplicateElse(usize),

    #[error("'if {0}' is never closed with 'end'")]
    UnclosedIf(String),

    #[error("template references undefined field '{0}'")]
    UndefinedField(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed field reference such as `.user.tags[0]`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    fn parse(expr: &str) -> Result<Self, RenderError> {
        let invalid = || RenderError::InvalidPath(expr.to_string());
        let body = expr.strip_prefix('.').unwrap_or(expr);
        if body.is_empty() {
            return Err(invalid());
        }

        let mut segments = Vec::new();
        let mut rest = body;
        let mut expect_key = true;

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('[') {
                let close = after.find(']').ok_or_else(invalid)?;
                let inner = after[..close].trim();
                segments.push(parse_bracket(inner).ok_or_else(invalid)?);
                rest = &after[close + 1..];
                expect_key = false;
            } else if let Some(after) = rest.strip_prefix('.') {
                if expect_key {
                    return Err(invalid());
                }
                rest = after;
                expect_key = true;
                if rest.is_empty() {
                    return Err(invalid());
                }
            } else {
                if !expect_key {
                    return Err(invalid());
                }
                let end = rest.find(['.', '[']).unwrap_or(rest.len());
                let key = &rest[..end];
                if key.is_empty() || !key.chars().all(is_key_char) {
                    return Err(invalid());
                }
                segments.push(Segment::Key(key.to_string()));
                rest = &rest[end..];
                expect_key = false;
            }
        }

        // A path must start at a top-level key.
        match segments.first() {
            Some(Segment::Key(_)) => Ok(Self {
                raw: expr.to_string(),
                segments,
            }),
            _ => Err(invalid()),
        }
    }

    fn resolve<'p>(&self, payload: &'p Payload) -> Option<&'p Value> {
        payload.lookup(self.segments.iter().map(|s| match s {
            Segment::Key(k) => PathSegment::Key(k.as_str()),
            Segment::Index(i) => PathSegment::Index(*i),
        }))
    }
}

fn is_key_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, ']' | '"' | '\'' | '{' | '}')
}

fn parse_bracket(inner: &str) -> Option<Segment> {
    if let Ok(index) = inner.parse::<usize>() {
        return Some(Segment::Index(index));
    }

    let quoted = inner
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| inner.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))?;

    Some(Segment::Key(quoted.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Field(FieldPath),
    If {
        condition: FieldPath,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// Open `if` blocks while parsing.
struct Frame {
    condition: FieldPath,
    then: Vec<Node>,
    otherwise: Option<Vec<Node>>,
}

impl Frame {
    fn current(&mut self) -> &mut Vec<Node> {
        match &mut self.otherwise {
            Some(nodes) => nodes,
            None => &mut self.then,
        }
    }
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\{\{(.*?)\}\}").expect("tag pattern is valid"))
}

/// A parsed, reusable template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// Parse template text, reporting malformed syntax.
    pub fn parse(source: &str) -> Result<Self, RenderError> {
        let mut root: Vec<Node> = Vec::new();
        let mut stack: Vec<Frame> = Vec::new();
        let mut cursor = 0;

        fn push(root: &mut Vec<Node>, stack: &mut [Frame], node: Node) {
            match stack.last_mut() {
                Some(frame) => frame.current().push(node),
                None => root.push(node),
            }
        }

        for caps in tag_pattern().captures_iter(source) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let start = whole.start();

            let text = &source[cursor..start];
            if let Some(offset) = text.find("{{") {
                return Err(RenderError::UnclosedTag(cursor + offset));
            }
            if !text.is_empty() {
                push(&mut root, &mut stack, Node::Text(text.to_string()));
            }
            cursor = whole.end();

            let tag = inner.as_str().trim();
            if tag.is_empty() {
                return Err(RenderError::EmptyTag(start));
            }
            if tag.contains("{{") {
                return Err(RenderError::UnclosedTag(start));
            }

            if tag == "if" {
                return Err(RenderError::MissingCondition(start));
            }

            if let Some(condition) = tag.strip_prefix("if").filter(|c| c.starts_with(char::is_whitespace)) {
                stack.push(Frame {
                    condition: FieldPath::parse(condition.trim())?,
                    then: Vec::new(),
                    otherwise: None,
                });
            } else if tag == "else" {
                let frame = stack.last_mut().ok_or(RenderError::UnexpectedElse(start))?;
                if frame.otherwise.is_some() {
                    return Err(RenderError::DuplicateElse(start));
                }
                frame.otherwise = Some(Vec::new());
            } else if tag == "end" {
                let frame = stack.pop().ok_or(RenderError::UnexpectedEnd(start))?;
                let node = Node::If {
                    condition: frame.condition,
                    then: frame.then,
                    otherwise: frame.otherwise.unwrap_or_default(),
                };
                push(&mut root, &mut stack, node);
            } else {
                push(&mut root, &mut stack, Node::Field(FieldPath::parse(tag)?));
            }
        }

        let tail = &source[cursor..];
        if let Some(offset) = tail.find("{{") {
            return Err(RenderError::UnclosedTag(cursor + offset));
        }
        if !tail.is_empty() {
            push(&mut root, &mut stack, Node::Text(tail.to_string()));
        }

        if let Some(frame) = stack.pop() {
            return Err(RenderError::UnclosedIf(frame.condition.raw));
        }

        Ok(Self { nodes: root })
    }

    /// Render against a payload. Pure: same input, same output.
    pub fn render(&self, payload: &Payload) -> Result<String, RenderError> {
        let mut out = String::new();
        render_nodes(&self.nodes, payload, &mut out)?;
        Ok(out)
    }
}

fn render_nodes(nodes: &[Node], payload: &Payload, out: &mut String) -> Result<(), RenderError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Field(path) => {
                let value = path
                    .resolve(payload)
                    .ok_or_else(|| RenderError::UndefinedField(path.raw.clone()))?;
                write_value(value, out);
            }
            Node::If {
                condition,
                then,
                otherwise,
            } => {
                let branch = if is_truthy(condition.resolve(payload)) {
                    then
                } else {
                    otherwise
                };
                render_nodes(branch, payload, out)?;
            }
        }
    }
    Ok(())
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        nested => out.push_str(&nested.to_string()),
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Number(_)) => true,
    }
}

/// Parse and render in one step.
pub fn render(template: &str, payload: &Payload) -> Result<String, RenderError> {
    Template::parse(template)?.render(payload)
}

//! Redis-style glob patterns.
//!
//! Supports `*`, `?`, `[abc]`, `[^abc]`, `[a-z]` and `\` escapes, compiled to
//! an anchored [`regex::Regex`]. Used by the in-memory backend to evaluate
//! `SCAN ... MATCH` patterns, and by key builders to escape user input.

use regex::Regex;

use crate::error::{StoreError, StoreResult};

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    /// Compile `pattern`. An unclosed `[` is treated as a literal bracket.
    pub fn compile(pattern: &str) -> StoreResult<Self> {
        let translated = translate(pattern);
        let regex = Regex::new(&translated).map_err(|e| {
            StoreError::InvalidArgument(format!("invalid glob pattern {pattern:?}: {e}"))
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Escape every glob metacharacter in `literal`.
pub fn escape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for ch in literal.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn translate(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2 + 8);
    out.push_str("(?s)^");

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' if i + 1 < chars.len() => {
                i += 1;
                push_literal(&mut out, chars[i]);
            }
            '[' => match class_end(&chars, i + 1) {
                Some(end) => {
                    push_class(&mut out, &chars[i + 1..end]);
                    i = end;
                }
                None => push_literal(&mut out, '['),
            },
            other => push_literal(&mut out, other),
        }
        i += 1;
    }

    out.push('$');
    out
}

/// Index of the `]` closing a class that starts at `start`, honouring escapes.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            ']' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn push_class(out: &mut String, body: &[char]) {
    if body.is_empty() {
        // `[]` matches nothing.
        out.push_str(r"[^\s\S]");
        return;
    }

    out.push('[');
    let mut i = 0;
    if body[0] == '^' {
        out.push('^');
        i = 1;
    }
    while i < body.len() {
        match body[i] {
            '\\' if i + 1 < body.len() => {
                i += 1;
                push_literal(out, body[i]);
            }
            '-' if i > 0 && i + 1 < body.len() => out.push('-'),
            other => push_literal(out, other),
        }
        i += 1;
    }
    out.push(']');
}

fn push_literal(out: &mut String, ch: char) {
    let mut buf = [0u8; 4];
    out.push_str(&regex::escape(ch.encode_utf8(&mut buf)));
}

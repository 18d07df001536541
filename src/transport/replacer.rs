//! Per-request `{placeholder}` expansion.

use std::collections::HashMap;

/// Key/value template expander carried by each request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replacer {
    values: HashMap<String, String>,
}

impl Replacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Whether `input` contains a placeholder opening brace.
    pub fn has_placeholder(input: &str) -> bool {
        input.contains('{')
    }

    /// Replace every `{key}` in `input`.
    ///
    /// Unknown keys and keys with empty values become `empty`. `\{` and `\}`
    /// produce literal braces. An opening brace with no closing brace is left
    /// as is.
    pub fn replace_all(&self, input: &str, empty: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(pos) = rest.find(['{', '\\']) {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if let Some(escaped) = tail.strip_prefix('\\') {
                match escaped.chars().next() {
                    Some(c @ ('{' | '}')) => {
                        out.push(c);
                        rest = &escaped[1..];
                    }
                    _ => {
                        out.push('\\');
                        rest = escaped;
                    }
                }
                continue;
            }

            let Some(close) = tail.find('}') else {
                out.push_str(tail);
                return out;
            };
            let key = &tail[1..close];
            match self.values.get(key) {
                Some(value) if !value.is_empty() => out.push_str(value),
                _ => out.push_str(empty),
            }
            rest = &tail[close + 1..];
        }

        out.push_str(rest);
        out
    }
}

//! `${NAME}` placeholder expansion.
//!
//! Supported forms:
//! - `${NAME}` - substitute the resolved value, empty string when undefined
//! - `${NAME:-default}` - use `default` when undefined or empty
//! - `${NAME:?message}` - fail with `message` when undefined or empty
//! - `\${NAME}` - escaped; left as the literal `${NAME}`
//!
//! Resolved values are expanded recursively. The chain of names currently
//! being expanded is tracked so definition cycles fail with a circular
//! reference error; a depth cap is the safety valve for long non-cyclic
//! chains.

use crate::VariableStore;
use regex::Regex;
use runlocal_core::{Error, Result};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Default cap on nested value expansion.
pub const DEFAULT_MAX_DEPTH: usize = 10;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Rewrites placeholder syntax in text using a [`VariableStore`].
pub struct VariableExpander<'a> {
    store: &'a VariableStore,
    max_depth: usize,
}

impl<'a> VariableExpander<'a> {
    pub fn new(store: &'a VariableStore) -> Self {
        Self {
            store,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(store: &'a VariableStore, max_depth: usize) -> Self {
        Self { store, max_depth }
    }

    /// Expand all placeholders in `input`.
    pub fn expand(&self, input: &str) -> Result<String> {
        let mut chain = Vec::new();
        self.expand_inner(input, &mut chain, 0)
    }

    pub fn expand_vec(&self, inputs: &[String]) -> Result<Vec<String>> {
        inputs.iter().map(|s| self.expand(s)).collect()
    }

    pub fn expand_map(&self, map: &HashMap<String, String>) -> Result<HashMap<String, String>> {
        map.iter()
            .map(|(k, v)| Ok((k.clone(), self.expand(v)?)))
            .collect()
    }

    fn expand_inner(&self, input: &str, chain: &mut Vec<String>, depth: usize) -> Result<String> {
        if depth > self.max_depth {
            return Err(Error::RecursionLimit {
                name: chain.last().cloned().unwrap_or_default(),
                depth: self.max_depth,
            });
        }

        let bytes = input.as_bytes();
        let mut out = String::with_capacity(input.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'\\' && input[i + 1..].starts_with("${") {
                // Escape character consumed, placeholder left literal.
                out.push_str("${");
                i += 3;
                continue;
            }
            if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
                let Some(end) = find_closing_brace(input, i + 2) else {
                    return Err(Error::UnclosedVariable(input[i..].to_string()));
                };
                let inner = &input[i + 2..end];
                out.push_str(&self.expand_placeholder(inner, chain, depth)?);
                i = end + 1;
                continue;
            }
            match input[i..].chars().next() {
                Some(ch) => {
                    out.push(ch);
                    i += ch.len_utf8();
                }
                None => break,
            }
        }
        Ok(out)
    }

    /// Expand the content between `${` and `}`.
    fn expand_placeholder(
        &self,
        inner: &str,
        chain: &mut Vec<String>,
        depth: usize,
    ) -> Result<String> {
        let name_end = inner
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(inner.len());
        let (name, modifier) = inner.split_at(name_end);

        let valid_modifier =
            modifier.is_empty() || modifier.starts_with(":-") || modifier.starts_with(":?");
        if !NAME_RE.is_match(name) || !valid_modifier {
            // Not placeholder syntax; leave it untouched.
            return Ok(format!("${{{}}}", inner));
        }

        if chain.iter().any(|n| n == name) {
            let mut cycle = chain.clone();
            cycle.push(name.to_string());
            return Err(Error::CircularVariable(cycle.join(" -> ")));
        }

        let resolved = self.store.resolve(name);

        if let Some(default) = modifier.strip_prefix(":-") {
            return match resolved {
                Some(value) if !value.is_empty() => {
                    self.expand_value(name, &value, chain, depth)
                }
                _ => self.expand_inner(default, chain, depth + 1),
            };
        }

        if let Some(message) = modifier.strip_prefix(":?") {
            return match resolved {
                Some(value) if !value.is_empty() => {
                    self.expand_value(name, &value, chain, depth)
                }
                _ => Err(Error::VariableRequired {
                    name: name.to_string(),
                    message: if message.is_empty() {
                        format!("variable '{}' is required", name)
                    } else {
                        message.to_string()
                    },
                }),
            };
        }

        match resolved {
            Some(value) => self.expand_value(name, &value, chain, depth),
            None => Ok(String::new()),
        }
    }

    fn expand_value(
        &self,
        name: &str,
        value: &str,
        chain: &mut Vec<String>,
        depth: usize,
    ) -> Result<String> {
        chain.push(name.to_string());
        let expanded = self.expand_inner(value, chain, depth + 1);
        chain.pop();
        expanded
    }
}

/// Find the `}` closing a placeholder opened just before `from`,
/// accounting for nested `${...}` in default values.
fn find_closing_brace(input: &str, from: usize) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut i = from;
    let mut depth = 1usize;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'}' {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
            i += 1;
        } else {
            i += 1;
        }
    }
    None
}

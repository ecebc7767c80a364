//! Configuration reference resolution.
//!
//! A single pre-pass over the configuration tree, before anything is
//! compiled, that substitutes `${name}` references so the compiler only
//! ever sees a literal tree. References resolve against, in order:
//! compiler-supplied variables, a dotted path into the document itself,
//! then the process environment.
//!
//! A string that consists of exactly one reference is replaced by the
//! referent wholesale, keeping its type; references embedded in longer
//! strings interpolate the referent's scalar text. Resolution depth is
//! bounded by [`MAX_DEPTH`] to reject reference cycles, and the pass is
//! idempotent: a resolved tree contains no references, so re-running it
//! changes nothing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::ConfigError;
use crate::value::ValueExt;

/// Bound on chained references before resolution gives up.
pub const MAX_DEPTH: usize = 8;

static REF_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("hardwired pattern"));

/// Resolves every reference in `config`, returning the literal tree.
pub fn resolve(config: &Value, variables: &Map<String, Value>) -> Result<Value, ConfigError> {
    let resolver = Resolver { variables, root: config.clone() };
    let mut out = config.clone();
    resolver.walk(&mut out, "config", 0)?;
    Ok(out)
}

struct Resolver<'a> {
    variables: &'a Map<String, Value>,
    root: Value,
}

impl Resolver<'_> {
    fn walk(&self, node: &mut Value, path: &str, depth: usize) -> Result<(), ConfigError> {
        if depth > MAX_DEPTH {
            return Err(ConfigError::resolution_depth(path, MAX_DEPTH));
        }

        match node {
            Value::String(text) => {
                if let Some(name) = whole_reference(text) {
                    let replacement = self.lookup(&name).ok_or_else(|| ConfigError::unresolved_reference(path, &name))?;
                    *node = replacement;
                    return self.walk(node, path, depth + 1);
                }
                *text = self.resolve_text(text, path)?;
                Ok(())
            }
            Value::Array(items) => {
                for (index, item) in items.iter_mut().enumerate() {
                    self.walk(item, &format!("{path}.{index}"), depth)?;
                }
                Ok(())
            }
            Value::Object(dict) => {
                for (key, value) in dict.iter_mut() {
                    self.walk(value, &format!("{path}.{key}"), depth)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn resolve_text(&self, text: &str, path: &str) -> Result<String, ConfigError> {
        let mut current = text.to_string();
        for _ in 0..MAX_DEPTH {
            if !REF_TOKEN.is_match(&current) {
                return Ok(current);
            }

            let mut failed = None;
            let next = REF_TOKEN.replace_all(&current, |caps: &regex::Captures<'_>| {
                let name = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                let resolved = self
                    .lookup(name)
                    .ok_or_else(|| ConfigError::unresolved_reference(path, name))
                    .and_then(|value| {
                        // only scalars may splice into a longer string
                        scalar_text(&value).ok_or_else(|| {
                            ConfigError::invalid(path, format!("reference ${{{name}}} is not a scalar"))
                        })
                    });
                match resolved {
                    Ok(text) => text,
                    Err(e) => {
                        failed = Some(e);
                        String::new()
                    }
                }
            });

            if let Some(e) = failed {
                return Err(e);
            }
            current = next.into_owned();
        }
        Err(ConfigError::resolution_depth(path, MAX_DEPTH))
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.variables.get(name) {
            return Some(value.clone());
        }
        if let Some(value) = self.root.lookup(name) {
            return Some(value.clone());
        }
        std::env::var(name).ok().map(Value::String)
    }
}

fn whole_reference(text: &str) -> Option<String> {
    let m = REF_TOKEN.find(text)?;
    if m.start() == 0 && m.end() == text.len() { Some(text[2..text.len() - 1].to_string()) } else { None }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => Some("null".to_string()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

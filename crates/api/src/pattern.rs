//! URL patterns for route matching.
//!
//! A pattern is the accumulated route path from the configuration tree,
//! with `:name` segments capturing one path component each. Patterns are
//! compiled to anchored regexes once, at configuration compile time.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::ConfigError;

static VAR_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(":([A-Za-z_][A-Za-z0-9_]*)").expect("hardwired pattern"));

/// A compiled URL pattern.
#[derive(Debug)]
pub struct UrlPattern {
    regex: Regex,
}

impl UrlPattern {
    /// Compiles `pattern`, anchored at both ends. With `require_suffix` the
    /// pattern additionally demands at least one further character, which
    /// is how a parent route avoids shadowing its children.
    pub fn compile(pattern: &str, require_suffix: bool) -> Result<Self, ConfigError> {
        let mut source = String::from("^");
        let mut last = 0;
        for var in VAR_TOKEN.find_iter(pattern) {
            source.push_str(&regex::escape(&pattern[last..var.start()]));
            source.push_str(&format!("(?P<{}>[^/]+)", &pattern[var.start() + 1..var.end()]));
            last = var.end();
        }
        source.push_str(&regex::escape(&pattern[last..]));
        if require_suffix {
            source.push_str(".+");
        }
        source.push('$');

        let regex = Regex::new(&source).map_err(|e| ConfigError::invalid(pattern, format!("invalid url pattern: {e}")))?;
        Ok(Self { regex })
    }

    /// Matches `path` and returns the captured arguments, or `None`.
    pub fn matches(&self, path: &str) -> Option<Map<String, Value>> {
        let caps = self.regex.captures(path)?;
        let mut args = Map::new();
        for name in self.regex.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                args.insert(name.to_string(), Value::String(m.as_str().to_string()));
            }
        }
        Some(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_patterns_are_anchored() {
        let pattern = UrlPattern::compile("/users", false).unwrap();

        assert!(pattern.matches("/users").is_some());
        assert!(pattern.matches("/users/42").is_none());
        assert!(pattern.matches("/api/users").is_none());
    }

    #[test]
    fn variables_capture_one_segment() {
        let pattern = UrlPattern::compile("/users/:id/posts/:post", false).unwrap();

        let args = pattern.matches("/users/42/posts/7").unwrap();
        assert_eq!(args.get("id"), Some(&Value::String("42".into())));
        assert_eq!(args.get("post"), Some(&Value::String("7".into())));

        assert!(pattern.matches("/users/42/posts").is_none());
        assert!(pattern.matches("/users/4/2/posts/7").is_none());
    }

    #[test]
    fn suffix_requirement_demands_another_segment() {
        let parent = UrlPattern::compile("/users", true).unwrap();

        assert!(parent.matches("/users").is_none());
        assert!(parent.matches("/users/42").is_some());
    }

    #[test]
    fn regex_metacharacters_in_routes_are_literal() {
        let pattern = UrlPattern::compile("/v1.0/ping", false).unwrap();

        assert!(pattern.matches("/v1.0/ping").is_some());
        assert!(pattern.matches("/v1x0/ping").is_none());
    }
}

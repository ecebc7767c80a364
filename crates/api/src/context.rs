//! Compilation context threaded through the config walk.

use serde_json::Value;

/// Where the compiler currently is in the configuration tree.
///
/// Carries the node under compilation together with the URL pattern
/// accumulated from enclosing keys and a dotted document path used in
/// error messages. Contexts are cheap to derive; each child borrows the
/// same underlying document as its parent.
#[derive(Debug, Clone)]
pub struct Context<'a> {
    config: &'a Value,
    pattern: String,
    path: String,
}

impl<'a> Context<'a> {
    /// Context for the root of the `api` subtree.
    pub fn root(config: &'a Value) -> Self {
        Self { config, pattern: String::new(), path: "api".to_string() }
    }

    /// Descends into a child node whose key extends the URL pattern.
    pub fn child(&self, config: &'a Value, key: &str) -> Self {
        Self {
            config,
            pattern: format!("{}{key}", self.pattern),
            path: format!("{}.{key}", self.path),
        }
    }

    /// Descends into a method entry; the pattern stays as-is.
    pub fn method_child(&self, config: &'a Value, key: &str) -> Self {
        Self {
            config,
            pattern: self.pattern.clone(),
            path: format!("{}.{key}", self.path),
        }
    }

    pub fn config(&self) -> &'a Value {
        self.config
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// True at the top of the tree, before any pattern segment.
    pub fn at_root(&self) -> bool {
        self.pattern.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn children_accumulate_pattern_and_path() {
        let doc = json!({"/users": {"/:id": {"GET": {}}}});
        let root = Context::root(&doc);
        assert!(root.at_root());

        let users = root.child(&doc["/users"], "/users");
        let user = users.child(&doc["/users"]["/:id"], "/:id");
        assert_eq!(user.pattern(), "/users/:id");
        assert_eq!(user.path(), "api./users./:id");

        let get = user.method_child(&doc["/users"]["/:id"]["GET"], "GET");
        assert_eq!(get.pattern(), "/users/:id");
        assert_eq!(get.path(), "api./users./:id.GET");
        assert!(!get.at_root());
    }
}

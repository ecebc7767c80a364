//! Self-documentation collected while the configuration compiles.
//!
//! Every documented method entry is appended to a registry during
//! compilation; [`DocsRegistry::freeze`] then publishes an immutable
//! snapshot that a docs endpoint can serve without locking.

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::methods::MethodSet;
use crate::value::ValueExt;

/// Documentation for one method entry.
#[derive(Debug, Clone, Serialize)]
pub struct MethodDoc {
    pub pattern: String,
    pub methods: String,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
}

/// The documentation tree for a whole compiled API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApiDocs {
    pub title: String,
    pub version: String,
    pub endpoints: Vec<MethodDoc>,
}

/// Accumulates docs during compilation, serves them after.
pub struct DocsRegistry {
    building: Mutex<ApiDocs>,
    frozen: ArcSwap<ApiDocs>,
}

impl DocsRegistry {
    pub fn new(title: &str, version: &str) -> Self {
        let docs = ApiDocs { title: title.to_string(), version: version.to_string(), endpoints: Vec::new() };
        Self {
            building: Mutex::new(docs),
            frozen: ArcSwap::from_pointee(ApiDocs::default()),
        }
    }

    /// Registers one method entry unless its config opts out.
    ///
    /// `hide: true` or `docs: false` keeps the entry out of the
    /// published documentation without affecting its behavior.
    pub fn load_method(&self, pattern: &str, methods: MethodSet, endpoint: &str, config: &Value) {
        if config.get_bool_or("hide", false) || !config.get_bool_or("docs", true) {
            return;
        }

        let doc = MethodDoc {
            pattern: pattern.to_string(),
            methods: methods.to_string(),
            endpoint: endpoint.to_string(),
            summary: config.get_str("help").map(str::to_string),
            args: config.get_dict("args").cloned().unwrap_or_default(),
        };
        self.building.lock().unwrap_or_else(PoisonError::into_inner).endpoints.push(doc);
    }

    /// Publishes everything registered so far as the served snapshot.
    pub fn freeze(&self) {
        let docs = self.building.lock().unwrap_or_else(PoisonError::into_inner).clone();
        self.frozen.store(Arc::new(docs));
    }

    pub fn snapshot(&self) -> Arc<ApiDocs> {
        self.frozen.load_full()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn freeze_publishes_registered_methods() {
        let registry = DocsRegistry::new("Example", "1.2.0");
        registry.load_method(
            "/users/:id",
            MethodSet::parse("GET"),
            "query",
            &json!({"help": "Fetch one user", "args": {"id": {}}}),
        );

        assert!(registry.snapshot().endpoints.is_empty());
        registry.freeze();

        let docs = registry.snapshot();
        assert_eq!(docs.title, "Example");
        assert_eq!(docs.version, "1.2.0");
        assert_eq!(docs.endpoints.len(), 1);
        assert_eq!(docs.endpoints[0].pattern, "/users/:id");
        assert_eq!(docs.endpoints[0].methods, "GET");
        assert_eq!(docs.endpoints[0].summary.as_deref(), Some("Fetch one user"));
    }

    #[test]
    fn hidden_and_undocumented_methods_are_omitted() {
        let registry = DocsRegistry::new("Example", "1.0.0");
        registry.load_method("/a", MethodSet::parse("GET"), "pass", &json!({"hide": true}));
        registry.load_method("/b", MethodSet::parse("GET"), "pass", &json!({"docs": false}));
        registry.load_method("/c", MethodSet::parse("GET"), "pass", &json!({}));
        registry.freeze();

        let docs = registry.snapshot();
        assert_eq!(docs.endpoints.len(), 1);
        assert_eq!(docs.endpoints[0].pattern, "/c");
    }

    #[test]
    fn docs_serialize_without_empty_fields() {
        let registry = DocsRegistry::new("Example", "1.0.0");
        registry.load_method("/ping", MethodSet::parse("GET"), "status", &json!({}));
        registry.freeze();

        let value = serde_json::to_value(registry.snapshot().as_ref()).unwrap();
        let entry = &value["endpoints"][0];
        assert_eq!(entry["endpoint"], "status");
        assert!(entry.get("summary").is_none());
        assert!(entry.get("args").is_none());
    }
}

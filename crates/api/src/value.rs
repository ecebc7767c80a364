//! Typed accessors over configuration values.
//!
//! Configuration documents are plain [`serde_json::Value`] trees. This
//! extension trait adds the typed-get-with-default and dotted-path lookup
//! operations the compiler and handlers lean on, so call sites stay free
//! of `as_*` chains.

use serde_json::{Map, Value};

pub trait ValueExt {
    fn get_str(&self, key: &str) -> Option<&str>;
    fn get_str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str;
    fn get_bool_or(&self, key: &str, default: bool) -> bool;
    fn get_u64_or(&self, key: &str, default: u64) -> u64;
    fn get_dict(&self, key: &str) -> Option<&Map<String, Value>>;
    fn get_list(&self, key: &str) -> Option<&Vec<Value>>;

    /// Walks a `.`-separated path of dict keys and list indices.
    fn lookup(&self, path: &str) -> Option<&Value>;
}

impl ValueExt for Value {
    fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    fn get_str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_str(key).unwrap_or(default)
    }

    fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    fn get_u64_or(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(Value::as_u64).unwrap_or(default)
    }

    fn get_dict(&self, key: &str) -> Option<&Map<String, Value>> {
        self.get(key).and_then(Value::as_object)
    }

    fn get_list(&self, key: &str) -> Option<&Vec<Value>> {
        self.get(key).and_then(Value::as_array)
    }

    fn lookup(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.') {
            current = match current {
                Value::Object(dict) => dict.get(segment)?,
                Value::Array(list) => list.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

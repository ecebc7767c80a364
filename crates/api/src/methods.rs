//! HTTP method sets parsed from `|`-joined configuration keys.

use std::fmt;

use http::Method;

static METHOD_NAMES: [(&str, u16); 9] = [
    ("GET", 1),
    ("HEAD", 2),
    ("POST", 4),
    ("PUT", 8),
    ("DELETE", 16),
    ("OPTIONS", 32),
    ("PATCH", 64),
    ("CONNECT", 128),
    ("TRACE", 256),
];

/// A bitmask of recognized HTTP methods.
///
/// Built from configuration keys like `"GET|POST"`. Unrecognized tokens
/// contribute no bit, so a key made entirely of unknown tokens produces an
/// empty set and therefore no method branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodSet(u16);

impl MethodSet {
    pub const EMPTY: MethodSet = MethodSet(0);

    pub fn parse(spec: &str) -> Self {
        let mut bits = 0;
        for token in spec.split('|') {
            let token = token.trim().to_ascii_uppercase();
            if let Some((_, bit)) = METHOD_NAMES.iter().find(|(name, _)| *name == token) {
                bits |= bit;
            }
        }
        Self(bits)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, method: &Method) -> bool {
        METHOD_NAMES.iter().any(|(name, bit)| self.0 & bit != 0 && method.as_str() == *name)
    }

    /// Names of the contained methods, in canonical order.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        METHOD_NAMES.iter().filter(move |(_, bit)| self.0 & bit != 0).map(|(name, _)| *name)
    }
}

impl fmt::Display for MethodSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for name in self.names() {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(name)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_joined_tokens() {
        let set = MethodSet::parse("GET|POST");
        assert!(set.contains(&Method::GET));
        assert!(set.contains(&Method::POST));
        assert!(!set.contains(&Method::DELETE));
        assert_eq!(set.to_string(), "GET|POST");
    }

    #[test]
    fn unrecognized_tokens_contribute_nothing() {
        assert!(MethodSet::parse("BREW").is_empty());
        assert!(MethodSet::parse("").is_empty());

        let partial = MethodSet::parse("GET|BREW");
        assert!(partial.contains(&Method::GET));
        assert_eq!(partial.to_string(), "GET");
    }

    #[test]
    fn tokens_are_case_insensitive() {
        let set = MethodSet::parse("get| Put ");
        assert!(set.contains(&Method::GET));
        assert!(set.contains(&Method::PUT));
    }
}

//! Semantic version handling for the configuration `version` field.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// A `major.minor.patch` version. Missing components default to zero, so
/// `"1"` and `"1.0.0"` compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// Oldest configuration format the compiler accepts.
    pub const MIN_SUPPORTED: Version = Version { major: 1, minor: 0, patch: 0 };

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl FromStr for Version {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut component = |name: &str| -> Result<u32, ConfigError> {
            match parts.next() {
                None => Ok(0),
                Some(text) => text.parse().map_err(|_| ConfigError::invalid("version", format!("invalid {name} component in {s:?}"))),
            }
        };

        let major = component("major")?;
        let minor = component("minor")?;
        let patch = component("patch")?;
        if parts.next().is_some() {
            return Err(ConfigError::invalid("version", format!("too many components in {s:?}")));
        }
        Ok(Self { major, minor, patch })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

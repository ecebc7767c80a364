use thiserror::Error;

/// Compile-time configuration failures.
///
/// Every variant is fatal for the compilation that raised it and carries
/// enough context to point at the offending part of the document. A failed
/// compilation never leaves a partially built handler tree behind.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{path}: unresolved reference ${{{name}}}")]
    UnresolvedReference { path: String, name: String },

    #[error("{path}: reference resolution exceeded {max_depth} levels")]
    ResolutionDepth { path: String, max_depth: usize },

    #[error("duplicate bind key: {key}")]
    DuplicateBind { key: String },

    #[error("{path}: no handler bound to key {key:?}")]
    UnknownBind { path: String, key: String },

    #[error("{path}: unknown endpoint type {name:?}")]
    UnknownEndpoint { path: String, name: String },

    #[error("{path}: endpoint {endpoint:?} requires a {collaborator} collaborator")]
    MissingCollaborator { path: String, endpoint: String, collaborator: String },

    #[error("api version {found} is below the minimum supported {min}")]
    VersionTooLow { found: String, min: String },

    #[error("{path}: {reason}")]
    Invalid { path: String, reason: String },
}

impl ConfigError {
    pub fn unresolved_reference(path: &str, name: &str) -> Self {
        Self::UnresolvedReference { path: path.to_string(), name: name.to_string() }
    }

    pub fn resolution_depth(path: &str, max_depth: usize) -> Self {
        Self::ResolutionDepth { path: path.to_string(), max_depth }
    }

    pub fn duplicate_bind(key: &str) -> Self {
        Self::DuplicateBind { key: key.to_string() }
    }

    pub fn unknown_bind(path: &str, key: &str) -> Self {
        Self::UnknownBind { path: path.to_string(), key: key.to_string() }
    }

    pub fn unknown_endpoint(path: &str, name: &str) -> Self {
        Self::UnknownEndpoint { path: path.to_string(), name: name.to_string() }
    }

    pub fn missing_collaborator(path: &str, endpoint: &str, collaborator: &str) -> Self {
        Self::MissingCollaborator { path: path.to_string(), endpoint: endpoint.to_string(), collaborator: collaborator.to_string() }
    }

    pub fn version_too_low<F: ToString, M: ToString>(found: F, min: M) -> Self {
        Self::VersionTooLow { found: found.to_string(), min: min.to_string() }
    }

    pub fn invalid<S: ToString>(path: &str, reason: S) -> Self {
        Self::Invalid { path: path.to_string(), reason: reason.to_string() }
    }
}

/// Request-time handler failures.
///
/// These surface as a 500 for the affected request only; the compiled
/// handler tree and sibling requests are unaffected.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    Message(String),

    #[error("json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl HandlerError {
    pub fn message<S: ToString>(s: S) -> Self {
        Self::Message(s.to_string())
    }
}

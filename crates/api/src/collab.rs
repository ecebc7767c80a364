//! Collaborators endpoints depend on.
//!
//! The compiler never fabricates these: each is handed in by the caller
//! before compilation, and an endpoint that needs one fails compilation
//! when it is absent. Everything here is trait-shaped so callers can
//! plug in real databases, process pools, or OAuth2 backends without
//! this crate knowing about them.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use mime::Mime;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::HandlerError;

/// Executes configured SQL on behalf of query endpoints.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DbConnector: Send + Sync {
    /// Runs `sql` with the exchange's arguments bound and returns the
    /// result rows as a JSON value.
    async fn query(&self, sql: &str, args: &Map<String, Value>) -> Result<Value, HandlerError>;
}

/// Runs argument filter programs outside the server process.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubprocessPool: Send + Sync {
    /// Feeds `args` to `program` and returns the rewritten argument map.
    async fn filter(&self, program: &str, args: &Map<String, Value>) -> Result<Map<String, Value>, HandlerError>;
}

/// An authenticated user attached to an exchange.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub user: String,
    pub provider: String,
    pub data: Map<String, Value>,
}

/// The identity an OAuth2 provider vouches for after a code exchange.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub provider: String,
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
    pub verified: bool,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub raw: Value,
}

impl Identity {
    /// The display name a session should carry for this identity.
    pub fn display_user(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| self.id.clone())
    }
}

/// Session storage behind login, logout and session endpoints.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionManager: Send + Sync {
    async fn open(&self, identity: &Identity) -> Result<Session, HandlerError>;
    async fn find(&self, token: &str) -> Result<Option<Session>, HandlerError>;
    async fn close(&self, token: &str) -> Result<(), HandlerError>;
}

/// In-process session store; sessions vanish on restart.
#[derive(Default)]
pub struct MemorySessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    counter: AtomicU64,
}

impl MemorySessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint_token(&self, identity: &Identity) -> String {
        let serial = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut hasher = DefaultHasher::new();
        serial.hash(&mut hasher);
        identity.provider.hash(&mut hasher);
        identity.id.hash(&mut hasher);
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos()
            .hash(&mut hasher);
        format!("{:016x}{:08x}", hasher.finish(), serial)
    }
}

#[async_trait]
impl SessionManager for MemorySessionManager {
    async fn open(&self, identity: &Identity) -> Result<Session, HandlerError> {
        let session = Session {
            token: self.mint_token(identity),
            user: identity.display_user(),
            provider: identity.provider.clone(),
            data: Map::new(),
        };
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.token.clone(), session.clone());
        Ok(session)
    }

    async fn find(&self, token: &str) -> Result<Option<Session>, HandlerError> {
        Ok(self.sessions.lock().unwrap_or_else(PoisonError::into_inner).get(token).cloned())
    }

    async fn close(&self, token: &str) -> Result<(), HandlerError> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).remove(token);
        Ok(())
    }
}

/// One OAuth2 backend, addressed by name from the configuration.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Oauth2Provider: Send + Sync {
    fn name(&self) -> &str;

    /// URL to send an unauthenticated user-agent to.
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String;

    /// Trades an authorization code for the identity it represents.
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<Identity, HandlerError>;
}

/// The providers available to login endpoints.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: Vec<Arc<dyn Oauth2Provider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, provider: Arc<dyn Oauth2Provider>) {
        self.providers.push(provider);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Oauth2Provider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// The default provider when the configuration names none.
    pub fn first(&self) -> Option<&Arc<dyn Oauth2Provider>> {
        self.providers.first()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Named blobs compiled-in resource endpoints serve from memory.
#[derive(Clone, Default)]
pub struct ResourceSet {
    entries: HashMap<String, Bytes>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, content: Bytes) {
        self.entries.insert(name.to_string(), content);
    }

    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.entries.get(name)
    }
}

/// Content type for a path, by extension.
pub fn guess_mime(path: &str) -> Mime {
    let extension = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("html" | "htm") => mime::TEXT_HTML_UTF_8,
        Some("css") => mime::TEXT_CSS,
        Some("js") => mime::APPLICATION_JAVASCRIPT,
        Some("json") => mime::APPLICATION_JSON,
        Some("png") => mime::IMAGE_PNG,
        Some("jpg" | "jpeg") => mime::IMAGE_JPEG,
        Some("gif") => mime::IMAGE_GIF,
        Some("svg") => mime::IMAGE_SVG,
        Some("txt") => mime::TEXT_PLAIN_UTF_8,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

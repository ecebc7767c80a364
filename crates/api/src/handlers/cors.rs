//! Cross-origin resource sharing headers.

use async_trait::async_trait;
use http::{Method, StatusCode};
use serde_json::Value;

use crate::error::{ConfigError, HandlerError};
use crate::exchange::{Exchange, Outcome};
use crate::handler::RequestHandler;
use crate::value::ValueExt;

/// Adds CORS headers and answers preflight requests.
///
/// Non-OPTIONS requests get the headers and pass through to the rest
/// of the chain. An OPTIONS preflight is answered with 204 directly,
/// so a CORS entry placed above a subtree makes the whole subtree
/// reachable from browsers.
pub struct CorsHandler {
    origin: String,
    methods: String,
    headers: String,
    max_age: u64,
    credentials: bool,
}

impl CorsHandler {
    pub fn from_config(_path: &str, config: &Value) -> Result<Self, ConfigError> {
        Ok(Self {
            origin: config.get_str_or("origin", "*").to_string(),
            methods: config.get_str_or("methods", "GET, POST, PUT, DELETE, OPTIONS").to_string(),
            headers: config.get_str_or("headers", "Content-Type, Authorization").to_string(),
            max_age: config.get_u64_or("max-age", 86400),
            credentials: config.get_bool_or("credentials", false),
        })
    }
}

#[async_trait]
impl RequestHandler for CorsHandler {
    async fn handle(&self, exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        exchange.add_header("access-control-allow-origin", &self.origin)?;
        exchange.add_header("access-control-allow-methods", &self.methods)?;
        exchange.add_header("access-control-allow-headers", &self.headers)?;
        exchange.add_header("access-control-max-age", &self.max_age.to_string())?;
        if self.credentials {
            exchange.add_header("access-control-allow-credentials", "true")?;
        }

        if exchange.method() == Method::OPTIONS {
            exchange.set_status(StatusCode::NO_CONTENT);
            return Ok(Outcome::Handled);
        }
        Ok(Outcome::Pass)
    }
}

//! Endpoints that serve compiled-in resources.

use async_trait::async_trait;
use http::{HeaderValue, StatusCode};
use serde_json::{json, Value};

use crate::collab::{guess_mime, ResourceSet};
use crate::error::HandlerError;
use crate::exchange::{Exchange, Outcome};
use crate::handler::RequestHandler;

/// Serves one named entry from a [`ResourceSet`].
///
/// Like the file endpoint but with the bytes baked into the process,
/// so these never touch the filesystem. A `path` argument captured by
/// the pattern selects a sibling entry under the configured name.
pub struct ResourceEndpoint {
    resources: ResourceSet,
    name: String,
}

impl ResourceEndpoint {
    pub fn new(resources: ResourceSet, name: &str) -> Self {
        Self { resources, name: name.to_string() }
    }
}

#[async_trait]
impl RequestHandler for ResourceEndpoint {
    async fn handle(&self, exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        let name = match exchange.arg("path").and_then(Value::as_str) {
            Some(relative) if !relative.is_empty() => format!("{}/{relative}", self.name),
            _ => self.name.clone(),
        };

        let Some(content) = self.resources.get(&name) else {
            exchange.reply_json(StatusCode::NOT_FOUND, &json!({"error": "not found"}))?;
            return Ok(Outcome::Handled);
        };

        let mime = guess_mime(&name);
        let content_type = HeaderValue::from_str(mime.as_ref())
            .map_err(|e| HandlerError::message(format!("unusable content type: {e}")))?;
        exchange.reply_bytes(StatusCode::OK, &content_type, content.clone());
        Ok(Outcome::Handled)
    }
}

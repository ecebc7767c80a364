//! Filesystem-backed endpoints.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderValue, StatusCode};
use serde_json::{json, Value};

use crate::collab::guess_mime;
use crate::error::HandlerError;
use crate::exchange::{Exchange, Outcome};
use crate::handler::RequestHandler;

/// Serves a configured path from disk.
///
/// When the matched pattern captured a `path` argument it selects a
/// file under the configured root; otherwise the root itself is served.
/// Missing files answer 404; anything escaping the root via `..` is
/// treated as missing rather than resolved.
pub struct FileEndpoint {
    root: PathBuf,
}

impl FileEndpoint {
    pub fn new(root: &str) -> Self {
        Self { root: PathBuf::from(root) }
    }

    fn not_found(exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        exchange.reply_json(StatusCode::NOT_FOUND, &json!({"error": "not found"}))?;
        Ok(Outcome::Handled)
    }
}

#[async_trait]
impl RequestHandler for FileEndpoint {
    async fn handle(&self, exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        let relative = exchange.arg("path").and_then(Value::as_str).unwrap_or("").to_string();
        if relative.split('/').any(|segment| segment == "..") {
            return Self::not_found(exchange);
        }

        let target = if relative.is_empty() { self.root.clone() } else { self.root.join(&relative) };
        match tokio::fs::read(&target).await {
            Ok(content) => {
                let mime = guess_mime(&target.to_string_lossy());
                let content_type = HeaderValue::from_str(mime.as_ref())
                    .map_err(|e| HandlerError::message(format!("unusable content type: {e}")))?;
                exchange.reply_bytes(StatusCode::OK, &content_type, Bytes::from(content));
                Ok(Outcome::Handled)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::not_found(exchange),
            Err(e) => Err(HandlerError::Io { source: e }),
        }
    }
}

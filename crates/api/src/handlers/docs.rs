//! Serves the documentation collected at compile time.

use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;

use crate::docs::DocsRegistry;
use crate::error::HandlerError;
use crate::exchange::{Exchange, Outcome};
use crate::handler::RequestHandler;

/// Replies with the frozen documentation snapshot as JSON.
pub struct DocsEndpoint {
    registry: Arc<DocsRegistry>,
}

impl DocsEndpoint {
    pub fn new(registry: Arc<DocsRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl RequestHandler for DocsEndpoint {
    async fn handle(&self, exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        let docs = self.registry.snapshot();
        let body = serde_json::to_value(docs.as_ref())?;
        exchange.reply_json(StatusCode::OK, &body)?;
        Ok(Outcome::Handled)
    }
}

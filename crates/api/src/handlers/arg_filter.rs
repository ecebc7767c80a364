//! Argument rewriting through an external filter program.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::collab::SubprocessPool;
use crate::error::HandlerError;
use crate::exchange::{Exchange, Outcome};
use crate::handler::{DynHandler, RequestHandler};

/// Pipes the argument map through a subprocess before the inner
/// handler sees it.
///
/// The filter program receives the accumulated arguments and returns a
/// replacement map; whatever it returns is what the wrapped handler
/// observes. A failing filter fails the exchange rather than exposing
/// unfiltered arguments.
pub struct ArgFilter {
    pool: Arc<dyn SubprocessPool>,
    program: String,
    inner: DynHandler,
}

impl ArgFilter {
    pub fn new(pool: Arc<dyn SubprocessPool>, program: &str, inner: DynHandler) -> Self {
        Self { pool, program: program.to_string(), inner }
    }
}

#[async_trait]
impl RequestHandler for ArgFilter {
    async fn handle(&self, exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        let filtered = self.pool.filter(&self.program, exchange.args()).await?;
        debug!(program = %self.program, args = filtered.len(), "argument filter applied");
        exchange.replace_args(filtered);
        self.inner.handle(exchange).await
    }
}

//! The request handler abstraction every compiled node implements.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::exchange::{Exchange, Outcome};

/// One node of a compiled handler tree.
///
/// Handlers are immutable once built and shared across requests, so
/// `handle` takes `&self`; all per-request state lives on the
/// [`Exchange`]. Returning [`Outcome::Pass`] declines the exchange and
/// lets a sibling try it, which is what makes handler groups composable.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, exchange: &mut Exchange) -> Result<Outcome, HandlerError>;
}

/// Shared, type-erased handler, the currency of the compiler.
pub type DynHandler = Arc<dyn RequestHandler>;

/// Adapts a synchronous closure into a [`RequestHandler`].
struct ClosureHandler<F> {
    f: F,
}

#[async_trait]
impl<F> RequestHandler for ClosureHandler<F>
where
    F: Fn(&mut Exchange) -> Result<Outcome, HandlerError> + Send + Sync,
{
    async fn handle(&self, exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        (self.f)(exchange)
    }
}

/// Wraps a closure as a shared handler.
pub fn handler_fn<F>(f: F) -> DynHandler
where
    F: Fn(&mut Exchange) -> Result<Outcome, HandlerError> + Send + Sync + 'static,
{
    Arc::new(ClosureHandler { f })
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{Request, StatusCode};

    use super::*;

    #[tokio::test]
    async fn closure_handlers_see_the_exchange() {
        let handler = handler_fn(|exchange| {
            exchange.reply_text(StatusCode::OK, "pong");
            Ok(Outcome::Handled)
        });

        let request = Request::builder().uri("/ping").body(Bytes::new()).unwrap();
        let mut exchange = Exchange::new(request);
        let outcome = handler.handle(&mut exchange).await.unwrap();

        assert!(outcome.is_handled());
        assert_eq!(exchange.into_response().body().as_ref(), b"pong");
    }
}

//! Structural handlers the compiler assembles trees from.
//!
//! Three combinators cover the whole tree shape: [`HandlerGroup`] runs
//! children in order until one handles the exchange, [`MethodMatcher`]
//! gates on the request method, and [`PatternMatcher`] gates on the URL
//! and contributes its captures to the argument map.

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::exchange::{Exchange, Outcome};
use crate::handler::{DynHandler, RequestHandler};
use crate::methods::MethodSet;
use crate::pattern::UrlPattern;

/// Ordered fallthrough over child handlers.
#[derive(Default)]
pub struct HandlerGroup {
    children: Vec<DynHandler>,
}

impl HandlerGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, child: DynHandler) {
        self.children.push(child);
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[async_trait]
impl RequestHandler for HandlerGroup {
    async fn handle(&self, exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        for child in &self.children {
            if child.handle(exchange).await?.is_handled() {
                return Ok(Outcome::Handled);
            }
        }
        Ok(Outcome::Pass)
    }
}

/// Runs the inner handler only for requests whose method is in the set.
pub struct MethodMatcher {
    methods: MethodSet,
    inner: DynHandler,
}

impl MethodMatcher {
    pub fn new(methods: MethodSet, inner: DynHandler) -> Self {
        Self { methods, inner }
    }
}

#[async_trait]
impl RequestHandler for MethodMatcher {
    async fn handle(&self, exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        if !self.methods.contains(exchange.method()) {
            return Ok(Outcome::Pass);
        }
        self.inner.handle(exchange).await
    }
}

/// Runs the inner handler only for matching URLs.
///
/// Pattern variables captured from the path are inserted into the
/// exchange's argument map before the inner handler runs, overriding
/// any same-named query or body arguments.
pub struct PatternMatcher {
    pattern: UrlPattern,
    inner: DynHandler,
}

impl PatternMatcher {
    pub fn new(pattern: UrlPattern, inner: DynHandler) -> Self {
        Self { pattern, inner }
    }
}

#[async_trait]
impl RequestHandler for PatternMatcher {
    async fn handle(&self, exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        let Some(captures) = self.pattern.matches(exchange.uri_path()) else {
            return Ok(Outcome::Pass);
        };
        for (name, value) in captures {
            exchange.insert_arg(&name, value);
        }
        self.inner.handle(exchange).await
    }
}

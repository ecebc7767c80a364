//! Declarative HTTP API compiler.
//!
//! This crate turns a JSON configuration document into an immutable
//! tree of composable request handlers, then serves that tree over the
//! connection layer in [`trellis_net`]. The document describes URL
//! patterns, methods, and endpoint behavior; the compiler checks the
//! whole description up front, so a tree that compiles cannot hit an
//! unbound reference or a missing collaborator at request time.
//!
//! ## Features
//!
//! - `${name}` reference resolution against variables, the document
//!   itself, and the environment, before anything is compiled
//! - URL pattern routing with `:name` captures that land in a uniform
//!   per-request argument map alongside query and body parameters
//! - method-gated endpoint chains with declared argument validation,
//!   defaults, and response header injection
//! - endpoints for bound native handlers, SQL queries, files, baked-in
//!   resources, redirects, CORS, OAuth2 login and sessions
//! - self-documentation collected at compile time and served back by a
//!   docs endpoint
//!
//! ## Example
//!
//! ```
//! use http::StatusCode;
//! use serde_json::json;
//! use trellis_api::compiler::ApiBuilder;
//! use trellis_api::exchange::Outcome;
//! use trellis_api::handler::handler_fn;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = json!({
//!         "version": "1.0.0",
//!         "api": {
//!             "/ping": {"GET": "pong"}
//!         }
//!     });
//!
//!     let api = ApiBuilder::new()
//!         .bind("pong", handler_fn(|exchange| {
//!             exchange.reply_text(StatusCode::OK, "pong");
//!             Ok(Outcome::Handled)
//!         }))?
//!         .compile(&config)?;
//!
//!     let request = http::Request::builder().uri("/ping").body(bytes::Bytes::new())?;
//!     let response = api.dispatch(request).await?;
//!     assert_eq!(response.body().as_ref(), b"pong");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`resolver`]: reference substitution pre-pass
//! - [`compiler`]: document walk producing the handler tree
//! - [`compose`]: groups and matchers the tree is assembled from
//! - [`handlers`]: the concrete endpoint implementations
//! - [`exchange`]: per-request state every handler mutates
//! - [`collab`]: database, subprocess, session and OAuth2 seams
//! - [`docs`]: compile-time documentation registry
//! - [`service`]: adapter onto `trellis_net` connections

pub mod collab;
pub mod compiler;
pub mod compose;
pub mod context;
pub mod docs;
pub mod error;
pub mod exchange;
pub mod handler;
pub mod handlers;
pub mod methods;
pub mod pattern;
pub mod resolver;
pub mod service;
pub mod value;
pub mod version;

//! An asynchronous HTTP/1.1 connection engine
//!
//! This crate provides the transport layer for building HTTP services and
//! clients on top of tokio. It manages connection lifecycle (connect,
//! accept, TLS upgrade, idle teardown) separately from protocol framing,
//! so the same connection machinery serves both directions.
//!
//! # Features
//!
//! - HTTP/1.1 request and response framing, including chunked transfer
//! - Connection lifecycle with process-unique ids and lifecycle events
//! - Idle TTL timers that tear a connection down in any protocol state
//! - TLS on both sides through rustls
//! - Keep-alive connections and the expect-continue mechanism
//! - One-shot outgoing requests with exactly-once completion callbacks
//! - Pluggable DNS resolution behind a trait
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use http::{Request, Response, StatusCode};
//! use http_body_util::Full;
//! use tokio::net::TcpListener;
//! use tracing::{error, info, warn};
//!
//! use trellis_net::connection::{Connection, HttpConnIn, Peer};
//! use trellis_net::handler::make_handler;
//!
//! #[tokio::main]
//! async fn main() {
//!     info!(port = 8080, "starting server");
//!     let listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(listener) => listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind failed");
//!             return;
//!         }
//!     };
//!
//!     let handler = Arc::new(make_handler(hello_world));
//!
//!     loop {
//!         let (stream, remote_addr) = match listener.accept().await {
//!             Ok(accepted) => accepted,
//!             Err(e) => {
//!                 warn!(cause = %e, "accept error");
//!                 continue;
//!             }
//!         };
//!
//!         let conn = Connection::accept(Peer::from_addr(remote_addr), stream, None);
//!         conn.set_ttl(Duration::from_secs(30));
//!         let handler = handler.clone();
//!
//!         tokio::spawn(async move {
//!             match HttpConnIn::accept(conn).await {
//!                 Ok(driver) => {
//!                     if let Err(e) = driver.serve(handler).await {
//!                         info!(cause = %e, "connection shut down with error");
//!                     }
//!                 }
//!                 Err(e) => error!(cause = %e, "connection setup failed"),
//!             }
//!         });
//!     }
//! }
//!
//! async fn hello_world(request: Request<Bytes>) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
//!     info!(path = request.uri().path(), "incoming request");
//!     let response = Response::builder().status(StatusCode::OK).body(Full::new(Bytes::from_static(b"Hello World!\r\n"))).unwrap();
//!     Ok(response)
//! }
//! ```
//!
//! # Architecture
//!
//! The crate splits into the following modules:
//!
//! - [`connection`]: Connection lifecycle plus the server and client drivers
//! - [`protocol`]: Protocol types and error surface
//! - [`codec`]: HTTP/1.1 encoding/decoding over tokio codecs
//! - [`handler`]: Request handler trait and utilities
//! - [`dns`]: Name resolution seam
//! - [`client`]: One-shot request client
//!
//! # Core Components
//!
//! ## Connection lifecycle
//!
//! [`connection::Connection`] owns one socket and its lifecycle state. The
//! protocol drivers, [`connection::HttpConnIn`] for the server side and
//! [`connection::HttpConnOut`] for the client side, take the transport out
//! of the connection and keep the connection for teardown control. Closing
//! is idempotent, observable through [`connection::ConnEvents`], and
//! triggered automatically by the idle TTL timer.
//!
//! ## Request processing
//!
//! Requests are processed through handler functions implementing the
//! [`handler::Handler`] trait, usually created from async functions with
//! [`handler::make_handler`]. Request bodies are buffered before dispatch,
//! so handlers always see complete bytes.
//!
//! ## Error handling
//!
//! Every failure surfaces through `Result`:
//!
//! - [`protocol::HttpError`]: top-level error type
//! - [`protocol::ConnectionError`]: transport and lifecycle failures
//! - [`protocol::ProtocolError`]: malformed inbound framing
//! - [`protocol::SendError`]: outbound write failures
//!
//! # Limitations
//!
//! - HTTP/1.1 only
//! - Heads are capped at 8KB and 64 headers
//! - Bodies are buffered with an 8MB cap in both directions

pub mod client;
pub mod codec;
pub mod connection;
pub mod dns;
pub mod handler;
pub mod protocol;

mod utils;

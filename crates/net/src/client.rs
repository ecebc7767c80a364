//! One-shot HTTP client.
//!
//! [`Client`] owns the pieces shared across requests: the resolver, an
//! optional TLS connector, an optional idle TTL and an optional local bind
//! address. Each [`OutgoingRequest`] runs on its own connection, and its
//! callback fires exactly once, with the buffered response or the first
//! error along the way. Connect failures, TLS failures and protocol
//! failures all arrive through the same callback.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::HOST;
use http::{HeaderValue, Request, Response, Uri};
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tracing::debug;

use crate::connection::{Connection, HttpConnOut, Peer, TlsConfig};
use crate::dns::{DnsResolver, Resolve};
use crate::protocol::{ConnectionError, HttpError};

/// A request paired with its completion callback.
pub struct OutgoingRequest {
    request: Request<Bytes>,
    on_response: Box<dyn FnOnce(Result<Response<Bytes>, HttpError>) + Send>,
}

impl OutgoingRequest {
    pub fn new<F>(request: Request<Bytes>, on_response: F) -> Self
    where
        F: FnOnce(Result<Response<Bytes>, HttpError>) + Send + 'static,
    {
        Self { request, on_response: Box::new(on_response) }
    }
}

impl fmt::Debug for OutgoingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingRequest").field("method", self.request.method()).field("uri", self.request.uri()).finish()
    }
}

/// Issues one-shot requests, each over a fresh connection.
#[derive(Clone)]
pub struct Client {
    resolver: Arc<dyn Resolve>,
    tls: Option<TlsConnector>,
    ttl: Option<Duration>,
    bind: Option<SocketAddr>,
}

impl Client {
    pub fn new() -> Self {
        Self { resolver: Arc::new(DnsResolver), tls: None, ttl: None, bind: None }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Enables `https` targets. Without a connector they fail through the
    /// callback.
    pub fn with_tls(mut self, connector: TlsConnector) -> Self {
        self.tls = Some(connector);
        self
    }

    /// Idle TTL armed on each connection, covering connect onwards.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Local address outbound sockets bind to.
    pub fn with_bind(mut self, addr: SocketAddr) -> Self {
        self.bind = Some(addr);
        self
    }

    /// Runs one request to completion and delivers the outcome through the
    /// request's callback, exactly once.
    pub async fn send(&self, outgoing: OutgoingRequest) {
        let OutgoingRequest { mut request, on_response } = outgoing;

        let (peer, tls_required) = match target_of(request.uri()) {
            Ok(target) => target,
            Err(e) => {
                on_response(Err(e.into()));
                return;
            }
        };

        if !request.headers().contains_key(HOST) {
            if let Ok(value) = HeaderValue::try_from(peer.to_string()) {
                request.headers_mut().insert(HOST, value);
            }
        }

        let mut conn = Connection::new();
        if tls_required {
            match self.tls_config(&peer) {
                Ok(tls) => {
                    if let Err(e) = conn.set_tls(tls) {
                        on_response(Err(e.into()));
                        return;
                    }
                }
                Err(e) => {
                    on_response(Err(e.into()));
                    return;
                }
            }
        }
        if let Some(ttl) = self.ttl {
            conn.set_ttl(ttl);
        }

        debug!(conn_id = conn.id(), method = %request.method(), uri = %request.uri(), "sending request");
        let mut driver = HttpConnOut::new(conn);
        if let Err(e) = driver.connect(self.resolver.as_ref(), peer, self.bind).await {
            on_response(Err(e));
            return;
        }
        driver.execute(request, on_response).await;
    }

    /// [`Client::send`] with the callback turned into an awaitable result.
    pub async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(OutgoingRequest::new(request, move |result| {
            let _ = tx.send(result);
        }))
        .await;
        rx.await.unwrap_or_else(|_| Err(ConnectionError::Closed.into()))
    }

    fn tls_config(&self, peer: &Peer) -> Result<TlsConfig, ConnectionError> {
        let connector = self
            .tls
            .clone()
            .ok_or_else(|| ConnectionError::tls(peer, std::io::Error::other("https target but no tls connector configured")))?;
        let server_name = ServerName::try_from(peer.host().to_string()).map_err(|e| ConnectionError::invalid_peer(e))?;
        Ok(TlsConfig::client(connector, server_name))
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("tls", &self.tls.is_some()).field("ttl", &self.ttl).field("bind", &self.bind).finish()
    }
}

fn target_of(uri: &Uri) -> Result<(Peer, bool), ConnectionError> {
    let host = uri.host().ok_or_else(|| ConnectionError::invalid_peer("request uri has no host"))?;
    let tls_required = match uri.scheme_str() {
        Some("https") => true,
        Some("http") | None => false,
        Some(other) => return Err(ConnectionError::invalid_peer(format!("unsupported scheme {other}"))),
    };
    let port = uri.port_u16().unwrap_or(if tls_required { 443 } else { 80 });
    Ok((Peer::new(host, port), tls_required))
}

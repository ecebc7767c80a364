//! Serving a compiled [`Api`] over HTTP connections.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};
use trellis_net::connection::{Connection, HttpConnIn, Peer, TlsConfig};
use trellis_net::handler::Handler;

use crate::compiler::Api;

/// Adapts a compiled API to the connection layer's handler contract.
///
/// Handler errors are a per-request condition: the request gets a bare
/// 500 and the connection keeps serving.
pub struct ApiService {
    api: Arc<Api>,
}

impl ApiService {
    pub fn new(api: Arc<Api>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Handler for ApiService {
    type RespBody = Full<Bytes>;
    type Error = Infallible;

    async fn call(&self, request: Request<Bytes>) -> Result<Response<Self::RespBody>, Self::Error> {
        match self.api.dispatch(request).await {
            Ok(response) => Ok(response.map(Full::new)),
            Err(e) => {
                error!(error = %e, "request handler failed");
                let mut response = Response::new(Full::new(Bytes::new()));
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                Ok(response)
            }
        }
    }
}

/// Accept loop binding a compiled API to a socket.
pub struct ApiServer {
    addr: SocketAddr,
    api: Arc<Api>,
    tls: Option<TlsAcceptor>,
    ttl: Option<Duration>,
}

impl ApiServer {
    pub fn new(addr: SocketAddr, api: Api) -> Self {
        Self { addr, api: Arc::new(api), tls: None, ttl: Some(Duration::from_secs(30)) }
    }

    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Idle timeout applied to each accepted connection.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Accepts connections until the listener fails.
    pub async fn run(self) -> io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %listener.local_addr()?, tls = self.tls.is_some(), "api server listening");
        let service = Arc::new(ApiService::new(self.api.clone()));

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let tls = self.tls.clone().map(TlsConfig::server);
            let conn = Connection::accept(Peer::from_addr(peer_addr), stream, tls);
            if let Some(ttl) = self.ttl {
                conn.set_ttl(ttl);
            }

            let service = service.clone();
            tokio::spawn(async move {
                match HttpConnIn::accept(conn).await {
                    Ok(driver) => {
                        if let Err(e) = driver.serve(service).await {
                            warn!(error = %e, "connection ended with error");
                        }
                    }
                    Err(e) => warn!(error = %e, "connection setup failed"),
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use http::Method;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use trellis_net::client::Client;

    use super::*;
    use crate::compiler::ApiBuilder;
    use crate::exchange::Outcome;
    use crate::handler::handler_fn;

    fn demo_api() -> Api {
        let config = json!({
            "version": "1.0.0",
            "api": {
                "/ping": {"GET": "pong"},
                "/fail": {"GET": "boom"}
            }
        });
        ApiBuilder::new()
            .bind(
                "pong",
                handler_fn(|exchange| {
                    exchange.reply_json(StatusCode::OK, &json!({"ping": "pong"}))?;
                    Ok(Outcome::Handled)
                }),
            )
            .unwrap()
            .bind(
                "boom",
                handler_fn(|_| Err(crate::error::HandlerError::message("deliberate"))),
            )
            .unwrap()
            .compile(&config)
            .unwrap()
    }

    async fn spawn_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = Arc::new(ApiService::new(Arc::new(demo_api())));
        tokio::spawn(async move {
            loop {
                let Ok((stream, peer_addr)) = listener.accept().await else { return };
                let conn = Connection::accept(Peer::from_addr(peer_addr), stream, None);
                let service = service.clone();
                tokio::spawn(async move {
                    if let Ok(driver) = HttpConnIn::accept(conn).await {
                        let _ = driver.serve(service).await;
                    }
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn serves_a_compiled_api_over_a_socket() {
        let addr = spawn_server().await;
        let client = Client::new();
        let request = Request::builder()
            .method(Method::GET)
            .uri(format!("http://{addr}/ping"))
            .body(Bytes::new())
            .unwrap();

        let response = client.fetch(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), br#"{"ping":"pong"}"#);
    }

    #[tokio::test]
    async fn handler_errors_become_500_and_do_not_kill_the_connection() {
        let addr = spawn_server().await;
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();

        stream
            .write_all(b"GET /fail HTTP/1.1\r\nhost: test\r\n\r\nGET /ping HTTP/1.1\r\nhost: test\r\n\r\n")
            .await
            .unwrap();

        let mut text = String::new();
        let mut buf = [0u8; 1024];
        while !text.contains(r#"{"ping":"pong"}"#) {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            text.push_str(&String::from_utf8_lossy(&buf[..n]));
        }

        assert!(text.starts_with("HTTP/1.1 500"));
        assert!(text.contains("HTTP/1.1 200"));
        assert!(text.contains(r#"{"ping":"pong"}"#));
    }

    #[tokio::test]
    async fn unknown_paths_get_the_api_404() {
        let addr = spawn_server().await;
        let client = Client::new();
        let request = Request::builder()
            .method(Method::GET)
            .uri(format!("http://{addr}/nope"))
            .body(Bytes::new())
            .unwrap();

        let response = client.fetch(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body().as_ref(), br#"{"error":"not found"}"#);
    }
}

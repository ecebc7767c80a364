//! Connection lifecycle management.
//!
//! [`Connection`] owns one TCP socket (optionally upgraded to TLS) and the
//! state around it: a process-unique id, the peer address, an idle timer
//! and an idempotent close path. The HTTP drivers layered on top take the
//! transport out of the connection and keep the connection itself for
//! lifecycle control:
//!
//! - [`HttpConnIn`]: server side, reads requests and writes responses
//! - [`HttpConnOut`]: client side, drives one outbound exchange
//!
//! Teardown is cooperative. Closing cancels a token the drivers select
//! against at every await point, so an idle timeout tears a connection
//! down regardless of which protocol state it is in. The timer task holds
//! only the token and a weak flag handle, never the socket, so a pending
//! timer cannot keep a connection alive.

mod http_in;
mod http_out;

pub use http_in::HttpConnIn;
pub use http_out::ExchangeState;
pub use http_out::HttpConnOut;

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::dns::Resolve;
use crate::protocol::ConnectionError;
use crate::utils::ensure;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// A remote endpoint as `host` plus `port`.
///
/// When the host is an address literal the resolver is skipped entirely
/// during [`Connection::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    host: String,
    port: u16,
    ip: Option<IpAddr>,
}

impl Peer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let ip = host.parse().ok();
        Self { host, port, ip }
    }

    pub fn from_addr(addr: SocketAddr) -> Self {
        Self { host: addr.ip().to_string(), port: addr.port(), ip: Some(addr.ip()) }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The literal address, when the host is one.
    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.ip.map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl FromStr for Peer {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // bracketed form for v6 literals: [::1]:443
        if let Some(rest) = s.strip_prefix('[') {
            let (host, port) = rest.rsplit_once("]:").ok_or_else(|| ConnectionError::invalid_peer(s))?;
            let port = port.parse().map_err(|_| ConnectionError::invalid_peer(s))?;
            return Ok(Self::new(host, port));
        }

        let (host, port) = s.rsplit_once(':').ok_or_else(|| ConnectionError::invalid_peer(format!("{s} is missing a port")))?;
        let port = port.parse().map_err(|_| ConnectionError::invalid_peer(s))?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            Some(IpAddr::V6(_)) => write!(f, "[{}]:{}", self.host, self.port),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// TLS configuration attached to a connection before its socket is armed.
///
/// The handshake itself belongs to rustls; the connection only decides
/// when to run it and which role to run it in.
#[derive(Clone)]
pub enum TlsConfig {
    Client { connector: TlsConnector, server_name: ServerName<'static> },
    Server { acceptor: TlsAcceptor },
}

impl TlsConfig {
    pub fn client(connector: TlsConnector, server_name: ServerName<'static>) -> Self {
        Self::Client { connector, server_name }
    }

    pub fn server(acceptor: TlsAcceptor) -> Self {
        Self::Server { acceptor }
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client { .. } => f.write_str("TlsConfig::Client"),
            Self::Server { .. } => f.write_str("TlsConfig::Server"),
        }
    }
}

/// The byte stream a connection owns: plain TCP or TLS on top of it.
#[derive(Debug)]
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::TlsStream<TcpStream>>),
}

impl AsyncRead for Transport {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Observer for connection lifecycle events.
///
/// The connection reports `timedout` and `closed` through this seam, each
/// at most once per connection.
pub trait ConnEvents: Send + Sync {
    fn event(&self, conn_id: u64, name: &str);
}

#[derive(Debug)]
struct Flags {
    closed: AtomicBool,
    timed_out: AtomicBool,
    ttl_gen: AtomicU64,
}

/// Cloneable teardown handle shared between a connection, its protocol
/// driver and its idle timer.
///
/// Holding a watch does not keep the socket alive; it only observes and
/// triggers teardown.
#[derive(Debug, Clone)]
pub struct ConnWatch {
    cancel: CancellationToken,
    flags: Arc<Flags>,
}

impl ConnWatch {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            flags: Arc::new(Flags { closed: AtomicBool::new(false), timed_out: AtomicBool::new(false), ttl_gen: AtomicU64::new(0) }),
        }
    }

    /// Resolves once the connection has been closed, from any task.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.flags.closed.load(Ordering::SeqCst)
    }

    pub fn timed_out(&self) -> bool {
        self.flags.timed_out.load(Ordering::SeqCst)
    }

    /// The error a driver reports when torn down through this watch.
    pub(crate) fn teardown_error(&self) -> ConnectionError {
        if self.timed_out() { ConnectionError::TimedOut } else { ConnectionError::Closed }
    }
}

fn mark_closed(id: u64, flags: &Flags, cancel: &CancellationToken, events: Option<&Arc<dyn ConnEvents>>) {
    if flags.closed.swap(true, Ordering::SeqCst) {
        return;
    }
    trace!(conn_id = id, "connection closed");
    if let Some(events) = events {
        events.event(id, "closed");
    }
    cancel.cancel();
}

/// One network connection, inbound or outbound.
///
/// A connection is built either by [`Connection::accept`] with an already
/// established socket, or by [`Connection::new`] followed by
/// [`Connection::connect`]. TLS state must be attached before the socket
/// is armed; [`Connection::set_tls`] rejects later attempts.
///
/// Closing is idempotent and safe from any task. Dropping an unclosed
/// connection closes it.
pub struct Connection {
    id: u64,
    peer: Option<Peer>,
    tls: Option<TlsConfig>,
    transport: Option<Transport>,
    watch: ConnWatch,
    events: Option<Arc<dyn ConnEvents>>,
}

impl Connection {
    /// Creates an unconnected connection for the outbound path.
    pub fn new() -> Self {
        Self { id: next_id(), peer: None, tls: None, transport: None, watch: ConnWatch::new(), events: None }
    }

    /// Wraps an accepted socket. Synchronous setup only; a configured TLS
    /// server handshake runs later through [`Connection::handshake`].
    pub fn accept(peer: Peer, stream: TcpStream, tls: Option<TlsConfig>) -> Self {
        let conn =
            Self { id: next_id(), peer: Some(peer), tls, transport: Some(Transport::Plain(stream)), watch: ConnWatch::new(), events: None };
        trace!(conn_id = conn.id, peer = %conn.peer.as_ref().map_or_else(String::new, Peer::to_string), "accepted connection");
        conn
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> Option<&Peer> {
        self.peer.as_ref()
    }

    pub fn watch(&self) -> ConnWatch {
        self.watch.clone()
    }

    pub fn set_events(&mut self, events: Arc<dyn ConnEvents>) {
        self.events = Some(events);
    }

    /// Attaches TLS state. Must happen before the socket is armed.
    pub fn set_tls(&mut self, tls: TlsConfig) -> Result<(), ConnectionError> {
        ensure!(self.transport.is_none(), ConnectionError::AlreadyConnected);
        self.tls = Some(tls);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.watch.is_closed()
    }

    pub fn timed_out(&self) -> bool {
        self.watch.timed_out()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some() && !self.is_closed()
    }

    /// Establishes the outbound socket.
    ///
    /// The resolver is consulted exactly once, and only when the peer host
    /// is not an address literal; a resolution failure reports before any
    /// connect attempt. After the socket turns writable the peer address
    /// is probed once more, so a connection reset in the same instant
    /// reports as a failure instead of a dead socket. A configured TLS
    /// client handshake runs as the final step.
    pub async fn connect(&mut self, resolver: &dyn Resolve, peer: Peer, bind: Option<SocketAddr>) -> Result<(), ConnectionError> {
        ensure!(self.transport.is_none(), ConnectionError::AlreadyConnected);
        ensure!(!self.is_closed(), ConnectionError::Closed);

        let ip = match peer.ip() {
            Some(ip) => ip,
            None => {
                let ips = resolver.resolve(peer.host()).await?;
                ips.first().copied().ok_or_else(|| ConnectionError::dns_empty(peer.host()))?
            }
        };

        let addr = SocketAddr::new(ip, peer.port());
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(|e| ConnectionError::connect(&peer, e))?;

        if let Some(bind_addr) = bind {
            socket.bind(bind_addr).map_err(|e| ConnectionError::bind(bind_addr, e))?;
        }

        let stream = socket.connect(addr).await.map_err(|e| ConnectionError::connect(&peer, e))?;
        stream.peer_addr().map_err(|e| ConnectionError::connect(&peer, e))?;

        debug!(conn_id = self.id, peer = %peer, "connected");
        self.peer = Some(peer);
        self.transport = Some(Transport::Plain(stream));
        self.handshake().await
    }

    /// Runs the configured TLS handshake, upgrading the plain transport.
    ///
    /// A no-op without TLS state or when the transport is already secured.
    pub async fn handshake(&mut self) -> Result<(), ConnectionError> {
        let Some(tls) = self.tls.clone() else {
            return Ok(());
        };

        match self.transport.take() {
            Some(Transport::Plain(stream)) => {
                let peer = self.peer.as_ref().map_or_else(|| "unknown".to_string(), Peer::to_string);
                let upgraded = match tls {
                    TlsConfig::Client { connector, server_name } => {
                        let tls_stream = connector.connect(server_name, stream).await.map_err(|e| ConnectionError::tls(&peer, e))?;
                        tokio_rustls::TlsStream::from(tls_stream)
                    }
                    TlsConfig::Server { acceptor } => {
                        let tls_stream = acceptor.accept(stream).await.map_err(|e| ConnectionError::tls(&peer, e))?;
                        tokio_rustls::TlsStream::from(tls_stream)
                    }
                };
                debug!(conn_id = self.id, "tls handshake complete");
                self.transport = Some(Transport::Tls(Box::new(upgraded)));
                Ok(())
            }
            Some(secured @ Transport::Tls(_)) => {
                self.transport = Some(secured);
                Ok(())
            }
            None => Err(ConnectionError::Closed),
        }
    }

    /// Arms the idle timer, superseding any previous one.
    ///
    /// When the timer fires and has not been superseded it records a
    /// `timedout` event and closes the connection, exactly once, whatever
    /// protocol state the connection is in. The timer task holds no owning
    /// reference: a connection that is dropped first makes the timer a
    /// no-op.
    pub fn set_ttl(&self, ttl: Duration) {
        let generation = self.watch.flags.ttl_gen.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = self.watch.cancel.clone();
        let flags = Arc::downgrade(&self.watch.flags);
        let events = self.events.clone();
        let id = self.id;

        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let Some(flags) = flags.upgrade() else {
                return;
            };
            if flags.closed.load(Ordering::SeqCst) || flags.ttl_gen.load(Ordering::SeqCst) != generation {
                return;
            }
            flags.timed_out.store(true, Ordering::SeqCst);
            warn!(conn_id = id, ttl_ms = ttl.as_millis() as u64, "idle ttl expired, closing connection");
            if let Some(events) = &events {
                events.event(id, "timedout");
            }
            mark_closed(id, &flags, &cancel, events.as_ref());
        });
    }

    /// Closes the connection. Idempotent and callable from any task.
    pub fn close(&self) {
        mark_closed(self.id, &self.watch.flags, &self.watch.cancel, self.events.as_ref());
    }

    /// Detaches the transport from lifecycle management.
    ///
    /// Dropping or closing the connection afterwards no longer touches the
    /// socket. The protocol drivers use this to take ownership of the byte
    /// stream.
    pub fn adopt(&mut self) -> Option<Transport> {
        self.transport.take()
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("connected", &self.transport.is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::net::TcpListener;

    use super::*;

    #[derive(Default)]
    struct RecordingEvents {
        names: Mutex<Vec<String>>,
    }

    impl RecordingEvents {
        fn names(&self) -> Vec<String> {
            self.names.lock().unwrap().clone()
        }
    }

    impl ConnEvents for RecordingEvents {
        fn event(&self, _conn_id: u64, name: &str) {
            self.names.lock().unwrap().push(name.to_string());
        }
    }

    struct StaticResolver {
        ips: Vec<IpAddr>,
        calls: AtomicUsize,
    }

    impl StaticResolver {
        fn new(ips: Vec<IpAddr>) -> Self {
            Self { ips, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl Resolve for StaticResolver {
        async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ConnectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.ips.is_empty() { Err(ConnectionError::dns(host, "no records")) } else { Ok(self.ips.clone()) }
        }
    }

    struct PanicResolver;

    #[async_trait]
    impl Resolve for PanicResolver {
        async fn resolve(&self, _host: &str) -> Result<Vec<IpAddr>, ConnectionError> {
            panic!("resolver must not be consulted for literal addresses");
        }
    }

    async fn accepted_pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer_addr) = listener.accept().await.unwrap();
        (Connection::accept(Peer::from_addr(peer_addr), server, None), client)
    }

    #[test]
    fn peer_parsing() {
        let peer: Peer = "example.com:8080".parse().unwrap();
        assert_eq!(peer.host(), "example.com");
        assert_eq!(peer.port(), 8080);
        assert_eq!(peer.ip(), None);

        let peer: Peer = "127.0.0.1:443".parse().unwrap();
        assert_eq!(peer.ip(), Some("127.0.0.1".parse().unwrap()));
        assert_eq!(peer.to_string(), "127.0.0.1:443");

        let peer: Peer = "[::1]:443".parse().unwrap();
        assert_eq!(peer.ip(), Some("::1".parse().unwrap()));
        assert_eq!(peer.to_string(), "[::1]:443");

        assert!("no-port".parse::<Peer>().is_err());
        assert!("host:notaport".parse::<Peer>().is_err());
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let first = Connection::new();
        let second = Connection::new();
        assert!(second.id() > first.id());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (mut conn, _client) = accepted_pair().await;
        let events = Arc::new(RecordingEvents::default());
        conn.set_events(events.clone());

        conn.close();
        conn.close();
        assert!(conn.is_closed());
        assert!(!conn.timed_out());

        drop(conn);
        assert_eq!(events.names(), vec!["closed"]);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_fires_once_and_closes() {
        let (mut conn, _client) = accepted_pair().await;
        let events = Arc::new(RecordingEvents::default());
        conn.set_events(events.clone());

        conn.set_ttl(Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(conn.is_closed());
        assert!(conn.timed_out());
        assert_eq!(events.names(), vec!["timedout", "closed"]);

        // dropping after the timeout adds nothing
        drop(conn);
        assert_eq!(events.names(), vec!["timedout", "closed"]);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_ttl_supersedes_previous_timer() {
        let (mut conn, _client) = accepted_pair().await;
        let events = Arc::new(RecordingEvents::default());
        conn.set_events(events.clone());

        conn.set_ttl(Duration::from_millis(50));
        conn.set_ttl(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!conn.is_closed());
        assert!(events.names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_after_drop_is_a_noop() {
        let (conn, _client) = accepted_pair().await;
        conn.set_ttl(Duration::from_millis(50));
        drop(conn);
        // timer fires against a gone connection
        tokio::time::sleep(Duration::from_millis(120)).await;
    }

    #[tokio::test]
    async fn connect_literal_ip_skips_resolver() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut conn = Connection::new();
        conn.connect(&PanicResolver, Peer::from_addr(addr), None).await.unwrap();

        assert!(conn.is_connected());
        assert_eq!(conn.peer().map(Peer::port), Some(addr.port()));
    }

    #[tokio::test]
    async fn connect_resolver_failure_attempts_no_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let resolver = StaticResolver::new(Vec::new());

        let mut conn = Connection::new();
        let result = conn.connect(&resolver, Peer::new("db.internal", 5432), None).await;

        assert!(matches!(result, Err(ConnectionError::Dns { .. })));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert!(!conn.is_connected());

        // nothing ever reached the wire
        let accepted = tokio::time::timeout(Duration::from_millis(50), listener.accept()).await;
        assert!(accepted.is_err());
    }

    #[tokio::test]
    async fn connect_via_resolver() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let resolver = StaticResolver::new(vec![addr.ip()]);

        let mut conn = Connection::new();
        conn.connect(&resolver, Peer::new("svc.local", addr.port()), None).await.unwrap();

        assert!(conn.is_connected());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        let (_accepted, _) = listener.accept().await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused_is_reported() {
        // bind then drop to get a port with nothing listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut conn = Connection::new();
        let result = conn.connect(&PanicResolver, Peer::from_addr(addr), None).await;
        assert!(matches!(result, Err(ConnectionError::Connect { .. })));
    }

    #[tokio::test]
    async fn connect_twice_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut conn = Connection::new();
        conn.connect(&PanicResolver, Peer::from_addr(addr), None).await.unwrap();
        let result = conn.connect(&PanicResolver, Peer::from_addr(addr), None).await;
        assert!(matches!(result, Err(ConnectionError::AlreadyConnected)));
    }

    #[tokio::test]
    async fn adopt_detaches_transport() {
        let (mut conn, _client) = accepted_pair().await;

        assert!(conn.adopt().is_some());
        assert!(conn.adopt().is_none());
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn tls_attach_after_socket_is_rejected() {
        let (mut conn, _client) = accepted_pair().await;

        let config = tokio_rustls::rustls::ClientConfig::builder()
            .with_root_certificates(tokio_rustls::rustls::RootCertStore::empty())
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from("example.com").unwrap();

        assert!(matches!(conn.set_tls(TlsConfig::client(connector, server_name)), Err(ConnectionError::AlreadyConnected)));
    }
}

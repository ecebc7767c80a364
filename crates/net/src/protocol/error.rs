use std::io;
use thiserror::Error;

/// Umbrella error returned by the connection drivers.
///
/// Unions the three failure domains: transport ([`ConnectionError`]), inbound
/// framing ([`ProtocolError`]) and outbound writing ([`SendError`]). Every
/// failure surfaces through a `Result`; nothing in this crate panics across
/// task boundaries.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connection error: {source}")]
    Connection {
        #[from]
        source: ConnectionError,
    },

    #[error("protocol error: {source}")]
    Protocol {
        #[from]
        source: ProtocolError,
    },

    #[error("send error: {source}")]
    Send {
        #[from]
        source: SendError,
    },
}

/// Transport-level failures: DNS, connect, TLS, teardown.
///
/// These terminate a single connection and are reported through completion
/// results. Sibling connections are unaffected.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("dns resolution failed for {host}: {reason}")]
    Dns { host: String, reason: String },

    #[error("no address found for {host}")]
    DnsEmpty { host: String },

    #[error("bind to {addr} failed: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("connect to {peer} failed: {source}")]
    Connect { peer: String, source: io::Error },

    #[error("tls handshake with {peer} failed: {source}")]
    Tls { peer: String, source: io::Error },

    #[error("connection already connected")]
    AlreadyConnected,

    #[error("connection closed")]
    Closed,

    #[error("connection timed out")]
    TimedOut,

    #[error("invalid peer address: {reason}")]
    InvalidPeer { reason: String },
}

impl ConnectionError {
    pub fn dns<S: ToString>(host: &str, reason: S) -> Self {
        Self::Dns { host: host.to_string(), reason: reason.to_string() }
    }

    pub fn dns_empty(host: &str) -> Self {
        Self::DnsEmpty { host: host.to_string() }
    }

    pub fn bind<A: ToString>(addr: A, source: io::Error) -> Self {
        Self::Bind { addr: addr.to_string(), source }
    }

    pub fn connect<P: ToString>(peer: P, source: io::Error) -> Self {
        Self::Connect { peer: peer.to_string(), source }
    }

    pub fn tls<P: ToString>(peer: P, source: io::Error) -> Self {
        Self::Tls { peer: peer.to_string(), source }
    }

    pub fn invalid_peer<S: ToString>(reason: S) -> Self {
        Self::InvalidPeer { reason: reason.to_string() }
    }
}

/// Malformed inbound framing.
///
/// Raised by the decoders when a peer violates the HTTP/1.1 grammar or one
/// of the configured limits. A protocol error terminates the affected
/// connection only.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("message head is {got} bytes, over the {limit} byte cap")]
    TooLargeHeader { got: usize, limit: usize },

    #[error("message carries more than {limit} headers")]
    TooManyHeaders { limit: usize },

    #[error("malformed header: {reason}")]
    InvalidHeader { reason: String },

    #[error("unsupported http version {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("unrecognized request method")]
    InvalidMethod,

    #[error("malformed request target")]
    InvalidUri,

    #[error("status code {0} is out of range")]
    InvalidStatus(u16),

    #[error("unusable content-length: {reason}")]
    InvalidContentLength { reason: String },

    #[error("broken chunked framing: {reason}")]
    InvalidChunk { reason: String },

    #[error("body larger than the {limit} byte cap")]
    BodyTooLarge { limit: usize },

    #[error("unexpected message: {reason}")]
    UnexpectedMessage { reason: String },

    #[error("read failed: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ProtocolError {
    pub fn too_large_header(got: usize, limit: usize) -> Self {
        Self::TooLargeHeader { got, limit }
    }

    pub fn too_many_headers(limit: usize) -> Self {
        Self::TooManyHeaders { limit }
    }

    pub fn invalid_header<S: ToString>(reason: S) -> Self {
        Self::InvalidHeader { reason: reason.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(reason: S) -> Self {
        Self::InvalidContentLength { reason: reason.to_string() }
    }

    pub fn invalid_chunk<S: ToString>(reason: S) -> Self {
        Self::InvalidChunk { reason: reason.to_string() }
    }

    pub fn body_too_large(limit: usize) -> Self {
        Self::BodyTooLarge { limit }
    }

    pub fn unexpected_message<S: ToString>(reason: S) -> Self {
        Self::UnexpectedMessage { reason: reason.to_string() }
    }

    pub fn io<E: Into<io::Error>>(source: E) -> Self {
        Self::Io { source: source.into() }
    }
}

/// Outbound write failures.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("unsendable body: {reason}")]
    InvalidBody { reason: String },

    #[error("write failed: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(reason: S) -> Self {
        Self::InvalidBody { reason: reason.to_string() }
    }

    pub fn io<E: Into<io::Error>>(source: E) -> Self {
        Self::Io { source: source.into() }
    }
}

//! Client-side HTTP/1.1 exchange driver.
//!
//! [`HttpConnOut`] drives exactly one outbound request over a connection
//! through an explicit state machine: connect, write the request, read the
//! response head, read the response body, dispatch. Operations invoked
//! outside their state are rejected, and any failure moves the exchange
//! into the absorbing `Failed` state and closes the connection. Completing
//! normally also closes the connection; the driver is strictly one-shot.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use http::{Method, Request, Response};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{error, trace};

use crate::codec::{RequestEncoder, ResponseDecoder};
use crate::connection::http_in::MAX_BODY_BYTES;
use crate::connection::{ConnWatch, Connection, Peer, Transport};
use crate::dns::Resolve;
use crate::protocol::{BodyFrame, BodyFraming, ConnectionError, HttpError, Message, ProtocolError, RequestHead, ResponseHead};

/// Where an outbound exchange currently stands.
///
/// `Complete` and `Failed` are terminal; once either is reached the state
/// no longer changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Connecting,
    WritingRequest,
    ReadingHeader,
    ReadingBody,
    Dispatching,
    Complete,
    Failed,
}

impl ExchangeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

struct ConnIo<S> {
    framed_read: FramedRead<ReadHalf<S>, ResponseDecoder>,
    framed_write: FramedWrite<WriteHalf<S>, RequestEncoder>,
}

/// Drives one outbound request and its response.
pub struct HttpConnOut<S = Transport> {
    conn: Connection,
    watch: ConnWatch,
    io: Option<ConnIo<S>>,
    state: ExchangeState,
}

impl HttpConnOut<Transport> {
    /// Wraps an unconnected connection. The exchange starts in
    /// `Connecting`.
    pub fn new(conn: Connection) -> Self {
        let watch = conn.watch();
        Self { conn, watch, io: None, state: ExchangeState::Connecting }
    }

    /// Establishes the socket and moves the exchange to `WritingRequest`.
    pub async fn connect(&mut self, resolver: &dyn Resolve, peer: Peer, bind: Option<SocketAddr>) -> Result<(), HttpError> {
        let result = self.do_connect(resolver, peer, bind).await;
        self.seal(result)
    }

    async fn do_connect(&mut self, resolver: &dyn Resolve, peer: Peer, bind: Option<SocketAddr>) -> Result<(), HttpError> {
        self.expect_state(ExchangeState::Connecting)?;
        self.conn.connect(resolver, peer, bind).await?;
        let transport = self.conn.adopt().ok_or(ConnectionError::Closed)?;
        let (reader, writer) = tokio::io::split(transport);
        self.io = Some(ConnIo {
            framed_read: FramedRead::new(reader, ResponseDecoder::new()),
            framed_write: FramedWrite::new(writer, RequestEncoder::new()),
        });
        self.advance(ExchangeState::WritingRequest);
        Ok(())
    }
}

impl<S> HttpConnOut<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    /// Builds a driver over an already established byte stream, starting in
    /// `WritingRequest`.
    pub fn from_stream(conn: Connection, stream: S) -> Self {
        let watch = conn.watch();
        let (reader, writer) = tokio::io::split(stream);
        Self {
            conn,
            watch,
            io: Some(ConnIo {
                framed_read: FramedRead::new(reader, ResponseDecoder::new()),
                framed_write: FramedWrite::new(writer, RequestEncoder::new()),
            }),
            state: ExchangeState::WritingRequest,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn set_ttl(&self, ttl: Duration) {
        self.conn.set_ttl(ttl);
    }

    /// Runs the whole exchange and delivers the outcome to `on_response`.
    ///
    /// The callback is invoked exactly once, with the buffered response or
    /// the first error. The connection is closed afterwards either way.
    pub async fn execute<F>(&mut self, request: Request<Bytes>, on_response: F)
    where
        F: FnOnce(Result<Response<Bytes>, HttpError>) + Send,
    {
        let result = self.run(request).await;
        let succeeded = result.is_ok();
        on_response(result);
        if succeeded {
            self.advance(ExchangeState::Complete);
            self.conn.close();
        }
    }

    async fn run(&mut self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
        let (parts, body) = request.into_parts();
        let head = RequestHead::from(parts);
        let framing = if body.is_empty() { BodyFraming::Empty } else { BodyFraming::Length(body.len() as u64) };

        self.make_request(head, framing).await?;
        self.write_request(body, true).await?;
        let head = self.read_response_head().await?;
        let body = self.read_response_body().await?;
        Ok(head.map(|()| body))
    }

    /// Starts the exchange by encoding the request head.
    pub async fn make_request(&mut self, head: RequestHead, framing: BodyFraming) -> Result<(), HttpError> {
        let result = self.do_make_request(head, framing).await;
        self.seal(result)
    }

    async fn do_make_request(&mut self, head: RequestHead, framing: BodyFraming) -> Result<(), HttpError> {
        self.expect_state(ExchangeState::WritingRequest)?;
        let Some(io) = self.io.as_mut() else {
            return Err(ConnectionError::Closed.into());
        };

        // the response to a HEAD carries framing headers but no body
        if head.method() == Method::HEAD {
            io.framed_read.decoder_mut().set_head_request(true);
        }

        trace!(conn_id = self.conn.id(), method = %head.method(), uri = %head.uri(), "outgoing request");
        io.framed_write.feed(Message::<_, Bytes>::Head((head, framing))).await?;
        Ok(())
    }

    /// Appends request body bytes; `last` finishes the body and flushes.
    pub async fn write_request(&mut self, chunk: Bytes, last: bool) -> Result<(), HttpError> {
        let result = self.do_write_request(chunk, last).await;
        self.seal(result)
    }

    async fn do_write_request(&mut self, chunk: Bytes, last: bool) -> Result<(), HttpError> {
        self.expect_state(ExchangeState::WritingRequest)?;
        let Some(io) = self.io.as_mut() else {
            return Err(ConnectionError::Closed.into());
        };

        if !chunk.is_empty() {
            io.framed_write.feed(Message::Payload(BodyFrame::Chunk(chunk))).await?;
        }
        if last {
            let eof = Message::<_, Bytes>::Payload(BodyFrame::Eof);
            tokio::select! {
                biased;
                () = self.watch.cancelled() => return Err(self.watch.teardown_error().into()),
                result = io.framed_write.send(eof) => result?,
            }
            self.advance(ExchangeState::ReadingHeader);
        }
        Ok(())
    }

    /// Reads the response head, moving the exchange to `ReadingBody`.
    pub async fn read_response_head(&mut self) -> Result<ResponseHead, HttpError> {
        let result = self.do_read_response_head().await;
        self.seal(result)
    }

    async fn do_read_response_head(&mut self) -> Result<ResponseHead, HttpError> {
        self.expect_state(ExchangeState::ReadingHeader)?;
        let Some(io) = self.io.as_mut() else {
            return Err(ConnectionError::Closed.into());
        };

        let item = tokio::select! {
            biased;
            () = self.watch.cancelled() => return Err(self.watch.teardown_error().into()),
            item = io.framed_read.next() => item,
        };

        match item {
            Some(Ok(Message::Head((head, _)))) => {
                trace!(conn_id = self.conn.id(), status = %head.status(), "response head");
                self.advance(ExchangeState::ReadingBody);
                Ok(head)
            }
            Some(Ok(Message::Payload(_))) => Err(ProtocolError::unexpected_message("payload frame before response head").into()),
            Some(Err(e)) => Err(e.into()),
            None => Err(ProtocolError::io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "closed before response head")).into()),
        }
    }

    /// Buffers the response body, moving the exchange to `Dispatching`.
    pub async fn read_response_body(&mut self) -> Result<Bytes, HttpError> {
        let result = self.do_read_response_body().await;
        self.seal(result)
    }

    async fn do_read_response_body(&mut self) -> Result<Bytes, HttpError> {
        self.expect_state(ExchangeState::ReadingBody)?;
        let Some(io) = self.io.as_mut() else {
            return Err(ConnectionError::Closed.into());
        };

        let mut buf = BytesMut::new();
        let body = loop {
            let item = tokio::select! {
                biased;
                () = self.watch.cancelled() => return Err(self.watch.teardown_error().into()),
                item = io.framed_read.next() => item,
            };

            match item {
                Some(Ok(Message::Payload(BodyFrame::Chunk(data)))) => {
                    if buf.len() + data.len() > MAX_BODY_BYTES {
                        return Err(ProtocolError::body_too_large(MAX_BODY_BYTES).into());
                    }
                    buf.extend_from_slice(&data);
                }
                Some(Ok(Message::Payload(BodyFrame::Eof))) => break buf.freeze(),
                Some(Ok(Message::Head(_))) => {
                    return Err(ProtocolError::unexpected_message("head frame inside a response body").into());
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(ProtocolError::io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "closed mid body")).into());
                }
            }
        };

        self.advance(ExchangeState::Dispatching);
        Ok(body)
    }

    fn expect_state(&self, want: ExchangeState) -> Result<(), HttpError> {
        if self.state == want {
            Ok(())
        } else {
            Err(ProtocolError::unexpected_message(format!("operation requires {want:?}, exchange is {:?}", self.state)).into())
        }
    }

    fn advance(&mut self, next: ExchangeState) {
        if self.state.is_terminal() {
            return;
        }
        trace!(conn_id = self.conn.id(), from = ?self.state, to = ?next, "exchange state");
        self.state = next;
    }

    /// Routes any failure through the absorbing `Failed` state.
    fn seal<T>(&mut self, result: Result<T, HttpError>) -> Result<T, HttpError> {
        if let Err(e) = &result {
            error!(conn_id = self.conn.id(), state = ?self.state, cause = %e, "exchange failed");
            self.advance(ExchangeState::Failed);
            self.conn.close();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;

    async fn canned_server(mut server: DuplexStream, response: &'static [u8]) {
        let mut seen = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = server.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending a request");
            seen.extend_from_slice(&chunk[..n]);
            if seen.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        server.write_all(response).await.unwrap();
    }

    fn driver() -> (HttpConnOut<DuplexStream>, DuplexStream) {
        let (client, server) = tokio::io::duplex(16 * 1024);
        (HttpConnOut::from_stream(Connection::new(), client), server)
    }

    #[tokio::test]
    async fn execute_delivers_response_exactly_once() {
        let (mut out, server) = driver();
        tokio::spawn(canned_server(server, b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok"));

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let request = Request::builder().method(Method::GET).uri("/ping").header("host", "a").body(Bytes::new()).unwrap();

        out.execute(request, move |result| {
            seen.fetch_add(1, Ordering::SeqCst);
            let response = result.unwrap();
            assert_eq!(response.status(), http::StatusCode::OK);
            assert_eq!(response.body().as_ref(), b"ok");
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.state(), ExchangeState::Complete);
        assert!(out.conn().is_closed());
    }

    #[tokio::test]
    async fn granular_operations_walk_the_states() {
        let (mut out, server) = driver();
        tokio::spawn(canned_server(server, b"HTTP/1.1 201 Created\r\ncontent-length: 4\r\n\r\ndone"));

        assert_eq!(out.state(), ExchangeState::WritingRequest);

        let request = Request::builder().method(Method::POST).uri("/things").header("host", "a").body(()).unwrap();
        out.make_request(RequestHead::from(request), BodyFraming::Length(3)).await.unwrap();
        assert_eq!(out.state(), ExchangeState::WritingRequest);

        out.write_request(Bytes::from_static(b"abc"), true).await.unwrap();
        assert_eq!(out.state(), ExchangeState::ReadingHeader);

        let head = out.read_response_head().await.unwrap();
        assert_eq!(head.status(), http::StatusCode::CREATED);
        assert_eq!(out.state(), ExchangeState::ReadingBody);

        let body = out.read_response_body().await.unwrap();
        assert_eq!(body.as_ref(), b"done");
        assert_eq!(out.state(), ExchangeState::Dispatching);
    }

    #[tokio::test]
    async fn peer_closing_fails_the_exchange() {
        let (mut out, server) = driver();
        drop(server);

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let request = Request::builder().method(Method::GET).uri("/gone").header("host", "a").body(Bytes::new()).unwrap();

        out.execute(request, move |result| {
            seen.fetch_add(1, Ordering::SeqCst);
            assert!(result.is_err());
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.state(), ExchangeState::Failed);
        assert!(out.conn().is_closed());
    }

    #[tokio::test]
    async fn failed_state_absorbs_later_operations() {
        let (mut out, server) = driver();
        drop(server);

        let request = Request::builder().method(Method::GET).uri("/x").header("host", "a").body(Bytes::new()).unwrap();
        out.execute(request, |_| {}).await;
        assert_eq!(out.state(), ExchangeState::Failed);

        let retry = Request::builder().method(Method::GET).uri("/x").header("host", "a").body(()).unwrap();
        let result = out.make_request(RequestHead::from(retry), BodyFraming::Empty).await;
        assert!(result.is_err());
        assert_eq!(out.state(), ExchangeState::Failed);
    }

    #[tokio::test]
    async fn out_of_order_operation_is_rejected() {
        let (mut out, _server) = driver();

        let result = out.read_response_head().await;
        assert!(matches!(result, Err(HttpError::Protocol { source: ProtocolError::UnexpectedMessage { .. } })));
        assert_eq!(out.state(), ExchangeState::Failed);
    }

    #[tokio::test]
    async fn head_request_expects_bodyless_response() {
        let (mut out, server) = driver();
        tokio::spawn(canned_server(server, b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\n"));

        let request = Request::builder().method(Method::HEAD).uri("/f").header("host", "a").body(Bytes::new()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        out.execute(request, move |result| {
            seen.fetch_add(1, Ordering::SeqCst);
            let response = result.unwrap();
            assert_eq!(response.headers().get("content-length").unwrap(), "5");
            assert!(response.body().is_empty());
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.state(), ExchangeState::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_during_read_fails_the_exchange() {
        let (mut out, _server) = driver();
        out.set_ttl(Duration::from_millis(50));

        let request = Request::builder().method(Method::GET).uri("/slow").header("host", "a").body(()).unwrap();
        out.make_request(RequestHead::from(request), BodyFraming::Empty).await.unwrap();
        out.write_request(Bytes::new(), true).await.unwrap();

        // the peer never answers; the idle timer has to break the read
        let result = out.read_response_head().await;
        assert!(matches!(result, Err(HttpError::Connection { source: ConnectionError::TimedOut })));
        assert_eq!(out.state(), ExchangeState::Failed);
    }
}

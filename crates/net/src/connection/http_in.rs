//! Server-side HTTP/1.1 connection driver.
//!
//! [`HttpConnIn`] reads request messages off a connection, buffers each
//! request body, dispatches the complete request to a [`Handler`] and
//! writes the response back, honoring keep-alive. The driver selects
//! against the connection watch at every await point, so closing the
//! connection (idle timeout included) unblocks it in any protocol state.

use std::error::Error;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use http::header::{CONNECTION, CONTENT_LENGTH, EXPECT};
use http::{HeaderValue, Method, Response, StatusCode, Version};
use http_body::Body;
use http_body_util::BodyExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, trace, warn};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::connection::{ConnWatch, Connection, Transport};
use crate::handler::Handler;
use crate::protocol::{BodyFrame, BodyFraming, ConnectionError, HttpError, Message, ProtocolError, RequestHead, ResponseHead, SendError};

/// Upper bound on a buffered request body.
pub(crate) const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Drives the server side of one connection until the peer leaves, the
/// exchange requires closing, or the connection is torn down.
pub struct HttpConnIn<S = Transport> {
    conn: Connection,
    watch: ConnWatch,
    framed_read: FramedRead<ReadHalf<S>, RequestDecoder>,
    framed_write: FramedWrite<WriteHalf<S>, ResponseEncoder>,
}

impl HttpConnIn<Transport> {
    /// Finishes connection setup for an accepted socket and takes over its
    /// transport. Runs the TLS handshake when one is configured.
    pub async fn accept(mut conn: Connection) -> Result<Self, ConnectionError> {
        conn.handshake().await?;
        let transport = conn.adopt().ok_or(ConnectionError::Closed)?;
        Ok(Self::from_stream(conn, transport))
    }
}

impl<S> HttpConnIn<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    /// Builds a driver over an arbitrary byte stream, with `conn` kept for
    /// lifecycle control only.
    pub fn from_stream(conn: Connection, stream: S) -> Self {
        let watch = conn.watch();
        let (reader, writer) = tokio::io::split(stream);
        Self {
            conn,
            watch,
            framed_read: FramedRead::new(reader, RequestDecoder::new()),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
        }
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Serves requests until the peer disconnects, an exchange asks for the
    /// connection to close, or teardown cancels the driver.
    pub async fn serve<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler,
        <H::RespBody as Body>::Data: Send,
        <H::RespBody as Body>::Error: Into<Box<dyn Error + Send + Sync>>,
    {
        loop {
            let next = tokio::select! {
                biased;
                () = self.watch.cancelled() => {
                    debug!(conn_id = self.conn.id(), "connection torn down while serving");
                    return Err(self.watch.teardown_error().into());
                }
                next = self.framed_read.next() => next,
            };

            match next {
                Some(Ok(Message::Head((head, framing)))) => {
                    let keep_alive = self.handle_request(head, framing, &handler).await?;
                    if !keep_alive {
                        self.conn.close();
                        return Ok(());
                    }
                }
                Some(Ok(Message::Payload(_))) => {
                    let e = ProtocolError::unexpected_message("payload frame outside a request");
                    self.conn.close();
                    return Err(e.into());
                }
                Some(Err(e)) => {
                    warn!(conn_id = self.conn.id(), cause = %e, "malformed request, closing connection");
                    let _ = self.write_response(build_error_response(error_status(&e)), false, false).await;
                    self.conn.close();
                    return Err(e.into());
                }
                None => {
                    debug!(conn_id = self.conn.id(), "peer closed connection");
                    self.conn.close();
                    return Ok(());
                }
            }
        }
    }

    /// Runs one exchange. Returns whether the connection stays open.
    async fn handle_request<H>(&mut self, head: RequestHead, framing: BodyFraming, handler: &Arc<H>) -> Result<bool, HttpError>
    where
        H: Handler,
        <H::RespBody as Body>::Data: Send,
        <H::RespBody as Body>::Error: Into<Box<dyn Error + Send + Sync>>,
    {
        trace!(conn_id = self.conn.id(), method = %head.method(), uri = %head.uri(), "request head");

        let is_head = head.method() == Method::HEAD;
        let keep_alive = wants_keep_alive(&head);

        if let BodyFraming::Length(n) = framing {
            if n as usize > MAX_BODY_BYTES {
                let e = ProtocolError::body_too_large(MAX_BODY_BYTES);
                warn!(conn_id = self.conn.id(), declared = n, "request body over limit");
                let _ = self.write_response(build_error_response(StatusCode::PAYLOAD_TOO_LARGE), is_head, false).await;
                self.conn.close();
                return Err(e.into());
            }
        }

        // the client may be waiting for permission before it sends the body
        if let Some(value) = head.headers().get(EXPECT) {
            if value.as_bytes().starts_with(b"100-") {
                let writer = self.framed_write.get_mut();
                writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.map_err(SendError::io)?;
                writer.flush().await.map_err(SendError::io)?;
                trace!(conn_id = self.conn.id(), "sent continue response");
            }
        }

        let body = match self.read_body().await {
            Ok(body) => body,
            Err(e) => {
                if let HttpError::Protocol { source } = &e {
                    let _ = self.write_response(build_error_response(error_status(source)), is_head, false).await;
                }
                self.conn.close();
                return Err(e);
            }
        };

        let request = head.body(body);
        let response_result = tokio::select! {
            biased;
            () = self.watch.cancelled() => return Err(self.watch.teardown_error().into()),
            result = handler.call(request) => result,
        };

        let response = match response_result {
            Ok(response) => {
                let (parts, body) = response.into_parts();
                match body.collect().await {
                    Ok(collected) => Response::from_parts(parts, collected.to_bytes()),
                    Err(e) => {
                        let cause: Box<dyn Error + Send + Sync> = e.into();
                        error!(conn_id = self.conn.id(), cause = %cause, "response body failed");
                        build_error_response(StatusCode::INTERNAL_SERVER_ERROR)
                    }
                }
            }
            Err(e) => {
                let cause: Box<dyn Error + Send + Sync> = e.into();
                error!(conn_id = self.conn.id(), cause = %cause, "request handler failed");
                build_error_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        };

        self.write_response(response, is_head, keep_alive).await?;
        Ok(keep_alive)
    }

    /// Buffers the request body the decoder is currently framing.
    async fn read_body(&mut self) -> Result<Bytes, HttpError> {
        let mut buf = BytesMut::new();
        loop {
            let item = tokio::select! {
                biased;
                () = self.watch.cancelled() => return Err(self.watch.teardown_error().into()),
                item = self.framed_read.next() => item,
            };

            match item {
                Some(Ok(Message::Payload(BodyFrame::Chunk(data)))) => {
                    if buf.len() + data.len() > MAX_BODY_BYTES {
                        return Err(ProtocolError::body_too_large(MAX_BODY_BYTES).into());
                    }
                    buf.extend_from_slice(&data);
                }
                Some(Ok(Message::Payload(BodyFrame::Eof))) => return Ok(buf.freeze()),
                Some(Ok(Message::Head(_))) => {
                    return Err(ProtocolError::unexpected_message("head frame inside a request body").into());
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(ProtocolError::io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "closed mid body")).into());
                }
            }
        }
    }

    async fn write_response(&mut self, mut response: Response<Bytes>, is_head: bool, keep_alive: bool) -> Result<(), HttpError> {
        if !keep_alive {
            response.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
        }

        let (mut parts, body) = response.into_parts();
        let framing = if is_head {
            // advertise the length without sending the entity
            if !body.is_empty() {
                parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len() as u64));
            }
            BodyFraming::Empty
        } else if body.is_empty() {
            BodyFraming::Empty
        } else {
            BodyFraming::Length(body.len() as u64)
        };

        let head = ResponseHead::from_parts(parts, ());
        self.framed_write.feed(Message::<_, Bytes>::Head((head, framing))).await?;
        if !is_head && !body.is_empty() {
            self.framed_write.feed(Message::Payload(BodyFrame::Chunk(body))).await?;
        }

        let eof = Message::<_, Bytes>::Payload(BodyFrame::Eof);
        tokio::select! {
            biased;
            () = self.watch.cancelled() => Err(self.watch.teardown_error().into()),
            result = self.framed_write.send(eof) => result.map_err(HttpError::from),
        }
    }
}

/// Whether the request leaves the connection open afterwards.
///
/// HTTP/1.1 defaults to keep-alive unless the peer opts out; HTTP/1.0 must
/// opt in explicitly.
fn wants_keep_alive(head: &RequestHead) -> bool {
    let connection = head.headers().get(CONNECTION).and_then(|v| v.to_str().ok()).unwrap_or("");
    let has_token = |token: &str| connection.split(',').any(|t| t.trim().eq_ignore_ascii_case(token));

    match head.version() {
        Version::HTTP_11 => !has_token("close"),
        Version::HTTP_10 => has_token("keep-alive"),
        _ => false,
    }
}

fn error_status(e: &ProtocolError) -> StatusCode {
    match e {
        ProtocolError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        ProtocolError::TooLargeHeader { .. } | ProtocolError::TooManyHeaders { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn build_error_response(status: StatusCode) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::time::Duration;

    use http::Request;
    use http_body_util::Full;
    use tokio::io::AsyncReadExt;
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::handler::make_handler;

    fn echo_handler() -> Arc<impl Handler<RespBody = Full<Bytes>, Error = Infallible>> {
        Arc::new(make_handler(|req: Request<Bytes>| async move {
            let body = req.into_body();
            Ok::<_, Infallible>(Response::new(Full::new(body)))
        }))
    }

    fn spawn_server<H>(handler: Arc<H>) -> (DuplexStream, JoinHandle<Result<(), HttpError>>)
    where
        H: Handler<RespBody = Full<Bytes>, Error = Infallible> + 'static,
    {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let driver = HttpConnIn::from_stream(Connection::new(), server);
        let handle = tokio::spawn(driver.serve(handler));
        (client, handle)
    }

    async fn read_until(client: &mut DuplexStream, needle: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            if buf.windows(needle.len()).any(|w| w == needle) {
                return buf;
            }
            let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut chunk)).await.unwrap().unwrap();
            assert!(n > 0, "eof before expected bytes, got: {:?}", String::from_utf8_lossy(&buf));
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    #[tokio::test]
    async fn serves_request_and_keeps_alive() {
        let (mut client, handle) = spawn_server(echo_handler());

        client.write_all(b"POST /echo HTTP/1.1\r\nhost: a\r\ncontent-length: 5\r\n\r\nhello").await.unwrap();
        let response = read_until(&mut client, b"hello").await;
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 5\r\n"));

        // second exchange on the same connection
        client.write_all(b"POST /echo HTTP/1.1\r\nhost: a\r\ncontent-length: 2\r\n\r\nhi").await.unwrap();
        read_until(&mut client, b"hi").await;

        drop(client);
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn connection_close_ends_serving() {
        let (mut client, handle) = spawn_server(echo_handler());

        client.write_all(b"GET / HTTP/1.1\r\nhost: a\r\nconnection: close\r\n\r\n").await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();

        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("connection: close\r\n"));
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn head_request_gets_no_body() {
        let handler = Arc::new(make_handler(|_req: Request<Bytes>| async move {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"entity"))))
        }));
        let (mut client, handle) = spawn_server(handler);

        client.write_all(b"HEAD /x HTTP/1.1\r\nhost: a\r\nconnection: close\r\n\r\n").await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();

        let text = String::from_utf8(response).unwrap();
        assert!(text.contains("content-length: 6\r\n"));
        assert!(text.ends_with("\r\n\r\n"), "head response carried a body: {text:?}");
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn oversized_declared_body_is_rejected() {
        let (mut client, handle) = spawn_server(echo_handler());

        let head = format!("POST /big HTTP/1.1\r\nhost: a\r\ncontent-length: {}\r\n\r\n", MAX_BODY_BYTES + 1);
        client.write_all(head.as_bytes()).await.unwrap();

        let response = read_until(&mut client, b"\r\n\r\n").await;
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 413 "));

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(HttpError::Protocol { source: ProtocolError::BodyTooLarge { .. } })));
    }

    #[tokio::test]
    async fn malformed_request_gets_bad_request() {
        let (mut client, handle) = spawn_server(echo_handler());

        client.write_all(b"GET / FTP/9.9\r\nhost: a\r\n\r\n").await.unwrap();
        let response = read_until(&mut client, b"\r\n\r\n").await;
        assert!(String::from_utf8(response).unwrap().starts_with("HTTP/1.1 400 "));
        assert!(handle.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn expect_continue_is_acknowledged() {
        let (mut client, handle) = spawn_server(echo_handler());

        client.write_all(b"POST /up HTTP/1.1\r\nhost: a\r\nexpect: 100-continue\r\ncontent-length: 2\r\n\r\n").await.unwrap();
        read_until(&mut client, b"HTTP/1.1 100 Continue\r\n\r\n").await;

        client.write_all(b"hi").await.unwrap();
        read_until(&mut client, b"hi").await;

        drop(client);
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_ttl_tears_serving_down() {
        let (client, server) = tokio::io::duplex(1024);
        let conn = Connection::new();
        conn.set_ttl(Duration::from_millis(50));
        let driver = HttpConnIn::from_stream(conn, server);
        let handle = tokio::spawn(driver.serve(echo_handler()));

        tokio::time::sleep(Duration::from_millis(120)).await;

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(HttpError::Connection { source: ConnectionError::TimedOut })));
        drop(client);
    }
}

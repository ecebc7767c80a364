//! Head decoders for both directions.
//!
//! [`RequestHeadDecoder`] parses inbound request heads on the server side,
//! [`ResponseHeadDecoder`] parses inbound response heads on the client side.
//! Both delegate the HTTP/1.1 grammar to `httparse` and enforce size and
//! count limits before converting into typed `http` structures. Framing of
//! the following payload is derived here as a [`BodyFraming`] so the two-
//! phase message decoders can switch to the matching body decoder.

use bytes::{Buf, BytesMut};
use http::{HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri, Version};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{BodyFraming, ProtocolError, RequestHead, ResponseHead};
use crate::utils::ensure;

/// Maximum number of headers in a message head
pub(crate) const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes of a message head
pub(crate) const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Decoder for inbound request heads.
///
/// Yields the typed head together with the payload framing derived from
/// its Content-Length and Transfer-Encoding headers.
#[derive(Debug, Default)]
pub struct RequestHeadDecoder;

impl Decoder for RequestHeadDecoder {
    type Item = (RequestHead, BodyFraming);
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // shortest possible request line is shorter than any parseable head,
        // skip the parser until a plausible amount of data arrived
        if src.len() < 14 {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut parsed = httparse::Request::new(&mut headers);

        let status = parsed.parse(src).map_err(|e| match e {
            httparse::Error::TooManyHeaders => ProtocolError::too_many_headers(MAX_HEADER_NUM),
            e => ProtocolError::invalid_header(e.to_string()),
        })?;

        let head_len = match status {
            Status::Complete(len) => len,
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ProtocolError::too_large_header(src.len(), MAX_HEADER_BYTES));
                return Ok(None);
            }
        };
        ensure!(head_len <= MAX_HEADER_BYTES, ProtocolError::too_large_header(head_len, MAX_HEADER_BYTES));
        trace!(head_len, "parsed request head");

        let method = parsed.method.ok_or(ProtocolError::InvalidMethod)?;
        let method = Method::from_bytes(method.as_bytes()).map_err(|_| ProtocolError::InvalidMethod)?;
        let uri: Uri = parsed.path.ok_or(ProtocolError::InvalidUri)?.parse().map_err(|_| ProtocolError::InvalidUri)?;
        let version = parse_version(parsed.version)?;

        let mut request = Request::new(());
        *request.method_mut() = method;
        *request.uri_mut() = uri;
        *request.version_mut() = version;
        copy_headers(parsed.headers, request.headers_mut())?;

        src.advance(head_len);

        let head = RequestHead::from(request);
        let framing = request_body_framing(&head)?;
        Ok(Some((head, framing)))
    }
}

/// Decoder for inbound response heads.
///
/// Created per exchange on the client side. The driver marks HEAD
/// exchanges up front, since their responses carry framing headers but
/// never a body.
#[derive(Debug, Default)]
pub struct ResponseHeadDecoder {
    head_request: bool,
}

impl ResponseHeadDecoder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Marks the pending exchange as a HEAD request.
    pub fn set_head_request(&mut self, head_request: bool) {
        self.head_request = head_request;
    }
}

impl Decoder for ResponseHeadDecoder {
    type Item = (ResponseHead, BodyFraming);
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 14 {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut parsed = httparse::Response::new(&mut headers);

        let status = parsed.parse(src).map_err(|e| match e {
            httparse::Error::TooManyHeaders => ProtocolError::too_many_headers(MAX_HEADER_NUM),
            e => ProtocolError::invalid_header(e.to_string()),
        })?;

        let head_len = match status {
            Status::Complete(len) => len,
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ProtocolError::too_large_header(src.len(), MAX_HEADER_BYTES));
                return Ok(None);
            }
        };
        ensure!(head_len <= MAX_HEADER_BYTES, ProtocolError::too_large_header(head_len, MAX_HEADER_BYTES));
        trace!(head_len, "parsed response head");

        let code = parsed.code.ok_or(ProtocolError::InvalidStatus(0))?;
        let status_code = StatusCode::from_u16(code).map_err(|_| ProtocolError::InvalidStatus(code))?;
        let version = parse_version(parsed.version)?;

        let mut response = Response::new(());
        *response.status_mut() = status_code;
        *response.version_mut() = version;
        copy_headers(parsed.headers, response.headers_mut())?;

        src.advance(head_len);

        let framing = response_body_framing(&response, self.head_request)?;
        Ok(Some((response, framing)))
    }
}

fn parse_version(version: Option<u8>) -> Result<Version, ProtocolError> {
    match version {
        Some(1) => Ok(Version::HTTP_11),
        Some(0) => Ok(Version::HTTP_10),
        // http2 and http3 not supported
        v => Err(ProtocolError::InvalidVersion(v)),
    }
}

fn copy_headers(parsed: &[httparse::Header<'_>], headers: &mut http::HeaderMap) -> Result<(), ProtocolError> {
    headers.reserve(parsed.len());
    for header in parsed {
        let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|e| ProtocolError::invalid_header(e.to_string()))?;
        let value = HeaderValue::from_bytes(header.value).map_err(|e| ProtocolError::invalid_header(e.to_string()))?;
        headers.append(name, value);
    }
    Ok(())
}

/// Derives request payload framing per RFC 9112 section 6.
fn request_body_framing(head: &RequestHead) -> Result<BodyFraming, ProtocolError> {
    if !head.need_body() {
        return Ok(BodyFraming::Empty);
    }
    framing_from_headers(head.headers())
}

/// Derives response payload framing.
///
/// Responses to HEAD requests and informational, 204 and 304 responses
/// never carry a body regardless of framing headers. A response with
/// neither Content-Length nor chunked encoding is treated as empty.
fn response_body_framing(head: &ResponseHead, head_request: bool) -> Result<BodyFraming, ProtocolError> {
    let status = head.status();
    if head_request || status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        return Ok(BodyFraming::Empty);
    }
    framing_from_headers(head.headers())
}

fn framing_from_headers(headers: &http::HeaderMap) -> Result<BodyFraming, ProtocolError> {
    let te = headers.get(http::header::TRANSFER_ENCODING);
    let cl = headers.get(http::header::CONTENT_LENGTH);

    if te.is_some() && cl.is_some() {
        return Err(ProtocolError::invalid_content_length("transfer-encoding and content-length both present"));
    }
    if te.is_some() {
        // a non-chunked transfer coding leaves the body undelimited, treat as empty
        return Ok(if is_chunked(te) { BodyFraming::Chunked } else { BodyFraming::Empty });
    }

    let Some(value) = cl else {
        return Ok(BodyFraming::Empty);
    };
    let text = value.to_str().map_err(|_| ProtocolError::invalid_content_length("value is not ascii"))?;
    let length = text.trim().parse::<u64>().map_err(|_| ProtocolError::invalid_content_length(format!("cannot parse {text:?}")))?;
    Ok(BodyFraming::Length(length))
}

/// Chunked must be the final transfer coding to delimit the message.
fn is_chunked(value: Option<&HeaderValue>) -> bool {
    value
        .and_then(|v| v.as_bytes().rsplit(|b| *b == b',').next())
        .is_some_and(|coding| coding.trim_ascii() == b"chunked")
}

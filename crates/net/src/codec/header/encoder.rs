//! Head encoders for both directions.
//!
//! [`ResponseHeadEncoder`] serializes outbound response heads on the server
//! side, [`RequestHeadEncoder`] serializes outbound request heads on the
//! client side. Framing headers are forced from the [`BodyFraming`] so the
//! head always agrees with the body encoder that follows it. HTTP/1.1 only.

use std::io;
use std::io::{ErrorKind, Write};

use bytes::{BufMut, BytesMut};
use http::{HeaderMap, HeaderValue, StatusCode, Version, header};
use tokio_util::codec::Encoder;
use tracing::error;

use crate::protocol::{BodyFraming, RequestHead, ResponseHead, SendError};

/// Initial buffer reservation for head serialization
const INIT_HEAD_SIZE: usize = 4 * 1024;

/// Encoder for outbound response heads.
#[derive(Debug, Default)]
pub struct ResponseHeadEncoder;

impl Encoder<(ResponseHead, BodyFraming)> for ResponseHeadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, BodyFraming), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut head, framing) = item;

        dst.reserve(INIT_HEAD_SIZE);
        match head.version() {
            Version::HTTP_11 => {
                let status = head.status();
                write!(dst.writer(), "HTTP/1.1 {} {}\r\n", status.as_str(), status.canonical_reason().unwrap_or("Unknown"))
                    .map_err(SendError::io)?;
            }
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(io::Error::from(ErrorKind::Unsupported).into());
            }
        }

        // statuses defined to carry no body also carry no framing headers
        let status = head.status();
        let force_zero_length = !(status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED);
        set_framing_headers(head.headers_mut(), framing, force_zero_length);
        write_header_lines(head.headers(), dst);
        Ok(())
    }
}

/// Encoder for outbound request heads.
#[derive(Debug, Default)]
pub struct RequestHeadEncoder;

impl Encoder<(RequestHead, BodyFraming)> for RequestHeadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (RequestHead, BodyFraming), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut head, framing) = item;

        dst.reserve(INIT_HEAD_SIZE);
        match head.version() {
            Version::HTTP_11 => {
                let target = head.uri().path_and_query().map_or("/", |pq| pq.as_str());
                write!(dst.writer(), "{} {} HTTP/1.1\r\n", head.method(), target).map_err(SendError::io)?;
            }
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(io::Error::from(ErrorKind::Unsupported).into());
            }
        }

        // bodyless methods stay without framing headers
        let force_zero_length = head.need_body();
        set_framing_headers(head.headers_mut(), framing, force_zero_length);
        write_header_lines(head.headers(), dst);
        Ok(())
    }
}

fn set_framing_headers(headers: &mut HeaderMap, framing: BodyFraming, force_zero_length: bool) {
    match framing {
        BodyFraming::Length(n) => {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(n));
        }
        BodyFraming::Chunked => {
            headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        }
        BodyFraming::Empty => {
            // an explicit length on a bodyless exchange survives, which is how
            // HEAD responses advertise the entity length they omit
            if force_zero_length && !headers.contains_key(header::CONTENT_LENGTH) {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
            }
        }
    }
}

fn write_header_lines(headers: &HeaderMap, dst: &mut BytesMut) {
    for (header_name, header_value) in headers.iter() {
        dst.put_slice(header_name.as_ref());
        dst.put_slice(b": ");
        dst.put_slice(header_value.as_ref());
        dst.put_slice(b"\r\n");
    }
    dst.put_slice(b"\r\n");
}

//! Request message codec.
//!
//! [`RequestDecoder`] is the server-side inbound codec, [`RequestEncoder`]
//! the client-side outbound codec. Both are two-phase: the head first,
//! then the payload stream belonging to it.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::body::{BodyDecoder, BodyEncoder};
use crate::codec::header::{RequestHeadDecoder, RequestHeadEncoder};
use crate::protocol::{BodyFrame, BodyFraming, Message, ProtocolError, RequestHead, SendError};

/// Streaming decoder for inbound HTTP requests.
///
/// The decoder state is carried by the `body_decoder` field: `None` while
/// a head is awaited, `Some` while the payload belonging to the previous
/// head is streamed.
#[derive(Debug)]
pub struct RequestDecoder {
    head_decoder: RequestHeadDecoder,
    body_decoder: Option<BodyDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self { head_decoder: RequestHeadDecoder, body_decoder: None }
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHead, BodyFraming)>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // drain the pending payload before the next head is parsed
        if let Some(body_decoder) = &mut self.body_decoder {
            let message = match body_decoder.decode(src)? {
                Some(item @ BodyFrame::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ BodyFrame::Eof) => {
                    self.body_decoder.take();
                    Some(Message::Payload(item))
                }
                None => None,
            };

            return Ok(message);
        }

        let message = match self.head_decoder.decode(src)? {
            Some((head, framing)) => {
                self.body_decoder = Some(framing.into());
                Some(Message::Head((head, framing)))
            }
            None => None,
        };

        Ok(message)
    }
}

/// Streaming encoder for outbound HTTP requests.
///
/// Mirrors the decoder: a head frame arms the body encoder matching its
/// payload framing, payload frames are rejected while no exchange is in
/// flight.
#[derive(Debug)]
pub struct RequestEncoder {
    head_encoder: RequestHeadEncoder,
    body_encoder: Option<BodyEncoder>,
}

impl RequestEncoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Default for RequestEncoder {
    fn default() -> Self {
        Self { head_encoder: RequestHeadEncoder, body_encoder: None }
    }
}

impl<D: Buf> Encoder<Message<(RequestHead, BodyFraming), D>> for RequestEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Message<(RequestHead, BodyFraming), D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Head((head, framing)) => {
                if self.body_encoder.is_some() {
                    return Err(SendError::invalid_body("request head while the previous body is unfinished"));
                }

                self.body_encoder = Some(framing.into());
                self.head_encoder.encode((head, framing), dst)
            }

            Message::Payload(frame) => {
                let Some(body_encoder) = &mut self.body_encoder else {
                    return Err(SendError::invalid_body("body frame without a preceding request head"));
                };

                let result = body_encoder.encode(frame, dst);
                if body_encoder.is_finished() {
                    self.body_encoder.take();
                }
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{Method, Request};
    use indoc::indoc;

    use super::*;

    #[test]
    fn decode_request_with_chunked_body() {
        let str = indoc! {r##"
        POST /upload HTTP/1.1
        Host: example.com
        Transfer-Encoding: chunked

        5
        hello
        0

        "##};

        let mut decoder = RequestDecoder::new();
        let mut buf = BytesMut::from(str);

        let Some(Message::Head((head, framing))) = decoder.decode(&mut buf).unwrap() else {
            panic!("expected request head");
        };
        assert_eq!(head.method(), &Method::POST);
        assert!(framing.is_chunked());

        let Some(Message::Payload(BodyFrame::Chunk(chunk))) = decoder.decode(&mut buf).unwrap() else {
            panic!("expected payload chunk");
        };
        assert_eq!(&chunk[..], b"hello");

        let Some(Message::Payload(BodyFrame::Eof)) = decoder.decode(&mut buf).unwrap() else {
            panic!("expected payload eof");
        };
    }

    #[test]
    fn decode_pipelined_requests() {
        let str = "GET /a HTTP/1.1\r\nHost: h\r\n\r\nGET /b HTTP/1.1\r\nHost: h\r\n\r\n";

        let mut decoder = RequestDecoder::new();
        let mut buf = BytesMut::from(str);

        let Some(Message::Head((first, _))) = decoder.decode(&mut buf).unwrap() else {
            panic!("expected first head");
        };
        assert_eq!(first.uri().path(), "/a");

        // empty payload terminates before the next head
        let Some(Message::Payload(BodyFrame::Eof)) = decoder.decode(&mut buf).unwrap() else {
            panic!("expected eof for bodyless request");
        };

        let Some(Message::Head((second, _))) = decoder.decode(&mut buf).unwrap() else {
            panic!("expected second head");
        };
        assert_eq!(second.uri().path(), "/b");
    }

    #[test]
    fn encode_request_with_length_body() {
        let request = Request::builder().method(Method::POST).uri("/data").header("host", "example.com").body(()).unwrap();

        let mut encoder = RequestEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(Message::<(RequestHead, BodyFraming)>::Head((RequestHead::from(request), BodyFraming::Length(4))), &mut dst).unwrap();
        encoder.encode(Message::Payload(BodyFrame::Chunk(Bytes::from_static(b"data"))), &mut dst).unwrap();
        encoder.encode(Message::Payload(BodyFrame::<Bytes>::Eof), &mut dst).unwrap();

        let text = std::str::from_utf8(&dst).unwrap();
        assert!(text.starts_with("POST /data HTTP/1.1\r\n"));
        assert!(text.contains("content-length: 4\r\n"));
        assert!(text.ends_with("\r\n\r\ndata"));
    }

    #[test]
    fn encode_rejects_payload_without_head() {
        let mut encoder = RequestEncoder::new();
        let mut dst = BytesMut::new();

        let result = encoder.encode(Message::<(RequestHead, BodyFraming)>::Payload(BodyFrame::Chunk(Bytes::from_static(b"x"))), &mut dst);
        assert!(result.is_err());
    }
}

//! Response message codec.
//!
//! [`ResponseEncoder`] is the server-side outbound codec, [`ResponseDecoder`]
//! the client-side inbound codec. Same two-phase shape as the request codec.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::body::{BodyDecoder, BodyEncoder};
use crate::codec::header::{ResponseHeadDecoder, ResponseHeadEncoder};
use crate::protocol::{BodyFrame, BodyFraming, Message, ProtocolError, ResponseHead, SendError};

/// Streaming encoder for outbound HTTP responses.
#[derive(Debug)]
pub struct ResponseEncoder {
    head_encoder: ResponseHeadEncoder,
    body_encoder: Option<BodyEncoder>,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Default for ResponseEncoder {
    fn default() -> Self {
        Self { head_encoder: ResponseHeadEncoder, body_encoder: None }
    }
}

impl<D: Buf> Encoder<Message<(ResponseHead, BodyFraming), D>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Message<(ResponseHead, BodyFraming), D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Head((head, framing)) => {
                if self.body_encoder.is_some() {
                    return Err(SendError::invalid_body("response head while the previous body is unfinished"));
                }

                self.body_encoder = Some(framing.into());
                self.head_encoder.encode((head, framing), dst)
            }

            Message::Payload(frame) => {
                let Some(body_encoder) = &mut self.body_encoder else {
                    return Err(SendError::invalid_body("body frame without a preceding response head"));
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

/// Streaming decoder for inbound HTTP responses.
///
/// One exchange at a time. [`ResponseDecoder::set_head_request`] must be
/// called before the head arrives when the request was a HEAD, since such
/// responses carry framing headers without a body.
#[derive(Debug)]
pub struct ResponseDecoder {
    head_decoder: ResponseHeadDecoder,
    body_decoder: Option<BodyDecoder>,
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn set_head_request(&mut self, head_request: bool) {
        self.head_decoder.set_head_request(head_request);
    }
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self { head_decoder: ResponseHeadDecoder::new(), body_decoder: None }
    }
}

impl Decoder for ResponseDecoder {
    type Item = Message<(ResponseHead, BodyFraming)>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
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

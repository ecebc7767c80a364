use bytes::{Buf, Bytes};

/// The head of an HTTP response, before a body is attached.
pub type ResponseHead = http::Response<()>;

/// A single frame of an HTTP message stream: either the head or a piece of
/// the body.
///
/// Both directions use this shape. On the server side `T` is the request
/// head, on the client side the response head. `D` is the body chunk type
/// and defaults to [`Bytes`].
pub enum Message<T, D: Buf = Bytes> {
    /// The parsed head of the message
    Head(T),
    /// A body chunk or the end-of-body marker
    Payload(BodyFrame<D>),
}

/// An item produced while streaming an HTTP body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyFrame<D: Buf = Bytes> {
    /// A chunk of body data
    Chunk(D),
    /// End of the body stream
    Eof,
}

impl<D: Buf> BodyFrame<D> {
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, BodyFrame::Eof)
    }
}

/// How an HTTP body is framed on the wire, derived from the message head.
///
/// Decoders and encoders select their strategy from this value: read or
/// write an exact number of bytes, speak chunked transfer encoding, or skip
/// the body entirely.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BodyFraming {
    /// Body with a known length in bytes
    Length(u64),
    /// Body using chunked transfer encoding
    Chunked,
    /// No body
    Empty,
}

impl BodyFraming {
    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, BodyFraming::Chunked)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, BodyFraming::Empty)
    }
}

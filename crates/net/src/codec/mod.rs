//! HTTP/1.1 message codecs.
//!
//! Streaming encoders and decoders for both directions, built on
//! `tokio_util::codec`. Each message codec is two-phase: the head is
//! parsed or written first, then the payload stream that belongs to it.
//!
//! - Server side: [`RequestDecoder`] reads requests, [`ResponseEncoder`]
//!   writes responses.
//! - Client side: [`RequestEncoder`] writes requests, [`ResponseDecoder`]
//!   reads responses.
//!
//! Head grammar is handled in the [`header`] submodule, payload framing in
//! [`body`].

mod body;
mod header;
mod request;
mod response;

pub use request::RequestDecoder;
pub use request::RequestEncoder;
pub use response::ResponseDecoder;
pub use response::ResponseEncoder;

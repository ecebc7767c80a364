//! Message head codecs.
//!
//! Decoding and encoding of request and response heads, shared by the
//! two-phase message codecs in the parent module.

mod decoder;
mod encoder;

pub use decoder::RequestHeadDecoder;
pub use decoder::ResponseHeadDecoder;
pub use encoder::RequestHeadEncoder;
pub use encoder::ResponseHeadEncoder;

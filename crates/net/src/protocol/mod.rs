//! Core HTTP protocol vocabulary.
//!
//! The types in this module are shared by both directions of the codec
//! layer and by the connection drivers:
//!
//! - [`Message`], [`BodyFrame`], [`BodyFraming`]: framing vocabulary
//! - [`RequestHead`] / [`ResponseHead`]: message heads before body attachment
//! - [`HttpError`], [`ConnectionError`], [`ProtocolError`], [`SendError`]:
//!   the error taxonomy, split by failure domain

mod error;
mod message;
mod request;

pub use error::{ConnectionError, HttpError, ProtocolError, SendError};
pub use message::{BodyFrame, BodyFraming, Message, ResponseHead};
pub use request::RequestHead;

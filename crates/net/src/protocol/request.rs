//! Request head handling.
//!
//! Keeps the parsed head of a request as bare `http::request::Parts` so the
//! codec layer can pass it around before a body is attached.

use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version};

/// The head of an HTTP request, without its body.
///
/// Produced by the request decoder on the server side and built from an
/// `http::Request` on the client side. The body is attached later with
/// [`RequestHead::body`].
#[derive(Debug)]
pub struct RequestHead {
    parts: Parts,
}

impl RequestHead {
    /// Attaches a body, turning the head into a full `Request<T>`.
    pub fn body<T>(self, body: T) -> Request<T> {
        Request::from_parts(self.parts, body)
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn version(&self) -> Version {
        self.parts.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.parts.headers
    }

    /// Whether a request with this method may carry a body.
    ///
    /// GET, HEAD, DELETE, OPTIONS, CONNECT and TRACE requests are treated
    /// as bodyless regardless of framing headers.
    pub fn need_body(&self) -> bool {
        !matches!(
            self.parts.method,
            Method::GET | Method::HEAD | Method::DELETE | Method::OPTIONS | Method::CONNECT | Method::TRACE
        )
    }
}

impl From<Parts> for RequestHead {
    fn from(parts: Parts) -> Self {
        Self { parts }
    }
}

impl From<Request<()>> for RequestHead {
    fn from(request: Request<()>) -> Self {
        let (parts, ()) = request.into_parts();
        Self { parts }
    }
}

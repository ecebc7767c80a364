//! Per-request state shared by every handler in a chain.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, COOKIE, LOCATION};
use http::{HeaderMap, Request, Response, StatusCode};
use mime::Mime;
use serde_json::{Map, Value};

use crate::collab::Session;
use crate::error::HandlerError;

/// What a handler did with an exchange.
///
/// `Handled` stops the chain and sends the accumulated response; `Pass`
/// hands the exchange to the next handler in the enclosing group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    Pass,
}

impl Outcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, Outcome::Handled)
    }
}

/// One request working its way through a handler tree.
///
/// The exchange owns the incoming request, the argument map that filters
/// and matchers accumulate into, an optional authenticated session, and
/// the response under construction. Handlers mutate it freely; once one
/// of them returns [`Outcome::Handled`] the accumulated response is sent
/// as-is.
#[derive(Debug)]
pub struct Exchange {
    request: Request<Bytes>,
    args: Map<String, Value>,
    session: Option<Session>,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Exchange {
    pub fn new(request: Request<Bytes>) -> Self {
        Self {
            request,
            args: Map::new(),
            session: None,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    pub fn method(&self) -> &http::Method {
        self.request.method()
    }

    pub fn uri_path(&self) -> &str {
        self.request.uri().path()
    }

    pub fn query(&self) -> Option<&str> {
        self.request.uri().query()
    }

    pub fn header(&self, name: &HeaderName) -> Option<&str> {
        self.request.headers().get(name).and_then(|value| value.to_str().ok())
    }

    pub fn content_type(&self) -> Option<Mime> {
        self.header(&CONTENT_TYPE).and_then(|text| text.parse().ok())
    }

    /// Value of one cookie from the request's `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        let header = self.header(&COOKIE)?;
        header.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then_some(value)
        })
    }

    pub fn args(&self) -> &Map<String, Value> {
        &self.args
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    pub fn insert_arg(&mut self, name: &str, value: Value) {
        self.args.insert(name.to_string(), value);
    }

    pub fn replace_args(&mut self, args: Map<String, Value>) {
        self.args = args;
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn set_session(&mut self, session: Option<Session>) {
        self.session = session;
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Adds a response header, keeping any set earlier in the chain.
    pub fn add_header(&mut self, name: &str, value: &str) -> Result<(), HandlerError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| HandlerError::message(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| HandlerError::message(format!("invalid header value: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Serializes `value` as the JSON response body.
    pub fn reply_json(&mut self, status: StatusCode, value: &Value) -> Result<(), HandlerError> {
        let body = serde_json::to_vec(value)?;
        self.status = status;
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Bytes::from(body);
        Ok(())
    }

    pub fn reply_text(&mut self, status: StatusCode, text: &str) {
        self.status = status;
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        self.body = Bytes::copy_from_slice(text.as_bytes());
    }

    pub fn reply_bytes(&mut self, status: StatusCode, content_type: &HeaderValue, body: Bytes) {
        self.status = status;
        self.headers.insert(CONTENT_TYPE, content_type.clone());
        self.body = body;
    }

    pub fn redirect(&mut self, status: StatusCode, location: &str) -> Result<(), HandlerError> {
        let value = HeaderValue::from_str(location)
            .map_err(|e| HandlerError::message(format!("invalid redirect location: {e}")))?;
        self.status = status;
        self.headers.insert(LOCATION, value);
        self.body = Bytes::new();
        Ok(())
    }

    /// Consumes the exchange into the response accumulated so far.
    pub fn into_response(self) -> Response<Bytes> {
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(uri: &str) -> Request<Bytes> {
        Request::builder()
            .uri(uri)
            .header(COOKIE, "theme=dark; session=abc123")
            .body(Bytes::new())
            .unwrap()
    }

    #[test]
    fn accumulates_headers_and_body() {
        let mut exchange = Exchange::new(request("/ping?q=1"));
        exchange.add_header("x-trace", "t1").unwrap();
        exchange.reply_json(StatusCode::CREATED, &json!({"ok": true})).unwrap();

        assert_eq!(exchange.query(), Some("q=1"));
        let response = exchange.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get("x-trace").unwrap(), "t1");
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(response.body().as_ref(), br#"{"ok":true}"#);
    }

    #[test]
    fn reads_individual_cookies() {
        let exchange = Exchange::new(request("/"));
        assert_eq!(exchange.cookie("session"), Some("abc123"));
        assert_eq!(exchange.cookie("theme"), Some("dark"));
        assert_eq!(exchange.cookie("missing"), None);
    }

    #[test]
    fn rejects_malformed_header_names() {
        let mut exchange = Exchange::new(request("/"));
        assert!(exchange.add_header("bad header", "v").is_err());
    }

    #[test]
    fn redirect_sets_location_and_clears_body() {
        let mut exchange = Exchange::new(request("/old"));
        exchange.reply_text(StatusCode::OK, "stale");
        exchange.redirect(StatusCode::FOUND, "/new").unwrap();

        let response = exchange.into_response();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get(LOCATION).unwrap(), "/new");
        assert!(response.body().is_empty());
    }
}

//! Small self-contained endpoints.

use async_trait::async_trait;
use http::{HeaderName, StatusCode};
use serde_json::{Map, Value};

use crate::error::{ConfigError, HandlerError};
use crate::exchange::{Exchange, Outcome};
use crate::handler::RequestHandler;
use crate::value::ValueExt;

/// Claims the exchange with whatever response has accumulated so far.
///
/// Useful as the tail of a chain whose earlier handlers already shaped
/// the response, and as the default when a method entry names nothing.
#[derive(Default)]
pub struct PassEndpoint;

impl PassEndpoint {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RequestHandler for PassEndpoint {
    async fn handle(&self, _exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        Ok(Outcome::Handled)
    }
}

/// Replies with a fixed status code and its reason text.
pub struct StatusEndpoint {
    status: StatusCode,
}

impl StatusEndpoint {
    pub fn from_config(path: &str, config: &Value) -> Result<Self, ConfigError> {
        let code = config.get_u64_or("code", 200);
        let status = u16::try_from(code)
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or_else(|| ConfigError::invalid(path, format!("invalid status code {code}")))?;
        Ok(Self { status })
    }
}

#[async_trait]
impl RequestHandler for StatusEndpoint {
    async fn handle(&self, exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        exchange.reply_text(self.status, self.status.canonical_reason().unwrap_or(""));
        Ok(Outcome::Handled)
    }
}

/// Redirects every request to a configured location.
pub struct RedirectEndpoint {
    status: StatusCode,
    location: String,
}

impl RedirectEndpoint {
    pub fn from_config(path: &str, config: &Value) -> Result<Self, ConfigError> {
        let location = config
            .get_str("location")
            .or_else(|| config.get_str("url"))
            .ok_or_else(|| ConfigError::invalid(path, "redirect requires a location"))?
            .to_string();
        let code = config.get_u64_or("code", 302);
        let status = u16::try_from(code)
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .filter(StatusCode::is_redirection)
            .ok_or_else(|| ConfigError::invalid(path, format!("invalid redirect code {code}")))?;
        Ok(Self { status, location })
    }
}

#[async_trait]
impl RequestHandler for RedirectEndpoint {
    async fn handle(&self, exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        exchange.redirect(self.status, &self.location)?;
        Ok(Outcome::Handled)
    }
}

/// Adds configured response headers, then lets the chain continue.
pub struct HeaderInjector {
    headers: Vec<(String, String)>,
}

impl HeaderInjector {
    pub fn from_config(path: &str, headers: &Map<String, Value>) -> Result<Self, ConfigError> {
        let mut out = Vec::with_capacity(headers.len());
        for (name, value) in headers {
            // catch bad names at compile time, not per request
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConfigError::invalid(path, format!("invalid header name {name:?}: {e}")))?;
            let value = value
                .as_str()
                .ok_or_else(|| ConfigError::invalid(path, format!("header {name:?} must be a string")))?;
            out.push((name.clone(), value.to_string()));
        }
        Ok(Self { headers: out })
    }
}

#[async_trait]
impl RequestHandler for HeaderInjector {
    async fn handle(&self, exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        for (name, value) in &self.headers {
            exchange.add_header(name, value)?;
        }
        Ok(Outcome::Pass)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::header::LOCATION;
    use http::Request;
    use serde_json::json;

    use super::*;

    fn exchange() -> Exchange {
        Exchange::new(Request::builder().uri("/").body(Bytes::new()).unwrap())
    }

    #[tokio::test]
    async fn status_endpoint_replies_with_reason_text() {
        let endpoint = StatusEndpoint::from_config("api", &json!({"code": 418})).unwrap();
        let mut exchange = exchange();
        assert!(endpoint.handle(&mut exchange).await.unwrap().is_handled());
        assert_eq!(exchange.status(), StatusCode::IM_A_TEAPOT);
    }

    #[test]
    fn status_endpoint_rejects_unknown_codes() {
        assert!(StatusEndpoint::from_config("api", &json!({"code": 99})).is_err());
    }

    #[tokio::test]
    async fn redirect_endpoint_accepts_url_alias() {
        let endpoint = RedirectEndpoint::from_config("api", &json!({"url": "/new", "code": 301})).unwrap();
        let mut exchange = exchange();
        endpoint.handle(&mut exchange).await.unwrap();

        let response = exchange.into_response();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers().get(LOCATION).unwrap(), "/new");
    }

    #[test]
    fn redirect_endpoint_requires_a_redirection_code() {
        let err = RedirectEndpoint::from_config("api", &json!({"location": "/x", "code": 200}));
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn header_injector_adds_and_passes() {
        let headers = json!({"cache-control": "no-store"});
        let injector = HeaderInjector::from_config("api", headers.as_object().unwrap()).unwrap();
        let mut exchange = exchange();

        let outcome = injector.handle(&mut exchange).await.unwrap();
        assert_eq!(outcome, Outcome::Pass);
        let response = exchange.into_response();
        assert_eq!(response.headers().get("cache-control").unwrap(), "no-store");
    }

    #[test]
    fn header_injector_rejects_bad_names_at_build_time() {
        let headers = json!({"bad name": "v"});
        assert!(HeaderInjector::from_config("api", headers.as_object().unwrap()).is_err());
    }
}

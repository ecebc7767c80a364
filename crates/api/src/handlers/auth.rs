//! OAuth2 login and session endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use http::header::AUTHORIZATION;
use http::StatusCode;
use serde_json::{json, Value};
use tracing::warn;

use crate::collab::{ProviderSet, SessionManager};
use crate::error::HandlerError;
use crate::exchange::{Exchange, Outcome};
use crate::handler::RequestHandler;

/// Session token carried by a request, wherever it was put.
///
/// Checked in order: `Authorization: Bearer`, the `session` cookie,
/// then a `token` argument.
fn session_token(exchange: &Exchange) -> Option<String> {
    if let Some(auth) = exchange.header(&AUTHORIZATION) {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }
    if let Some(token) = exchange.cookie("session") {
        return Some(token.to_string());
    }
    exchange.arg("token").and_then(Value::as_str).map(str::to_string)
}

fn unauthorized(exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
    exchange.reply_json(StatusCode::UNAUTHORIZED, &json!({"error": "not authenticated"}))?;
    Ok(Outcome::Handled)
}

/// Drives the OAuth2 authorization code flow.
///
/// Without a `code` argument the user-agent is redirected to the
/// provider's authorization URL. With one, the code is exchanged for
/// an identity, a session is opened for it, and the session is
/// returned along with a `session` cookie. Exchange failures are an
/// expected outcome of the flow and answer 401 rather than erroring.
pub struct LoginEndpoint {
    providers: ProviderSet,
    sessions: Arc<dyn SessionManager>,
    provider: Option<String>,
    redirect_uri: String,
}

impl LoginEndpoint {
    pub fn new(
        providers: ProviderSet,
        sessions: Arc<dyn SessionManager>,
        provider: Option<&str>,
        redirect_uri: &str,
    ) -> Self {
        Self {
            providers,
            sessions,
            provider: provider.map(str::to_string),
            redirect_uri: redirect_uri.to_string(),
        }
    }
}

#[async_trait]
impl RequestHandler for LoginEndpoint {
    async fn handle(&self, exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        let chosen = exchange
            .arg("provider")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.provider.clone());
        let provider = match &chosen {
            Some(name) => self.providers.get(name),
            None => self.providers.first(),
        };
        let Some(provider) = provider else {
            exchange.reply_json(StatusCode::BAD_REQUEST, &json!({"error": "unknown oauth2 provider"}))?;
            return Ok(Outcome::Handled);
        };

        let Some(code) = exchange.arg("code").and_then(Value::as_str).map(str::to_string) else {
            let state = exchange.arg("state").and_then(Value::as_str).unwrap_or("").to_string();
            let url = provider.authorize_url(&self.redirect_uri, &state);
            exchange.redirect(StatusCode::FOUND, &url)?;
            return Ok(Outcome::Handled);
        };

        let identity = match provider.exchange_code(&code, &self.redirect_uri).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(provider = provider.name(), error = %e, "oauth2 code exchange failed");
                exchange.reply_json(StatusCode::UNAUTHORIZED, &json!({"error": "authentication failed"}))?;
                return Ok(Outcome::Handled);
            }
        };

        let session = self.sessions.open(&identity).await?;
        exchange.add_header(
            "set-cookie",
            &format!("session={}; Path=/; HttpOnly; SameSite=Lax", session.token),
        )?;
        let body = serde_json::to_value(&session)?;
        exchange.set_session(Some(session));
        exchange.reply_json(StatusCode::OK, &body)?;
        Ok(Outcome::Handled)
    }
}

/// Closes the request's session, if any, and clears the cookie.
pub struct LogoutEndpoint {
    sessions: Arc<dyn SessionManager>,
}

impl LogoutEndpoint {
    pub fn new(sessions: Arc<dyn SessionManager>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl RequestHandler for LogoutEndpoint {
    async fn handle(&self, exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        if let Some(token) = session_token(exchange) {
            self.sessions.close(&token).await?;
        }
        exchange.add_header("set-cookie", "session=; Path=/; Max-Age=0")?;
        exchange.set_session(None);
        exchange.reply_json(StatusCode::OK, &json!({"ok": true}))?;
        Ok(Outcome::Handled)
    }
}

/// Replies with the authenticated session, or 401 without one.
pub struct SessionEndpoint {
    sessions: Arc<dyn SessionManager>,
}

impl SessionEndpoint {
    pub fn new(sessions: Arc<dyn SessionManager>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl RequestHandler for SessionEndpoint {
    async fn handle(&self, exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        let Some(token) = session_token(exchange) else {
            return unauthorized(exchange);
        };
        match self.sessions.find(&token).await? {
            Some(session) => {
                let body = serde_json::to_value(&session)?;
                exchange.set_session(Some(session));
                exchange.reply_json(StatusCode::OK, &body)?;
                Ok(Outcome::Handled)
            }
            None => unauthorized(exchange),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::header::{COOKIE, LOCATION, SET_COOKIE};
    use http::Request;

    use super::*;
    use crate::collab::{Identity, MemorySessionManager, MockOauth2Provider};

    fn identity() -> Identity {
        Identity {
            provider: "github".to_string(),
            id: "u1".to_string(),
            name: Some("Ada".to_string()),
            email: None,
            avatar: None,
            verified: true,
            raw: Value::Null,
        }
    }

    fn providers_with(provider: MockOauth2Provider) -> ProviderSet {
        let mut set = ProviderSet::new();
        set.add(Arc::new(provider));
        set
    }

    fn exchange() -> Exchange {
        Exchange::new(Request::builder().uri("/login").body(Bytes::new()).unwrap())
    }

    #[tokio::test]
    async fn login_without_code_redirects_to_the_provider() {
        let mut provider = MockOauth2Provider::new();
        provider.expect_name().return_const("github".to_string());
        provider
            .expect_authorize_url()
            .returning(|uri, state| format!("https://auth.example.com/?redirect={uri}&state={state}"));

        let sessions = Arc::new(MemorySessionManager::new());
        let login = LoginEndpoint::new(providers_with(provider), sessions, None, "/login");

        let mut exchange = exchange();
        assert!(login.handle(&mut exchange).await.unwrap().is_handled());

        let response = exchange.into_response();
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers().get(LOCATION).unwrap().to_str().unwrap();
        assert!(location.starts_with("https://auth.example.com/"));
    }

    #[tokio::test]
    async fn login_with_code_opens_a_session() {
        let mut provider = MockOauth2Provider::new();
        provider.expect_name().return_const("github".to_string());
        provider
            .expect_exchange_code()
            .withf(|code, _| code == "abc")
            .returning(|_, _| Ok(identity()));

        let sessions = Arc::new(MemorySessionManager::new());
        let login = LoginEndpoint::new(providers_with(provider), sessions.clone(), None, "/login");

        let mut exchange = exchange();
        exchange.insert_arg("code", json!("abc"));
        assert!(login.handle(&mut exchange).await.unwrap().is_handled());

        assert_eq!(exchange.status(), StatusCode::OK);
        let session = exchange.session().cloned().unwrap();
        assert_eq!(session.user, "Ada");
        assert!(sessions.find(&session.token).await.unwrap().is_some());

        let response = exchange.into_response();
        let cookie = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with(&format!("session={}", session.token)));
    }

    #[tokio::test]
    async fn failed_code_exchange_answers_401() {
        let mut provider = MockOauth2Provider::new();
        provider.expect_name().return_const("github".to_string());
        provider
            .expect_exchange_code()
            .returning(|_, _| Err(HandlerError::message("code expired")));

        let login = LoginEndpoint::new(
            providers_with(provider),
            Arc::new(MemorySessionManager::new()),
            None,
            "/login",
        );

        let mut exchange = exchange();
        exchange.insert_arg("code", json!("stale"));
        assert!(login.handle(&mut exchange).await.unwrap().is_handled());
        assert_eq!(exchange.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn session_endpoint_accepts_bearer_tokens() {
        let sessions = Arc::new(MemorySessionManager::new());
        let opened = sessions.open(&identity()).await.unwrap();

        let endpoint = SessionEndpoint::new(sessions);
        let request = Request::builder()
            .uri("/session")
            .header(AUTHORIZATION, format!("Bearer {}", opened.token))
            .body(Bytes::new())
            .unwrap();
        let mut exchange = Exchange::new(request);

        assert!(endpoint.handle(&mut exchange).await.unwrap().is_handled());
        assert_eq!(exchange.status(), StatusCode::OK);
        assert_eq!(exchange.session().map(|s| s.user.as_str()), Some("Ada"));
    }

    #[tokio::test]
    async fn session_endpoint_rejects_unknown_tokens() {
        let endpoint = SessionEndpoint::new(Arc::new(MemorySessionManager::new()));
        let request = Request::builder()
            .uri("/session")
            .header(COOKIE, "session=nope")
            .body(Bytes::new())
            .unwrap();
        let mut exchange = Exchange::new(request);

        assert!(endpoint.handle(&mut exchange).await.unwrap().is_handled());
        assert_eq!(exchange.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_closes_the_session_and_clears_the_cookie() {
        let sessions = Arc::new(MemorySessionManager::new());
        let opened = sessions.open(&identity()).await.unwrap();

        let logout = LogoutEndpoint::new(sessions.clone());
        let request = Request::builder()
            .uri("/logout")
            .header(COOKIE, format!("session={}", opened.token))
            .body(Bytes::new())
            .unwrap();
        let mut exchange = Exchange::new(request);

        assert!(logout.handle(&mut exchange).await.unwrap().is_handled());
        assert!(sessions.find(&opened.token).await.unwrap().is_none());

        let response = exchange.into_response();
        let cookie = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.contains("Max-Age=0"));
    }
}

//! Database-backed endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;

use crate::collab::DbConnector;
use crate::error::HandlerError;
use crate::exchange::{Exchange, Outcome};
use crate::handler::RequestHandler;

/// Runs configured SQL against the database collaborator.
///
/// The exchange's argument map is handed to the connector for binding,
/// so the same statement serves every matched request. Whatever the
/// connector returns is the JSON response body.
pub struct QueryEndpoint {
    db: Arc<dyn DbConnector>,
    sql: String,
}

impl QueryEndpoint {
    pub fn new(db: Arc<dyn DbConnector>, sql: &str) -> Self {
        Self { db, sql: sql.to_string() }
    }
}

#[async_trait]
impl RequestHandler for QueryEndpoint {
    async fn handle(&self, exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        let rows = self.db.query(&self.sql, exchange.args()).await?;
        exchange.reply_json(StatusCode::OK, &rows)?;
        Ok(Outcome::Handled)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::Request;
    use serde_json::json;

    use super::*;
    use crate::collab::MockDbConnector;

    #[tokio::test]
    async fn query_results_become_the_json_body() {
        let mut db = MockDbConnector::new();
        db.expect_query()
            .withf(|sql, args| sql == "SELECT * FROM users WHERE id = :id" && args.contains_key("id"))
            .returning(|_, _| Ok(json!([{"id": 7, "name": "Ada"}])));

        let endpoint = QueryEndpoint::new(Arc::new(db), "SELECT * FROM users WHERE id = :id");
        let request = Request::builder().uri("/users/7").body(Bytes::new()).unwrap();
        let mut exchange = Exchange::new(request);
        exchange.insert_arg("id", json!("7"));

        assert!(endpoint.handle(&mut exchange).await.unwrap().is_handled());
        let response = exchange.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), br#"[{"id":7,"name":"Ada"}]"#);
    }

    #[tokio::test]
    async fn connector_failures_propagate() {
        let mut db = MockDbConnector::new();
        db.expect_query().returning(|_, _| Err(HandlerError::message("connection lost")));

        let endpoint = QueryEndpoint::new(Arc::new(db), "SELECT 1");
        let request = Request::builder().uri("/x").body(Bytes::new()).unwrap();
        let mut exchange = Exchange::new(request);

        assert!(endpoint.handle(&mut exchange).await.is_err());
    }
}

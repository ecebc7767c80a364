use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use trellis_api::collab::DbConnector;
use trellis_api::compiler::ApiBuilder;
use trellis_api::error::HandlerError;
use trellis_api::service::ApiServer;

/// Pretend database with two pets in it.
struct PetDb;

#[async_trait]
impl DbConnector for PetDb {
    async fn query(&self, sql: &str, args: &Map<String, Value>) -> Result<Value, HandlerError> {
        let pets = json!([
            {"id": "1", "name": "Rex", "kind": "dog"},
            {"id": "2", "name": "Whiskers", "kind": "cat"}
        ]);
        if sql.contains(":id") {
            let id = args.get("id").and_then(Value::as_str).unwrap_or("");
            let found = pets.as_array().unwrap().iter().find(|pet| pet["id"] == id).cloned();
            return Ok(found.unwrap_or(Value::Null));
        }
        Ok(pets)
    }
}

// curl http://127.0.0.1:8080/pets
// curl http://127.0.0.1:8080/pets/2
// curl http://127.0.0.1:8080/docs
#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = json!({
        "version": "1.0.0",
        "title": "Pet Store",
        "api": {
            "/pets": {
                "GET": {"sql": "SELECT * FROM pets", "help": "List all pets"},
                "/:id": {
                    "GET": {
                        "sql": "SELECT * FROM pets WHERE id = :id",
                        "help": "Fetch one pet",
                        "args": {"id": {}}
                    }
                }
            },
            "/docs": {"GET": {"handler": "docs", "docs": false}},
            "/ping": {"GET": {"handler": "status", "help": "Liveness probe"}}
        }
    });

    let api = ApiBuilder::new()
        .with_db(Arc::new(PetDb))
        .compile(&config)
        .expect("config compiles");

    let addr: SocketAddr = "127.0.0.1:8080".parse().expect("valid address");
    info!(%addr, "pet store ready");
    if let Err(e) = ApiServer::new(addr, api).run().await {
        error!(cause = %e, "server stopped");
    }
}

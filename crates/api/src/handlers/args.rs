//! Request argument collection and validation.

use async_trait::async_trait;
use http::StatusCode;
use serde_json::{json, Map, Value};

use crate::error::HandlerError;
use crate::exchange::{Exchange, Outcome};
use crate::handler::RequestHandler;
use crate::value::ValueExt;

/// Folds query string and body parameters into the argument map.
///
/// Sits at the root of every compiled tree, ahead of all routing, so
/// downstream handlers see one uniform map. Query parameters land
/// first, then a JSON or form body merges over them; URL pattern
/// captures are added later by the matcher that wins the route and
/// override both. Malformed input is answered with a 400 directly.
#[derive(Default)]
pub struct ArgsParser;

impl ArgsParser {
    pub fn new() -> Self {
        Self
    }

    fn reject(exchange: &mut Exchange, reason: &str) -> Result<Outcome, HandlerError> {
        exchange.reply_json(StatusCode::BAD_REQUEST, &json!({"error": reason}))?;
        Ok(Outcome::Handled)
    }
}

#[async_trait]
impl RequestHandler for ArgsParser {
    async fn handle(&self, exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        if let Some(query) = exchange.query() {
            let pairs: Vec<(String, String)> = match serde_urlencoded::from_str(query) {
                Ok(pairs) => pairs,
                Err(_) => return Self::reject(exchange, "malformed query string"),
            };
            for (name, value) in pairs {
                exchange.insert_arg(&name, Value::String(value));
            }
        }

        let body = exchange.request().body().clone();
        if body.is_empty() {
            return Ok(Outcome::Pass);
        }

        match exchange.content_type() {
            Some(mime) if mime.subtype() == mime::JSON => {
                let parsed: Value = match serde_json::from_slice(&body) {
                    Ok(parsed) => parsed,
                    Err(_) => return Self::reject(exchange, "malformed json body"),
                };
                if let Value::Object(dict) = parsed {
                    for (name, value) in dict {
                        exchange.insert_arg(&name, value);
                    }
                }
            }
            Some(mime) if mime.subtype() == mime::WWW_FORM_URLENCODED => {
                let pairs: Vec<(String, String)> = match serde_urlencoded::from_bytes(&body) {
                    Ok(pairs) => pairs,
                    Err(_) => return Self::reject(exchange, "malformed form body"),
                };
                for (name, value) in pairs {
                    exchange.insert_arg(&name, Value::String(value));
                }
            }
            _ => {}
        }

        Ok(Outcome::Pass)
    }
}

/// One entry from a method's `args` specification.
struct ArgSpec {
    name: String,
    optional: bool,
    default: Option<Value>,
}

/// Enforces a method's declared arguments before its endpoint runs.
///
/// Missing arguments with a `default` are filled in; missing required
/// arguments are answered with a 400 naming the argument. Always
/// passes once the map satisfies the specification.
pub struct ArgsValidator {
    specs: Vec<ArgSpec>,
}

impl ArgsValidator {
    pub fn from_config(args: &Map<String, Value>) -> Self {
        let specs = args
            .iter()
            .map(|(name, spec)| ArgSpec {
                name: name.clone(),
                optional: spec.get_bool_or("optional", false),
                default: spec.get("default").cloned(),
            })
            .collect();
        Self { specs }
    }
}

#[async_trait]
impl RequestHandler for ArgsValidator {
    async fn handle(&self, exchange: &mut Exchange) -> Result<Outcome, HandlerError> {
        for spec in &self.specs {
            if exchange.arg(&spec.name).is_some() {
                continue;
            }
            if let Some(default) = &spec.default {
                exchange.insert_arg(&spec.name, default.clone());
                continue;
            }
            if spec.optional {
                continue;
            }
            exchange.reply_json(
                StatusCode::BAD_REQUEST,
                &json!({"error": format!("missing argument: {}", spec.name)}),
            )?;
            return Ok(Outcome::Handled);
        }
        Ok(Outcome::Pass)
    }
}

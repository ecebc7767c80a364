//! Compiles a configuration document into a handler tree.
//!
//! Compilation is a pure function of the document and the collaborators
//! registered on the [`ApiBuilder`]: the same inputs always produce an
//! equivalent tree, and every structural problem in the document fails
//! the compile rather than surfacing at request time. The resulting
//! [`Api`] is immutable and shared freely across connections.
//!
//! Each node of the document contributes a handler group. Method keys
//! (`GET`, `PUT|POST`) become method-gated chains matching the node's
//! accumulated URL pattern exactly; keys starting with `/` extend the
//! pattern and recurse. A request walks the groups in document order
//! until a handler claims it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::collab::{DbConnector, ProviderSet, ResourceSet, SessionManager, SubprocessPool};
use crate::compose::{HandlerGroup, MethodMatcher, PatternMatcher};
use crate::context::Context;
use crate::docs::{ApiDocs, DocsRegistry};
use crate::error::{ConfigError, HandlerError};
use crate::exchange::{Exchange, Outcome};
use crate::handler::DynHandler;
use crate::handlers::arg_filter::ArgFilter;
use crate::handlers::args::{ArgsParser, ArgsValidator};
use crate::handlers::auth::{LoginEndpoint, LogoutEndpoint, SessionEndpoint};
use crate::handlers::basic::{HeaderInjector, PassEndpoint, RedirectEndpoint, StatusEndpoint};
use crate::handlers::cors::CorsHandler;
use crate::handlers::docs::DocsEndpoint;
use crate::handlers::file::FileEndpoint;
use crate::handlers::query::QueryEndpoint;
use crate::handlers::resource::ResourceEndpoint;
use crate::methods::MethodSet;
use crate::pattern::UrlPattern;
use crate::resolver;
use crate::value::ValueExt;
use crate::version::Version;

/// What a method entry asks for, before any handler is built.
#[derive(Debug, Clone, PartialEq)]
enum EndpointKind {
    Bind(String),
    Named(String),
    Query(String),
    File(String),
    Resource(String),
    List(Vec<Value>),
    Pass,
}

/// Decides the endpoint kind of a method entry.
///
/// The first recognized key wins, so an entry carrying both `bind` and
/// `sql` is a bind. A bare string is shorthand for a bind and an entry
/// naming nothing falls through to a pass endpoint.
fn classify(config: &Value) -> EndpointKind {
    if let Some(key) = config.as_str() {
        return EndpointKind::Bind(key.to_string());
    }
    if let Some(name) = config.get_str("handler") {
        return EndpointKind::Named(name.to_string());
    }
    if let Some(key) = config.get_str("bind") {
        return EndpointKind::Bind(key.to_string());
    }
    if let Some(sql) = config.get_str("sql") {
        return EndpointKind::Query(sql.to_string());
    }
    if let Some(path) = config.get_str("path") {
        return EndpointKind::File(path.to_string());
    }
    if let Some(name) = config.get_str("resource") {
        return EndpointKind::Resource(name.to_string());
    }
    if let Some(entries) = config.get_list("handlers") {
        return EndpointKind::List(entries.clone());
    }
    EndpointKind::Pass
}

/// Short text for the docs registry.
fn describe(kind: &EndpointKind) -> String {
    match kind {
        EndpointKind::Bind(key) => format!("bind({key})"),
        EndpointKind::Named(name) => name.clone(),
        EndpointKind::Query(_) => "query".to_string(),
        EndpointKind::File(_) => "file".to_string(),
        EndpointKind::Resource(_) => "resource".to_string(),
        EndpointKind::List(entries) => {
            let parts: Vec<String> = entries.iter().map(|entry| describe(&classify(entry))).collect();
            format!("handlers({})", parts.join(", "))
        }
        EndpointKind::Pass => "pass".to_string(),
    }
}

/// Collects collaborators and bound handlers, then compiles documents.
#[derive(Default)]
pub struct ApiBuilder {
    variables: Map<String, Value>,
    binds: HashMap<String, DynHandler>,
    db: Option<Arc<dyn DbConnector>>,
    subprocess: Option<Arc<dyn SubprocessPool>>,
    sessions: Option<Arc<dyn SessionManager>>,
    providers: ProviderSet,
    resources: Option<ResourceSet>,
}

impl fmt::Debug for ApiBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiBuilder")
            .field("variables", &self.variables)
            .field("binds", &self.binds.len())
            .finish_non_exhaustive()
    }
}

impl ApiBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines a `${name}` substitution available to the document.
    pub fn variable(mut self, name: &str, value: Value) -> Self {
        self.variables.insert(name.to_string(), value);
        self
    }

    /// Registers a handler the document can reference by key.
    pub fn bind(mut self, key: &str, handler: DynHandler) -> Result<Self, ConfigError> {
        if self.binds.contains_key(key) {
            return Err(ConfigError::duplicate_bind(key));
        }
        self.binds.insert(key.to_string(), handler);
        Ok(self)
    }

    pub fn with_db(mut self, db: Arc<dyn DbConnector>) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_subprocess_pool(mut self, pool: Arc<dyn SubprocessPool>) -> Self {
        self.subprocess = Some(pool);
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_providers(mut self, providers: ProviderSet) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_resources(mut self, resources: ResourceSet) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Compiles `config` into a servable [`Api`].
    pub fn compile(self, config: &Value) -> Result<Api, ConfigError> {
        let resolved = resolver::resolve(config, &self.variables)?;

        let version_text = resolved
            .get_str("version")
            .ok_or_else(|| ConfigError::invalid("config", "missing version"))?;
        let version: Version = version_text.parse()?;
        if version < Version::MIN_SUPPORTED {
            return Err(ConfigError::version_too_low(version, Version::MIN_SUPPORTED));
        }

        let title = resolved.get_str_or("title", "API");
        let docs = Arc::new(DocsRegistry::new(title, version_text));

        let api_node = resolved
            .get("api")
            .ok_or_else(|| ConfigError::invalid("config", "missing api section"))?;
        let tree = self.compile_node(&Context::root(api_node), &docs)?;

        let mut root = HandlerGroup::new();
        root.push(Arc::new(ArgsParser::new()));
        root.push(tree);
        docs.freeze();

        let endpoints = docs.snapshot().endpoints.len();
        info!(version = %version, endpoints, "api compiled");
        Ok(Api { root: Arc::new(root), docs })
    }

    fn compile_node(&self, ctx: &Context<'_>, docs: &Arc<DocsRegistry>) -> Result<DynHandler, ConfigError> {
        let dict = ctx
            .config()
            .as_object()
            .ok_or_else(|| ConfigError::invalid(ctx.path(), "expected an object"))?;

        let mut methods = HandlerGroup::new();
        let mut children = HandlerGroup::new();
        for (key, child_config) in dict {
            if key.starts_with('/') {
                let child_ctx = ctx.child(child_config, key);
                children.push(self.compile_node(&child_ctx, docs)?);
                continue;
            }
            let set = MethodSet::parse(key);
            if !set.is_empty() {
                let method_ctx = ctx.method_child(child_config, key);
                methods.push(self.compile_method(&method_ctx, set, docs)?);
            }
            // anything else configures the node and is not routed
        }

        let mut group = HandlerGroup::new();
        if !methods.is_empty() {
            // the bare root pattern would never match a real path
            let exact = if ctx.at_root() { "/" } else { ctx.pattern() };
            let pattern = UrlPattern::compile(exact, false)?;
            group.push(Arc::new(PatternMatcher::new(pattern, Arc::new(methods))));
        }
        if !children.is_empty() {
            if ctx.at_root() {
                group.push(Arc::new(children));
            } else {
                // children only see paths longer than this node's own
                let pattern = UrlPattern::compile(ctx.pattern(), true)?;
                group.push(Arc::new(PatternMatcher::new(pattern, Arc::new(children))));
            }
        }
        Ok(Arc::new(group))
    }

    fn compile_method(
        &self,
        ctx: &Context<'_>,
        methods: MethodSet,
        docs: &Arc<DocsRegistry>,
    ) -> Result<DynHandler, ConfigError> {
        let config = ctx.config();
        let kind = classify(config);
        let mut endpoint = self.build_endpoint(&kind, config, ctx.path(), docs)?;

        if let Some(program) = config.get_str("arg-filter") {
            let pool = self.subprocess.clone().ok_or_else(|| {
                ConfigError::missing_collaborator(ctx.path(), &describe(&kind), "subprocess pool")
            })?;
            endpoint = Arc::new(ArgFilter::new(pool, program, endpoint));
        }

        let mut chain = HandlerGroup::new();
        if let Some(args) = config.get_dict("args") {
            chain.push(Arc::new(ArgsValidator::from_config(args)));
        }
        if let Some(headers) = config.get_dict("headers") {
            chain.push(Arc::new(HeaderInjector::from_config(ctx.path(), headers)?));
        }
        chain.push(endpoint);

        docs.load_method(ctx.pattern(), methods, &describe(&kind), config);
        debug!(pattern = ctx.pattern(), methods = %methods, endpoint = %describe(&kind), "method compiled");
        Ok(Arc::new(MethodMatcher::new(methods, Arc::new(chain))))
    }

    fn build_endpoint(
        &self,
        kind: &EndpointKind,
        config: &Value,
        path: &str,
        docs: &Arc<DocsRegistry>,
    ) -> Result<DynHandler, ConfigError> {
        match kind {
            EndpointKind::Bind(key) => self
                .binds
                .get(key)
                .cloned()
                .ok_or_else(|| ConfigError::unknown_bind(path, key)),
            EndpointKind::Query(sql) => {
                let db = self
                    .db
                    .clone()
                    .ok_or_else(|| ConfigError::missing_collaborator(path, "query", "db"))?;
                Ok(Arc::new(QueryEndpoint::new(db, sql)))
            }
            EndpointKind::File(file) => Ok(Arc::new(FileEndpoint::new(file))),
            EndpointKind::Resource(name) => {
                let resources = self.resources.clone().ok_or_else(|| {
                    ConfigError::missing_collaborator(path, "resource", "resource set")
                })?;
                Ok(Arc::new(ResourceEndpoint::new(resources, name)))
            }
            EndpointKind::List(entries) => {
                let mut group = HandlerGroup::new();
                for entry in entries {
                    group.push(self.build_endpoint(&classify(entry), entry, path, docs)?);
                }
                Ok(Arc::new(group))
            }
            EndpointKind::Pass => Ok(Arc::new(PassEndpoint::new())),
            EndpointKind::Named(name) => match name.as_str() {
                "pass" => Ok(Arc::new(PassEndpoint::new())),
                "status" => Ok(Arc::new(StatusEndpoint::from_config(path, config)?)),
                "redirect" => Ok(Arc::new(RedirectEndpoint::from_config(path, config)?)),
                "cors" => Ok(Arc::new(CorsHandler::from_config(path, config)?)),
                "docs" => Ok(Arc::new(DocsEndpoint::new(docs.clone()))),
                "login" => {
                    let (providers, sessions) = self.auth_collab(path, "login")?;
                    Ok(Arc::new(LoginEndpoint::new(
                        providers,
                        sessions,
                        config.get_str("provider"),
                        config.get_str_or("redirect", ""),
                    )))
                }
                "logout" => {
                    let (_, sessions) = self.auth_collab(path, "logout")?;
                    Ok(Arc::new(LogoutEndpoint::new(sessions)))
                }
                "session" => {
                    let (_, sessions) = self.auth_collab(path, "session")?;
                    Ok(Arc::new(SessionEndpoint::new(sessions)))
                }
                other => Err(ConfigError::unknown_endpoint(path, other)),
            },
        }
    }

    /// Auth endpoints need both providers and session storage.
    fn auth_collab(
        &self,
        path: &str,
        endpoint: &str,
    ) -> Result<(ProviderSet, Arc<dyn SessionManager>), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::missing_collaborator(path, endpoint, "oauth2 provider"));
        }
        let sessions = self
            .sessions
            .clone()
            .ok_or_else(|| ConfigError::missing_collaborator(path, endpoint, "session manager"))?;
        Ok((self.providers.clone(), sessions))
    }
}

/// A compiled handler tree, ready to serve.
pub struct Api {
    root: DynHandler,
    docs: Arc<DocsRegistry>,
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api").finish_non_exhaustive()
    }
}

impl Api {
    /// Runs one request through the tree.
    ///
    /// A request no handler claims is answered 404 here, so callers
    /// always get a response for every successfully handled exchange.
    pub async fn dispatch(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HandlerError> {
        let mut exchange = Exchange::new(request);
        match self.root.handle(&mut exchange).await? {
            Outcome::Handled => Ok(exchange.into_response()),
            Outcome::Pass => {
                debug!(path = exchange.uri_path(), "no handler matched");
                exchange.reply_json(StatusCode::NOT_FOUND, &json!({"error": "not found"}))?;
                Ok(exchange.into_response())
            }
        }
    }

    /// The documentation snapshot frozen at compile time.
    pub fn docs(&self) -> Arc<ApiDocs> {
        self.docs.snapshot()
    }
}

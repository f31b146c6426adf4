//! HTTP entry adapter
//!
//! Serves a GraphQL schema at `/api`. For every request the adapter builds a
//! [`Core`], starts its session, decodes the GraphQL request from the query
//! string (GET) or the JSON body (POST), executes it and writes the response
//! [`Envelope`].
//!
//! The response status comes from the errors: a query validation error sets
//! 400, a resolver error sets its kind's status. When several errors occur,
//! the last one decides.

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_graphql::{ObjectType, Schema, ServerError, SubscriptionType};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use axum_extra::extract::CookieJar;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::Credentials;
use crate::config::{Config, CorsConfig, Environment};
use crate::context::{ContextDecorator, Core};
use crate::detail::ErrorDetailer;
use crate::envelope::{error_reply, reply, Envelope, ResponseExtensions};
use crate::error::{Error, ErrorFactory, Override};
use crate::failure::Failure;
use crate::kind::ErrorKind;
use crate::logging::{trace_field, CLOUD_TRACE_HEADER};
use crate::token::{TokenError, TokenIssuer};
use crate::validation::FieldViolations;
use crate::StartupError;

/// A GraphQL service, ready to be routed or served.
pub struct App<Q, M, S> {
    inner: Arc<AppInner<Q, M, S>>,
}

struct AppInner<Q, M, S> {
    schema: Schema<Q, M, S>,
    config: Config,
    errors: ErrorFactory,
    decorator: Arc<dyn ContextDecorator>,
    issuer: Arc<TokenIssuer>,
    db: Option<PgPool>,
    cors: CorsLayer,
}

impl<Q, M, S> Clone for App<Q, M, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Q, M, S> fmt::Debug for App<Q, M, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Collects the schema and the application hooks.
///
/// The error detailer and the context decorator are required; building
/// without either fails.
pub struct AppBuilder<Q, M, S> {
    config: Config,
    schema: Schema<Q, M, S>,
    detailer: Option<Arc<dyn ErrorDetailer>>,
    decorator: Option<Arc<dyn ContextDecorator>>,
    db: Option<PgPool>,
}

impl<Q, M, S> App<Q, M, S>
where
    Q: ObjectType + 'static,
    M: ObjectType + 'static,
    S: SubscriptionType + 'static,
{
    pub fn builder(config: Config, schema: Schema<Q, M, S>) -> AppBuilder<Q, M, S> {
        AppBuilder {
            config,
            schema,
            detailer: None,
            decorator: None,
            db: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn db(&self) -> Option<&PgPool> {
        self.inner.db.as_ref()
    }

    /// Routes with CORS, request tracing and panic recovery applied.
    pub fn router(&self) -> Router {
        let api = get(graphql_handler::<Q, M, S>)
            .post(graphql_handler::<Q, M, S>)
            .fallback(method_not_allowed::<Q, M, S>);

        let env = self.inner.config.env;
        Router::new()
            .route("/api", api.clone())
            .route("/api/", api)
            .fallback(route_not_found::<Q, M, S>)
            .with_state(self.clone())
            .layer(self.inner.cors.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CatchPanicLayer::custom(move |panic: Box<dyn Any + Send + 'static>| {
                panic_response(env, panic)
            }))
    }

    /// Serve on `0.0.0.0:{server.port}` until Ctrl-C, then close the database pool.
    pub async fn serve(self) -> Result<(), StartupError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.inner.config.server.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, env = ?self.inner.config.env, "listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        if let Some(db) = &self.inner.db {
            db.close().await;
            tracing::info!("database pool closed");
        }
        Ok(())
    }

    fn core(&self, method: &Method, uri: &Uri, headers: &HeaderMap, jar: CookieJar) -> Core {
        let id = Uuid::new_v4().to_string();
        let user_agent = header_str(headers, header::USER_AGENT.as_str()).unwrap_or_default();
        let span = tracing::info_span!(
            "request",
            id = %id,
            method = %method,
            uri = %uri,
            user_agent = %user_agent,
            trace = tracing::field::Empty,
        );

        let project = self
            .inner
            .config
            .google_cloud
            .as_ref()
            .map(|gcloud| gcloud.project_id.as_str());
        if let Some(trace) = trace_field(project, header_str(headers, CLOUD_TRACE_HEADER)) {
            span.record("trace", trace.as_str());
        }

        Core::new(
            id,
            self.inner.config.env,
            self.inner.errors.clone(),
            Arc::clone(&self.inner.issuer),
        )
        .with_span(span)
        .with_db(self.inner.db.clone())
        .with_cookies(jar)
    }

    /// Answer with `kind` after starting the session, so a bad token still wins.
    fn reject(
        &self,
        kind: ErrorKind,
        op: &str,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        jar: CookieJar,
    ) -> Response {
        let credentials = Credentials::from_request(&headers, &uri, &jar);
        let core = self.core(&method, &uri, &headers, jar);
        let _entered = core.span().clone().entered();
        core.add_op(op);

        let error = match core.start_session(&credentials) {
            Ok(()) => core.new_error(kind, []),
            Err(error) => error,
        };
        error_reply(&core, &error)
    }
}

impl<Q, M, S> AppBuilder<Q, M, S>
where
    Q: ObjectType + 'static,
    M: ObjectType + 'static,
    S: SubscriptionType + 'static,
{
    pub fn error_detailer(mut self, detailer: impl ErrorDetailer + 'static) -> Self {
        self.detailer = Some(Arc::new(detailer));
        self
    }

    pub fn context_decorator(mut self, decorator: impl ContextDecorator + 'static) -> Self {
        self.decorator = Some(Arc::new(decorator));
        self
    }

    /// Use an existing pool instead of one created from `database` config.
    pub fn database(mut self, db: PgPool) -> Self {
        self.db = Some(db);
        self
    }

    pub fn build(self) -> Result<App<Q, M, S>, StartupError> {
        let detailer = self
            .detailer
            .ok_or(StartupError::MissingHook("error detailer"))?;
        let decorator = self
            .decorator
            .ok_or(StartupError::MissingHook("context decorator"))?;
        self.config.validate().map_err(crate::config::ConfigError::from)?;

        let db = match (self.db, &self.config.database) {
            (Some(db), _) => Some(db),
            (None, Some(database)) => Some(
                PgPoolOptions::new()
                    .max_connections(database.max_connections)
                    .connect_lazy(&database.connection_string())?,
            ),
            (None, None) => None,
        };

        let cors = cors_layer(&self.config.server.cors)?;
        let issuer = Arc::new(TokenIssuer::new(&self.config.server.jwt, self.config.env));

        Ok(App {
            inner: Arc::new(AppInner {
                schema: self.schema,
                config: self.config,
                errors: ErrorFactory::new(detailer),
                decorator,
                issuer,
                db,
                cors,
            }),
        })
    }
}

async fn graphql_handler<Q, M, S>(
    State(app): State<App<Q, M, S>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> Response
where
    Q: ObjectType + 'static,
    M: ObjectType + 'static,
    S: SubscriptionType + 'static,
{
    let credentials = Credentials::from_request(&headers, &uri, &jar);
    let core = Arc::new(app.core(&method, &uri, &headers, jar));
    let span = core.span().clone();

    async move {
        core.add_op("server.graphql");
        if let Err(error) = core.start_session(&credentials) {
            return error_reply(&core, &error);
        }

        let request = match decode_request(&core, &method, &uri, &headers, &body) {
            Ok(request) => request,
            Err(error) => return error_reply(&core, &error),
        };

        let request = app
            .inner
            .decorator
            .decorate(&core, request.data(Arc::clone(&core)));
        let response = app.inner.schema.execute(request).await;

        // Null data with only pathless errors means validation stopped execution.
        let executed = response.data != async_graphql::Value::Null
            || response.errors.iter().all(|err| !err.path.is_empty());
        let mut status = StatusCode::OK;
        let mut envelope = Envelope::new(core.extensions());
        if executed {
            envelope = envelope.with_data(response.data);
        }
        for server_error in response.errors {
            match resolver_error(&core, &server_error) {
                Some(error) => {
                    status = error.http_status();
                    envelope.push_error(error.to_string(), Some(core.error_extensions(&error)));
                }
                None => {
                    tracing::debug!(message = %server_error.message, "query validation failed");
                    status = StatusCode::BAD_REQUEST;
                    envelope.push_error(server_error.message, None);
                }
            }
        }

        reply(&core, status, envelope)
    }
    .instrument(span)
    .await
}

async fn route_not_found<Q, M, S>(
    State(app): State<App<Q, M, S>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response
where
    Q: ObjectType + 'static,
    M: ObjectType + 'static,
    S: SubscriptionType + 'static,
{
    app.reject(ErrorKind::ROUTE_NOT_FOUND, "server.route_not_found", method, uri, headers, jar)
}

async fn method_not_allowed<Q, M, S>(
    State(app): State<App<Q, M, S>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response
where
    Q: ObjectType + 'static,
    M: ObjectType + 'static,
    S: SubscriptionType + 'static,
{
    app.reject(ErrorKind::METHOD_NOT_ALLOWED, "server.method_not_allowed", method, uri, headers, jar)
}

fn decode_request(
    core: &Core,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<async_graphql::Request, Error> {
    if method == Method::GET {
        return async_graphql::http::parse_query_string(uri.query().unwrap_or_default())
            .map_err(|err| core.new_error(Failure::msg(err.to_string()), [ErrorKind::INVALID_JSON.into()]));
    }

    if let Some(content_type) = header_str(headers, header::CONTENT_TYPE.as_str()) {
        if !is_json(content_type) {
            return Err(core.new_error(
                ErrorKind::INVALID_CONTENT_TYPE,
                [Override::Message(format!(
                    "The provided Content-Type {content_type:?} was not application/json"
                ))],
            ));
        }
    }

    serde_json::from_slice::<async_graphql::Request>(body)
        .map_err(|err| core.new_error(err, [ErrorKind::INVALID_JSON.into()]))
}

fn is_json(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    essence.eq_ignore_ascii_case("application/json") || essence.ends_with("+json")
}

/// The classified error behind a resolver failure.
///
/// Errors without a path never reached a resolver: they come from parsing or
/// validating the query and get `None`.
fn resolver_error(core: &Core, err: &ServerError) -> Option<Error> {
    if let Some(error) = err.source::<Error>() {
        return Some(core.new_error(error.clone(), []));
    }
    if let Some(failure) = err.source::<Failure>() {
        return Some(core.new_error(failure.clone(), []));
    }
    if let Some(kind) = err.source::<ErrorKind>() {
        return Some(core.new_error(*kind, []));
    }
    if let Some(violations) = err.source::<FieldViolations>() {
        return Some(core.new_error(violations.clone(), []));
    }
    if let Some(failure) = native_failure(err) {
        return Some(core.new_error(failure, []));
    }
    if err.path.is_empty() {
        return None;
    }
    Some(core.new_error(Failure::msg(err.message.clone()), []))
}

/// Recover a failure the detailer knows about from a resolver error raised
/// with a bare `?`.
fn native_failure(err: &ServerError) -> Option<Failure> {
    fn shared<E>(source: &Arc<dyn Any + Send + Sync>) -> Option<Failure>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Arc::clone(source).downcast::<E>().ok().map(Failure::shared)
    }

    let source = err.source.as_ref()?;
    shared::<sqlx::Error>(source)
        .or_else(|| shared::<serde_json::Error>(source))
        .or_else(|| shared::<TokenError>(source))
        .or_else(|| shared::<jsonwebtoken::errors::Error>(source))
}

fn panic_response(env: Environment, panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic".to_string()
    };

    let id = Uuid::new_v4().to_string();
    let error = Error::new(ErrorKind::UNKNOWN).with_cause(Failure::msg(message));
    tracing::error!(severe = true, id = %id, cause = %error.cause().map(ToString::to_string).unwrap_or_default(), "recovered from panic");

    let mut envelope = Envelope::new(ResponseExtensions { id });
    envelope.push_error(error.to_string(), Some(error.extensions(env, &[])));
    axum::response::IntoResponse::into_response((error.http_status(), axum::Json(envelope)))
}

fn cors_layer(config: &CorsConfig) -> Result<CorsLayer, StartupError> {
    let origins = if config.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(parse_all::<HeaderValue>(&config.allowed_origins)?)
    };
    let headers = if config.allowed_headers.iter().any(|h| h == "*") {
        AllowHeaders::any()
    } else {
        AllowHeaders::list(parse_all::<HeaderName>(&config.allowed_headers)?)
    };
    let methods = AllowMethods::list(parse_all::<Method>(&config.allowed_methods)?);

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_headers(headers)
        .allow_methods(methods)
        .allow_credentials(config.allow_credentials)
        .max_age(Duration::from_secs(config.max_age_secs)))
}

fn parse_all<T: FromStr>(values: &[String]) -> Result<Vec<T>, StartupError> {
    values
        .iter()
        .map(|value| {
            value
                .parse()
                .map_err(|_| StartupError::Cors(value.clone()))
        })
        .collect()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

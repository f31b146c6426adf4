//! # graphql-service-core
//!
//! Request core for GraphQL-over-HTTP services.
//!
//! ## Features
//!
//! - **Error Taxonomy** - `ErrorKind` codes that carry their HTTP status, classified `Error` values
//! - **Sessions** - JWT access tokens from header, query or cookie, refresh tokens in a cookie
//! - **Request Core** - per-request context with operation trail, session and datastore pool
//! - **HTTP Adapter** - axum router serving a schema with a uniform JSON envelope
//! - **Config & Logging** - YAML config with validation, `tracing` setup
//!
//! ## Usage
//!
//! ```rust,no_run
//! use async_graphql::{EmptyMutation, EmptySubscription, Object, Schema};
//! use std::sync::Arc;
//!
//! use graphql_service_core::{App, Config, Core, DefaultErrorDetailer};
//!
//! struct Query;
//!
//! #[Object]
//! impl Query {
//!     async fn ping(&self) -> String {
//!         "pong".to_string()
//!     }
//! }
//!
//! # async fn run() -> graphql_service_core::Result<()> {
//! let config = Config::from_args()?;
//! graphql_service_core::logging::init(&config)?;
//!
//! let schema = Schema::new(Query, EmptyMutation, EmptySubscription);
//! App::builder(config, schema)
//!     .error_detailer(DefaultErrorDetailer)
//!     .context_decorator(|_: &Arc<Core>, request: async_graphql::Request| request)
//!     .build()?
//!     .serve()
//!     .await
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod context;
pub mod detail;
pub mod envelope;
pub mod error;
pub mod failure;
pub mod kind;
pub mod logging;
pub mod server;
pub mod session;
pub mod token;
pub mod validation;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use crate::auth::{current_user_id, request_core, require_user_id, Credentials};
pub use crate::config::{Config, ConfigError, Environment};
pub use crate::context::{ContextDecorator, Core};
pub use crate::detail::{Classification, DefaultErrorDetailer, ErrorDetailer};
pub use crate::envelope::Envelope;
pub use crate::error::{Error, ErrorExtensions, ErrorFactory, Override};
pub use crate::failure::Failure;
pub use crate::kind::{ErrorKind, Severity};
pub use crate::server::{App, AppBuilder};
pub use crate::session::{Session, SessionError, Transition};
pub use crate::token::{Claims, TokenError, TokenIssuer};
pub use crate::validation::{FieldViolations, Rule};

/// Errors that stop a service from starting
#[derive(thiserror::Error, Debug)]
pub enum StartupError {
    #[error("missing required hook: {0}")]
    MissingHook(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to initialize logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("invalid CORS value: {0:?}")]
    Cors(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for service startup
pub type Result<T> = std::result::Result<T, StartupError>;

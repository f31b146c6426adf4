//! Per-request context
//!
//! A [`Core`] is created for every request by the HTTP adapter and handed to
//! resolvers through the GraphQL context as an `Arc<Core>`. It owns the
//! request's session, operation trail and outgoing cookies, and borrows the
//! process-wide datastore pool.

use std::fmt;
use std::sync::Arc;

use axum_extra::extract::cookie::Cookie;
use axum_extra::extract::CookieJar;
use parking_lot::{Mutex, RwLock};
use sqlx::PgPool;
use tracing::Span;

use crate::auth::Credentials;
use crate::config::Environment;
use crate::envelope::ResponseExtensions;
use crate::error::{Error, ErrorExtensions, ErrorFactory, Override};
use crate::failure::Failure;
use crate::session::{Session, SessionError, Transition, REFRESH_TOKEN_COOKIE};
use crate::token::TokenIssuer;

/// Request context shared by the adapter and every resolver of one request.
pub struct Core {
    id: String,
    span: Span,
    env: Environment,
    db: Option<PgPool>,
    errors: ErrorFactory,
    issuer: Arc<TokenIssuer>,
    operations: Mutex<Vec<String>>,
    session: RwLock<Session>,
    cookies: Mutex<CookieJar>,
}

impl Core {
    /// A core with an anonymous session, no datastore and no request cookies.
    pub fn new(id: impl Into<String>, env: Environment, errors: ErrorFactory, issuer: Arc<TokenIssuer>) -> Self {
        Self {
            id: id.into(),
            span: Span::none(),
            env,
            db: None,
            errors,
            session: RwLock::new(Session::anonymous(Arc::clone(&issuer))),
            issuer,
            operations: Mutex::new(Vec::new()),
            cookies: Mutex::new(CookieJar::new()),
        }
    }

    /// Span every log line of this request is recorded in.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_db(mut self, db: Option<PgPool>) -> Self {
        self.db = db;
        self
    }

    /// Cookies sent by the client. Cookies added later are sent back on the response.
    pub fn with_cookies(mut self, jar: CookieJar) -> Self {
        self.cookies = Mutex::new(jar);
        self
    }

    /// Unique request id. Also the `jti` of tokens issued during the request.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn env(&self) -> Environment {
        self.env
    }

    /// The datastore pool, `None` when no database is configured.
    pub fn db(&self) -> Option<&PgPool> {
        self.db.as_ref()
    }

    /// Record entering a logical operation.
    pub fn add_op(&self, op: impl Into<String>) {
        let op = op.into();
        self.span.in_scope(|| tracing::debug!("entering {op}"));
        self.operations.lock().push(op);
    }

    /// Operations entered so far, oldest first.
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().clone()
    }

    /// Authenticate from the request's credentials.
    ///
    /// On failure the session stays anonymous and the returned error carries
    /// `InvalidJwt` or `ExpiredAccessToken`.
    pub fn start_session(&self, credentials: &Credentials) -> Result<(), Error> {
        let session = Session::start(Arc::clone(&self.issuer), credentials)
            .map_err(|err| self.session_error(err))?;
        *self.session.write() = session;
        Ok(())
    }

    fn session_error(&self, err: SessionError) -> Error {
        let kind = err.kind();
        match err {
            SessionError::MalformedAuthorization => {
                let message = err.to_string();
                self.new_error(kind, [Override::Message(message)])
            }
            SessionError::Token(token) => {
                let detail = token.to_string();
                self.new_error(token, [Override::Kind(kind), Override::Detail(detail)])
            }
        }
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.session.read().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.read().is_logged_in()
    }

    pub fn is_anonymous(&self) -> bool {
        self.session.read().is_anonymous()
    }

    pub fn user_id(&self) -> i64 {
        self.session.read().user_id()
    }

    /// Signed access token of the current session, empty when anonymous.
    pub fn access_token(&self) -> String {
        self.session.read().access_token().to_string()
    }

    /// Log in as `user_id`, replacing the session.
    pub fn login(&self, user_id: i64) {
        let transition = self.session.read().login(user_id, &self.id);
        self.apply(transition);
    }

    /// Clear the refresh cookie.
    pub fn logout(&self) {
        let transition = self.session.read().logout();
        self.apply(transition);
    }

    /// Issue a new access token from the request's refresh cookie.
    pub fn refresh_access_token(&self) -> bool {
        let refresh_cookie = self
            .cookies
            .lock()
            .get(REFRESH_TOKEN_COOKIE)
            .map(|cookie| cookie.value().to_string());
        let (transition, refreshed) = self
            .session
            .read()
            .refresh(refresh_cookie.as_deref(), &self.id);
        self.apply(transition);
        refreshed
    }

    fn apply(&self, transition: Transition) {
        if let Some(cookie) = transition.cookie {
            self.add_cookie(cookie);
        }
        *self.session.write() = transition.session;
    }

    /// Add a cookie to the response.
    pub fn add_cookie(&self, cookie: Cookie<'static>) {
        let mut jar = self.cookies.lock();
        *jar = jar.clone().add(cookie);
    }

    /// Request cookies plus everything added during the request.
    pub fn cookie_jar(&self) -> CookieJar {
        self.cookies.lock().clone()
    }

    /// Classify `cause`, logging it in this request's span.
    pub fn new_error<C, O>(&self, cause: C, overrides: O) -> Error
    where
        C: Into<Failure>,
        O: IntoIterator<Item = Override>,
    {
        self.span
            .in_scope(|| self.errors.new_error(cause, overrides))
    }

    /// Extensions of `error` as this request's environment allows them.
    pub fn error_extensions(&self, error: &Error) -> ErrorExtensions {
        error.extensions(self.env, &self.operations())
    }

    /// Top-level `extensions` of the response.
    pub fn extensions(&self) -> ResponseExtensions {
        ResponseExtensions {
            id: self.id.clone(),
        }
    }
}

impl fmt::Debug for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core")
            .field("id", &self.id)
            .field("env", &self.env)
            .field("operations", &*self.operations.lock())
            .field("session", &*self.session.read())
            .finish_non_exhaustive()
    }
}

/// Attaches application dependencies (loaders, clients) to each GraphQL request.
pub trait ContextDecorator: Send + Sync {
    fn decorate(&self, core: &Arc<Core>, request: async_graphql::Request) -> async_graphql::Request;
}

impl<F> ContextDecorator for F
where
    F: Fn(&Arc<Core>, async_graphql::Request) -> async_graphql::Request + Send + Sync,
{
    fn decorate(&self, core: &Arc<Core>, request: async_graphql::Request) -> async_graphql::Request {
        self(core, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::ErrorKind;
    use crate::test_support::{build_test_core, test_config, test_core};

    #[test]
    fn test_operation_trail() {
        let core = test_core(&test_config());
        core.add_op("server.graphql");
        core.add_op("resolver.viewer");
        assert_eq!(core.operations(), vec!["server.graphql", "resolver.viewer"]);
    }

    #[test]
    fn test_start_session_anonymous() {
        let core = test_core(&test_config());
        core.start_session(&Credentials::default()).unwrap();
        assert!(core.is_anonymous());
        assert_eq!(core.user_id(), 0);
        assert_eq!(core.access_token(), "");
    }

    #[test]
    fn test_start_session_malformed_header() {
        let core = test_core(&test_config());
        let err = core
            .start_session(&Credentials::default().with_authorization("Bearer "))
            .unwrap_err();

        assert_eq!(err.kind().code, ErrorKind::INVALID_JWT.code);
        assert!(err.to_string().starts_with("Authorization header must begin with 'Bearer'"));
        assert!(core.is_anonymous());
    }

    #[test]
    fn test_start_session_invalid_token() {
        let core = test_core(&test_config());
        let err = core
            .start_session(&Credentials::default().with_cookie("not-a-jwt"))
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::INVALID_JWT);
        assert!(err.cause().unwrap().type_name().ends_with("TokenError"));
        assert_eq!(err.details().len(), 1);
        assert!(err.details()[0].starts_with("token is invalid"));
    }

    #[test]
    fn test_expired_token_leaves_session_anonymous() {
        let config = test_config();
        let issuer = TokenIssuer::new(&config.server.jwt, config.env);
        let mut claims = issuer.access().issue("old-request", 42);
        claims.iat -= 2000;
        claims.nbf -= 2000;
        claims.exp = claims.iat + 10;
        let token = issuer.access().sign(&claims).unwrap();

        let core = test_core(&config);
        let err = core
            .start_session(&Credentials::default().with_cookie(token))
            .unwrap_err();

        assert_eq!(err.kind(), &ErrorKind::EXPIRED_ACCESS_TOKEN);
        assert_eq!(err.details(), ["token is expired"]);
        assert!(core.is_anonymous());
        assert!(!core.is_logged_in());
        assert_eq!(core.user_id(), 0);
        assert_eq!(core.access_token(), "");
    }

    #[test]
    fn test_login_sets_refresh_cookie() {
        let core = test_core(&test_config());
        core.login(42);

        assert!(core.is_logged_in());
        assert_eq!(core.user_id(), 42);
        assert!(!core.access_token().is_empty());
        let jar = core.cookie_jar();
        assert!(!jar.get(REFRESH_TOKEN_COOKIE).unwrap().value().is_empty());
    }

    #[test]
    fn test_session_carries_over_requests() {
        let config = test_config();
        let first = test_core(&config);
        first.login(42);
        let access = first.access_token();
        let refresh = first.cookie_jar().get(REFRESH_TOKEN_COOKIE).unwrap().clone();

        let second = test_core(&config);
        second
            .start_session(&Credentials::default().with_authorization(format!("Bearer {access}")))
            .unwrap();
        assert_eq!(second.user_id(), 42);

        let third = build_test_core(&config).with_cookies(CookieJar::new().add(refresh));
        assert!(third.refresh_access_token());
        assert_eq!(third.user_id(), 42);
    }

    #[test]
    fn test_logout_clears_cookie() {
        let core = test_core(&test_config());
        core.login(42);
        core.logout();

        let jar = core.cookie_jar();
        let cookie = jar.get(REFRESH_TOKEN_COOKIE).unwrap();
        assert_eq!(cookie.value(), "");
        assert!(core.is_logged_in());
    }

    #[test]
    fn test_refresh_without_cookie() {
        let core = test_core(&test_config());
        assert!(!core.refresh_access_token());
        assert!(core.is_anonymous());
    }

    #[test]
    fn test_error_extensions_include_operations_outside_production() {
        let core = test_core(&test_config());
        core.add_op("resolver.missing");
        let err = core.new_error(ErrorKind::ROW_NOT_FOUND, []);

        let extensions = core.error_extensions(&err);
        assert_eq!(extensions.code, 404_001);
        assert_eq!(extensions.operations, Some(vec!["resolver.missing".to_string()]));
        assert_eq!(core.extensions().id, core.id());
    }
}

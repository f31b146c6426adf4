//! Request credentials and resolver context helpers
//!
//! Provides helpers for:
//! - Collecting the access token candidates of a request (Authorization
//!   header, `access_token` query parameter, `access_token` cookie)
//! - Getting the request [`Core`] and the current user from a resolver's
//!   GraphQL context

use std::fmt;
use std::sync::Arc;

use async_graphql::Context;
use axum::extract::Query;
use axum::http::{header, HeaderMap, Uri};
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use crate::context::Core;
use crate::kind::ErrorKind;
use crate::session::{SessionError, ACCESS_TOKEN_COOKIE};

const BEARER: &str = "Bearer ";

#[derive(Deserialize)]
struct AccessTokenParam {
    access_token: Option<String>,
}

/// Authorization header as received.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Authorization {
    Value(String),
    /// Present but not visible ASCII.
    Unreadable,
}

/// Access token candidates found on a request.
#[derive(Clone, Default)]
pub struct Credentials {
    authorization: Option<Authorization>,
    query: Option<String>,
    cookie: Option<String>,
}

impl Credentials {
    /// Collect candidates from the raw request parts.
    pub fn from_request(headers: &HeaderMap, uri: &Uri, jar: &CookieJar) -> Self {
        let authorization = headers.get(header::AUTHORIZATION).map(|v| match v.to_str() {
            Ok(value) => Authorization::Value(value.to_string()),
            Err(_) => Authorization::Unreadable,
        });

        let query = Query::<AccessTokenParam>::try_from_uri(uri)
            .ok()
            .and_then(|Query(param)| param.access_token);

        let cookie = jar
            .get(ACCESS_TOKEN_COOKIE)
            .map(|cookie| cookie.value().to_string());

        Self {
            authorization,
            query,
            cookie,
        }
    }

    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(Authorization::Value(value.into()));
        self
    }

    pub fn with_query(mut self, token: impl Into<String>) -> Self {
        self.query = Some(token.into());
        self
    }

    pub fn with_cookie(mut self, token: impl Into<String>) -> Self {
        self.cookie = Some(token.into());
        self
    }

    /// The access token to authenticate with.
    ///
    /// Precedence from highest to lowest: Authorization header, query
    /// parameter, cookie. Empty values count as absent. A non-empty
    /// Authorization header that isn't `Bearer {token}` is an error even if
    /// another source has a token.
    pub fn access_token(&self) -> Result<Option<&str>, SessionError> {
        let authorization = match &self.authorization {
            Some(Authorization::Unreadable) => return Err(SessionError::MalformedAuthorization),
            Some(Authorization::Value(value)) => Some(value.as_str()),
            None => None,
        };
        if let Some(auth) = authorization.filter(|v| !v.is_empty()) {
            return match auth.strip_prefix(BEARER) {
                Some(token) if !token.is_empty() => {
                    tracing::debug!("using access token within authorization header");
                    Ok(Some(token))
                }
                _ => Err(SessionError::MalformedAuthorization),
            };
        }

        if let Some(token) = self.query.as_deref().filter(|v| !v.is_empty()) {
            tracing::debug!("using access token within query parameter");
            return Ok(Some(token));
        }

        if let Some(token) = self.cookie.as_deref().filter(|v| !v.is_empty()) {
            tracing::debug!("using access token within cookie");
            return Ok(Some(token));
        }

        Ok(None)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("authorization", &self.authorization.is_some())
            .field("query", &self.query.is_some())
            .field("cookie", &self.cookie.is_some())
            .finish()
    }
}

/// Get the request [`Core`] from GraphQL context
///
/// # Example
///
/// ```rust,no_run
/// use async_graphql::Context;
/// use graphql_service_core::auth::request_core;
///
/// fn resolver(ctx: &Context<'_>) -> async_graphql::Result<Vec<String>> {
///     let core = request_core(ctx)?;
///     core.add_op("resolver.viewer");
///     Ok(core.operations())
/// }
/// ```
pub fn request_core<'a>(ctx: &Context<'a>) -> async_graphql::Result<&'a Arc<Core>> {
    ctx.data::<Arc<Core>>()
}

/// Get the current user id from GraphQL context, `0` when anonymous.
pub fn current_user_id(ctx: &Context<'_>) -> async_graphql::Result<i64> {
    Ok(request_core(ctx)?.user_id())
}

/// Get the current user id, failing with `Unauthorized` when anonymous.
pub fn require_user_id(ctx: &Context<'_>) -> async_graphql::Result<i64> {
    let core = request_core(ctx)?;
    if core.is_anonymous() {
        return Err(core.new_error(ErrorKind::UNAUTHORIZED, []).into());
    }
    Ok(core.user_id())
}

//! Per-request session
//!
//! A [`Session`] is either anonymous or authenticated by a verified access
//! token. Sessions are values: `login`, `logout` and `refresh` never modify the
//! session they are called on, they return a [`Transition`] holding the
//! session that replaces it and the refresh cookie to send back, if any.

use std::fmt;
use std::sync::{Arc, OnceLock};

use axum_extra::extract::cookie::{Cookie, SameSite};
use thiserror::Error;

use crate::auth::Credentials;
use crate::error::report_defect;
use crate::kind::ErrorKind;
use crate::token::{Claims, TokenError, TokenIssuer};

/// Cookie and query parameter carrying the access token.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
/// Cookie carrying the refresh token.
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

/// Why a session could not be started.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Authorization header must begin with 'Bearer' followed by the access token. (eg 'Bearer {{access_token}}')")]
    MalformedAuthorization,

    #[error(transparent)]
    Token(#[from] TokenError),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedAuthorization => ErrorKind::INVALID_JWT,
            Self::Token(TokenError::Expired(_)) => ErrorKind::EXPIRED_ACCESS_TOKEN,
            Self::Token(TokenError::Invalid(_)) => ErrorKind::INVALID_JWT,
        }
    }
}

struct AccessToken {
    claims: Claims,
    signed: OnceLock<String>,
}

/// The authentication state of one request.
#[derive(Clone)]
pub struct Session {
    issuer: Arc<TokenIssuer>,
    access: Option<Arc<AccessToken>>,
}

/// Result of a session transition.
#[derive(Debug, Clone)]
pub struct Transition {
    pub session: Session,
    /// Refresh cookie to set on the response.
    pub cookie: Option<Cookie<'static>>,
}

impl Session {
    pub fn anonymous(issuer: Arc<TokenIssuer>) -> Self {
        Self {
            issuer,
            access: None,
        }
    }

    /// Start a session from the request's credentials.
    ///
    /// No access token at all gives an anonymous session. A token that is
    /// present but malformed, expired or otherwise invalid is an error.
    pub fn start(issuer: Arc<TokenIssuer>, credentials: &Credentials) -> Result<Self, SessionError> {
        let Some(token) = credentials.access_token()? else {
            return Ok(Self::anonymous(issuer));
        };

        tracing::debug!("parsing access token");
        let claims = issuer.access().verify(token)?;
        let signed = OnceLock::new();
        let _ = signed.set(token.to_string());

        Ok(Self {
            issuer,
            access: Some(Arc::new(AccessToken { claims, signed })),
        })
    }

    fn authenticated(&self, claims: Claims) -> Self {
        Self {
            issuer: Arc::clone(&self.issuer),
            access: Some(Arc::new(AccessToken {
                claims,
                signed: OnceLock::new(),
            })),
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.access.is_some()
    }

    pub fn is_anonymous(&self) -> bool {
        !self.is_logged_in()
    }

    /// Claims of the access token, `None` when anonymous.
    pub fn claims(&self) -> Option<&Claims> {
        self.access.as_ref().map(|access| &access.claims)
    }

    /// The signed access token, empty when anonymous.
    ///
    /// Signing happens at most once per session; later calls return the
    /// cached string. Clones of a session share the cache.
    pub fn access_token(&self) -> &str {
        let Some(access) = &self.access else {
            return "";
        };
        if let Some(signed) = access.signed.get() {
            return signed;
        }

        match self.issuer.access().sign(&access.claims) {
            Ok(signed) => access.signed.get_or_init(|| signed).as_str(),
            Err(err) => {
                report_defect("issue signing access token", err);
                ""
            }
        }
    }

    /// The authenticated user, `0` when anonymous.
    pub fn user_id(&self) -> i64 {
        let Some(claims) = self.claims() else {
            return 0;
        };
        claims.user_id().unwrap_or_else(|| {
            report_defect(
                "could not parse access token's subject to an int",
                format!("subject {:?}", claims.sub),
            );
            0
        })
    }

    /// Authenticate as `user_id`.
    ///
    /// Issues a new access token, plus a refresh cookie when refresh tokens
    /// are configured. Any state of this session, cached token included, is
    /// discarded.
    pub fn login(&self, user_id: i64, jti: &str) -> Transition {
        let cookie = self.issuer.refresh().map(|keys| {
            let claims = keys.issue(jti, user_id);
            tracing::debug!(sub = %claims.sub, exp = claims.exp, "generated refresh token");
            match keys.sign(&claims) {
                Ok(signed) => self.refresh_cookie(signed, max_age(keys.expires_in())),
                Err(err) => {
                    report_defect("issue signing refresh token", err);
                    self.cleared_refresh_cookie()
                }
            }
        });

        let claims = self.issuer.access().issue(jti, user_id);
        tracing::debug!(sub = %claims.sub, exp = claims.exp, "generated access token");

        Transition {
            session: self.authenticated(claims),
            cookie,
        }
    }

    /// Clear the refresh cookie.
    ///
    /// The access token in memory stays as it is. Access tokens are
    /// stateless, so logging out only means the session can't be refreshed.
    pub fn logout(&self) -> Transition {
        Transition {
            session: self.clone(),
            cookie: Some(self.cleared_refresh_cookie()),
        }
    }

    /// Issue a new access token from the refresh cookie's value.
    ///
    /// Returns `false` when refresh tokens aren't configured, or when the
    /// cookie is missing or doesn't verify; in the latter case the cookie is
    /// cleared and the session is unchanged. The refresh token itself is not
    /// rotated.
    pub fn refresh(&self, refresh_cookie: Option<&str>, jti: &str) -> (Transition, bool) {
        let unchanged = |cookie| Transition {
            session: self.clone(),
            cookie,
        };

        let Some(keys) = self.issuer.refresh() else {
            return (unchanged(None), false);
        };
        let Some(token) = refresh_cookie.filter(|value| !value.is_empty()) else {
            return (unchanged(Some(self.cleared_refresh_cookie())), false);
        };

        tracing::debug!("parsing refresh token");
        let claims = match keys.verify(token) {
            Ok(claims) => claims,
            Err(err) => {
                tracing::debug!(error = %err, "refresh token rejected");
                return (unchanged(Some(self.cleared_refresh_cookie())), false);
            }
        };

        let Some(user_id) = claims.user_id() else {
            report_defect(
                "could not parse refresh token's subject to an int",
                format!("subject {:?}", claims.sub),
            );
            return (unchanged(Some(self.cleared_refresh_cookie())), false);
        };

        let access = self.issuer.access().issue(jti, user_id);
        tracing::debug!(sub = %access.sub, exp = access.exp, "generated access token");
        let transition = Transition {
            session: self.authenticated(access),
            cookie: None,
        };
        (transition, true)
    }

    fn refresh_cookie(&self, value: String, max_age: cookie::time::Duration) -> Cookie<'static> {
        Cookie::build((REFRESH_TOKEN_COOKIE, value))
            .max_age(max_age)
            .secure(self.issuer.secure_cookies())
            .http_only(true)
            .same_site(SameSite::Lax)
            .build()
    }

    fn cleared_refresh_cookie(&self) -> Cookie<'static> {
        self.refresh_cookie(String::new(), cookie::time::Duration::seconds(-1))
    }
}

fn max_age(expires_in: std::time::Duration) -> cookie::time::Duration {
    cookie::time::Duration::seconds(i64::try_from(expires_in.as_secs()).unwrap_or(i64::MAX))
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("claims", &self.claims())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Environment, JwtConfig, Secret, TokenConfig};

    fn token_config(secret: &str, expires_in_secs: u64) -> TokenConfig {
        TokenConfig {
            audience: vec!["web".to_string()],
            issuer: "session-tests".to_string(),
            secret: Secret::new(secret),
            expires_in_secs,
            not_before_secs: 0,
        }
    }

    fn issuer(with_refresh: bool) -> Arc<TokenIssuer> {
        let jwt = JwtConfig {
            access_token: token_config("access-secret-0123456789", 900),
            refresh_token: with_refresh.then(|| token_config("refresh-secret-0123456789", 3600)),
        };
        Arc::new(TokenIssuer::new(&jwt, Environment::Staging))
    }

    fn signed_access(issuer: &TokenIssuer, user_id: i64) -> String {
        let keys = issuer.access();
        keys.sign(&keys.issue("other-request", user_id)).unwrap()
    }

    #[test]
    fn test_no_credentials_is_anonymous() {
        let session = Session::start(issuer(true), &Credentials::default()).unwrap();
        assert!(session.is_anonymous());
        assert!(!session.is_logged_in());
        assert_eq!(session.user_id(), 0);
        assert_eq!(session.access_token(), "");
    }

    #[test]
    fn test_header_wins_over_query_and_cookie() {
        let issuer = issuer(false);
        let credentials = Credentials::default()
            .with_authorization(format!("Bearer {}", signed_access(&issuer, 1)))
            .with_query(signed_access(&issuer, 2))
            .with_cookie(signed_access(&issuer, 3));

        let session = Session::start(issuer, &credentials).unwrap();
        assert_eq!(session.user_id(), 1);
    }

    #[test]
    fn test_query_wins_over_cookie() {
        let issuer = issuer(false);
        let credentials = Credentials::default()
            .with_query(signed_access(&issuer, 2))
            .with_cookie(signed_access(&issuer, 3));

        assert_eq!(Session::start(issuer, &credentials).unwrap().user_id(), 2);
    }

    #[test]
    fn test_cookie_is_used_last() {
        let issuer = issuer(false);
        let token = signed_access(&issuer, 3);
        let credentials = Credentials::default().with_cookie(token.clone());

        let session = Session::start(issuer, &credentials).unwrap();
        assert_eq!(session.user_id(), 3);
        assert_eq!(session.access_token(), token);
    }

    #[test]
    fn test_malformed_authorization_header() {
        for header in ["Bearer ", "Bearer", "Token abc.def.ghi", "bearer abc"] {
            let credentials = Credentials::default().with_authorization(header);
            let err = Session::start(issuer(false), &credentials).unwrap_err();
            assert!(matches!(err, SessionError::MalformedAuthorization), "{header}");
            assert_eq!(err.kind(), ErrorKind::INVALID_JWT);
        }
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let issuer = issuer(false);
        let keys = issuer.access();
        let mut claims = keys.issue("old-request", 9);
        claims.iat -= 2000;
        claims.nbf -= 2000;
        claims.exp = claims.iat + 10;
        let token = keys.sign(&claims).unwrap();

        let err = Session::start(issuer, &Credentials::default().with_cookie(token)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EXPIRED_ACCESS_TOKEN);
    }

    #[test]
    fn test_foreign_token_is_invalid() {
        let other = issuer(false);
        let token = {
            let jwt = JwtConfig {
                access_token: token_config("someone-elses-secret-0123", 900),
                refresh_token: None,
            };
            let foreign = TokenIssuer::new(&jwt, Environment::Staging);
            signed_access(&foreign, 5)
        };

        let err = Session::start(other, &Credentials::default().with_query(token)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::INVALID_JWT);
    }

    #[test]
    fn test_login_then_user_id() {
        let anonymous = Session::anonymous(issuer(true));
        let transition = anonymous.login(42, "request-1");

        assert!(transition.session.is_logged_in());
        assert_eq!(transition.session.user_id(), 42);
        assert_eq!(transition.session.claims().unwrap().jti, "request-1");
        assert!(anonymous.is_anonymous());

        let cookie = transition.cookie.unwrap();
        assert_eq!(cookie.name(), REFRESH_TOKEN_COOKIE);
        assert!(!cookie.value().is_empty());
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(cookie::time::Duration::seconds(3600)));
    }

    #[test]
    fn test_login_without_refresh_config_sets_no_cookie() {
        let transition = Session::anonymous(issuer(false)).login(7, "request-1");
        assert_eq!(transition.session.user_id(), 7);
        assert!(transition.cookie.is_none());
    }

    #[test]
    fn test_access_token_is_signed_once() {
        let session = Session::anonymous(issuer(false)).login(42, "request-1").session;
        let first = session.access_token().to_string();
        let second = session.access_token();

        assert!(!first.is_empty());
        assert_eq!(first, second);
        assert!(std::ptr::eq(session.access_token(), session.access_token()));
    }

    #[test]
    fn test_logout_clears_refresh_cookie_only() {
        let logged_in = Session::anonymous(issuer(true)).login(42, "request-1").session;
        let token = logged_in.access_token().to_string();
        let transition = logged_in.logout();

        let cookie = transition.cookie.unwrap();
        assert_eq!(cookie.name(), REFRESH_TOKEN_COOKIE);
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(cookie::time::Duration::seconds(-1)));
        assert!(transition.session.is_logged_in());
        assert_eq!(transition.session.access_token(), token);
    }

    #[test]
    fn test_refresh_without_cookie() {
        let session = Session::anonymous(issuer(true));
        let (transition, refreshed) = session.refresh(None, "request-2");

        assert!(!refreshed);
        assert!(transition.session.is_anonymous());
        assert_eq!(transition.cookie.unwrap().value(), "");
    }

    #[test]
    fn test_refresh_with_garbage_cookie_clears_it() {
        let session = Session::anonymous(issuer(true));
        let (transition, refreshed) = session.refresh(Some("garbage"), "request-2");

        assert!(!refreshed);
        assert!(transition.session.is_anonymous());
        let cookie = transition.cookie.unwrap();
        assert_eq!(cookie.max_age(), Some(cookie::time::Duration::seconds(-1)));
    }

    #[test]
    fn test_refresh_issues_new_access_token() {
        let issuer = issuer(true);
        let login = Session::anonymous(Arc::clone(&issuer)).login(42, "request-1");
        let refresh_token = login.cookie.unwrap().value().to_string();

        let next_request = Session::anonymous(issuer);
        let (transition, refreshed) = next_request.refresh(Some(&refresh_token), "request-2");

        assert!(refreshed);
        assert!(transition.cookie.is_none());
        assert_eq!(transition.session.user_id(), 42);
        assert_eq!(transition.session.claims().unwrap().jti, "request-2");
    }

    #[test]
    fn test_refresh_rejects_access_tokens() {
        let issuer = issuer(true);
        let access = signed_access(&issuer, 42);
        let (transition, refreshed) = Session::anonymous(issuer).refresh(Some(&access), "request-2");

        assert!(!refreshed);
        assert!(transition.session.is_anonymous());
    }

    #[test]
    fn test_refresh_without_refresh_config() {
        let (transition, refreshed) = Session::anonymous(issuer(false)).refresh(Some("x"), "r");
        assert!(!refreshed);
        assert!(transition.cookie.is_none());
    }

    #[test]
    fn test_malformed_subject_is_not_a_crash() {
        let issuer = issuer(false);
        let keys = issuer.access();
        let mut claims = keys.issue("request-1", 1);
        claims.sub = "not-a-number".to_string();
        let token = keys.sign(&claims).unwrap();

        let session = Session::start(issuer, &Credentials::default().with_cookie(token)).unwrap();
        assert!(session.is_logged_in());
        assert_eq!(session.user_id(), 0);
    }
}

//! JSON web tokens
//!
//! Access and refresh tokens are HMAC-signed JWTs carrying only the registered
//! claims. Each kind of token has its own secret, lifetime and not-before
//! offset; see [`TokenConfig`](crate::config::TokenConfig).

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{Environment, JwtConfig, TokenConfig};

/// Registered claims carried by every token this crate issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Id of the request that issued the token.
    pub jti: String,
    /// Configured audiences, comma joined.
    pub aud: String,
    pub iss: String,
    /// Stringified user id.
    pub sub: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

impl Claims {
    /// The subject as a user id, `None` when it isn't an integer.
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

/// Why a token was rejected.
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("token is expired")]
    Expired(#[source] jsonwebtoken::errors::Error),

    #[error("token is invalid: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Self::Expired(err),
            _ => Self::Invalid(err),
        }
    }
}

/// Signing and verification material for one kind of token.
pub struct TokenKeys {
    config: TokenConfig,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenKeys {
    pub fn new(config: TokenConfig) -> Self {
        let secret = config.secret.expose().as_bytes();
        let encoding = EncodingKey::from_secret(secret);
        let decoding = DecodingKey::from_secret(secret);

        // Only the HMAC family is accepted, whatever the token header claims.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.set_audience(&[config.audience.join(",")]);
        validation.set_issuer(&[config.issuer.as_str()]);

        Self {
            config,
            encoding,
            decoding,
            validation,
        }
    }

    /// Fresh claims for `user_id`, issued now.
    pub fn issue(&self, jti: &str, user_id: i64) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            jti: jti.to_string(),
            aud: self.config.audience.join(","),
            iss: self.config.issuer.clone(),
            sub: user_id.to_string(),
            iat: now,
            nbf: now + secs(self.config.not_before_secs),
            exp: now + secs(self.config.expires_in_secs),
        }
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        Ok(data.claims)
    }

    pub fn expires_in(&self) -> Duration {
        Duration::from_secs(self.config.expires_in_secs)
    }
}

fn secs(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl fmt::Debug for TokenKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenKeys")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Keys for both token kinds plus the cookie policy of the deployment.
#[derive(Debug)]
pub struct TokenIssuer {
    access: TokenKeys,
    refresh: Option<TokenKeys>,
    secure_cookies: bool,
}

impl TokenIssuer {
    pub fn new(config: &JwtConfig, env: Environment) -> Self {
        Self {
            access: TokenKeys::new(config.access_token.clone()),
            refresh: config.refresh_token.clone().map(TokenKeys::new),
            secure_cookies: env != Environment::Development,
        }
    }

    pub fn access(&self) -> &TokenKeys {
        &self.access
    }

    /// `None` when refresh tokens aren't configured.
    pub fn refresh(&self) -> Option<&TokenKeys> {
        self.refresh.as_ref()
    }

    /// Cookies are `Secure` everywhere except development.
    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }
}

//! Helpers for testing code that takes a [`Core`]
//!
//! Enabled in this crate's own tests and, for applications, with the
//! `test-support` feature.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::{
    Config, CorsConfig, Environment, JwtConfig, LogConfig, Secret, ServerConfig, TokenConfig,
};
use crate::context::Core;
use crate::detail::DefaultErrorDetailer;
use crate::error::ErrorFactory;
use crate::token::TokenIssuer;

/// Development config with access and refresh tokens and no database.
pub fn test_config() -> Config {
    let token = |secret: &str, expires_in_secs| TokenConfig {
        audience: vec!["test".to_string()],
        issuer: "graphql-service-core".to_string(),
        secret: Secret::new(secret),
        expires_in_secs,
        not_before_secs: 0,
    };

    Config {
        env: Environment::Development,
        server: ServerConfig {
            port: 8080,
            cors: CorsConfig::default(),
            jwt: JwtConfig {
                access_token: token("test-access-token-secret", 900),
                refresh_token: Some(token("test-refresh-token-secret", 86_400)),
            },
            log: LogConfig::default(),
        },
        database: None,
        google_cloud: None,
    }
}

/// A core with an anonymous session and the default error detailer.
pub fn build_test_core(config: &Config) -> Core {
    Core::new(
        Uuid::new_v4().to_string(),
        config.env,
        ErrorFactory::new(Arc::new(DefaultErrorDetailer)),
        Arc::new(TokenIssuer::new(&config.server.jwt, config.env)),
    )
}

pub fn test_core(config: &Config) -> Arc<Core> {
    Arc::new(build_test_core(config))
}

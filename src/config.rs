//! Service configuration
//!
//! Loaded once at startup from a YAML file named by `--config`. The `PORT`
//! environment variable always wins over `server.port`, since most hosting
//! platforms assign the port that way.

use std::fmt;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use crate::validation::{FieldViolations, Rule};

/// Minimum length of a token signing secret.
pub const MIN_SECRET_LEN: usize = 20;

/// Command line arguments understood by services built on this crate.
#[derive(Debug, Clone, Parser)]
pub struct ConfigArgs {
    /// Path to the YAML config file.
    #[arg(long, short = 'c')]
    pub config: PathBuf,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("failed to parse PORT from the environment: {0:?}")]
    Port(String),

    #[error("config failed validation: {0}")]
    Invalid(#[from] FieldViolations),
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Production hides causes and operation trails from API clients.
    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

/// A secret that never shows up in `Debug` output or logs.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub env: Environment,
    pub server: ServerConfig,
    /// No datastore handle is created when absent.
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub google_cloud: Option<GoogleCloudConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default)]
    pub cors: CorsConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// How long a preflight result may be cached.
    #[serde(default)]
    pub max_age_secs: u64,
    #[serde(default)]
    pub allow_credentials: bool,
    /// `*` allows every origin.
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    /// `*` allows every header.
    pub allowed_headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 0,
            allow_credentials: false,
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec!["GET".to_string(), "POST".to_string()],
            allowed_headers: vec!["*".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_token: TokenConfig,
    /// Refresh tokens are disabled when absent.
    #[serde(default)]
    pub refresh_token: Option<TokenConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Recipients the token is intended for. Joined with `,` into `aud`.
    pub audience: Vec<String>,
    pub issuer: String,
    pub secret: Secret,
    pub expires_in_secs: u64,
    #[serde(default)]
    pub not_before_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Secret,
    #[serde(default = "default_sslmode")]
    pub sslmode: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_sslmode() -> String {
    "disable".to_string()
}

fn default_max_connections() -> u32 {
    10
}

impl DatabaseConfig {
    /// `postgres://{user}:{password}@{host}:{port}/{dbname}?sslmode={sslmode}`
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user,
            self.password.expose(),
            self.host,
            self.port,
            self.dbname,
            self.sslmode
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleCloudConfig {
    pub project_id: String,
}

impl Config {
    /// Read, override from the environment, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&raw)?;
        config.apply_port(std::env::var("PORT").ok().as_deref())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the path given on the command line.
    pub fn from_args() -> Result<Self, ConfigError> {
        let args = ConfigArgs::parse();
        Self::load(&args.config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply a `PORT` value. Empty means unset.
    pub fn apply_port(&mut self, port: Option<&str>) -> Result<(), ConfigError> {
        match port {
            Some(value) if !value.is_empty() => {
                self.server.port = value
                    .parse()
                    .map_err(|_| ConfigError::Port(value.to_string()))?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn validate(&self) -> Result<(), FieldViolations> {
        let server = &self.server;
        let cors = &server.cors;
        let mut violations = FieldViolations::new()
            .check(server.port == 0, "server.port", Rule::Min(1))
            .check(
                cors.allowed_origins.is_empty(),
                "server.cors.allowed_origins",
                Rule::Required,
            )
            .check(
                cors.allowed_methods.is_empty(),
                "server.cors.allowed_methods",
                Rule::Required,
            )
            .check(
                cors.allowed_headers.is_empty(),
                "server.cors.allowed_headers",
                Rule::Required,
            )
            .check(
                cors.allow_credentials && cors.allowed_origins.iter().any(|o| o == "*"),
                "server.cors.allowed_origins",
                Rule::Custom("cannot contain * when allow_credentials is set".to_string()),
            )
            .check(
                cors.allow_credentials && cors.allowed_headers.iter().any(|h| h == "*"),
                "server.cors.allowed_headers",
                Rule::Custom("cannot contain * when allow_credentials is set".to_string()),
            );

        violations = validate_token(violations, "server.jwt.access_token", &server.jwt.access_token);
        if let Some(refresh) = &server.jwt.refresh_token {
            violations = validate_token(violations, "server.jwt.refresh_token", refresh);
        }

        if let Some(db) = &self.database {
            violations = violations
                .check(db.host.is_empty(), "database.host", Rule::Required)
                .check(db.dbname.is_empty(), "database.dbname", Rule::Required)
                .check(db.user.is_empty(), "database.user", Rule::Required)
                .check(db.max_connections == 0, "database.max_connections", Rule::Min(1));
        }

        if let Some(gcloud) = &self.google_cloud {
            violations = violations.check(
                gcloud.project_id.is_empty(),
                "google_cloud.project_id",
                Rule::Required,
            );
        }

        violations.into_result()
    }
}

fn validate_token(violations: FieldViolations, prefix: &str, token: &TokenConfig) -> FieldViolations {
    violations
        .check(token.audience.is_empty(), format!("{prefix}.audience"), Rule::Required)
        .check(token.issuer.is_empty(), format!("{prefix}.issuer"), Rule::Required)
        .check(
            token.secret.expose().len() < MIN_SECRET_LEN,
            format!("{prefix}.secret"),
            Rule::MinLength(MIN_SECRET_LEN),
        )
        .check(token.expires_in_secs == 0, format!("{prefix}.expires_in_secs"), Rule::Min(1))
}

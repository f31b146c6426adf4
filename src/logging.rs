//! Logging setup
//!
//! One global `tracing` subscriber per process. Each request logs within its
//! own span, see [`crate::server`].

use tracing::Subscriber;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{Config, Environment};

/// Header set by Google Cloud load balancers: `TRACE_ID/SPAN_ID;o=TRACE_TRUE`.
pub const CLOUD_TRACE_HEADER: &str = "x-cloud-trace-context";

/// Install the global subscriber.
pub fn init(config: &Config) -> Result<(), TryInitError> {
    subscriber(config).try_init()
}

/// The subscriber for `config`.
///
/// `RUST_LOG` overrides `server.log.level`. Development logs are pretty
/// printed, every other environment logs JSON.
pub fn subscriber(config: &Config) -> Box<dyn Subscriber + Send + Sync> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.server.log.level.as_str()));

    match config.env {
        Environment::Development => Box::new(fmt().with_env_filter(filter).pretty().finish()),
        Environment::Staging | Environment::Production => Box::new(
            fmt()
                .with_env_filter(filter)
                .json()
                .with_current_span(true)
                .finish(),
        ),
    }
}

/// The `trace` field for a request's span.
///
/// `projects/{project}/traces/{trace_id}` when a project is configured so
/// Cloud Logging can correlate entries, otherwise the bare trace id.
pub fn trace_field(project_id: Option<&str>, header: Option<&str>) -> Option<String> {
    let trace_id = header?.split('/').next()?.trim();
    if trace_id.is_empty() {
        return None;
    }
    Some(match project_id {
        Some(project) => format!("projects/{project}/traces/{trace_id}"),
        None => trace_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_field() {
        let header = Some("105445aa7843bc8bf206b12000100000/1;o=1");
        assert_eq!(
            trace_field(Some("my-project"), header).as_deref(),
            Some("projects/my-project/traces/105445aa7843bc8bf206b12000100000")
        );
        assert_eq!(
            trace_field(None, header).as_deref(),
            Some("105445aa7843bc8bf206b12000100000")
        );
    }

    #[test]
    fn test_trace_field_missing_or_empty() {
        assert_eq!(trace_field(Some("my-project"), None), None);
        assert_eq!(trace_field(Some("my-project"), Some("/1;o=1")), None);
    }

    #[test]
    fn test_subscriber_per_environment() {
        let mut config = crate::test_support::test_config();
        for env in [Environment::Development, Environment::Production] {
            config.env = env;
            tracing::subscriber::with_default(subscriber(&config), || {
                let span = tracing::info_span!("request", id = "request-1");
                let _entered = span.enter();
                assert!(span.id().is_some());
                tracing::info!("handled");
            });
        }
    }
}

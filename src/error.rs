//! Request errors
//!
//! [`ErrorFactory::new_error`] turns any failure into an [`Error`]: a plain
//! value carrying the [`ErrorKind`], an optional message override, details for
//! the client, and the original cause. What a client gets to see of an error
//! is decided when it is serialized, see [`Error::extensions`].

use std::fmt;
use std::sync::Arc;

use axum::http::StatusCode;
use serde::Serialize;

use crate::config::Environment;
use crate::detail::ErrorDetailer;
use crate::failure::Failure;
use crate::kind::{event_at, ErrorKind, Severity};

/// A classified failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    details: Vec<String>,
    cause: Option<Failure>,
}

impl Error {
    /// An error of `kind` with no cause.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            details: Vec::new(),
            cause: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(detail.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<Failure>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// The override message, if one was given.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn details(&self) -> &[String] {
        &self.details
    }

    pub fn cause(&self) -> Option<&Failure> {
        self.cause.as_ref()
    }

    pub fn http_status(&self) -> StatusCode {
        self.kind.http_status()
    }

    /// Extensions sent to API clients.
    ///
    /// Outside production the operation trail and the cause are included to
    /// help debugging; in production both are left out.
    pub fn extensions(&self, env: Environment, operations: &[String]) -> ErrorExtensions {
        let debug = !env.is_production();
        ErrorExtensions {
            code: self.kind.code,
            title: self.kind.title.to_string(),
            details: if self.details.is_empty() {
                None
            } else {
                Some(self.details.clone())
            },
            operations: debug.then(|| operations.to_vec()),
            cause: self
                .cause
                .as_ref()
                .filter(|_| debug)
                .map(|cause| CauseExtension {
                    type_name: cause.type_name().to_string(),
                    message: cause.to_string(),
                }),
        }
    }

    pub(crate) fn log(&self) {
        let cause_type = self.cause.as_ref().map(Failure::type_name);
        let cause = self.cause.as_ref().map(ToString::to_string);
        event_at!(
            self.kind.severity,
            code = self.kind.code,
            title = self.kind.title,
            details = ?self.details,
            cause_type = ?cause_type,
            cause = ?cause,
            "{}: {}",
            self.kind.display_title(),
            self
        );
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) if !message.is_empty() => f.write_str(message),
            _ => fmt::Display::fmt(&self.kind, f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(Failure::as_std)
    }
}

/// A replacement applied while building an [`Error`].
#[derive(Debug, Clone)]
pub enum Override {
    Kind(ErrorKind),
    Message(String),
    Severity(Severity),
    Cause(Failure),
    /// Appended to the details rather than replacing them.
    Detail(String),
}

impl From<ErrorKind> for Override {
    fn from(kind: ErrorKind) -> Self {
        Self::Kind(kind)
    }
}

impl From<Severity> for Override {
    fn from(severity: Severity) -> Self {
        Self::Severity(severity)
    }
}

impl From<String> for Override {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<&str> for Override {
    fn from(message: &str) -> Self {
        Self::Message(message.to_string())
    }
}

impl From<Failure> for Override {
    fn from(cause: Failure) -> Self {
        Self::Cause(cause)
    }
}

/// Builds [`Error`]s, classifying unknown causes with the application's detailer.
#[derive(Clone)]
pub struct ErrorFactory {
    detailer: Arc<dyn ErrorDetailer>,
}

impl ErrorFactory {
    pub fn new(detailer: Arc<dyn ErrorDetailer>) -> Self {
        Self { detailer }
    }

    /// Wrap `cause` into an [`Error`] and log it at its kind's severity.
    ///
    /// - A cause that already is an `Error` comes back unchanged; overrides
    ///   are ignored and nothing is logged again.
    /// - A cause that is an `ErrorKind` is adopted, message included.
    /// - Overrides apply left to right.
    /// - If the kind is still unknown, the detailer classifies the cause.
    pub fn new_error<C, O>(&self, cause: C, overrides: O) -> Error
    where
        C: Into<Failure>,
        O: IntoIterator<Item = Override>,
    {
        let cause = cause.into();
        if let Some(existing) = cause.downcast_ref::<Error>() {
            return existing.clone();
        }

        let mut error = Error::new(ErrorKind::UNKNOWN);
        if let Some(kind) = cause.downcast_ref::<ErrorKind>() {
            error.kind = *kind;
            error.message = Some(kind.message.to_string());
        }
        error.cause = Some(cause);

        for over in overrides {
            match over {
                Override::Kind(kind) => error.kind = kind,
                Override::Message(message) => error.message = Some(message),
                Override::Severity(severity) => error.kind.severity = severity,
                Override::Cause(cause) => error.cause = Some(cause),
                Override::Detail(detail) => error.details.push(detail),
            }
        }

        if error.kind.code == ErrorKind::UNKNOWN.code {
            if let Some(cause) = &error.cause {
                if let Some(classification) = self.detailer.detail(cause) {
                    error.kind = classification.kind;
                    error.details.extend(classification.details);
                }
            }
        }

        error.log();
        error
    }
}

impl fmt::Debug for ErrorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorFactory").finish_non_exhaustive()
    }
}

/// Log a broken internal invariant. Used where other code would panic.
pub(crate) fn report_defect(message: &str, detail: impl fmt::Display) {
    Error::new(ErrorKind::INTERNAL)
        .with_message(message)
        .with_detail(detail.to_string())
        .log();
}

/// `extensions` of one entry of the response's `errors` array.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorExtensions {
    pub code: u32,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<CauseExtension>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CauseExtension {
    #[serde(rename = "type")]
    pub type_name: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detail::{Classification, DefaultErrorDetailer};
    use crate::validation::FieldViolations;
    use proptest::prelude::*;

    fn factory() -> ErrorFactory {
        ErrorFactory::new(Arc::new(DefaultErrorDetailer))
    }

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct Opaque(String);

    #[test]
    fn test_wrapping_is_idempotent() {
        let errors = factory();
        let first = errors.new_error(Opaque("boom".into()), []);
        let second = errors.new_error(first.clone(), [Override::Kind(ErrorKind::DATABASE)]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_adopts_raised_kind() {
        let error = factory().new_error(ErrorKind::INVALID_CREDENTIALS, []);
        assert_eq!(error.kind(), &ErrorKind::INVALID_CREDENTIALS);
        assert_eq!(error.message(), Some("The provided credentials were incorrect"));
        assert_eq!(error.http_status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_overrides_apply_left_to_right() {
        let replacement = Failure::from(Opaque("replacement".into()));
        let overrides: [Override; 8] = [
            ErrorKind::ROW_NOT_FOUND.into(),
            Override::Detail("row 7".to_string()),
            "first".into(),
            Override::Detail("table notes".to_string()),
            ErrorKind::INVALID_JSON.into(),
            "second".into(),
            Severity::Warn.into(),
            replacement.clone().into(),
        ];
        let error = factory().new_error(Opaque("original".into()), overrides);

        assert_eq!(error.kind().code, ErrorKind::INVALID_JSON.code);
        assert_eq!(error.kind().severity, Severity::Warn);
        assert_eq!(error.to_string(), "second");
        assert_eq!(error.cause(), Some(&replacement));
        assert_eq!(error.details(), ["row 7", "table notes"]);
    }

    #[test]
    fn test_detailer_only_runs_for_unknown_kinds() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let errors = ErrorFactory::new(Arc::new(move |_: &Failure| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Some(Classification::new(ErrorKind::DATABASE))
        }));

        let known = errors.new_error(Opaque("x".into()), [ErrorKind::INVALID_JSON.into()]);
        assert_eq!(known.kind(), &ErrorKind::INVALID_JSON);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        let unknown = errors.new_error(Opaque("x".into()), []);
        assert_eq!(unknown.kind(), &ErrorKind::DATABASE);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unclassified_cause_stays_unknown() {
        let error = factory().new_error(Opaque("mystery".into()), []);
        assert_eq!(error.kind(), &ErrorKind::UNKNOWN);
        assert_eq!(error.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            error.to_string(),
            "An unexpected error occurred while processing your request. Please try again later."
        );
    }

    #[test]
    fn test_struct_validation_details() {
        let violations = FieldViolations::new()
            .required("email")
            .min_length("password", 8);
        let error = factory().new_error(violations, []);

        assert_eq!(error.kind(), &ErrorKind::STRUCT_VALIDATION);
        assert_eq!(error.details().len(), 2);
        assert_eq!(error.http_status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_extensions_are_redacted_in_production() {
        let error = factory().new_error(Opaque("secret detail".into()), []);
        let operations = vec!["server.graphql".to_string(), "resolver.viewer".to_string()];

        let production = error.extensions(Environment::Production, &operations);
        assert_eq!(production.code, 500_000);
        assert_eq!(production.title, "Unexpected Error");
        assert!(production.operations.is_none());
        assert!(production.cause.is_none());
        assert!(production.details.is_none());

        let staging = error.extensions(Environment::Staging, &operations);
        assert_eq!(staging.operations, Some(operations));
        let cause = staging.cause.unwrap();
        assert_eq!(cause.message, "secret detail");
        assert!(cause.type_name.ends_with("Opaque"));
    }

    #[test]
    fn test_extensions_json_shape() {
        let error = Error::new(ErrorKind::STRUCT_VALIDATION).with_detail("email is a required field");
        let json = serde_json::to_value(error.extensions(Environment::Production, &[])).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "code": 400001,
                "title": "Bad Data",
                "details": ["email is a required field"],
            })
        );
    }

    #[test]
    fn test_source_is_the_cause() {
        use std::error::Error as _;
        let error = factory().new_error(Opaque("inner".into()), []);
        assert_eq!(error.source().map(|s| s.to_string()), Some("inner".to_string()));
    }

    proptest! {
        #[test]
        fn test_wrapping_any_message_is_idempotent(message in ".*") {
            let errors = factory();
            let once = errors.new_error(Failure::msg(message), []);
            let twice = errors.new_error(once.clone(), []);
            prop_assert_eq!(once, twice);
        }
    }
}

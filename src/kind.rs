//! Error kind registry
//!
//! Every failure surfaced to a client is classified by an [`ErrorKind`]. The
//! code follows the `ABBCCC` convention: the first three digits are the HTTP
//! status returned for that kind, the remaining three disambiguate kinds that
//! share a status.

use std::fmt;

use axum::http::StatusCode;

/// Log level an error is reported at. Drives verbosity only, never control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    /// Something that should never happen. Logged at ERROR with `severe = true`.
    Severe,
}

/// Emit a tracing event at the level matching a [`Severity`].
macro_rules! event_at {
    ($severity:expr, $($arg:tt)+) => {
        match $severity {
            $crate::kind::Severity::Debug => ::tracing::debug!($($arg)+),
            $crate::kind::Severity::Info => ::tracing::info!($($arg)+),
            $crate::kind::Severity::Warn => ::tracing::warn!($($arg)+),
            $crate::kind::Severity::Error => ::tracing::error!($($arg)+),
            $crate::kind::Severity::Severe => ::tracing::error!(severe = true, $($arg)+),
        }
    };
}

pub(crate) use event_at;

/// Title used when a kind carries neither a message nor a title.
const FALLBACK_TITLE: &str = "Unexpected Error";

/// A classification of failure.
///
/// Kinds are plain values: compare them with `==`. Applications may declare
/// their own kinds with [`ErrorKind::new`] as long as the code keeps the
/// `ABBCCC` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorKind {
    /// `ABBCCC`, where `ABB` is the HTTP status.
    pub code: u32,
    /// Short, title cased description.
    pub title: &'static str,
    /// Longer description shown to API clients.
    pub message: &'static str,
    pub severity: Severity,
}

impl ErrorKind {
    pub const INVALID_JSON: Self = Self::new(
        400_000,
        "Invalid JSON",
        "Your request body contains invalid JSON",
        Severity::Info,
    );
    pub const STRUCT_VALIDATION: Self = Self::new(
        400_001,
        "Bad Data",
        "Your payload contains invalid data",
        Severity::Info,
    );
    pub const INVALID_CONTENT_TYPE: Self = Self::new(
        400_003,
        "Invalid Content-Type",
        "The provided Content-Type was not application/json",
        Severity::Debug,
    );

    pub const UNAUTHORIZED: Self = Self::new(
        401_100,
        "Unauthorized",
        "You're not authorized to perform that action",
        Severity::Info,
    );
    pub const INVALID_CREDENTIALS: Self = Self::new(
        401_001,
        "Invalid Credentials",
        "The provided credentials were incorrect",
        Severity::Debug,
    );
    pub const INVALID_JWT: Self = Self::new(
        401_002,
        "Invalid JWT",
        "The provided refresh or access token was invalid",
        Severity::Info,
    );
    pub const EXPIRED_ACCESS_TOKEN: Self = Self::new(
        401_003,
        "Expired Access Token",
        "The provided access token was expired",
        Severity::Debug,
    );

    pub const ROUTE_NOT_FOUND: Self = Self::new(
        404_000,
        "Not Found",
        "The requested url does not exist",
        Severity::Debug,
    );
    pub const ROW_NOT_FOUND: Self = Self::new(
        404_001,
        "Not Found",
        "The requested resource was not found",
        Severity::Debug,
    );

    pub const METHOD_NOT_ALLOWED: Self = Self::new(
        405_000,
        "Method Not Allowed",
        "The requested url does not support that HTTP method",
        Severity::Debug,
    );

    pub const UNKNOWN: Self = Self::new(
        500_000,
        FALLBACK_TITLE,
        "An unexpected error occurred while processing your request. Please try again later.",
        Severity::Severe,
    );
    pub const DATABASE: Self = Self::new(500_001, "", "", Severity::Error);
    /// An internal invariant did not hold. Replaces what would otherwise be a panic.
    pub const INTERNAL: Self = Self::new(
        500_002,
        "Internal Error",
        "An internal error occurred while processing your request. Please try again later.",
        Severity::Severe,
    );

    pub const fn new(
        code: u32,
        title: &'static str,
        message: &'static str,
        severity: Severity,
    ) -> Self {
        Self {
            code,
            title,
            message,
            severity,
        }
    }

    /// The title, or the generic fallback when the kind has none.
    pub fn display_title(&self) -> &'static str {
        if self.title.is_empty() {
            FALLBACK_TITLE
        } else {
            self.title
        }
    }

    /// HTTP status encoded in the first three digits of the code.
    ///
    /// A code that isn't six digits, or whose prefix isn't a status in
    /// `100..=599`, is a defect in the kind's declaration: it is logged and
    /// mapped to 500.
    pub fn http_status(&self) -> StatusCode {
        let status = match self.code {
            100_000..=599_999 => StatusCode::from_u16((self.code / 1000) as u16).ok(),
            _ => None,
        };

        status.unwrap_or_else(|| {
            tracing::error!(
                severe = true,
                code = self.code,
                title = self.title,
                "error kind code does not start with an HTTP status"
            );
            StatusCode::INTERNAL_SERVER_ERROR
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.message.is_empty() {
            f.write_str(self.message)
        } else {
            f.write_str(self.display_title())
        }
    }
}

impl std::error::Error for ErrorKind {}

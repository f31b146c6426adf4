//! Classification of unknown causes
//!
//! When a failure reaches [`ErrorFactory::new_error`](crate::ErrorFactory::new_error)
//! without a kind, the application's [`ErrorDetailer`] decides what it is.

use crate::failure::Failure;
use crate::kind::ErrorKind;
use crate::token::TokenError;
use crate::validation::FieldViolations;

/// Kind and client-facing details for a cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub details: Vec<String>,
}

impl Classification {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            details: Vec::new(),
        }
    }

    pub fn with_details(kind: ErrorKind, details: Vec<String>) -> Self {
        Self { kind, details }
    }
}

/// Maps a native failure to an [`ErrorKind`].
///
/// Returning `None` leaves the error as `UNKNOWN`. Closures of the shape
/// `Fn(&Failure) -> Option<Classification>` are detailers too.
pub trait ErrorDetailer: Send + Sync {
    fn detail(&self, cause: &Failure) -> Option<Classification>;
}

impl<F> ErrorDetailer for F
where
    F: Fn(&Failure) -> Option<Classification> + Send + Sync,
{
    fn detail(&self, cause: &Failure) -> Option<Classification> {
        self(cause)
    }
}

/// Detailer for the failures this crate and its stack know about.
///
/// Applications usually wrap it, handling their own failures first and
/// falling back to it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorDetailer;

impl ErrorDetailer for DefaultErrorDetailer {
    fn detail(&self, cause: &Failure) -> Option<Classification> {
        if let Some(err) = cause.downcast_ref::<sqlx::Error>() {
            return Some(match err {
                sqlx::Error::RowNotFound => Classification::new(ErrorKind::ROW_NOT_FOUND),
                _ => Classification::new(ErrorKind::DATABASE),
            });
        }

        if let Some(violations) = cause.downcast_ref::<FieldViolations>() {
            return Some(Classification::with_details(
                ErrorKind::STRUCT_VALIDATION,
                violations.details(),
            ));
        }

        if let Some(err) = cause.downcast_ref::<TokenError>() {
            let kind = match err {
                TokenError::Expired(_) => ErrorKind::EXPIRED_ACCESS_TOKEN,
                TokenError::Invalid(_) => ErrorKind::INVALID_JWT,
            };
            return Some(Classification::with_details(kind, vec![err.to_string()]));
        }

        if let Some(err) = cause.downcast_ref::<jsonwebtoken::errors::Error>() {
            let kind = match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ErrorKind::EXPIRED_ACCESS_TOKEN
                }
                _ => ErrorKind::INVALID_JWT,
            };
            return Some(Classification::with_details(kind, vec![err.to_string()]));
        }

        if cause.is::<serde_json::Error>() {
            return Some(Classification::new(ErrorKind::INVALID_JSON));
        }

        None
    }
}

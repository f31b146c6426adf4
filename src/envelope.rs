//! Response envelope
//!
//! Every response of the adapter, successful or not, has the shape
//!
//! ```json
//! { "data": ..., "errors": [{ "message": "...", "extensions": {...} }], "extensions": { "id": "..." } }
//! ```
//!
//! `data` is left out when execution never started, and is `null` when a
//! non-null root field failed. `errors` is left out when it is empty.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::context::Core;
use crate::error::{Error, ErrorExtensions};

/// Top-level `extensions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseExtensions {
    /// Request id, for correlating with logs.
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvelopeError {
    pub message: String,
    /// Absent for query validation errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<ErrorExtensions>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<async_graphql::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<EnvelopeError>,
    pub extensions: ResponseExtensions,
}

impl Envelope {
    pub fn new(extensions: ResponseExtensions) -> Self {
        Self {
            data: None,
            errors: Vec::new(),
            extensions,
        }
    }

    /// Set `data` for an executed request, `null` included.
    pub fn with_data(mut self, data: async_graphql::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn push_error(&mut self, message: impl Into<String>, extensions: Option<ErrorExtensions>) {
        self.errors.push(EnvelopeError {
            message: message.into(),
            extensions,
        });
    }
}

/// A response carrying only `error`, with the error's status and the request's cookies.
pub fn error_reply(core: &Core, error: &Error) -> Response {
    let mut envelope = Envelope::new(core.extensions());
    envelope.push_error(error.to_string(), Some(core.error_extensions(error)));
    reply(core, error.http_status(), envelope)
}

/// The response for `envelope`, with cookies set during the request.
pub fn reply(core: &Core, status: StatusCode, envelope: Envelope) -> Response {
    (status, core.cookie_jar(), Json(envelope)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::ErrorKind;
    use crate::test_support::{test_config, test_core};
    use serde_json::json;

    #[test]
    fn test_empty_parts_are_omitted() {
        let envelope = Envelope::new(ResponseExtensions {
            id: "request-1".to_string(),
        });

        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({ "extensions": { "id": "request-1" } })
        );
    }

    #[test]
    fn test_null_data_is_kept() {
        let envelope = Envelope::new(ResponseExtensions {
            id: "request-1".to_string(),
        })
        .with_data(async_graphql::Value::Null);

        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({ "data": null, "extensions": { "id": "request-1" } })
        );
    }

    #[test]
    fn test_full_shape() {
        let mut envelope = Envelope::new(ResponseExtensions {
            id: "request-1".to_string(),
        })
        .with_data(async_graphql::value!({ "viewer": 42 }));
        envelope.push_error("Unknown field \"nope\"", None);

        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "data": { "viewer": 42 },
                "errors": [{ "message": "Unknown field \"nope\"" }],
                "extensions": { "id": "request-1" },
            })
        );
    }

    #[test]
    fn test_error_reply_status() {
        let core = test_core(&test_config());
        let error = core.new_error(ErrorKind::ROW_NOT_FOUND, []);
        let response = error_reply(&core, &error);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

//! GCP API errors
//!
//! Google APIs report failures as a JSON envelope:
//!
//! ```json
//! {"error": {"code": 403, "status": "PERMISSION_DENIED", "message": "...",
//!            "errors": [{"reason": "forbidden"}],
//!            "details": [{"@type": "...ErrorInfo", "reason": "SERVICE_DISABLED"}]}}
//! ```
//!
//! [`ApiError::from_response`] keeps the machine-readable parts of that
//! envelope so that [`ApiError::classify`] can tell a disabled service or a
//! missing permission apart from a real outage.

use serde_json::Value;
use thiserror::Error;

/// Errors returned by the Cloud API collaborator.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The API answered with a non-success HTTP status.
    #[error("GCP API returned HTTP {code}: {message}")]
    Status {
        code: u16,
        /// Canonical status string, e.g. `PERMISSION_DENIED`.
        status: Option<String>,
        /// Machine-readable reason, e.g. `accessNotConfigured`.
        reason: Option<String>,
        message: String,
    },

    /// The request never produced an HTTP response.
    #[error("request to GCP API failed: {0}")]
    Transport(String),

    /// The response body was not what the listing operation expects.
    #[error("unexpected GCP API response: {0}")]
    Decode(String),

    /// An access token could not be obtained.
    #[error("failed to obtain GCP access token: {0}")]
    Auth(String),
}

/// How the collector treats a failed listing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The API is disabled (or was never enabled) for the scope.
    NotProvisioned,
    /// The caller lacks permission to list the resources.
    AccessDenied,
    /// The scope itself does not exist.
    NotFound,
    /// Anything else. Aborts the sync for the resource type.
    Fatal,
}

/// Reasons Google uses when a service is not enabled on a project.
const NOT_PROVISIONED_REASONS: &[&str] = &["accessNotConfigured", "SERVICE_DISABLED"];

impl ApiError {
    /// Build a [`ApiError::Status`] from an HTTP status code and raw response body.
    ///
    /// Bodies that are not the standard error envelope still produce an
    /// error; only the code is known then.
    pub fn from_response(code: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let err = parsed.as_ref().and_then(|v| v.get("error"));

        let status = err
            .and_then(|e| e.get("status"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let message = err
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", code));

        Self::Status {
            code,
            status,
            reason: err.and_then(extract_reason),
            message,
        }
    }

    /// Classify this error for the collector.
    pub fn classify(&self) -> ErrorClass {
        let Self::Status {
            code,
            status,
            reason,
            message,
        } = self
        else {
            return ErrorClass::Fatal;
        };

        let reason = reason.as_deref().unwrap_or_default();
        let status = status.as_deref().unwrap_or_default();

        // A disabled API is reported as 403 too, so it must be checked first.
        if NOT_PROVISIONED_REASONS.contains(&reason)
            || message.contains("API has not been used")
            || message.contains("it is disabled")
        {
            return ErrorClass::NotProvisioned;
        }

        if *code == 403
            || status == "PERMISSION_DENIED"
            || reason == "forbidden"
            || message.contains("Permission denied")
        {
            return ErrorClass::AccessDenied;
        }

        if *code == 404 || status == "NOT_FOUND" {
            return ErrorClass::NotFound;
        }

        ErrorClass::Fatal
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// First reason found in either the legacy `errors[]` list or the
/// `details[]` ErrorInfo entries.
fn extract_reason(err: &Value) -> Option<String> {
    let legacy = err
        .get("errors")
        .and_then(Value::as_array)
        .and_then(|errors| errors.first())
        .and_then(|e| e.get("reason"))
        .and_then(Value::as_str);

    let detail = || {
        err.get("details")
            .and_then(Value::as_array)?
            .iter()
            .find_map(|d| d.get("reason").and_then(Value::as_str))
    };

    legacy.or_else(detail).map(str::to_string)
}

use serde::Serialize;

/// The gateway's one error shape, used on every client-facing failure path.
///
/// ```json
/// {"error": {"message": "...", "type": "...", "code": "..."}}
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ApiErrorKind,
    pub code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    AuthenticationError,
    PermissionError,
    InvalidRequestError,
    ServerError,
}

impl ApiErrorBody {
    pub fn new(kind: ApiErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                message: message.into(),
                kind,
                code: code.into(),
            },
        }
    }

    pub fn invalid_api_key() -> Self {
        Self::new(
            ApiErrorKind::AuthenticationError,
            "invalid_api_key",
            "missing or invalid aggregated API key",
        )
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::ServerError, "service_unavailable", message)
    }

    pub fn model_not_allowed(model: &str) -> Self {
        Self::new(
            ApiErrorKind::PermissionError,
            "model_not_allowed",
            format!("model '{model}' is not permitted for this token"),
        )
    }

    pub fn missing_token() -> Self {
        Self::new(
            ApiErrorKind::AuthenticationError,
            "invalid_api_key",
            "missing authentication token",
        )
    }

    pub fn ip_not_allowed() -> Self {
        Self::new(
            ApiErrorKind::PermissionError,
            "ip_not_allowed",
            "client IP is not allowed for this token",
        )
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::ServerError, "server_error", message)
    }
}

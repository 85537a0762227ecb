use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Validation error: {summary}")]
    Validation { summary: String, body: Value },

    #[error("Authentication error: {message}")]
    Authentication { message: String, body: Value },

    #[error("Authorization error: {message}")]
    Authorization { message: String, body: Value },

    #[error("Not found: {message}")]
    NotFound { message: String, body: Value },

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
        body: Value,
    },

    #[error("Server error ({status}): {message}")]
    Server {
        status: u16,
        message: String,
        body: Value,
    },

    #[error("Request failed ({status}): {message}")]
    Status {
        status: u16,
        message: String,
        body: Value,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Build the error for a non-success response from the API.
    pub fn from_response(status: StatusCode, retry_after: Option<Duration>, body: Value) -> Self {
        let code = status.as_u16();
        match status {
            StatusCode::BAD_REQUEST => {
                let summary = body_str(&body, "detail")
                    .map(str::to_string)
                    .or_else(|| field_summary(&body))
                    .unwrap_or_else(|| "Invalid request".to_string());
                ClientError::Validation { summary, body }
            }
            StatusCode::UNAUTHORIZED => ClientError::Authentication {
                message: body_str(&body, "detail")
                    .unwrap_or("Authentication required")
                    .to_string(),
                body,
            },
            StatusCode::FORBIDDEN => ClientError::Authorization {
                message: body_str(&body, "detail").unwrap_or("Access denied").to_string(),
                body,
            },
            StatusCode::NOT_FOUND => ClientError::NotFound {
                message: body_str(&body, "detail")
                    .unwrap_or("Resource not found")
                    .to_string(),
                body,
            },
            StatusCode::TOO_MANY_REQUESTS => ClientError::RateLimited {
                message: body_str(&body, "detail")
                    .unwrap_or("Too many requests")
                    .to_string(),
                retry_after,
                body,
            },
            s if s.is_server_error() => ClientError::Server {
                status: code,
                message: body_str(&body, "detail")
                    .unwrap_or("Internal server error")
                    .to_string(),
                body,
            },
            _ => ClientError::Status {
                status: code,
                message: body_str(&body, "detail")
                    .or_else(|| body_str(&body, "message"))
                    .unwrap_or("Unexpected response")
                    .to_string(),
                body,
            },
        }
    }

    /// HTTP status that produced this error, `0` when no response was received.
    pub fn status(&self) -> u16 {
        match self {
            ClientError::Validation { .. } => 400,
            ClientError::Authentication { .. } => 401,
            ClientError::Authorization { .. } => 403,
            ClientError::NotFound { .. } => 404,
            ClientError::RateLimited { .. } => 429,
            ClientError::Server { status, .. } | ClientError::Status { status, .. } => *status,
            _ => 0,
        }
    }

    /// Response body returned by the server alongside the failure, if any.
    pub fn body(&self) -> Option<&Value> {
        match self {
            ClientError::Validation { body, .. }
            | ClientError::Authentication { body, .. }
            | ClientError::Authorization { body, .. }
            | ClientError::RateLimited { body, .. }
            | ClientError::Server { body, .. }
            | ClientError::NotFound { body, .. }
            | ClientError::Status { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Top-level string field of the server's error body, e.g. `detail`.
    pub fn server_field(&self, key: &str) -> Option<&str> {
        self.body().and_then(|body| body_str(body, key))
    }

    /// Field errors of the server body rendered as `field: a, b` lines.
    pub fn field_summary(&self) -> Option<String> {
        self.body().and_then(field_summary)
    }

    /// Authentication failure raised locally, without a server body.
    pub fn authentication(message: impl Into<String>) -> Self {
        ClientError::Authentication {
            message: message.into(),
            body: Value::Null,
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, ClientError::Authentication { .. })
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else if err.is_builder() {
            ClientError::Config(err.to_string())
        } else {
            // Timeouts, refused connections and broken bodies all mean no usable response
            ClientError::Network(err.to_string())
        }
    }
}

impl From<config::ConfigError> for ClientError {
    fn from(err: config::ConfigError) -> Self {
        ClientError::Config(err.to_string())
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::Config(format!("invalid URL: {}", err))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a shared refresh operation. Cloned to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("Refresh token rejected with status {0}")]
    Rejected(u16),

    #[error("Refresh request failed: {0}")]
    Network(String),

    #[error("Malformed refresh response: {0}")]
    Malformed(String),

    #[error("Refresh task aborted: {0}")]
    Aborted(String),
}

impl From<RefreshError> for ClientError {
    fn from(err: RefreshError) -> Self {
        ClientError::authentication(format!("Session expired. Please log in again. ({})", err))
    }
}

/// Display-ready error: a user-facing message and the HTTP status (`0` when
/// no response arrived).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    pub status: u16,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }
}

impl From<&ClientError> for ErrorInfo {
    fn from(err: &ClientError) -> Self {
        let status = err.status();
        let message = match err {
            ClientError::Validation { summary, .. } => summary.clone(),
            ClientError::Authentication { .. } => "Authentication required".to_string(),
            ClientError::Authorization { .. } => "Access denied".to_string(),
            ClientError::NotFound { .. } => "Resource not found".to_string(),
            ClientError::RateLimited { .. } => {
                "Too many requests. Please try again later.".to_string()
            }
            ClientError::Server { .. } => "Server error. Please try again later.".to_string(),
            ClientError::Status { .. } => err
                .server_field("detail")
                .unwrap_or("An error occurred")
                .to_string(),
            ClientError::Network(_) => "Network error. Please check your connection.".to_string(),
            other => other.to_string(),
        };
        ErrorInfo { message, status }
    }
}

impl From<ClientError> for ErrorInfo {
    fn from(err: ClientError) -> Self {
        ErrorInfo::from(&err)
    }
}

fn body_str<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str)
}

fn field_summary(body: &Value) -> Option<String> {
    let fields = body.as_object()?;
    if fields.is_empty() {
        return None;
    }

    let lines: Vec<String> = fields
        .iter()
        .map(|(field, messages)| {
            let text = match messages {
                Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{}: {}", field, text)
        })
        .collect();

    Some(lines.join("\n"))
}

//! Unified API error handling with structured responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::assistant::AssistantError;
use crate::command::CommandError;
use crate::conda::CondaError;
use crate::container::ContainerError;
use crate::execution::{ExecutionError, GatewayError};
use crate::kernel::KernelError;
use crate::validate::ValidationError;

/// API error type with structured responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Gateway error: {0}")]
    BadGateway(String),

    #[error("Timed out: {0}")]
    GatewayTimeout(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self::BadGateway(msg.into())
    }

    pub fn gateway_timeout(msg: impl Into<String>) -> Self {
        Self::GatewayTimeout(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Conflict(_) => "CONFLICT",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::BadGateway(_) => "BAD_GATEWAY",
            Self::GatewayTimeout(_) => "TIMEOUT",
        }
    }

    /// Categorize an anyhow error by its message.
    ///
    /// Patterns recognized:
    /// - "not found" -> NotFound
    /// - "already exists" -> Conflict
    /// - "invalid" / "must be" / "cannot" -> BadRequest
    /// - "unavailable" / "connection refused" -> ServiceUnavailable
    /// - "timed out" -> GatewayTimeout
    /// - Default -> Internal
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        let msg = err.to_string();
        let msg_lower = msg.to_lowercase();

        if msg_lower.contains("not found") {
            ApiError::NotFound(msg)
        } else if msg_lower.contains("already exists") {
            ApiError::Conflict(msg)
        } else if msg_lower.contains("invalid")
            || msg_lower.contains("must be")
            || msg_lower.contains("cannot")
        {
            ApiError::BadRequest(msg)
        } else if msg_lower.contains("unavailable") || msg_lower.contains("connection refused") {
            ApiError::ServiceUnavailable(msg)
        } else if msg_lower.contains("timed out") {
            ApiError::GatewayTimeout(msg)
        } else {
            ApiError::Internal(msg)
        }
    }
}

/// Structured error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::Internal(msg) | ApiError::BadGateway(msg) | ApiError::GatewayTimeout(msg) => {
                error!(error_code = code, message = %msg, "API error");
            }
            ApiError::ServiceUnavailable(msg) => {
                warn!(error_code = code, message = %msg, "Service unavailable");
            }
            _ => {
                tracing::debug!(error_code = code, message = %message, "Client error");
            }
        }

        let body = ErrorResponse {
            success: false,
            error: message,
            code,
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::from_anyhow(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Spawn { .. } => ApiError::ServiceUnavailable(err.to_string()),
            CommandError::Timeout { .. } => ApiError::GatewayTimeout(err.to_string()),
            CommandError::Io { .. } => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ContainerError> for ApiError {
    fn from(err: ContainerError) -> Self {
        let msg = err.to_string();
        match err {
            ContainerError::ContainerNotFound(_) => ApiError::NotFound(msg),
            ContainerError::InvalidInput(_) => ApiError::BadRequest(msg),
            ContainerError::DockerUnavailable(_) | ContainerError::ProcessSpawnFailed { .. } => {
                ApiError::ServiceUnavailable(msg)
            }
            ContainerError::Timeout { .. } => ApiError::GatewayTimeout(msg),
            ContainerError::CommandFailed { .. }
            | ContainerError::ParseError(_)
            | ContainerError::Io(_) => ApiError::Internal(msg),
        }
    }
}

impl From<CondaError> for ApiError {
    fn from(err: CondaError) -> Self {
        let msg = err.to_string();
        match err {
            CondaError::EnvironmentNotFound(_) => ApiError::NotFound(msg),
            CondaError::InvalidInput(_) => ApiError::BadRequest(msg),
            CondaError::CondaUnavailable(_) | CondaError::ProcessSpawnFailed { .. } => {
                ApiError::ServiceUnavailable(msg)
            }
            CondaError::Timeout { .. } => ApiError::GatewayTimeout(msg),
            CondaError::CommandFailed { .. } | CondaError::ParseError(_) => ApiError::Internal(msg),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout(_) => ApiError::GatewayTimeout(err.to_string()),
            _ => ApiError::BadGateway(err.to_string()),
        }
    }
}

impl From<ExecutionError> for ApiError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Gateway(e) => e.into(),
            ExecutionError::Process(e) => e.into(),
            ExecutionError::Container(e) => e.into(),
            ExecutionError::Conda(e) => e.into(),
            ExecutionError::InvalidInput(msg) => ApiError::BadRequest(msg),
            ExecutionError::Io(_) | ExecutionError::QueueClosed(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<KernelError> for ApiError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::NotFound(_) => ApiError::NotFound(err.to_string()),
            KernelError::AlreadyExists(_) => ApiError::Conflict(err.to_string()),
            KernelError::InvalidInput(_) => ApiError::BadRequest(err.to_string()),
            KernelError::Unreachable { .. } => ApiError::BadGateway(err.to_string()),
            KernelError::Container(e) => e.into(),
            KernelError::Conda(e) => e.into(),
            KernelError::Gateway(e) => e.into(),
            KernelError::Execution(e) => e.into(),
        }
    }
}

impl From<AssistantError> for ApiError {
    fn from(err: AssistantError) -> Self {
        match err {
            // The message is the whole response text ("Message is required").
            AssistantError::InvalidInput(msg) => ApiError::BadRequest(msg),
            AssistantError::Unavailable(_) => ApiError::ServiceUnavailable(err.to_string()),
            AssistantError::Timeout(_) => ApiError::GatewayTimeout(err.to_string()),
            AssistantError::CommandFailed(_) => ApiError::Internal(err.to_string()),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

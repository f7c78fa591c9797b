use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Signup has not been approved")]
    NotApprovedSignup,
    #[error("Account already exists")]
    AccountExists,
    #[error("Account not found")]
    AccountNotFound,
    #[error("Wrong credentials")]
    WrongCredentials,
    #[error("Wrong code")]
    WrongCode,
    #[error("Code expired")]
    ExpiredCode,
    #[error("Outside supervisor area")]
    OutsideSupervisorArea,
    #[error("Insufficient electoral level")]
    InsufficientElectoralLevel,
    #[error("Agent still supervises subagents")]
    SubordinatesAssigned,
    #[error("Authentication required")]
    Unauthenticated,
    #[error("Code delivery failed: {0}")]
    DeliveryFailure(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable snake_case error code.
    pub error: &'static str,
    pub message: String,
}

impl AuthError {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotApprovedSignup => "not_approved_signup",
            Self::AccountExists => "account_exists",
            Self::AccountNotFound => "account_not_found",
            Self::WrongCredentials => "wrong_credentials",
            Self::WrongCode => "wrong_code",
            Self::ExpiredCode => "expired_code",
            Self::OutsideSupervisorArea => "outside_supervisor_area",
            Self::InsufficientElectoralLevel => "insufficient_electoral_level",
            Self::SubordinatesAssigned => "subordinates_assigned",
            Self::Unauthenticated => "unauthenticated",
            Self::DeliveryFailure(_) => "delivery_failure",
            Self::Storage(_) => "internal_error",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::AccountNotFound
            | Self::WrongCredentials
            | Self::WrongCode
            | Self::ExpiredCode
            | Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::NotApprovedSignup
            | Self::OutsideSupervisorArea
            | Self::InsufficientElectoralLevel => StatusCode::FORBIDDEN,
            Self::AccountExists | Self::SubordinatesAssigned => StatusCode::CONFLICT,
            Self::DeliveryFailure(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Storage(err) => {
                error!("Storage failure: {err:#}");
                "Internal server error".to_string()
            }
            Self::DeliveryFailure(reason) => {
                error!("Code delivery failed: {reason}");
                "Code delivery failed".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: self.code(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

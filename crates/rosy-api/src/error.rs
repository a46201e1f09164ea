use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use rosy_types::api::ErrorResponse;

use crate::codes::CodeError;
use crate::flow::FlowError;
use crate::ledger::LedgerError;

/// Every handler failure, rendered as `{ "error": "<message>" }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InvalidCode(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Conflict(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Failed to send email")]
    MailDelivery,

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidCode(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::MailDelivery | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<CodeError> for ApiError {
    fn from(e: CodeError) -> Self {
        match e {
            CodeError::InvalidEmail | CodeError::MissingParams => Self::Validation(e.to_string()),
            CodeError::Missing
            | CodeError::Expired
            | CodeError::Mismatch
            | CodeError::TooManyAttempts => Self::InvalidCode(e.to_string()),
            CodeError::Delivery(_) => Self::MailDelivery,
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Storage(inner) => {
                error!("Ledger storage error: {:#}", inner);
                Self::Internal
            }
            other => Self::Conflict(other.to_string()),
        }
    }
}

impl From<FlowError> for ApiError {
    fn from(e: FlowError) -> Self {
        match e {
            FlowError::Ledger(inner) => inner.into(),
            FlowError::Storage(inner) => {
                error!("Flow storage error: {:#}", inner);
                Self::Internal
            }
            other => Self::Conflict(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        error!("Storage error: {:#}", e);
        Self::Internal
    }
}

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ledger::{LedgerError, PriceError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("Not allowed to access resources of another user")]
    Forbidden,
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadRequest(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Ledger(e) => match e {
                LedgerError::GameNotFound { .. } | LedgerError::HoldingNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                LedgerError::DuplicateGame { .. } => StatusCode::CONFLICT,
                LedgerError::InsufficientQuantity { .. }
                | LedgerError::InvalidAmount { .. }
                | LedgerError::BudgetExceeded { .. } => StatusCode::BAD_REQUEST,
                LedgerError::PriceProviderUnavailable(PriceError::UnknownCoin(_)) => {
                    StatusCode::NOT_FOUND
                }
                LedgerError::PriceProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
                LedgerError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// Converts an `AppError` into the `{ success, message }` envelope
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?self, "Internal error.");
            "An internal storage error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({ "success": false, "message": message }));
        (status, body).into_response()
    }
}

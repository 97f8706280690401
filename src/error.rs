use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::market::MarketError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Market(#[from] MarketError),
}

impl AppError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Market(err) => match err {
                MarketError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
                MarketError::InvalidExchange(_) | MarketError::IllegalTransition { .. } => {
                    (StatusCode::CONFLICT, err.to_string())
                }
                MarketError::UnauthorizedActor(_) => (StatusCode::FORBIDDEN, err.to_string()),
                MarketError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
                MarketError::DependencyFailure(detail) => {
                    tracing::error!("Dependency failure: {}", detail);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error".to_string(),
                    )
                }
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

use crate::reading::ValidationError;
use crate::store::StoreError;
use axum::http::StatusCode;
use thiserror::Error;

pub const ACCEPTED_MESSAGE: &str = "Data received successfully";
pub const INVALID_DATA_MESSAGE: &str = "Invalid data format";
pub const STORE_FAILURE_MESSAGE: &str = "Failed to store data";

/// Per-request ingestion failure.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid reading: {0}")]
    Validation(#[from] ValidationError),
    #[error("failed to persist reading: {0}")]
    Persistence(#[from] StoreError),
    #[error("store writer task failed: {0}")]
    WriterTask(#[from] tokio::task::JoinError),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Persistence(_) | AppError::WriterTask(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Plain-text body sent back to the device.
    pub fn client_message(&self) -> &'static str {
        match self {
            AppError::Validation(_) => INVALID_DATA_MESSAGE,
            AppError::Persistence(_) | AppError::WriterTask(_) => STORE_FAILURE_MESSAGE,
        }
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::model::FieldError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),
    #[error("Entity not found")]
    NotFound,
    #[error("Store call timed out after {0}ms")]
    Timeout(u64),
    #[error("Store configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub const INVALID_CONTENT_TYPE: &str = "Invalid content type. Must be application/json";
pub const INVALID_BODY: &str = "Invalid JSON body.";
pub const UPSERT_FAILED: &str = "Failed to add or update entity in table storage";

/// Every way a check-in can fail. Each variant maps to exactly one response.
#[derive(Debug, Error)]
pub enum CheckinError {
    #[error("content type {0:?} is not application/json")]
    InvalidContentType(Option<String>),
    #[error("body is not valid JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("invalid check-in body: {0}")]
    InvalidFields(#[from] FieldError),
    #[error("table storage is not configured")]
    StoreNotConfigured,
    #[error("table storage fault: {0}")]
    Store(#[from] StoreError),
    #[error("table storage rejected upsert with status {0}")]
    Rejected(u16),
}

impl IntoResponse for CheckinError {
    fn into_response(self) -> Response {
        match self {
            CheckinError::InvalidContentType(_) => {
                (StatusCode::BAD_REQUEST, INVALID_CONTENT_TYPE).into_response()
            }
            CheckinError::MalformedJson(_) | CheckinError::InvalidFields(_) => {
                (StatusCode::BAD_REQUEST, INVALID_BODY).into_response()
            }
            CheckinError::Rejected(_) => (StatusCode::BAD_REQUEST, UPSERT_FAILED).into_response(),
            CheckinError::StoreNotConfigured | CheckinError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

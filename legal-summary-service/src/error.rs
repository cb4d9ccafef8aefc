use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::summarizer::SummarizeError;

/// Every way a request can fail, mapped to a status code at the HTTP boundary.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("No file uploaded")]
    MissingFile,

    #[error("Empty filename")]
    EmptyFilename,

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("File too large")]
    UploadTooLarge,

    #[error("Failed to extract text from PDF")]
    ExtractionFailed,

    #[error("AI call failed: {message}")]
    AiCallFailed { message: String, raw: String },

    #[error("No document uploaded yet.")]
    NoDocument,

    #[error("Missing question.")]
    MissingQuestion,

    #[error("No summary available")]
    NoSummary,

    #[error("Session storage failed: {0}")]
    Storage(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MissingFile
            | AppError::EmptyFilename
            | AppError::InvalidUpload(_)
            | AppError::ExtractionFailed
            | AppError::NoDocument
            | AppError::MissingQuestion
            | AppError::NoSummary => StatusCode::BAD_REQUEST,
            AppError::UploadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::AiCallFailed { .. } | AppError::Storage(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<SummarizeError> for AppError {
    fn from(e: SummarizeError) -> Self {
        let raw = e.raw().unwrap_or_default().to_string();
        AppError::AiCallFailed {
            message: e.to_string(),
            raw,
        }
    }
}

impl From<doc_session::SessionError> for AppError {
    fn from(e: doc_session::SessionError) -> Self {
        AppError::Storage(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::AiCallFailed { raw, .. } => json!({ "error": self.to_string(), "raw": raw }),
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

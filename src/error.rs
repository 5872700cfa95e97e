use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::gemini::AnalysisError;
use crate::report::ReportError;

pub const MSG_NO_IMAGE: &str = "No image file uploaded";
pub const MSG_ANALYSIS_FAILED: &str = "An error occurred while analyzing the image";
pub const MSG_REPORT_FAILED: &str = "An error occurred while generating the PDF report";
pub const MSG_DOWNLOAD_FAILED: &str = "Error downloading the PDF report";

/// Every failure a handler can report. Only `Validation` carries a message
/// meant for the caller; the rest are logged and answered generically.
#[derive(Debug, Error)]
pub enum AppError {
    /// The request itself is unusable (e.g. no file part).
    #[error("{0}")]
    Validation(String),

    /// The upload could not be written to or read from ephemeral storage.
    #[error("staging upload failed: {0}")]
    Staging(#[source] std::io::Error),

    /// The image analysis provider failed.
    #[error("image analysis failed: {0}")]
    Upstream(#[from] AnalysisError),

    /// Building or writing the PDF failed.
    #[error("report generation failed: {0}")]
    Render(#[from] ReportError),

    /// The finished report could not be sent back.
    #[error("report delivery failed: {0}")]
    Delivery(#[source] std::io::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Staging(_)
            | AppError::Upstream(_)
            | AppError::Render(_)
            | AppError::Delivery(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to the client.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(message) => message.clone(),
            AppError::Staging(_) | AppError::Upstream(_) => MSG_ANALYSIS_FAILED.to_string(),
            AppError::Render(_) => MSG_REPORT_FAILED.to_string(),
            AppError::Delivery(_) => MSG_DOWNLOAD_FAILED.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Validation(_) => tracing::debug!("Client error: {}", self),
            _ => tracing::error!("Internal service error: {}", self),
        }

        let body = ErrorBody {
            error: self.user_message(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

//! Plant photo analysis service.
//!
//! `POST /analyze` takes a multipart `image` upload, asks Gemini to describe
//! the plant and returns `{ result, image }`. `POST /download` turns such a
//! result back into a PDF report and streams it as an attachment.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod gemini;
pub mod report;
pub mod routes;
pub mod storage;
pub mod telemetry;
pub mod upload;

pub use config::Config;
pub use error::AppError;
pub use gemini::{GeminiClient, ImageAnalyzer};
pub use routes::{router, AppState};

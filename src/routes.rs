use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, DefaultBodyLimit, Multipart,
        State,
    },
    response::{Json, Response},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::config::Config;
use crate::dispatch::{self, PDF_CONTENT_TYPE};
use crate::error::{AppError, MSG_NO_IMAGE};
use crate::gemini::{ImageAnalyzer, PLANT_ANALYSIS_PROMPT};
use crate::report::{self, ReportRequest};
use crate::upload;

/// Shared, read-only handler state.
#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<dyn ImageAnalyzer>,
    pub temp_dir: PathBuf,
}

impl AppState {
    pub fn new(analyzer: Arc<dyn ImageAnalyzer>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            analyzer,
            temp_dir: temp_dir.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub result: String,
    /// The uploaded image as a `data:<mime>;base64,<data>` URI.
    pub image: String,
}

pub fn router(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/analyze", post(analyze))
        .route("/download", post(download))
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(config.max_body_bytes)),
        )
        .with_state(state)
}

async fn analyze(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let multipart = multipart.map_err(|rejection| {
        tracing::debug!("Rejected /analyze body: {}", rejection.body_text());
        AppError::Validation(MSG_NO_IMAGE.to_string())
    })?;

    let image = upload::receive_image(multipart, &state.temp_dir)
        .await?
        .into_payload();

    let result = state
        .analyzer
        .analyze_image(&image.base64, &image.mime_type, PLANT_ANALYSIS_PROMPT)
        .await?;

    tracing::info!(chars = result.len(), "Plant analysis complete");

    Ok(Json(AnalyzeResponse {
        result,
        image: image.data_uri(),
    }))
}

async fn download(
    State(state): State<AppState>,
    request: Result<Json<ReportRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = request.map_err(|rejection| {
        AppError::Validation(format!("Invalid report request: {}", rejection.body_text()))
    })?;

    let file = report::generate(&request, &state.temp_dir).await?;
    let name = dispatch::report_file_name(chrono::Utc::now());
    dispatch::send_attachment(file, &name, PDF_CONTENT_TYPE).await
}

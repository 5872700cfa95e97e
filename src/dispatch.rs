//! Streams a finished ephemeral file back as a download.
//!
//! The [`EphemeralFile`] guard travels inside the body stream, so the file is
//! removed as soon as the last chunk is read or the client goes away.

use axum::{
    body::Body,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use tokio_util::io::ReaderStream;

use crate::error::AppError;
use crate::storage::EphemeralFile;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Attachment name offered to the browser, e.g. `plant_analysis_1760000000000.pdf`.
pub fn report_file_name(now: chrono::DateTime<chrono::Utc>) -> String {
    format!("plant_analysis_{}.pdf", now.timestamp_millis())
}

pub async fn send_attachment(
    file: EphemeralFile,
    download_name: &str,
    content_type: &'static str,
) -> Result<Response, AppError> {
    // Dropping `file` on these error paths removes it.
    let handle = tokio::fs::File::open(file.path())
        .await
        .map_err(AppError::Delivery)?;
    let length = handle.metadata().await.map_err(AppError::Delivery)?.len();

    let chunks = futures::stream::unfold(
        (ReaderStream::new(handle), file),
        |(mut chunks, file)| async move {
            match chunks.next().await {
                Some(Ok(bytes)) => Some((Ok(bytes), (chunks, file))),
                Some(Err(e)) => {
                    tracing::error!("Error streaming {}: {}", file.path().display(), e);
                    Some((Err(e), (chunks, file)))
                }
                None => None,
            }
        },
    );

    let disposition = format!("attachment; filename=\"{download_name}\"");
    let mut response = (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(chunks),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from(length));

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use chrono::TimeZone;

    #[test]
    fn file_name_uses_millisecond_timestamp() {
        let when = chrono::Utc.timestamp_millis_opt(1_760_000_000_123).unwrap();
        assert_eq!(report_file_name(when), "plant_analysis_1760000000123.pdf");
    }

    #[tokio::test]
    async fn streams_contents_then_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = EphemeralFile::write_in(dir.path(), "plant_analysis_", ".pdf", b"%PDF-1.3 test")
            .await
            .unwrap();
        let path = file.path().to_path_buf();

        let response = send_attachment(file, "report.pdf", PDF_CONTENT_TYPE)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"report.pdf\""
        );
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "13");
        assert!(path.exists(), "file must survive until the body is consumed");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"%PDF-1.3 test");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn abandoned_download_still_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = EphemeralFile::write_in(dir.path(), "plant_analysis_", ".pdf", b"data")
            .await
            .unwrap();
        let path = file.path().to_path_buf();

        let response = send_attachment(file, "report.pdf", PDF_CONTENT_TYPE)
            .await
            .unwrap();
        drop(response);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_file_is_a_delivery_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = EphemeralFile::create_in(dir.path(), "plant_analysis_", ".pdf").unwrap();
        std::fs::remove_file(file.path()).unwrap();

        let err = send_attachment(file, "report.pdf", PDF_CONTENT_TYPE)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Delivery(_)));
    }
}

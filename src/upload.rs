//! Multipart intake for `/analyze`.
//!
//! The `image` part is staged as an ephemeral file and read back whole. The
//! staged file lives exactly as long as the [`UploadedImage`] that owns it.

use axum::extract::Multipart;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;

use crate::error::{AppError, MSG_NO_IMAGE};
use crate::storage::EphemeralFile;

/// Name of the multipart part carrying the file.
pub const IMAGE_FIELD: &str = "image";

const FALLBACK_MIME: &str = "application/octet-stream";

#[derive(Debug)]
pub struct UploadedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
    file: EphemeralFile,
}

/// Base64 image plus its declared MIME type, detached from any file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub base64: String,
}

impl UploadedImage {
    /// Encode the contents and delete the staged file.
    pub fn into_payload(self) -> ImagePayload {
        let payload = ImagePayload {
            mime_type: self.mime_type,
            base64: STANDARD.encode(&self.bytes),
        };
        drop(self.file);
        payload
    }
}

impl ImagePayload {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

/// Pull the `image` file part out of the form, stage it and read it back.
///
/// Fails with a validation error (and touches no storage) when the form has
/// no such part.
pub async fn receive_image(
    mut multipart: Multipart,
    temp_dir: &Path,
) -> Result<UploadedImage, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(invalid_form)? {
        // Text fields sharing the name are form values, not uploads.
        if field.name() != Some(IMAGE_FIELD) || field.file_name().is_none() {
            continue;
        }

        let mime_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| FALLBACK_MIME.to_string());
        let file_name = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await.map_err(invalid_form)?;

        let file = EphemeralFile::write_in(temp_dir, "upload_", "", &data)
            .await
            .map_err(AppError::Staging)?;
        let bytes = file.read().await.map_err(AppError::Staging)?;

        tracing::info!(
            %file_name,
            %mime_type,
            size = bytes.len(),
            "Received image upload"
        );

        return Ok(UploadedImage {
            mime_type,
            bytes,
            file,
        });
    }

    Err(AppError::Validation(MSG_NO_IMAGE.to_string()))
}

fn invalid_form(err: axum::extract::multipart::MultipartError) -> AppError {
    AppError::Validation(format!("Invalid multipart form: {}", err.body_text()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_carries_mime_and_payload() {
        let payload = ImagePayload {
            mime_type: "image/png".to_string(),
            base64: "iVBORw0KGgo=".to_string(),
        };
        assert_eq!(payload.data_uri(), "data:image/png;base64,iVBORw0KGgo=");
    }

    #[tokio::test]
    async fn into_payload_encodes_bytes_and_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = EphemeralFile::write_in(dir.path(), "upload_", "", b"hello")
            .await
            .unwrap();
        let upload = UploadedImage {
            mime_type: "image/jpeg".to_string(),
            bytes: b"hello".to_vec(),
            file,
        };
        let staged = upload.file.path().to_path_buf();
        assert!(staged.exists());

        let payload = upload.into_payload();
        assert_eq!(payload.base64, "aGVsbG8=");
        assert_eq!(payload.mime_type, "image/jpeg");
        assert!(!staged.exists());
    }
}

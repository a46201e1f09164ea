use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;
use bytes::Bytes;
use tracing::debug;

use crate::error::ApiError;

/// Largest accepted request body, image included.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

const IMAGE_FIELD: &str = "image";

#[derive(Debug)]
pub struct ImageUpload {
    /// Filename declared by the client, empty if none was sent.
    pub filename: String,
    pub bytes: Bytes,
}

/// Pulls the `image` field out of a multipart body. Other fields are ignored.
pub async fn read_image(mut multipart: Multipart) -> Result<ImageUpload, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(upload_error)? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(upload_error)?;

        if bytes.is_empty() {
            break;
        }
        return Ok(ImageUpload { filename, bytes });
    }

    Err(ApiError::validation("No image"))
}

fn upload_error(e: MultipartError) -> ApiError {
    debug!("Failed to read multipart body: {}", e);
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::validation("Malformed upload")
    }
}

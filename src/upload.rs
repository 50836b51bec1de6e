//! Manual thumbnail upload validation.
//!
//! Cheap checks run first and in a fixed order: size (regardless of MIME
//! type), then MIME type. Only files passing both are decoded.

use bytes::Bytes;
use chrono::Utc;
use std::path::Path;

use crate::error::ValidationError;
use crate::frame::{CapturedImage, ImageSource, decode_dimensions};

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Reads a local file, declaring its MIME type from the extension.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self {
            file_name,
            mime_type: mime_for_path(path).to_string(),
            data: Bytes::from(data),
        })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn into_captured(self, width: u32, height: u32) -> CapturedImage {
        CapturedImage {
            data: self.data,
            mime_type: self.mime_type,
            file_name: self.file_name,
            source: ImageSource::Upload,
            width,
            height,
            captured_at: Utc::now(),
        }
    }
}

pub fn mime_for_path(path: &Path) -> &'static str {
    image::ImageFormat::from_path(path)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream")
}

/// Size and MIME checks. Never touches the image bytes.
pub fn validate_upload(file: &UploadedFile, max_bytes: usize) -> Result<(), ValidationError> {
    if file.size() > max_bytes {
        return Err(ValidationError::TooLarge {
            size: file.size(),
            limit: max_bytes,
        });
    }
    if !file.mime_type.starts_with("image/") {
        return Err(ValidationError::NotAnImage(file.mime_type.clone()));
    }
    Ok(())
}

/// Decodes the bytes to prove they are an image. Runs on the blocking pool.
pub async fn decode_check(data: Bytes) -> Result<(u32, u32), ValidationError> {
    tokio::task::spawn_blocking(move || decode_dimensions(&data))
        .await
        .map_err(|e| ValidationError::InvalidImage(format!("decode task failed: {}", e)))?
        .map_err(|e| ValidationError::InvalidImage(e.to_string()))
}

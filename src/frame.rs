//! Captured images and the in-process frame encoder.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageFormat, ImageReader, RgbaImage, imageops::FilterType};
use std::io::Cursor;

use crate::constants::PNG_MIME;
use crate::error::CaptureError;

/// Which path produced a captured image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    Canvas,
    ServerFallback,
    Upload,
}

#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub data: Bytes,
    pub mime_type: String,
    pub file_name: String,
    pub source: ImageSource,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

/// Output size for a frame of `width`x`height`, capped at `max_width`.
/// Height follows the source aspect ratio, rounded, never below 1.
pub fn capture_dimensions(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width {
        return (width, height);
    }
    let scaled = (height as f64 * max_width as f64 / width as f64).round() as u32;
    (max_width, scaled.max(1))
}

/// Scale a decoded frame and encode it as PNG.
pub fn encode_frame(
    frame: RgbaImage,
    max_width: u32,
) -> Result<(Bytes, u32, u32), CaptureError> {
    let (src_w, src_h) = frame.dimensions();
    if src_w == 0 || src_h == 0 {
        return Err(CaptureError::FrameUnavailable);
    }

    let (width, height) = capture_dimensions(src_w, src_h, max_width);
    let surface = if (width, height) == (src_w, src_h) {
        frame
    } else {
        image::imageops::resize(&frame, width, height, FilterType::Triangle)
    };

    let mut output = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(surface)
        .write_to(&mut output, ImageFormat::Png)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;

    let data = output.into_inner();
    if data.is_empty() {
        return Err(CaptureError::Encode("encoder produced no data".to_string()));
    }
    Ok((Bytes::from(data), width, height))
}

/// File name for a frame captured at `time_secs`.
pub fn frame_file_name(time_secs: f64) -> String {
    format!("thumbnail_{}ms.png", (time_secs.max(0.0) * 1000.0).round() as u64)
}

/// Fully decodes `data` and returns its dimensions.
pub fn decode_dimensions(data: &[u8]) -> Result<(u32, u32), image::ImageError> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()?;
    Ok((img.width(), img.height()))
}

/// Reads only the image header.
pub fn probe_dimensions(data: &[u8]) -> Result<(u32, u32), image::ImageError> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .into_dimensions()
}

/// Extension for an image MIME type, `png` when unknown.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    ImageFormat::from_mime_type(mime_type)
        .and_then(|f| f.extensions_str().first().copied())
        .unwrap_or("png")
}

impl CapturedImage {
    pub fn from_canvas(data: Bytes, width: u32, height: u32, time_secs: f64) -> Self {
        Self {
            data,
            mime_type: PNG_MIME.to_string(),
            file_name: frame_file_name(time_secs),
            source: ImageSource::Canvas,
            width,
            height,
            captured_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

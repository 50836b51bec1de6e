//! Capture constants

/// Widest frame the capture path will produce; taller frames keep their aspect ratio
pub const MAX_CAPTURE_WIDTH: u32 = 1280;

/// Maximum size for manually uploaded thumbnails (5 MiB)
pub const MAX_UPLOAD_SIZE: usize = 5 * 1024 * 1024;

/// Default frame position as a fraction of the video duration
pub const DEFAULT_SEEK_FRACTION: f64 = 0.1;

/// Relative seek steps offered by the capture controls
pub const SMALL_SEEK_STEP_SECS: f64 = 1.0;
pub const LARGE_SEEK_STEP_SECS: f64 = 10.0;

/// MIME type of canvas captures
pub const PNG_MIME: &str = "image/png";

/// Default HTTP timeout for API calls
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

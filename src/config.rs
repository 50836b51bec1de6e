//! Capture configuration.
//!
//! The library only ever sees a `CaptureConfig` value. `from_env` exists for
//! the CLI, each knob falling back to its default when unset or invalid.
//!
//! ## Environment Variables
//! - `PERCY_API_URL` - API base URL (default: `http://localhost:8000/api`)
//! - `FFMPEG_PATH` / `FFPROBE_PATH` - binaries used by the media element
//! - `FFMPEG_THREADS` - decoder threads per frame grab (default: `1`)
//! - `PERCY_REQUEST_TIMEOUT_SECS` - HTTP timeout (default: `30`)
//! - `PERCY_MAX_CAPTURE_WIDTH` - capture width cap (default: `1280`)

use std::env;
use std::time::Duration;

use crate::constants::{
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SEEK_FRACTION, MAX_CAPTURE_WIDTH, MAX_UPLOAD_SIZE,
};

const DEFAULT_API_URL: &str = "http://localhost:8000/api";
const DEFAULT_FFMPEG_THREADS: usize = 1;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub api_base_url: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub ffmpeg_threads: usize,
    pub request_timeout: Duration,
    pub max_capture_width: u32,
    pub max_upload_bytes: usize,
    pub default_seek_fraction: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            ffmpeg_threads: DEFAULT_FFMPEG_THREADS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_capture_width: MAX_CAPTURE_WIDTH,
            max_upload_bytes: MAX_UPLOAD_SIZE,
            default_seek_fraction: DEFAULT_SEEK_FRACTION,
        }
    }
}

impl CaptureConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_base_url: env::var("PERCY_API_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.api_base_url),
            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or(defaults.ffprobe_path),
            ffmpeg_threads: ffmpeg_threads(),
            request_timeout: Duration::from_secs(request_timeout_secs()),
            max_capture_width: max_capture_width(),
            ..defaults
        }
    }
}

fn ffmpeg_threads() -> usize {
    env::var("FFMPEG_THREADS")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_FFMPEG_THREADS)
}

fn request_timeout_secs() -> u64 {
    env::var("PERCY_REQUEST_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
}

fn max_capture_width() -> u32 {
    env::var("PERCY_MAX_CAPTURE_WIDTH")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|v| *v > 0 && *v <= MAX_CAPTURE_WIDTH)
        .unwrap_or(MAX_CAPTURE_WIDTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.max_capture_width, 1280);
        assert_eq!(config.max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(config.default_seek_fraction, 0.1);
        assert_eq!(config.ffmpeg_threads, 1);
    }
}

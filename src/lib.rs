//! Video thumbnail capture.
//!
//! Load a video, seek to a moment, and capture the displayed frame as a PNG
//! thumbnail. When in-process capture fails the flow falls back to a
//! server-rendered screenshot, then to a manually uploaded image.

pub mod api;
pub mod capture;
pub mod config;
pub mod constants;
pub mod error;
pub mod frame;
pub mod logging;
pub mod media;
pub mod preview;
pub mod session;
pub mod upload;

pub use api::{ApiClient, AuthContext, Screenshot, VideoUpdate};
pub use capture::ThumbnailCapture;
pub use config::CaptureConfig;
pub use error::{
    Affordance, CaptureError, LoadError, NetworkError, ThumbnailError, ValidationError,
};
pub use frame::{CapturedImage, ImageSource};
pub use media::{FfmpegElement, MediaElement, MediaEvent, VideoMetadata};
pub use preview::{PreviewHandle, PreviewRegistry, PreviewUrl, preview_router};
pub use session::{CaptureSession, SelectionResult, SessionCallbacks, SessionState};
pub use upload::UploadedFile;

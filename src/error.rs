//! Error taxonomy for the capture flow.
//!
//! Every operation converts its failure into one of these values at the
//! operation boundary. `ThumbnailError::user_message` and
//! `ThumbnailError::affordance` turn them into what the capture UI shows.

use reqwest::StatusCode;
use std::fmt;

/// The video source failed to load or decode.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadError {
    Probe(String),
    NoVideoStream,
    Decode(String),
    Element(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Probe(s) => write!(f, "failed to read video metadata: {}", s),
            LoadError::NoVideoStream => write!(f, "source has no video stream"),
            LoadError::Decode(s) => write!(f, "failed to decode video: {}", s),
            LoadError::Element(s) => write!(f, "video failed to load: {}", s),
        }
    }
}

impl std::error::Error for LoadError {}

/// In-process frame capture failed.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// Controls are disabled in the current session state
    NotReady,
    /// The video has no decoded frame yet (intrinsic size is zero)
    FrameUnavailable,
    /// The element could not hand over pixels
    CanvasUnavailable,
    Encode(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::NotReady => write!(f, "video is not ready"),
            CaptureError::FrameUnavailable => write!(f, "frame unavailable"),
            CaptureError::CanvasUnavailable => write!(f, "frame surface unavailable"),
            CaptureError::Encode(s) => write!(f, "failed to encode frame: {}", s),
        }
    }
}

impl std::error::Error for CaptureError {}

/// The server-side screenshot fallback (or another API call) failed.
#[derive(Debug)]
pub enum NetworkError {
    MissingToken,
    Unauthorized(StatusCode),
    UnexpectedStatus { status: StatusCode, body: String },
    EmptyBody,
    InvalidImage(String),
    Http(reqwest::Error),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::MissingToken => write!(f, "not signed in"),
            NetworkError::Unauthorized(status) => write!(f, "authorization rejected ({status})"),
            NetworkError::UnexpectedStatus { status, body } => {
                write!(f, "unexpected status {status}: {body}")
            }
            NetworkError::EmptyBody => write!(f, "server returned an empty screenshot"),
            NetworkError::InvalidImage(s) => write!(f, "server screenshot is not an image: {}", s),
            NetworkError::Http(err) => write!(f, "http error: {err}"),
        }
    }
}

impl std::error::Error for NetworkError {}

impl From<reqwest::Error> for NetworkError {
    fn from(value: reqwest::Error) -> Self {
        NetworkError::Http(value)
    }
}

/// A manually uploaded file was rejected. Nothing was mutated.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    TooLarge { size: usize, limit: usize },
    NotAnImage(String),
    InvalidImage(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::TooLarge { size, limit } => write!(
                f,
                "file is {:.1} MiB, the limit is {:.0} MiB",
                *size as f64 / (1024.0 * 1024.0),
                *limit as f64 / (1024.0 * 1024.0)
            ),
            ValidationError::NotAnImage(mime) => {
                write!(f, "file type {} is not an image", mime)
            }
            ValidationError::InvalidImage(_) => write!(f, "invalid image"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// What the capture UI offers after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affordance {
    RetryLoad,
    WaitAndRetry,
    ServerCapture,
    ManualUpload,
    ChooseAnotherFile,
    None,
}

#[derive(Debug)]
pub enum ThumbnailError {
    Load(LoadError),
    Capture(CaptureError),
    Network(NetworkError),
    Validation(ValidationError),
    /// The triggering control is disabled while `0` is outstanding
    Busy(&'static str),
    /// Both automated capture paths are spent; only a manual upload is left
    ManualUploadRequired(String),
    Closed,
}

impl ThumbnailError {
    pub fn affordance(&self) -> Affordance {
        match self {
            ThumbnailError::Load(_) => Affordance::RetryLoad,
            ThumbnailError::Capture(CaptureError::FrameUnavailable)
            | ThumbnailError::Capture(CaptureError::NotReady) => Affordance::WaitAndRetry,
            ThumbnailError::Capture(_) => Affordance::ServerCapture,
            ThumbnailError::Network(_) | ThumbnailError::ManualUploadRequired(_) => {
                Affordance::ManualUpload
            }
            ThumbnailError::Validation(_) => Affordance::ChooseAnotherFile,
            ThumbnailError::Busy(_) => Affordance::WaitAndRetry,
            ThumbnailError::Closed => Affordance::None,
        }
    }

    /// Message shown next to the control that failed.
    pub fn user_message(&self) -> String {
        match self {
            ThumbnailError::Load(e) => format!("Could not load the video ({e}). Try again."),
            ThumbnailError::Capture(CaptureError::FrameUnavailable) => {
                "The frame is not ready yet. Wait a moment and capture again.".to_string()
            }
            ThumbnailError::Capture(CaptureError::NotReady) => {
                "The video is still loading.".to_string()
            }
            ThumbnailError::Capture(e) => {
                format!("Could not capture the frame ({e}). Try a server capture or upload an image.")
            }
            ThumbnailError::Network(e) => {
                format!("Server capture failed ({e}). Please upload an image instead.")
            }
            ThumbnailError::Validation(e) => format!("This file cannot be used: {e}."),
            ThumbnailError::Busy(op) => format!("Please wait, {op} is still running."),
            ThumbnailError::ManualUploadRequired(reason) => {
                format!("Automatic capture is unavailable ({reason}). Please upload an image.")
            }
            ThumbnailError::Closed => "The thumbnail editor is closed.".to_string(),
        }
    }
}

impl fmt::Display for ThumbnailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThumbnailError::Load(e) => write!(f, "load error: {e}"),
            ThumbnailError::Capture(e) => write!(f, "capture error: {e}"),
            ThumbnailError::Network(e) => write!(f, "network error: {e}"),
            ThumbnailError::Validation(e) => write!(f, "validation error: {e}"),
            ThumbnailError::Busy(op) => write!(f, "{op} already in progress"),
            ThumbnailError::ManualUploadRequired(reason) => {
                write!(f, "manual upload required: {reason}")
            }
            ThumbnailError::Closed => write!(f, "capture session closed"),
        }
    }
}

impl std::error::Error for ThumbnailError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ThumbnailError::Load(e) => Some(e),
            ThumbnailError::Capture(e) => Some(e),
            ThumbnailError::Network(e) => Some(e),
            ThumbnailError::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LoadError> for ThumbnailError {
    fn from(e: LoadError) -> Self {
        ThumbnailError::Load(e)
    }
}

impl From<CaptureError> for ThumbnailError {
    fn from(e: CaptureError) -> Self {
        ThumbnailError::Capture(e)
    }
}

impl From<NetworkError> for ThumbnailError {
    fn from(e: NetworkError) -> Self {
        ThumbnailError::Network(e)
    }
}

impl From<ValidationError> for ThumbnailError {
    fn from(e: ValidationError) -> Self {
        ThumbnailError::Validation(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_message_cites_limit() {
        let err = ValidationError::TooLarge {
            size: 6 * 1024 * 1024,
            limit: 5 * 1024 * 1024,
        };
        assert_eq!(err.to_string(), "file is 6.0 MiB, the limit is 5 MiB");
    }

    #[test]
    fn test_affordances() {
        assert_eq!(
            ThumbnailError::from(CaptureError::FrameUnavailable).affordance(),
            Affordance::WaitAndRetry
        );
        assert_eq!(
            ThumbnailError::from(CaptureError::Encode("boom".into())).affordance(),
            Affordance::ServerCapture
        );
        assert_eq!(
            ThumbnailError::from(NetworkError::MissingToken).affordance(),
            Affordance::ManualUpload
        );
        assert_eq!(
            ThumbnailError::from(LoadError::NoVideoStream).affordance(),
            Affordance::RetryLoad
        );
    }
}

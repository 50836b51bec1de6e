//! Media element seam.
//!
//! A `MediaElement` plays the role of a video element: commands are
//! fire-and-forget, and their outcomes arrive later as `MediaEvent`s on the
//! channel the element was built with. The capture session treats each event
//! as one state transition.

use image::RgbaImage;
use tokio::sync::mpsc;

pub mod ffmpeg;
#[cfg(test)]
pub(crate) mod scripted;

pub use ffmpeg::FfmpegElement;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoMetadata {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    MetadataLoaded(VideoMetadata),
    /// A frame has decoded and can be drawn
    CanPlay,
    /// The seek tagged `generation` finished settling at `time`
    Seeked { generation: u64, time: f64 },
    Error(String),
}

pub type MediaEventSender = mpsc::UnboundedSender<MediaEvent>;
pub type MediaEventReceiver = mpsc::UnboundedReceiver<MediaEvent>;

pub fn event_channel() -> (MediaEventSender, MediaEventReceiver) {
    mpsc::unbounded_channel()
}

pub trait MediaElement {
    /// Start loading `source_url`. Replaces any previous source.
    fn load(&mut self, source_url: &str);

    /// Move the playback position. Completion is reported as `Seeked` with the same generation.
    fn seek(&mut self, time: f64, generation: u64);

    /// Dimensions of the decoded frame, `(0, 0)` until one exists.
    fn intrinsic_size(&self) -> (u32, u32);

    /// Pixels of the currently displayed frame.
    fn current_frame(&self) -> Option<RgbaImage>;

    /// Whether this environment can decode the source itself.
    fn decodes_locally(&self) -> bool {
        true
    }
}

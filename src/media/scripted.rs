//! In-memory media element for tests.

use image::{Rgba, RgbaImage};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{MediaElement, MediaEvent, MediaEventSender, VideoMetadata};

pub(crate) struct ScriptState {
    pub loads: Vec<String>,
    pub seeks: Vec<(f64, u64)>,
    pub size: (u32, u32),
    pub frame: Option<RgbaImage>,
    pub decodes_locally: bool,
    can_play_sent: bool,
}

impl Default for ScriptState {
    fn default() -> Self {
        Self {
            loads: Vec::new(),
            seeks: Vec::new(),
            size: (0, 0),
            frame: None,
            decodes_locally: true,
            can_play_sent: false,
        }
    }
}

/// Records commands. With an event sender and metadata it also answers them
/// the way a real element would: metadata on load, a frame plus `Seeked`
/// (and `CanPlay` once) on seek.
#[derive(Clone, Default)]
pub(crate) struct ScriptedElement {
    state: Arc<Mutex<ScriptState>>,
    events: Option<MediaEventSender>,
    metadata: Option<VideoMetadata>,
}

impl ScriptedElement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn responding(events: MediaEventSender, metadata: VideoMetadata) -> Self {
        Self {
            state: Arc::default(),
            events: Some(events),
            metadata: Some(metadata),
        }
    }

    pub fn script(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap()
    }

    /// Decoded frame of the given size, or no frame at all for `(0, 0)`.
    pub fn set_frame(&self, width: u32, height: u32) {
        let mut script = self.script();
        script.size = (width, height);
        script.frame = (width > 0 && height > 0)
            .then(|| RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 255])));
    }

    fn send(&self, event: MediaEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

impl MediaElement for ScriptedElement {
    fn load(&mut self, source_url: &str) {
        self.script().loads.push(source_url.to_string());
        if let Some(metadata) = self.metadata {
            self.send(MediaEvent::MetadataLoaded(metadata));
        }
    }

    fn seek(&mut self, time: f64, generation: u64) {
        self.script().seeks.push((time, generation));
        let Some(metadata) = self.metadata else {
            return;
        };
        if self.events.is_none() {
            return;
        }

        let first_frame = {
            let mut script = self.script();
            if script.size == (0, 0) {
                script.size = (metadata.width, metadata.height);
                script.frame = Some(RgbaImage::from_pixel(
                    metadata.width,
                    metadata.height,
                    Rgba([0, 0, 255, 255]),
                ));
            }
            !std::mem::replace(&mut script.can_play_sent, true)
        };
        self.send(MediaEvent::Seeked { generation, time });
        if first_frame {
            self.send(MediaEvent::CanPlay);
        }
    }

    fn intrinsic_size(&self) -> (u32, u32) {
        self.script().size
    }

    fn current_frame(&self) -> Option<RgbaImage> {
        self.script().frame.clone()
    }

    fn decodes_locally(&self) -> bool {
        self.script().decodes_locally
    }
}

//! Capture session state machine.
//!
//! One session per open thumbnail editor. The session never awaits anything:
//! media events come in through `handle_media_event`, and work that has to
//! wait on the outside world (server screenshot, upload decode check) is split
//! into `begin_*`, which hands out a ticket, and `finish_*`, which applies the
//! result only if that ticket is still current. Superseded or closed tickets
//! are discarded when their result shows up.
//!
//! States: `Loading -> Ready -> {Capturing -> Ready} | Error`, with `Error ->
//! Loading` through `retry_load`. Seek and capture controls only work in `Ready`.

use crate::api::Screenshot;
use crate::config::CaptureConfig;
use crate::error::{CaptureError, LoadError, NetworkError, ThumbnailError, ValidationError};
use crate::frame::{
    CapturedImage, ImageSource, encode_frame, extension_for_mime, probe_dimensions,
};
use crate::media::{MediaElement, MediaEvent};
use crate::preview::{PreviewHandle, PreviewRegistry, PreviewUrl};
use crate::upload::{UploadedFile, validate_upload};
use bytes::Bytes;
use chrono::Utc;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Loading,
    Ready,
    /// Held only for the duration of a synchronous `capture_frame` call, so
    /// callers observe `Ready` on both sides of it
    Capturing,
    Error(LoadError),
}

pub type SelectCallback = Box<dyn FnMut(Option<&CapturedImage>, Option<&PreviewUrl>) + Send>;
pub type CloseCallback = Box<dyn FnMut() + Send>;

/// Hooks into the parent editor.
pub struct SessionCallbacks {
    pub on_select: SelectCallback,
    pub on_close: CloseCallback,
}

impl SessionCallbacks {
    pub fn new(
        on_select: impl FnMut(Option<&CapturedImage>, Option<&PreviewUrl>) + Send + 'static,
        on_close: impl FnMut() + Send + 'static,
    ) -> Self {
        Self {
            on_select: Box::new(on_select),
            on_close: Box::new(on_close),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_, _| {}, || {})
    }
}

/// What the parent receives on confirm. The preview reference moves with it.
#[derive(Debug, Default)]
pub struct SelectionResult {
    pub image: Option<CapturedImage>,
    pub preview: Option<PreviewHandle>,
}

impl SelectionResult {
    pub fn preview_url(&self) -> Option<&PreviewUrl> {
        self.preview.as_ref().map(|p| p.url())
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_none()
    }
}

#[derive(Debug)]
pub struct ServerCaptureTicket {
    id: u64,
    timestamp: f64,
}

impl ServerCaptureTicket {
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

#[derive(Debug)]
pub struct UploadTicket {
    id: u64,
    file: UploadedFile,
}

impl UploadTicket {
    /// Bytes to run the decode check on.
    pub fn data(&self) -> Bytes {
        self.file.data.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fallback {
    Idle,
    InFlight(u64),
    /// The server path failed; the automatic chain stops before it from now on
    Exhausted,
}

struct Selected {
    image: CapturedImage,
    preview: PreviewHandle,
}

pub struct CaptureSession<M: MediaElement> {
    element: M,
    previews: PreviewRegistry,
    callbacks: SessionCallbacks,
    max_capture_width: u32,
    max_upload_bytes: usize,
    default_seek_fraction: f64,

    state: SessionState,
    source_url: Option<String>,
    initial_thumbnail: Option<String>,
    current_time: f64,
    /// Position of the frame the element last reported as displayed
    settled_time: f64,
    duration: f64,
    seek_generation: u64,
    settling: bool,
    last_error: Option<String>,

    selected: Option<Selected>,
    fallback: Fallback,
    pending_upload: Option<u64>,
    next_ticket: u64,
    closed: bool,
}

impl<M: MediaElement> CaptureSession<M> {
    pub fn new(
        element: M,
        previews: PreviewRegistry,
        callbacks: SessionCallbacks,
        config: &CaptureConfig,
    ) -> Self {
        Self {
            element,
            previews,
            callbacks,
            max_capture_width: config.max_capture_width,
            max_upload_bytes: config.max_upload_bytes,
            default_seek_fraction: config.default_seek_fraction,
            state: SessionState::Loading,
            source_url: None,
            initial_thumbnail: None,
            current_time: 0.0,
            settled_time: 0.0,
            duration: 0.0,
            seek_generation: 0,
            settling: false,
            last_error: None,
            selected: None,
            fallback: Fallback::Idle,
            pending_upload: None,
            next_ticket: 0,
            closed: false,
        }
    }

    /// Thumbnail the video already has. Shown until something is selected;
    /// the session does not own it and never releases it.
    pub fn with_initial_thumbnail(mut self, url: impl Into<String>) -> Self {
        self.initial_thumbnail = Some(url.into());
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_loading(&self) -> bool {
        self.state == SessionState::Loading
    }

    pub fn has_video_error(&self) -> bool {
        matches!(self.state, SessionState::Error(_))
    }

    pub fn controls_enabled(&self) -> bool {
        !self.closed && self.state == SessionState::Ready
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// A seek was issued and the element has not reported it settled yet.
    pub fn is_settling(&self) -> bool {
        self.settling
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn initial_thumbnail(&self) -> Option<&str> {
        self.initial_thumbnail.as_deref()
    }

    pub fn selected_image(&self) -> Option<&CapturedImage> {
        self.selected.as_ref().map(|s| &s.image)
    }

    pub fn preview_url(&self) -> Option<&PreviewUrl> {
        self.selected.as_ref().map(|s| s.preview.url())
    }

    /// URL the editor should display: the live preview, else the initial thumbnail.
    pub fn display_url(&self) -> Option<&str> {
        self.preview_url()
            .map(|u| u.as_str())
            .or(self.initial_thumbnail.as_deref())
    }

    pub fn server_capture_in_flight(&self) -> bool {
        matches!(self.fallback, Fallback::InFlight(_))
    }

    pub fn fallback_exhausted(&self) -> bool {
        self.fallback == Fallback::Exhausted
    }

    pub fn upload_in_flight(&self) -> bool {
        self.pending_upload.is_some()
    }

    pub fn decodes_locally(&self) -> bool {
        self.element.decodes_locally()
    }

    pub fn element(&self) -> &M {
        &self.element
    }

    /// Point the element at a new source and start loading it.
    pub fn initialize(&mut self, source_url: &str) {
        log::info!("[capture] Loading {}", source_url);
        self.source_url = Some(source_url.to_string());
        self.state = SessionState::Loading;
        self.duration = 0.0;
        self.current_time = 0.0;
        self.settled_time = 0.0;
        // Invalidate seeks from a previous load
        self.seek_generation += 1;
        self.settling = false;
        self.last_error = None;
        self.element.load(source_url);
    }

    /// Reload after a load failure. Returns whether a reload was started.
    pub fn retry_load(&mut self) -> bool {
        if self.closed || !self.has_video_error() {
            return false;
        }
        let Some(url) = self.source_url.clone() else {
            return false;
        };
        self.initialize(&url);
        true
    }

    /// Apply one media pipeline event.
    pub fn handle_media_event(&mut self, event: MediaEvent) {
        if self.closed {
            log::debug!("[capture] Ignoring {:?} after close", event);
            return;
        }

        match event {
            MediaEvent::MetadataLoaded(metadata) => {
                if !self.is_loading() {
                    log::debug!("[capture] Ignoring metadata outside of loading");
                    return;
                }
                self.duration = metadata.duration_secs;
                let target = self.clamp_time(self.duration * self.default_seek_fraction);
                log::info!(
                    "[capture] Metadata loaded ({:.2}s, {}x{}), default frame at {:.2}s",
                    metadata.duration_secs,
                    metadata.width,
                    metadata.height,
                    target
                );
                self.issue_seek(target);
            }
            MediaEvent::CanPlay => {
                if self.is_loading() {
                    log::info!("[capture] Video ready at {:.2}s", self.current_time);
                    self.state = SessionState::Ready;
                }
            }
            MediaEvent::Seeked { generation, time } => {
                if generation != self.seek_generation {
                    log::debug!(
                        "[capture] Dropping stale seek result {} (current {})",
                        generation,
                        self.seek_generation
                    );
                    return;
                }
                self.settling = false;
                self.current_time = time;
                self.settled_time = time;
            }
            MediaEvent::Error(message) => {
                if self.settling {
                    // The requested position was never reached
                    self.current_time = self.settled_time;
                }
                self.settling = false;
                self.last_error = Some(message.clone());
                if self.is_loading() {
                    log::warn!("[capture] Video failed to load: {}", message);
                    self.state = SessionState::Error(LoadError::Element(message));
                } else {
                    log::warn!("[capture] Media error while {:?}: {}", self.state, message);
                }
            }
        }
    }

    /// Absolute seek. Returns the clamped time.
    pub fn seek(&mut self, time: f64) -> Result<f64, CaptureError> {
        if !self.controls_enabled() {
            return Err(CaptureError::NotReady);
        }
        let target = self.clamp_time(time);
        self.issue_seek(target);
        Ok(target)
    }

    /// Relative seek, e.g. ±1s or ±10s.
    pub fn nudge(&mut self, delta: f64) -> Result<f64, CaptureError> {
        self.seek(self.current_time + delta)
    }

    fn clamp_time(&self, time: f64) -> f64 {
        if time.is_nan() {
            0.0
        } else {
            time.clamp(0.0, self.duration.max(0.0))
        }
    }

    fn issue_seek(&mut self, time: f64) {
        self.seek_generation += 1;
        self.settling = true;
        self.current_time = time;
        self.element.seek(time, self.seek_generation);
    }

    /// Draw the current frame, encode it as PNG and select it. Fails with
    /// `FrameUnavailable` while a seek is still settling.
    pub fn capture_frame(&mut self) -> Result<&CapturedImage, CaptureError> {
        if !self.controls_enabled() {
            return Err(CaptureError::NotReady);
        }
        if self.settling {
            log::info!(
                "[capture] Frame at {:.2}s not decoded yet, still showing {:.2}s",
                self.current_time,
                self.settled_time
            );
            return Err(CaptureError::FrameUnavailable);
        }

        self.state = SessionState::Capturing;
        let result = self.render_frame();
        self.state = SessionState::Ready;

        match result {
            Ok(image) => {
                log::info!(
                    "[capture] Captured {}x{} frame at {:.2}s ({} bytes)",
                    image.width,
                    image.height,
                    self.current_time,
                    image.data.len()
                );
                Ok(self.select(image))
            }
            Err(e) => {
                log::warn!("[capture] Frame capture failed: {}", e);
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn render_frame(&self) -> Result<CapturedImage, CaptureError> {
        let (width, height) = self.element.intrinsic_size();
        if width == 0 || height == 0 {
            return Err(CaptureError::FrameUnavailable);
        }
        let frame = self
            .element
            .current_frame()
            .ok_or(CaptureError::CanvasUnavailable)?;
        let (data, width, height) = encode_frame(frame, self.max_capture_width)?;
        Ok(CapturedImage::from_canvas(
            data,
            width,
            height,
            self.current_time,
        ))
    }

    /// Reserve the server screenshot path. Allowed when the video is ready or
    /// failed to decode locally, never while loading or while a request is out.
    pub fn begin_server_capture(
        &mut self,
        timestamp: f64,
    ) -> Result<ServerCaptureTicket, ThumbnailError> {
        if self.closed {
            return Err(ThumbnailError::Closed);
        }
        if self.is_loading() {
            return Err(CaptureError::NotReady.into());
        }
        if self.server_capture_in_flight() {
            return Err(ThumbnailError::Busy("server capture"));
        }

        let timestamp = if self.duration > 0.0 {
            self.clamp_time(timestamp)
        } else if timestamp.is_nan() {
            0.0
        } else {
            timestamp.max(0.0)
        };
        let id = self.next_ticket();
        self.fallback = Fallback::InFlight(id);
        log::info!("[capture] Requesting server screenshot at {:.2}s", timestamp);
        Ok(ServerCaptureTicket { id, timestamp })
    }

    /// Apply the server response. `Ok(None)` means the ticket was stale and
    /// the result was discarded.
    pub fn finish_server_capture(
        &mut self,
        ticket: ServerCaptureTicket,
        result: Result<Screenshot, NetworkError>,
    ) -> Result<Option<&CapturedImage>, ThumbnailError> {
        if self.closed || self.fallback != Fallback::InFlight(ticket.id) {
            log::debug!("[capture] Discarding stale server screenshot {}", ticket.id);
            return Ok(None);
        }

        let screenshot = match result.and_then(|shot| {
            probe_dimensions(&shot.data)
                .map(|dims| (shot, dims))
                .map_err(|e| NetworkError::InvalidImage(e.to_string()))
        }) {
            Ok(screenshot) => screenshot,
            Err(e) => {
                log::warn!("[capture] Server screenshot failed: {}", e);
                self.fallback = Fallback::Exhausted;
                self.last_error = Some(e.to_string());
                return Err(e.into());
            }
        };

        let (shot, (width, height)) = screenshot;
        self.fallback = Fallback::Idle;
        let image = CapturedImage {
            file_name: format!(
                "screenshot_{}ms.{}",
                (ticket.timestamp * 1000.0).round() as u64,
                extension_for_mime(&shot.mime_type)
            ),
            data: shot.data,
            mime_type: shot.mime_type,
            source: ImageSource::ServerFallback,
            width,
            height,
            captured_at: Utc::now(),
        };
        log::info!(
            "[capture] Server screenshot {}x{} at {:.2}s",
            width,
            height,
            ticket.timestamp
        );
        Ok(Some(self.select(image)))
    }

    /// Size and MIME checks, then a ticket for the decode check. A new file
    /// supersedes a check still in progress.
    pub fn begin_upload(&mut self, file: UploadedFile) -> Result<UploadTicket, ThumbnailError> {
        if self.closed {
            return Err(ThumbnailError::Closed);
        }
        if let Err(e) = validate_upload(&file, self.max_upload_bytes) {
            log::info!("[capture] Rejected upload {}: {}", file.file_name, e);
            return Err(e.into());
        }

        let id = self.next_ticket();
        if let Some(previous) = self.pending_upload.replace(id) {
            log::debug!("[capture] Upload check {} superseded by {}", previous, id);
        }
        Ok(UploadTicket { id, file })
    }

    /// Apply the decode check. `Ok(None)` means the ticket was stale.
    pub fn finish_upload(
        &mut self,
        ticket: UploadTicket,
        decoded: Result<(u32, u32), ValidationError>,
    ) -> Result<Option<&CapturedImage>, ThumbnailError> {
        if self.closed || self.pending_upload != Some(ticket.id) {
            log::debug!("[capture] Discarding stale upload check {}", ticket.id);
            return Ok(None);
        }
        self.pending_upload = None;

        match decoded {
            Ok((width, height)) => {
                log::info!(
                    "[capture] Accepted upload {} ({}x{})",
                    ticket.file.file_name,
                    width,
                    height
                );
                Ok(Some(self.select(ticket.file.into_captured(width, height))))
            }
            Err(e) => {
                log::info!("[capture] Rejected upload {}: {}", ticket.file.file_name, e);
                self.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    pub fn clear_selection(&mut self) {
        if self.closed {
            return;
        }
        if let Some(previous) = self.selected.take() {
            previous.preview.release();
        }
        (self.callbacks.on_select)(None, None);
    }

    /// Hand the selection to the parent and end the session.
    pub fn confirm_selection(&mut self) -> Result<SelectionResult, ThumbnailError> {
        if self.closed {
            return Err(ThumbnailError::Closed);
        }
        let result = match self.selected.take() {
            Some(Selected { image, preview }) => SelectionResult {
                image: Some(image),
                preview: Some(preview),
            },
            None => SelectionResult::default(),
        };
        self.finish();
        Ok(result)
    }

    /// Cancel. Releases the current preview and invalidates outstanding work.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Some(previous) = self.selected.take() {
            previous.preview.release();
        }
        self.finish();
    }

    fn finish(&mut self) {
        self.closed = true;
        self.pending_upload = None;
        if self.server_capture_in_flight() {
            self.fallback = Fallback::Idle;
        }
        log::info!("[capture] Session closed");
        (self.callbacks.on_close)();
    }

    fn select(&mut self, image: CapturedImage) -> &CapturedImage {
        let preview = self.previews.create(image.data.clone(), &image.mime_type);
        if let Some(previous) = self.selected.take() {
            previous.preview.release();
        }
        (self.callbacks.on_select)(Some(&image), Some(preview.url()));
        &self.selected.insert(Selected { image, preview }).image
    }

    fn next_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{LARGE_SEEK_STEP_SECS, SMALL_SEEK_STEP_SECS};
    use crate::media::VideoMetadata;
    use crate::media::scripted::ScriptedElement;
    use image::{DynamicImage, ImageFormat, RgbaImage};
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Calls {
        selections: Vec<Option<String>>,
        closes: usize,
    }

    fn session() -> (
        CaptureSession<ScriptedElement>,
        ScriptedElement,
        PreviewRegistry,
        Arc<Mutex<Calls>>,
    ) {
        let element = ScriptedElement::new();
        let previews = PreviewRegistry::new();
        let calls = Arc::new(Mutex::new(Calls::default()));
        let on_select = calls.clone();
        let on_close = calls.clone();
        let callbacks = SessionCallbacks::new(
            move |_, url| {
                on_select
                    .lock()
                    .unwrap()
                    .selections
                    .push(url.map(|u| u.to_string()))
            },
            move || on_close.lock().unwrap().closes += 1,
        );
        let session = CaptureSession::new(
            element.clone(),
            previews.clone(),
            callbacks,
            &CaptureConfig::default(),
        );
        (session, element, previews, calls)
    }

    fn metadata(duration_secs: f64) -> VideoMetadata {
        VideoMetadata {
            duration_secs,
            width: 1920,
            height: 1080,
        }
    }

    /// Drive a fresh session to `Ready` on a 100s 1080p video.
    fn ready_session() -> (
        CaptureSession<ScriptedElement>,
        ScriptedElement,
        PreviewRegistry,
        Arc<Mutex<Calls>>,
    ) {
        let (mut session, element, previews, calls) = session();
        session.initialize("http://api/videos/v1/stream");
        session.handle_media_event(MediaEvent::MetadataLoaded(metadata(100.0)));
        let (time, generation) = *element.script().seeks.last().unwrap();
        element.set_frame(1920, 1080);
        session.handle_media_event(MediaEvent::Seeked { generation, time });
        session.handle_media_event(MediaEvent::CanPlay);
        assert_eq!(session.state(), &SessionState::Ready);
        (session, element, previews, calls)
    }

    fn png(width: u32, height: u32) -> Bytes {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(RgbaImage::new(width, height))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        Bytes::from(out.into_inner())
    }

    #[test]
    fn test_metadata_seeks_to_ten_percent() {
        let (mut session, element, _, _) = session();
        session.initialize("http://api/videos/v1/stream");
        assert!(session.is_loading());
        assert_eq!(element.script().loads, vec!["http://api/videos/v1/stream"]);

        session.handle_media_event(MediaEvent::MetadataLoaded(metadata(100.0)));
        assert_eq!(session.current_time(), 10.0);
        assert_eq!(element.script().seeks.last().unwrap().0, 10.0);
        // Metadata alone does not make the video ready
        assert!(session.is_loading());
    }

    #[test]
    fn test_ready_only_after_can_play() {
        let (mut session, _, _, _) = session();
        session.initialize("src");
        session.handle_media_event(MediaEvent::MetadataLoaded(metadata(40.0)));
        assert!(session.seek(5.0).is_err());
        assert!(session.capture_frame().is_err());
        session.handle_media_event(MediaEvent::CanPlay);
        assert!(session.controls_enabled());
    }

    #[test]
    fn test_seek_clamps() {
        let (mut session, _, _, _) = ready_session();
        for (requested, expected) in [
            (-5.0, 0.0),
            (0.0, 0.0),
            (42.5, 42.5),
            (100.0, 100.0),
            (250.0, 100.0),
            (f64::INFINITY, 100.0),
            (f64::NAN, 0.0),
        ] {
            assert_eq!(session.seek(requested).unwrap(), expected);
            assert_eq!(session.current_time(), expected);
        }
    }

    #[test]
    fn test_nudge_steps_from_current_time() {
        let (mut session, _, _, _) = ready_session();
        assert_eq!(session.nudge(SMALL_SEEK_STEP_SECS).unwrap(), 11.0);
        assert_eq!(session.nudge(-LARGE_SEEK_STEP_SECS).unwrap(), 1.0);
        assert_eq!(session.nudge(-LARGE_SEEK_STEP_SECS).unwrap(), 0.0);
    }

    #[test]
    fn test_capture_waits_for_seek_to_settle() {
        let (mut session, element, previews, _) = ready_session();
        session.seek(50.0).unwrap();
        assert_eq!(
            session.capture_frame().unwrap_err(),
            CaptureError::FrameUnavailable
        );
        assert_eq!(
            ThumbnailError::from(CaptureError::FrameUnavailable).affordance(),
            crate::error::Affordance::WaitAndRetry
        );
        assert_eq!(previews.active_count(), 0);

        let (time, generation) = *element.script().seeks.last().unwrap();
        session.handle_media_event(MediaEvent::Seeked { generation, time });
        let image = session.capture_frame().unwrap();
        assert_eq!(image.file_name, "thumbnail_50000ms.png");
    }

    #[test]
    fn test_failed_seek_restores_displayed_time() {
        let (mut session, _, _, _) = ready_session();
        session.seek(50.0).unwrap();
        session.handle_media_event(MediaEvent::Error("decode failed".to_string()));

        assert_eq!(session.state(), &SessionState::Ready);
        assert!(!session.is_settling());
        assert_eq!(session.current_time(), 10.0);
        assert_eq!(session.last_error(), Some("decode failed"));

        let image = session.capture_frame().unwrap();
        assert_eq!(image.file_name, "thumbnail_10000ms.png");
    }

    #[test]
    fn test_stale_seek_results_are_ignored() {
        let (mut session, element, _, _) = ready_session();
        session.seek(20.0).unwrap();
        let (_, first) = *element.script().seeks.last().unwrap();
        session.seek(30.0).unwrap();
        let (_, second) = *element.script().seeks.last().unwrap();

        session.handle_media_event(MediaEvent::Seeked {
            generation: first,
            time: 20.0,
        });
        assert_eq!(session.current_time(), 30.0);
        assert!(session.is_settling());

        session.handle_media_event(MediaEvent::Seeked {
            generation: second,
            time: 30.0,
        });
        assert_eq!(session.current_time(), 30.0);
        assert!(!session.is_settling());
    }

    #[test]
    fn test_load_error_and_retry() {
        let (mut session, element, _, _) = session();
        assert!(!session.retry_load());
        session.initialize("src");
        session.handle_media_event(MediaEvent::Error("404".to_string()));
        assert!(session.has_video_error());
        assert_eq!(session.last_error(), Some("404"));
        assert!(session.seek(1.0).is_err());

        assert!(session.retry_load());
        assert!(session.is_loading());
        assert_eq!(element.script().loads.len(), 2);
        assert!(!session.retry_load());
    }

    #[test]
    fn test_capture_produces_capped_png() {
        let (mut session, _, previews, calls) = ready_session();
        let image = session.capture_frame().unwrap().clone();
        assert_eq!(image.source, ImageSource::Canvas);
        assert_eq!(image.mime_type, "image/png");
        assert_eq!((image.width, image.height), (1280, 720));
        assert!(!image.is_empty());
        assert_eq!(session.state(), &SessionState::Ready);

        let url = session.preview_url().unwrap().clone();
        assert!(previews.contains(&url));
        assert_eq!(calls.lock().unwrap().selections, vec![Some(url.to_string())]);
    }

    #[test]
    fn test_capture_without_decoded_frame() {
        let (mut session, element, previews, calls) = ready_session();
        element.set_frame(0, 0);
        assert_eq!(
            session.capture_frame().unwrap_err(),
            CaptureError::FrameUnavailable
        );
        assert_eq!(session.state(), &SessionState::Ready);
        assert!(session.selected_image().is_none());
        assert_eq!(previews.active_count(), 0);
        assert!(calls.lock().unwrap().selections.is_empty());
    }

    #[test]
    fn test_new_selection_releases_previous_once() {
        let (mut session, _, previews, _) = ready_session();
        session.capture_frame().unwrap();
        let first = session.preview_url().unwrap().clone();
        session.capture_frame().unwrap();
        let second = session.preview_url().unwrap().clone();

        assert_ne!(first, second);
        assert!(!previews.contains(&first));
        assert!(previews.contains(&second));
        assert_eq!(previews.revocation_count(), 1);
        assert_eq!(previews.active_count(), 1);
    }

    #[test]
    fn test_clear_then_confirm_is_empty() {
        let (mut session, _, previews, calls) = ready_session();
        session.capture_frame().unwrap();
        session.clear_selection();
        assert_eq!(previews.revocation_count(), 1);
        assert_eq!(calls.lock().unwrap().selections.last(), Some(&None));

        let result = session.confirm_selection().unwrap();
        assert!(result.image.is_none());
        assert!(result.preview_url().is_none());
        assert_eq!(calls.lock().unwrap().closes, 1);
        assert!(matches!(
            session.confirm_selection(),
            Err(ThumbnailError::Closed)
        ));
    }

    #[test]
    fn test_confirm_hands_over_preview() {
        let (mut session, _, previews, _) = ready_session();
        session.capture_frame().unwrap();
        let result = session.confirm_selection().unwrap();
        let url = result.preview_url().unwrap().clone();
        assert!(previews.contains(&url));
        assert_eq!(previews.revocation_count(), 0);

        drop(session);
        assert!(previews.contains(&url));
        drop(result);
        assert!(!previews.contains(&url));
        assert_eq!(previews.revocation_count(), 1);
    }

    #[test]
    fn test_close_releases_preview() {
        let (mut session, _, previews, calls) = ready_session();
        session.capture_frame().unwrap();
        session.close();
        session.close();
        assert_eq!(previews.active_count(), 0);
        assert_eq!(previews.revocation_count(), 1);
        assert_eq!(calls.lock().unwrap().closes, 1);
    }

    #[test]
    fn test_server_capture_guarded_and_applied() {
        let (mut session, _, _, _) = ready_session();
        let ticket = session.begin_server_capture(42.0).unwrap();
        assert_eq!(ticket.timestamp(), 42.0);
        assert!(matches!(
            session.begin_server_capture(43.0),
            Err(ThumbnailError::Busy(_))
        ));

        let shot = Screenshot {
            data: png(640, 360),
            mime_type: "image/png".to_string(),
        };
        let image = session
            .finish_server_capture(ticket, Ok(shot))
            .unwrap()
            .unwrap();
        assert_eq!(image.source, ImageSource::ServerFallback);
        assert_eq!((image.width, image.height), (640, 360));
        assert_eq!(image.file_name, "screenshot_42000ms.png");
        assert!(!session.server_capture_in_flight());
    }

    #[test]
    fn test_server_capture_failure_exhausts_fallback() {
        let (mut session, _, _, _) = ready_session();
        let ticket = session.begin_server_capture(5.0).unwrap();
        let err = session
            .finish_server_capture(ticket, Err(NetworkError::MissingToken))
            .unwrap_err();
        assert!(matches!(err, ThumbnailError::Network(NetworkError::MissingToken)));
        assert!(session.fallback_exhausted());
        assert!(session.selected_image().is_none());
    }

    #[test]
    fn test_server_capture_rejects_non_image_body() {
        let (mut session, _, _, _) = ready_session();
        let ticket = session.begin_server_capture(5.0).unwrap();
        let shot = Screenshot {
            data: Bytes::from_static(b"<html>oops</html>"),
            mime_type: "image/png".to_string(),
        };
        assert!(matches!(
            session.finish_server_capture(ticket, Ok(shot)),
            Err(ThumbnailError::Network(NetworkError::InvalidImage(_)))
        ));
        assert!(session.fallback_exhausted());
    }

    #[test]
    fn test_server_capture_not_while_loading() {
        let (mut session, _, _, _) = session();
        session.initialize("src");
        assert!(matches!(
            session.begin_server_capture(1.0),
            Err(ThumbnailError::Capture(CaptureError::NotReady))
        ));

        session.handle_media_event(MediaEvent::Error("cannot decode".to_string()));
        assert!(session.begin_server_capture(1.0).is_ok());
    }

    #[test]
    fn test_server_result_after_close_is_discarded() {
        let (mut session, _, previews, _) = ready_session();
        let ticket = session.begin_server_capture(1.0).unwrap();
        session.close();
        let shot = Screenshot {
            data: png(2, 2),
            mime_type: "image/png".to_string(),
        };
        assert!(session.finish_server_capture(ticket, Ok(shot)).unwrap().is_none());
        assert_eq!(previews.active_count(), 0);
    }

    #[test]
    fn test_upload_rejections_leave_selection() {
        let (mut session, _, _, _) = ready_session();
        session.capture_frame().unwrap();
        let before = session.preview_url().unwrap().clone();

        let big = UploadedFile::new("big.png", "image/png", Bytes::from(vec![0u8; 6 * 1024 * 1024]));
        assert!(matches!(
            session.begin_upload(big),
            Err(ThumbnailError::Validation(ValidationError::TooLarge { .. }))
        ));
        let text = UploadedFile::new("a.txt", "text/plain", Bytes::from_static(b"hi"));
        assert!(matches!(
            session.begin_upload(text),
            Err(ThumbnailError::Validation(ValidationError::NotAnImage(_)))
        ));

        let corrupt = UploadedFile::new("bad.png", "image/png", Bytes::from_static(b"nope"));
        let ticket = session.begin_upload(corrupt).unwrap();
        let err = session
            .finish_upload(
                ticket,
                Err(ValidationError::InvalidImage("bad header".to_string())),
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "validation error: invalid image");

        assert_eq!(session.preview_url(), Some(&before));
        assert!(!session.upload_in_flight());
    }

    #[test]
    fn test_superseded_upload_check_is_discarded() {
        let (mut session, _, previews, _) = ready_session();
        let first = session
            .begin_upload(UploadedFile::new("a.png", "image/png", png(4, 4)))
            .unwrap();
        let second = session
            .begin_upload(UploadedFile::new("b.png", "image/png", png(8, 8)))
            .unwrap();

        assert!(session.finish_upload(first, Ok((4, 4))).unwrap().is_none());
        assert!(session.selected_image().is_none());

        let image = session.finish_upload(second, Ok((8, 8))).unwrap().unwrap();
        assert_eq!(image.file_name, "b.png");
        assert_eq!(image.source, ImageSource::Upload);
        assert_eq!(previews.active_count(), 1);
    }

    #[test]
    fn test_display_url_prefers_live_preview() {
        let (session, _, _, _) = ready_session();
        let mut session = session.with_initial_thumbnail("https://cdn/thumb.jpg");
        assert_eq!(session.display_url(), Some("https://cdn/thumb.jpg"));
        session.capture_frame().unwrap();
        assert!(session.display_url().unwrap().starts_with("preview:"));
        session.clear_selection();
        assert_eq!(session.display_url(), Some("https://cdn/thumb.jpg"));
    }
}

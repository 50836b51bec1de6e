//! Async driver around a `CaptureSession`.
//!
//! Owns the media event receiver and the API client. Each method awaits at
//! most one external completion at a time and feeds it back into the session.

use crate::api::{ApiClient, AuthContext};
use crate::config::CaptureConfig;
use crate::error::{CaptureError, LoadError, ThumbnailError};
use crate::frame::CapturedImage;
use crate::media::{FfmpegElement, MediaElement, MediaEventReceiver, event_channel};
use crate::preview::PreviewRegistry;
use crate::session::{CaptureSession, SelectionResult, SessionCallbacks, SessionState};
use crate::upload::{UploadedFile, decode_check};

pub struct ThumbnailCapture<M: MediaElement> {
    video_id: String,
    session: CaptureSession<M>,
    events: MediaEventReceiver,
    api: ApiClient,
    auth: AuthContext,
}

impl ThumbnailCapture<FfmpegElement> {
    /// Open a capture session for `video_id` decoding through ffmpeg.
    pub fn open(
        video_id: &str,
        config: &CaptureConfig,
        auth: AuthContext,
        previews: PreviewRegistry,
        callbacks: SessionCallbacks,
    ) -> Result<Self, ThumbnailError> {
        let api = ApiClient::new(config.api_base_url.clone(), config.request_timeout)?;
        let (tx, rx) = event_channel();
        let element = FfmpegElement::new(config, tx);
        let session = CaptureSession::new(element, previews, callbacks, config);
        Ok(Self::with_session(video_id, session, rx, api, auth))
    }
}

impl<M: MediaElement> ThumbnailCapture<M> {
    /// Wrap an existing session and start loading the video's stream.
    pub fn with_session(
        video_id: &str,
        mut session: CaptureSession<M>,
        events: MediaEventReceiver,
        api: ApiClient,
        auth: AuthContext,
    ) -> Self {
        session.initialize(&api.stream_url(video_id));
        Self {
            video_id: video_id.to_string(),
            session,
            events,
            api,
            auth,
        }
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn session(&self) -> &CaptureSession<M> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut CaptureSession<M> {
        &mut self.session
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    /// Wait for the next media event and apply it.
    pub async fn pump(&mut self) -> Result<(), ThumbnailError> {
        match self.events.recv().await {
            Some(event) => {
                self.session.handle_media_event(event);
                Ok(())
            }
            None => Err(LoadError::Element("media pipeline stopped".to_string()).into()),
        }
    }

    /// Apply events that already arrived without waiting for more.
    fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.session.handle_media_event(event);
        }
    }

    /// Pump until the video leaves `Loading`.
    pub async fn wait_until_ready(&mut self) -> Result<(), ThumbnailError> {
        while self.session.is_loading() {
            self.pump().await?;
        }
        match self.session.state() {
            SessionState::Error(e) => Err(e.clone().into()),
            _ => Ok(()),
        }
    }

    /// Reload after a failed load; wait with `wait_until_ready` afterwards.
    pub fn retry_load(&mut self) -> bool {
        self.drain();
        self.session.retry_load()
    }

    async fn settle(&mut self) -> Result<f64, ThumbnailError> {
        while self.session.is_settling() {
            self.pump().await?;
        }
        Ok(self.session.current_time())
    }

    /// Seek and wait for the frame at the new position.
    pub async fn seek(&mut self, time: f64) -> Result<f64, ThumbnailError> {
        self.drain();
        self.session.seek(time)?;
        self.settle().await
    }

    pub async fn nudge(&mut self, delta: f64) -> Result<f64, ThumbnailError> {
        self.drain();
        self.session.nudge(delta)?;
        self.settle().await
    }

    /// In-process capture of the displayed frame, no fallback.
    pub fn capture_frame(&mut self) -> Result<CapturedImage, ThumbnailError> {
        self.drain();
        Ok(self.session.capture_frame()?.clone())
    }

    /// Server-rendered screenshot at `timestamp`.
    pub async fn capture_frame_server_side(
        &mut self,
        timestamp: f64,
    ) -> Result<CapturedImage, ThumbnailError> {
        let ticket = self.session.begin_server_capture(timestamp)?;
        let result = self
            .api
            .fetch_screenshot(&self.auth, &self.video_id, ticket.timestamp())
            .await;
        self.session
            .finish_server_capture(ticket, result)?
            .cloned()
            .ok_or(ThumbnailError::Closed)
    }

    /// Canvas capture, then one server attempt, then manual upload.
    pub async fn capture(&mut self) -> Result<CapturedImage, ThumbnailError> {
        self.drain();
        if self.session.is_closed() {
            return Err(ThumbnailError::Closed);
        }

        let reason = if self.session.has_video_error() {
            "video cannot be loaded here".to_string()
        } else if !self.session.decodes_locally() {
            "video cannot be decoded locally".to_string()
        } else {
            match self.capture_frame() {
                Ok(image) => return Ok(image),
                Err(ThumbnailError::Capture(
                    e @ (CaptureError::FrameUnavailable | CaptureError::NotReady),
                )) => return Err(e.into()),
                Err(e) => e.to_string(),
            }
        };

        if self.session.fallback_exhausted() {
            log::info!("[capture] Server capture already failed, asking for an upload");
            return Err(ThumbnailError::ManualUploadRequired(reason));
        }

        log::info!("[capture] Falling back to server capture: {}", reason);
        match self
            .capture_frame_server_side(self.session.current_time())
            .await
        {
            Err(ThumbnailError::Network(e)) => Err(ThumbnailError::ManualUploadRequired(format!(
                "{reason}; server capture failed: {e}"
            ))),
            other => other,
        }
    }

    /// Validate, decode check, then select a user-provided image.
    pub async fn select_uploaded_image(
        &mut self,
        file: UploadedFile,
    ) -> Result<CapturedImage, ThumbnailError> {
        let ticket = self.session.begin_upload(file)?;
        let decoded = decode_check(ticket.data()).await;
        self.session
            .finish_upload(ticket, decoded)?
            .cloned()
            .ok_or(ThumbnailError::Closed)
    }

    pub fn clear_selection(&mut self) {
        self.session.clear_selection();
    }

    pub fn confirm(mut self) -> Result<SelectionResult, ThumbnailError> {
        self.session.confirm_selection()
    }

    pub fn close(mut self) {
        self.session.close();
    }
}

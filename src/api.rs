//! Client for the video API endpoints the capture flow touches.
//!
//!   GET   /videos/{id}/stream                      - source for the media element
//!   GET   /videos/{id}/screenshot?timestamp={secs} - server-rendered frame (bearer auth)
//!   PATCH /videos/{id}                             - multipart update owned by the editor

use bytes::Bytes;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;

use crate::constants::PNG_MIME;
use crate::error::NetworkError;
use crate::frame::CapturedImage;

/// Credentials passed explicitly into every authenticated call.
#[derive(Clone, Default)]
pub struct AuthContext {
    token: Option<String>,
}

impl AuthContext {
    pub fn bearer(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            token: (!token.trim().is_empty()).then_some(token),
        }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Image bytes rendered by the server.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub data: Bytes,
    pub mime_type: String,
}

/// Fields of `PATCH /videos/{id}`.
#[derive(Debug, Clone)]
pub struct VideoUpdate {
    pub title: String,
    pub description: String,
    pub settings: serde_json::Value,
    pub thumbnail: Option<CapturedImage>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, NetworkError> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn video_url(&self, video_id: &str) -> String {
        format!(
            "{}/videos/{}",
            self.base_url,
            utf8_percent_encode(video_id, NON_ALPHANUMERIC)
        )
    }

    pub fn stream_url(&self, video_id: &str) -> String {
        format!("{}/stream", self.video_url(video_id))
    }

    /// Fetch a server-rendered frame at `timestamp` seconds.
    pub async fn fetch_screenshot(
        &self,
        auth: &AuthContext,
        video_id: &str,
        timestamp: f64,
    ) -> Result<Screenshot, NetworkError> {
        let url = format!("{}/screenshot", self.video_url(video_id));
        let request = self
            .http
            .get(url)
            .query(&[("timestamp", format_timestamp(timestamp))]);
        let response = Self::check_status(authorized(auth, request)?.send().await?).await?;

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or_else(|| PNG_MIME.to_string());

        let data = response.bytes().await?;
        if data.is_empty() {
            return Err(NetworkError::EmptyBody);
        }

        log::info!(
            "[api] Screenshot for video {} at {}s ({} bytes)",
            video_id,
            format_timestamp(timestamp),
            data.len()
        );
        Ok(Screenshot { data, mime_type })
    }

    /// Persist title, description, settings and an optional new thumbnail.
    pub async fn update_video(
        &self,
        auth: &AuthContext,
        video_id: &str,
        update: &VideoUpdate,
    ) -> Result<(), NetworkError> {
        let mut form = multipart::Form::new()
            .text("title", update.title.clone())
            .text("description", update.description.clone())
            .text("settings", update.settings.to_string());

        if let Some(thumbnail) = &update.thumbnail {
            let part = multipart::Part::bytes(thumbnail.data.to_vec())
                .file_name(thumbnail.file_name.clone())
                .mime_str(&thumbnail.mime_type)?;
            form = form.part("thumbnail", part);
        }

        let request = self.http.patch(self.video_url(video_id)).multipart(form);
        Self::check_status(authorized(auth, request)?.send().await?).await?;

        log::info!(
            "[api] Updated video {} (thumbnail: {})",
            video_id,
            update.thumbnail.is_some()
        );
        Ok(())
    }

    async fn check_status(response: Response) -> Result<Response, NetworkError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(NetworkError::Unauthorized(status));
        }
        let body = response.text().await.unwrap_or_default();
        Err(NetworkError::UnexpectedStatus { status, body })
    }
}

fn authorized(auth: &AuthContext, request: RequestBuilder) -> Result<RequestBuilder, NetworkError> {
    let token = auth.token.as_ref().ok_or(NetworkError::MissingToken)?;
    Ok(request.header(AUTHORIZATION, format!("Bearer {}", token)))
}

/// Seconds with at most millisecond precision and no trailing zeros: `42`, `12.5`.
pub fn format_timestamp(timestamp: f64) -> String {
    let rounded = (timestamp.max(0.0) * 1000.0).round() / 1000.0;
    rounded.to_string()
}

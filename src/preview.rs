//! Revocable preview references for captured images.
//!
//! A `PreviewHandle` owns one registry entry. It is revoked exactly once:
//! through `release()` when the selection is superseded or cleared, or on drop
//! when its owner goes away without releasing it.
//!
//! The registry can also be mounted as an HTTP router so a UI can display
//! previews by URL:
//!   GET /previews/{id}  - stored image bytes, 404 once revoked

use axum::{
    Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

const URL_SCHEME: &str = "preview:";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreviewUrl(String);

impl PreviewUrl {
    fn for_id(id: &str) -> Self {
        PreviewUrl(format!("{}{}", URL_SCHEME, id))
    }

    pub fn id(&self) -> &str {
        self.0.strip_prefix(URL_SCHEME).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PreviewUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone)]
struct PreviewEntry {
    data: Bytes,
    mime_type: String,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<String, PreviewEntry>,
    revocations: u64,
}

/// Shared store behind every preview reference of a process.
#[derive(Clone, Default)]
pub struct PreviewRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create(&self, data: Bytes, mime_type: &str) -> PreviewHandle {
        let id = format!("{:016x}", rand::random::<u64>());
        self.lock().entries.insert(
            id.clone(),
            PreviewEntry {
                data,
                mime_type: mime_type.to_string(),
            },
        );
        PreviewHandle {
            url: PreviewUrl::for_id(&id),
            registry: Some(self.clone()),
        }
    }

    pub fn contains(&self, url: &PreviewUrl) -> bool {
        self.lock().entries.contains_key(url.id())
    }

    /// Bytes and MIME type behind a live preview id.
    pub fn resolve(&self, id: &str) -> Option<(Bytes, String)> {
        self.lock()
            .entries
            .get(id)
            .map(|e| (e.data.clone(), e.mime_type.clone()))
    }

    pub fn active_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Total number of references revoked so far.
    pub fn revocation_count(&self) -> u64 {
        self.lock().revocations
    }

    fn revoke(&self, url: &PreviewUrl) {
        let mut inner = self.lock();
        if inner.entries.remove(url.id()).is_some() {
            inner.revocations += 1;
            log::debug!("[preview] Revoked {}", url);
        } else {
            log::warn!("[preview] Revoke of unknown reference {}", url);
        }
    }
}

pub struct PreviewHandle {
    url: PreviewUrl,
    registry: Option<PreviewRegistry>,
}

impl PreviewHandle {
    pub fn url(&self) -> &PreviewUrl {
        &self.url
    }

    /// Revokes the reference. Consumes the handle so it cannot be released twice.
    pub fn release(mut self) {
        self.revoke();
    }

    fn revoke(&mut self) {
        if let Some(registry) = self.registry.take() {
            registry.revoke(&self.url);
        }
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        self.revoke();
    }
}

impl fmt::Debug for PreviewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewHandle")
            .field("url", &self.url)
            .field("live", &self.registry.is_some())
            .finish()
    }
}

/// Build the preview Axum router.
pub fn preview_router(registry: PreviewRegistry) -> Router {
    Router::new()
        .route("/previews/{id}", get(serve_preview))
        .with_state(registry)
}

async fn serve_preview(
    State(registry): State<PreviewRegistry>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let (data, mime_type) = registry.resolve(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok((
        [
            (header::CONTENT_TYPE, mime_type),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        data,
    ))
}

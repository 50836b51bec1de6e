//! ffmpeg-backed media element.
//!
//! Metadata comes from `ffprobe -of json`; every seek grabs one frame with
//! `ffmpeg -ss T -frames:v 1` piped out as PNG. ffmpeg applies the stream's
//! rotation, so frame dimensions come from the decoded PNG and never from the
//! probe, which reports the stored size. A newer seek aborts the one still
//! settling, and the abandoned ffmpeg process is killed with its task.

use image::{ImageReader, RgbaImage};
use serde::Deserialize;
use std::io::Cursor;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::{MediaElement, MediaEvent, MediaEventSender, VideoMetadata};
use crate::config::CaptureConfig;
use crate::error::LoadError;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse `ffprobe -show_entries stream=width,height,duration:format=duration -of json`.
pub fn parse_probe(json: &[u8]) -> Result<VideoMetadata, LoadError> {
    let probe: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| LoadError::Probe(e.to_string()))?;

    let stream = probe
        .streams
        .iter()
        .find(|s| s.width.unwrap_or(0) > 0 && s.height.unwrap_or(0) > 0)
        .ok_or(LoadError::NoVideoStream)?;

    let duration_secs = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(stream.duration.as_deref())
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| LoadError::Probe("unknown duration".to_string()))?;

    Ok(VideoMetadata {
        duration_secs,
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
    })
}

#[derive(Default)]
struct Decoded {
    metadata: Option<VideoMetadata>,
    frame: Option<RgbaImage>,
    can_play_sent: bool,
}

#[derive(Clone)]
struct Tools {
    ffmpeg_path: String,
    ffprobe_path: String,
    threads: String,
    probe_timeout: Duration,
}

pub struct FfmpegElement {
    events: MediaEventSender,
    tools: Tools,
    source: Option<String>,
    decoded: Arc<Mutex<Decoded>>,
    load_task: Option<JoinHandle<()>>,
    seek_task: Option<JoinHandle<()>>,
}

impl FfmpegElement {
    /// Must be driven from inside a tokio runtime.
    pub fn new(config: &CaptureConfig, events: MediaEventSender) -> Self {
        Self {
            events,
            tools: Tools {
                ffmpeg_path: config.ffmpeg_path.clone(),
                ffprobe_path: config.ffprobe_path.clone(),
                threads: config.ffmpeg_threads.to_string(),
                probe_timeout: config.request_timeout,
            },
            source: None,
            decoded: Arc::new(Mutex::new(Decoded::default())),
            load_task: None,
            seek_task: None,
        }
    }

    fn decoded(&self) -> MutexGuard<'_, Decoded> {
        lock(&self.decoded)
    }

    fn abort_tasks(&mut self) {
        if let Some(task) = self.load_task.take() {
            task.abort();
        }
        if let Some(task) = self.seek_task.take() {
            task.abort();
        }
    }
}

fn lock(decoded: &Mutex<Decoded>) -> MutexGuard<'_, Decoded> {
    decoded.lock().unwrap_or_else(|e| e.into_inner())
}

impl MediaElement for FfmpegElement {
    fn load(&mut self, source_url: &str) {
        self.abort_tasks();
        *self.decoded() = Decoded::default();
        self.source = Some(source_url.to_string());

        let tools = self.tools.clone();
        let url = source_url.to_string();
        let decoded = self.decoded.clone();
        let events = self.events.clone();

        self.load_task = Some(tokio::spawn(async move {
            log::info!("[media] Probing {}", url);
            let event = match probe(&tools, &url).await {
                Ok(metadata) => {
                    lock(&decoded).metadata = Some(metadata);
                    MediaEvent::MetadataLoaded(metadata)
                }
                Err(e) => {
                    log::warn!("[media] Probe failed for {}: {}", url, e);
                    MediaEvent::Error(e.to_string())
                }
            };
            let _ = events.send(event);
        }));
    }

    fn seek(&mut self, time: f64, generation: u64) {
        if let Some(task) = self.seek_task.take() {
            task.abort();
        }

        let has_metadata = self.decoded().metadata.is_some();
        let Some(url) = self.source.clone().filter(|_| has_metadata) else {
            let _ = self
                .events
                .send(MediaEvent::Error("seek before metadata".to_string()));
            return;
        };

        let tools = self.tools.clone();
        let decoded = self.decoded.clone();
        let events = self.events.clone();

        self.seek_task = Some(tokio::spawn(async move {
            match grab_frame(&tools, &url, time).await {
                Ok(frame) => {
                    let first_frame = {
                        let mut state = lock(&decoded);
                        state.frame = Some(frame);
                        !std::mem::replace(&mut state.can_play_sent, true)
                    };
                    let _ = events.send(MediaEvent::Seeked { generation, time });
                    if first_frame {
                        let _ = events.send(MediaEvent::CanPlay);
                    }
                }
                Err(e) => {
                    log::warn!("[media] Frame decode at {:.3}s failed: {}", time, e);
                    let _ = events.send(MediaEvent::Error(e.to_string()));
                }
            }
        }));
    }

    fn intrinsic_size(&self) -> (u32, u32) {
        self.decoded()
            .frame
            .as_ref()
            .map(|f| f.dimensions())
            .unwrap_or((0, 0))
    }

    fn current_frame(&self) -> Option<RgbaImage> {
        self.decoded().frame.clone()
    }
}

impl Drop for FfmpegElement {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

async fn probe(tools: &Tools, url: &str) -> Result<VideoMetadata, LoadError> {
    let mut command = Command::new(&tools.ffprobe_path);
    command
        .args(["-v", "error"])
        .args(["-select_streams", "v:0"])
        .args(["-show_entries", "stream=width,height,duration:format=duration"])
        .args(["-of", "json"])
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(tools.probe_timeout, command.output())
        .await
        .map_err(|_| {
            LoadError::Probe(format!(
                "ffprobe timed out after {}s",
                tools.probe_timeout.as_secs_f64()
            ))
        })?
        .map_err(|e| LoadError::Probe(format!("failed to spawn ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(LoadError::Probe(stderr.trim().to_string()));
    }

    parse_probe(&output.stdout)
}

async fn grab_frame(tools: &Tools, url: &str, time: f64) -> Result<RgbaImage, LoadError> {
    let data = run_frame_grab(tools, url, time).await?;

    // Seeking onto the very end yields no frame, step back one second
    let data = if data.is_empty() && time > 0.0 {
        log::debug!("[media] No frame at {:.3}s, retrying 1s earlier", time);
        run_frame_grab(tools, url, (time - 1.0).max(0.0)).await?
    } else {
        data
    };

    if data.is_empty() {
        return Err(LoadError::Decode(format!("no frame at {:.3}s", time)));
    }

    tokio::task::spawn_blocking(move || decode_frame(&data))
        .await
        .map_err(|e| LoadError::Decode(format!("frame decode task failed: {}", e)))?
}

/// Decode one encoded frame from ffmpeg's stdout. The image header decides
/// the dimensions.
pub fn decode_frame(data: &[u8]) -> Result<RgbaImage, LoadError> {
    let frame = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| LoadError::Decode(e.to_string()))?
        .decode()
        .map_err(|e| LoadError::Decode(format!("unreadable frame: {}", e)))?
        .into_rgba8();

    if frame.width() == 0 || frame.height() == 0 {
        return Err(LoadError::Decode("empty frame".to_string()));
    }
    Ok(frame)
}

async fn run_frame_grab(tools: &Tools, url: &str, time: f64) -> Result<Vec<u8>, LoadError> {
    let output = Command::new(&tools.ffmpeg_path)
        .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
        .args(["-threads", &tools.threads])
        .args(["-ss", &format!("{:.3}", time)])
        .args(["-i", url])
        .args(["-an", "-sn"])
        .args(["-frames:v", "1"])
        .args(["-f", "image2pipe", "-c:v", "png"])
        .arg("pipe:1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| LoadError::Decode(format!("failed to spawn ffmpeg: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(LoadError::Decode(stderr.trim().to_string()));
    }

    Ok(output.stdout)
}

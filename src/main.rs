use clap::{Args, Parser, Subcommand};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use percy_thumbs::{
    ApiClient, AuthContext, CaptureConfig, CapturedImage, FfmpegElement, PreviewRegistry,
    SelectionResult, SessionCallbacks, ThumbnailCapture, ThumbnailError, UploadedFile,
    VideoUpdate, logging, preview_router,
};

#[derive(Debug)]
enum CliError {
    Thumbnail(ThumbnailError),
    Io { context: String, source: std::io::Error },
}

impl CliError {
    fn io(context: impl fmt::Display, source: std::io::Error) -> Self {
        CliError::Io {
            context: context.to_string(),
            source,
        }
    }

    fn user_message(&self) -> String {
        match self {
            CliError::Thumbnail(e) => e.user_message(),
            CliError::Io { .. } => self.to_string(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Thumbnail(e) => write!(f, "{e}"),
            CliError::Io { context, source } => write!(f, "{context}: {source}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<ThumbnailError> for CliError {
    fn from(e: ThumbnailError) -> Self {
        CliError::Thumbnail(e)
    }
}

#[derive(Parser)]
#[command(name = "percy-thumbs")]
#[command(about = "Capture or upload a thumbnail for a hosted video")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a frame, falling back to a server screenshot
    Capture {
        #[command(flatten)]
        target: Target,
        /// Position in seconds, defaults to 10% of the duration
        #[arg(long)]
        at: Option<f64>,
        /// Ask the server for the frame instead of decoding locally
        #[arg(long)]
        server: bool,
    },
    /// Use a local image file as the thumbnail
    Upload {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Args)]
struct Target {
    /// Video id
    #[arg(long)]
    video: String,
    /// Write the selected image here
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Persist the thumbnail with the given title and description
    #[arg(long, requires = "title")]
    save: bool,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
    /// Serve the preview on this address until interrupted
    #[arg(long)]
    preview_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();
    let config = CaptureConfig::from_env();
    let auth = AuthContext::bearer(std::env::var("PERCY_API_TOKEN").unwrap_or_default());

    if let Err(e) = run(cli.command, &config, auth).await {
        log::error!("{}", e);
        eprintln!("{}", e.user_message());
        std::process::exit(1);
    }
}

async fn run(
    command: Commands,
    config: &CaptureConfig,
    auth: AuthContext,
) -> Result<(), CliError> {
    let previews = PreviewRegistry::new();

    let (target, capture) = match command {
        Commands::Capture { target, at, server } => {
            let mut capture = open(&target, config, auth, &previews)?;
            if let Err(e) = capture.wait_until_ready().await {
                // A video that cannot be decoded here can still be captured by the server
                if !server {
                    return Err(e.into());
                }
                log::warn!("{}", e);
            }
            let image = if server {
                let at = at.unwrap_or_else(|| capture.session().current_time());
                capture.capture_frame_server_side(at).await?
            } else {
                if let Some(at) = at {
                    capture.seek(at).await?;
                }
                capture.capture().await?
            };
            report(&image);
            (target, capture)
        }
        Commands::Upload { target, file } => {
            let mut capture = open(&target, config, auth, &previews)?;
            let upload = UploadedFile::from_path(&file)
                .await
                .map_err(|e| CliError::io(file.display(), e))?;
            let image = capture.select_uploaded_image(upload).await?;
            report(&image);
            (target, capture)
        }
    };

    let api = capture.api().clone();
    let auth = capture.auth().clone();
    let selection = capture.confirm()?;
    finish(&target, selection, &api, &auth, &previews).await
}

fn open(
    target: &Target,
    config: &CaptureConfig,
    auth: AuthContext,
    previews: &PreviewRegistry,
) -> Result<ThumbnailCapture<FfmpegElement>, ThumbnailError> {
    let callbacks = SessionCallbacks::new(
        |image, url| match (image, url) {
            (Some(image), Some(url)) => log::debug!("Selected {} as {}", image.file_name, url),
            _ => log::debug!("Selection cleared"),
        },
        || log::debug!("Capture closed"),
    );
    ThumbnailCapture::open(&target.video, config, auth, previews.clone(), callbacks)
}

fn report(image: &CapturedImage) {
    log::info!(
        "Selected {} ({}x{}, {}, {:?})",
        image.file_name,
        image.width,
        image.height,
        image.mime_type,
        image.source
    );
}

async fn finish(
    target: &Target,
    selection: SelectionResult,
    api: &ApiClient,
    auth: &AuthContext,
    previews: &PreviewRegistry,
) -> Result<(), CliError> {
    let Some(image) = selection.image.clone() else {
        return Ok(());
    };

    if let Some(path) = &target.output {
        write_image(path, &image).await?;
    }

    if target.save {
        let update = VideoUpdate {
            title: target.title.clone().unwrap_or_default(),
            description: target.description.clone().unwrap_or_default(),
            settings: serde_json::json!({}),
            thumbnail: Some(image),
        };
        api.update_video(auth, &target.video, &update)
            .await
            .map_err(ThumbnailError::from)?;
        log::info!("Saved thumbnail for video {}", target.video);
    }

    if let (Some(addr), Some(url)) = (target.preview_addr, selection.preview_url()) {
        serve_preview(addr, url.id(), previews).await?;
    }
    Ok(())
}

async fn write_image(path: &Path, image: &CapturedImage) -> Result<(), CliError> {
    tokio::fs::write(path, &image.data)
        .await
        .map_err(|e| CliError::io(format!("writing {}", path.display()), e))?;
    log::info!("Wrote {} ({} bytes)", path.display(), image.data.len());
    Ok(())
}

async fn serve_preview(
    addr: SocketAddr,
    id: &str,
    previews: &PreviewRegistry,
) -> Result<(), CliError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| CliError::io(format!("binding {}", addr), e))?;
    log::info!("Serving preview at http://{}/previews/{}", addr, id);

    let app = preview_router(previews.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(|e| CliError::io("preview server", e))
}

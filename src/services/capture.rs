//! One-shot capture channel.
//!
//! The map window the user opens to take a screenshot hands the result back
//! by posting a small JSON message to a loopback listener. The first
//! well-formed message wins; its image reference is resolved to a
//! [`SelectedImage`] and delivered to the controller, after which the
//! listener shuts itself down.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use axum::http::HeaderValue;
use base64::Engine;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::app_state::CaptureState;
use crate::models::image::SelectedImage;
use crate::routes;

/// Result of one capture, as delivered to the controller.
pub type CaptureOutcome = Result<SelectedImage, CaptureError>;

/// The only message shape the listener acts on.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum CaptureMessage {
    #[serde(rename = "SCREENSHOT_CAPTURED")]
    ScreenshotCaptured {
        #[serde(rename = "imageUrl")]
        image_url: String,
    },
}

impl CaptureMessage {
    /// Parse a raw message body. Anything that is not a recognised capture
    /// message yields `None`.
    pub fn parse(body: &[u8]) -> Option<Self> {
        let message: CaptureMessage = serde_json::from_slice(body).ok()?;
        match &message {
            CaptureMessage::ScreenshotCaptured { image_url } if image_url.trim().is_empty() => None,
            _ => Some(message),
        }
    }

    pub fn image_url(&self) -> &str {
        match self {
            CaptureMessage::ScreenshotCaptured { image_url } => image_url,
        }
    }
}

/// Where the captured image lives.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageReference {
    Remote(String),
    Inline { media_type: String, data: String },
    File(PathBuf),
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self, CaptureError> {
        let reference = reference.trim();

        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Ok(ImageReference::Remote(reference.to_string()));
        }

        if let Some(rest) = reference.strip_prefix("data:") {
            let (header, data) = rest
                .split_once(',')
                .ok_or_else(|| CaptureError::InvalidReference("data URL without payload".into()))?;
            let media_type = header
                .strip_suffix(";base64")
                .ok_or_else(|| CaptureError::InvalidReference("data URL is not base64".into()))?;
            return Ok(ImageReference::Inline {
                media_type: media_type.to_string(),
                data: data.to_string(),
            });
        }

        if let Some(path) = reference.strip_prefix("file://") {
            return Ok(ImageReference::File(PathBuf::from(path)));
        }

        let path = PathBuf::from(reference);
        if path.is_absolute() {
            return Ok(ImageReference::File(path));
        }

        Err(CaptureError::InvalidReference(format!(
            "unsupported image reference: {reference}"
        )))
    }
}

/// Retrieves the bytes behind an [`ImageReference`].
///
/// File references are only honoured inside `capture_dir`; without one they
/// are refused.
#[derive(Debug, Clone)]
pub struct CaptureFetcher {
    http: reqwest::Client,
    max_bytes: usize,
    capture_dir: Option<PathBuf>,
}

impl CaptureFetcher {
    pub fn new(http: reqwest::Client, max_bytes: usize) -> Self {
        Self {
            http,
            max_bytes,
            capture_dir: None,
        }
    }

    /// Accept file references that resolve inside `dir`.
    pub fn with_capture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.capture_dir = Some(dir.into());
        self
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub async fn fetch(&self, message: &CaptureMessage) -> CaptureOutcome {
        let reference = ImageReference::parse(message.image_url())?;

        let (name, bytes) = match &reference {
            ImageReference::Remote(url) => {
                let response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(CaptureError::Download)?;
                let bytes = response.bytes().await.map_err(CaptureError::Download)?;
                (None, bytes.to_vec())
            }
            ImageReference::Inline { data, .. } => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data.trim())
                    .map_err(CaptureError::Decode)?;
                (None, bytes)
            }
            ImageReference::File(path) => {
                let path = self.confine(path).await?;
                let bytes = tokio::fs::read(&path).await.map_err(CaptureError::Read)?;
                let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
                (name, bytes)
            }
        };

        if bytes.is_empty() {
            return Err(CaptureError::Empty);
        }
        if bytes.len() > self.max_bytes {
            return Err(CaptureError::TooLarge {
                size: bytes.len(),
                max: self.max_bytes,
            });
        }

        let format = image::guess_format(&bytes).map_err(|_| CaptureError::NotAnImage)?;
        let name = name.unwrap_or_else(|| {
            let extension = format.extensions_str().first().copied().unwrap_or("img");
            format!("capture-{}.{}", Uuid::new_v4().simple(), extension)
        });

        tracing::info!(name = %name, bytes = bytes.len(), "Captured image retrieved");
        Ok(SelectedImage::from_bytes(name, bytes))
    }

    /// Resolve `path` (symlinks and `..` included) and check it lies inside
    /// the capture directory.
    async fn confine(&self, path: &Path) -> Result<PathBuf, CaptureError> {
        let refused = || CaptureError::FileNotAllowed(path.to_path_buf());

        let Some(dir) = &self.capture_dir else {
            tracing::warn!(path = %path.display(), "File reference refused, no capture directory configured");
            return Err(refused());
        };

        let dir = tokio::fs::canonicalize(dir).await.map_err(CaptureError::Read)?;
        let resolved = tokio::fs::canonicalize(path).await.map_err(|_| refused())?;
        if !resolved.starts_with(&dir) {
            tracing::warn!(path = %path.display(), "File reference outside the capture directory");
            return Err(refused());
        }
        Ok(resolved)
    }
}

/// A running capture listener. Dropping it closes the socket.
pub struct CaptureListener {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl CaptureListener {
    /// Bind the listener and wait in the background for one capture.
    ///
    /// Only browsers on `allowed_origins` may post to it.
    pub async fn bind(
        addr: &str,
        fetcher: CaptureFetcher,
        allowed_origins: &[String],
        outcomes: mpsc::UnboundedSender<CaptureOutcome>,
    ) -> Result<Self, CaptureError> {
        let origins = allowed_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin.trim()).map_err(|_| CaptureError::InvalidOrigin(origin.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(CaptureError::Bind)?;
        let local_addr = listener.local_addr().map_err(CaptureError::Bind)?;

        let (slot, received) = oneshot::channel();
        // base64 payloads are a third larger than the image they carry
        let body_limit = fetcher.max_bytes() / 3 * 4 + 4096;
        let app = routes::capture::router(CaptureState::new(slot), body_limit, origins);

        let cancel = CancellationToken::new();

        let shutdown = cancel.clone();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Capture listener failed");
            }
        });

        let done = cancel.clone();
        let capture = tokio::spawn(async move {
            let message = tokio::select! {
                _ = done.cancelled() => return,
                message = received => match message {
                    Ok(message) => message,
                    Err(_) => return,
                },
            };

            let outcome = tokio::select! {
                _ = done.cancelled() => return,
                outcome = fetcher.fetch(&message) => outcome,
            };

            if let Err(e) = &outcome {
                tracing::warn!(error = %e, "Capture retrieval failed");
            }
            if outcomes.send(outcome).is_err() {
                tracing::debug!("Capture outcome dropped, controller is gone");
            }
            done.cancel();
        });

        tracing::info!(addr = %local_addr, "Capture listener ready");

        Ok(Self {
            local_addr,
            cancel,
            tasks: vec![server, capture],
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop listening and abandon any retrieval in progress.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(addr = %self.local_addr, "Closing capture listener");
            self.cancel.cancel();
        }
    }

    /// Close and wait until the socket is released.
    pub async fn shutdown(mut self) {
        self.close();
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
    }
}

impl Drop for CaptureListener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Failed to bind capture listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    #[error("File references are only accepted from the capture directory: {}", .0.display())]
    FileNotAllowed(PathBuf),

    #[error("Invalid allowed origin: {0}")]
    InvalidOrigin(String),

    #[error("Failed to download captured image: {0}")]
    Download(#[source] reqwest::Error),

    #[error("Failed to read captured image: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to decode captured image: {0}")]
    Decode(#[source] base64::DecodeError),

    #[error("Captured image is empty")]
    Empty,

    #[error("Captured image is too large ({size} bytes, limit {max} bytes)")]
    TooLarge { size: usize, max: usize },

    #[error("Captured file is not an image")]
    NotAnImage,
}

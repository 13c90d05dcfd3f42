//! Client for the rooftop analysis service.
//!
//! The service runs analyses as background jobs: an image is submitted, the
//! job is polled until it reaches a terminal status, and the rendered image
//! and text report are then downloaded separately.

use async_trait::async_trait;
use reqwest::{multipart, Client, Response, Url};
use serde::Deserialize;

use crate::models::analysis::StatusPayload;
use crate::models::image::SelectedImage;
use crate::models::job::JobId;

/// The four remote calls the job controller depends on.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Upload an image and create a job.
    async fn submit_job(&self, image: &SelectedImage) -> Result<JobId, ServiceError>;

    /// Current status of a job. Safe to call repeatedly.
    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusPayload, ServiceError>;

    /// Rendered detection image. Only valid once the job completed.
    async fn fetch_result_image(&self, job_id: &JobId) -> Result<Vec<u8>, ServiceError>;

    /// Plain-text report. Only valid once the job completed.
    async fn fetch_report(&self, job_id: &JobId) -> Result<String, ServiceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Analysis service error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response from analysis service: {0}")]
    Malformed(String),

    #[error("Invalid analysis service URL: {0}")]
    InvalidBaseUrl(String),
}

#[derive(Deserialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: String,
    #[serde(default)]
    details: Option<String>,
}

/// HTTP implementation of [`JobService`].
pub struct HttpJobService {
    http: Client,
    base_url: Url,
}

impl HttpJobService {
    pub fn new(base_url: &str, timeout: Option<std::time::Duration>) -> Result<Self, ServiceError> {
        let mut builder = Client::builder().user_agent(concat!("geopv/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Self::with_client(builder.build()?, base_url)
    }

    /// Reuse an existing [`reqwest::Client`] (connection pooling).
    pub fn with_client(http: Client, base_url: &str) -> Result<Self, ServiceError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ServiceError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ServiceError::InvalidBaseUrl(base_url.to_string()));
        }
        Ok(Self { http, base_url })
    }

    /// Endpoint URL below the base; each segment is percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, ServiceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ServiceError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    // ---- private helpers ----

    /// Turn a non-2xx response into [`ServiceError::Api`], preferring the
    /// service's `error` text over the raw body.
    async fn ensure_success(response: Response) -> Result<Response, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(api_error(status.as_u16(), &body))
    }
}

fn api_error(status: u16, body: &str) -> ServiceError {
    let message = match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(ApiErrorBody { error, details: Some(details) }) => format!("{error}: {details}"),
        Ok(ApiErrorBody { error, details: None }) => error,
        Err(_) => body.trim().to_string(),
    };
    ServiceError::Api { status, message }
}

#[async_trait]
impl JobService for HttpJobService {
    async fn submit_job(&self, image: &SelectedImage) -> Result<JobId, ServiceError> {
        let part = multipart::Part::bytes(image.bytes.clone())
            .file_name(image.name.clone())
            .mime_str(&image.content_type)?;
        let form = multipart::Form::new().part("image", part);

        let response = self
            .http
            .post(self.url(&["detect_rooftops"])?)
            .multipart(form)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Malformed(e.to_string()))?;

        if body.job_id.trim().is_empty() {
            return Err(ServiceError::Malformed("empty job_id".to_string()));
        }

        Ok(JobId::new(body.job_id))
    }

    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusPayload, ServiceError> {
        let response = self
            .http
            .get(self.url(&["job_status", job_id.as_str()])?)
            .send()
            .await?;

        // Failed and unknown jobs come back as 500/404 with a regular status body.
        let status = response.status();
        let body = response.text().await?;

        match StatusPayload::parse(&body) {
            Ok(payload) => Ok(payload),
            Err(_) if !status.is_success() => Err(api_error(status.as_u16(), &body)),
            Err(reason) => Err(ServiceError::Malformed(reason)),
        }
    }

    async fn fetch_result_image(&self, job_id: &JobId) -> Result<Vec<u8>, ServiceError> {
        let response = self
            .http
            .get(self.url(&["get_result_image", job_id.as_str()])?)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(ServiceError::Malformed("empty result image".to_string()));
        }
        Ok(bytes.to_vec())
    }

    async fn fetch_report(&self, job_id: &JobId) -> Result<String, ServiceError> {
        let response = self
            .http
            .get(self.url(&["get_report", job_id.as_str()])?)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.text().await?)
    }
}

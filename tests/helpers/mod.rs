//! Test helpers: a scripted in-memory analysis service, a controller harness
//! and an HTTP mock of the analysis backend.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Multipart, Path};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use geopv::controller::{ControllerHandle, ControllerSettings, JobController, Snapshot};
use geopv::models::analysis::StatusPayload;
use geopv::models::image::SelectedImage;
use geopv::models::job::JobId;
use geopv::services::artifacts::ArtifactStore;
use geopv::services::capture::CaptureOutcome;
use geopv::services::job_service::{JobService, ServiceError};

use crate::fixtures;

pub const TEST_POLL_INTERVAL: Duration = Duration::from_millis(20);
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// One scripted answer to a status request.
#[derive(Clone)]
pub enum Step {
    Status(&'static str),
    Delayed(Duration, &'static str),
    Unavailable,
}

/// In-memory [`JobService`] answering from per-job scripts.
///
/// Each status request consumes the next step of the job's script; the last
/// step repeats forever.
#[derive(Default)]
pub struct ScriptedService {
    job_ids: Mutex<VecDeque<String>>,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    submit_status: Mutex<Option<u16>>,
    submit_delay: Mutex<Duration>,
    image_delay: Mutex<Duration>,
    image_unavailable: AtomicBool,

    pub submit_calls: AtomicUsize,
    pub image_calls: AtomicUsize,
    pub report_calls: AtomicUsize,
    status_calls: Mutex<HashMap<String, usize>>,
    status_calls_at_assembly: Mutex<Option<usize>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next submission returns `job_id`, whose statuses follow `steps`.
    pub fn with_job(self, job_id: &str, steps: Vec<Step>) -> Self {
        self.job_ids.lock().unwrap().push_back(job_id.to_string());
        self.scripts
            .lock()
            .unwrap()
            .insert(job_id.to_string(), steps.into_iter().collect());
        self
    }

    pub fn rejecting_submissions(self, status: u16) -> Self {
        *self.submit_status.lock().unwrap() = Some(status);
        self
    }

    pub fn with_submit_delay(self, delay: Duration) -> Self {
        *self.submit_delay.lock().unwrap() = delay;
        self
    }

    /// Hold every result image download for `delay`.
    pub fn with_image_delay(self, delay: Duration) -> Self {
        *self.image_delay.lock().unwrap() = delay;
        self
    }

    pub fn without_result_image(self) -> Self {
        self.image_unavailable.store(true, Ordering::SeqCst);
        self
    }

    pub fn status_calls(&self, job_id: &str) -> usize {
        self.status_calls.lock().unwrap().get(job_id).copied().unwrap_or(0)
    }

    pub fn total_status_calls(&self) -> usize {
        self.status_calls.lock().unwrap().values().sum()
    }

    pub fn status_calls_at_assembly(&self) -> Option<usize> {
        *self.status_calls_at_assembly.lock().unwrap()
    }

    fn next_step(&self, job_id: &str) -> Option<Step> {
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts.get_mut(job_id)?;
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }
}

fn unavailable() -> ServiceError {
    ServiceError::Api {
        status: 503,
        message: "Service Unavailable".to_string(),
    }
}

#[async_trait]
impl JobService for ScriptedService {
    async fn submit_job(&self, _image: &SelectedImage) -> Result<JobId, ServiceError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.submit_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(status) = *self.submit_status.lock().unwrap() {
            return Err(ServiceError::Api {
                status,
                message: "Invalid image file".to_string(),
            });
        }

        let job_id = self
            .job_ids
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(unavailable)?;
        Ok(JobId::new(job_id))
    }

    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusPayload, ServiceError> {
        *self
            .status_calls
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default() += 1;

        let step = self.next_step(job_id.as_str()).ok_or_else(unavailable)?;
        let body = match step {
            Step::Status(body) => body,
            Step::Delayed(delay, body) => {
                tokio::time::sleep(delay).await;
                body
            }
            Step::Unavailable => return Err(unavailable()),
        };

        StatusPayload::parse(body).map_err(ServiceError::Malformed)
    }

    async fn fetch_result_image(&self, _job_id: &JobId) -> Result<Vec<u8>, ServiceError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        *self.status_calls_at_assembly.lock().unwrap() = Some(self.total_status_calls());
        let delay = *self.image_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.image_unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::Api {
                status: 404,
                message: "Result image file not found".to_string(),
            });
        }
        Ok(fixtures::PNG.to_vec())
    }

    async fn fetch_report(&self, _job_id: &JobId) -> Result<String, ServiceError> {
        self.report_calls.fetch_add(1, Ordering::SeqCst);
        Ok(fixtures::REPORT.to_string())
    }
}

/// A controller running on its own task, plus what tests need to poke it.
pub struct Harness {
    pub handle: ControllerHandle,
    pub service: Arc<ScriptedService>,
    pub artifacts: ArtifactStore,
    pub captures: mpsc::UnboundedSender<CaptureOutcome>,
    pub runner: JoinHandle<()>,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn start(service: ScriptedService) -> Self {
        Self::start_with(service, None)
    }

    pub fn start_with(service: ScriptedService, max_polls: Option<u32>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactStore::new(dir.path()).unwrap();
        let service = Arc::new(service);

        let settings = ControllerSettings {
            poll_interval: TEST_POLL_INTERVAL,
            max_polls,
            ..ControllerSettings::default()
        };
        let (controller, handle) = JobController::new(Arc::clone(&service), artifacts.clone(), settings);
        let captures = controller.capture_sender();
        let runner = tokio::spawn(controller.run());

        Self {
            handle,
            service,
            artifacts,
            captures,
            runner,
            _dir: dir,
        }
    }

    pub async fn settle(&self) -> Snapshot {
        tokio::time::timeout(SETTLE_TIMEOUT, self.handle.wait_until_settled())
            .await
            .expect("controller did not settle in time")
            .expect("controller closed")
    }

    pub async fn wait_for<F>(&self, predicate: F) -> Snapshot
    where
        F: FnMut(&Snapshot) -> bool,
    {
        tokio::time::timeout(SETTLE_TIMEOUT, self.handle.wait_for(predicate))
            .await
            .expect("condition not reached in time")
            .expect("controller closed")
    }
}

pub fn png_image(name: &str) -> SelectedImage {
    SelectedImage::from_bytes(name, fixtures::PNG.to_vec())
}

/// Client that never routes loopback traffic through a proxy.
pub fn local_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

// ---- HTTP mock of the analysis backend ----

/// Spawn a mock backend on an ephemeral port and return its base URL.
///
/// Job ids steer the status endpoint: `queued` waits at the front of the
/// queue, `done` is completed, `bad` failed, `gone` is unknown, `broken`
/// makes the endpoint itself fail and `weird` returns an unknown status.
/// `odd/id?#1` only matches when the id arrives as a single encoded segment.
pub async fn spawn_backend() -> String {
    let app = Router::new()
        .route("/detect_rooftops", post(detect_rooftops))
        .route("/job_status/{id}", get(job_status))
        .route("/get_result_image/{id}", get(result_image))
        .route("/get_report/{id}", get(report));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

async fn detect_rooftops(mut multipart: Multipart) -> Response {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("image") {
            continue;
        }
        let data = field.bytes().await.unwrap_or_default();
        if data.is_empty() {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": "No selected file",
                    "details": "Filename is empty. Make sure you selected a valid image file"
                })),
            )
                .into_response();
        }
        return (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "status": "processing",
                "job_id": "done",
                "message": "Your image is being processed. Check status at /job_status/{job_id}"
            })),
        )
            .into_response();
    }

    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": "No image uploaded"})),
    )
        .into_response()
}

async fn job_status(Path(id): Path<String>) -> Response {
    let (status, body) = match id.as_str() {
        "queued" => (StatusCode::OK, r#"{"status":"processing","position_in_queue":0}"#),
        "odd/id?#1" => (StatusCode::OK, r#"{"status":"processing","position_in_queue":1}"#),
        "done" => (StatusCode::OK, fixtures::COMPLETED),
        "bad" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"status":"failed","error":"Traceback: model crashed"}"#,
        ),
        "gone" => (StatusCode::NOT_FOUND, fixtures::NOT_FOUND),
        "broken" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error":"Error checking job status","details":"redis down"}"#,
        ),
        _ => (StatusCode::OK, r#"{"status":"exploded"}"#),
    };
    (status, [("content-type", "application/json")], body).into_response()
}

async fn result_image(Path(id): Path<String>) -> Response {
    if id == "done" {
        ([("content-type", "image/png")], fixtures::PNG).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Job not found or results expired"})),
        )
            .into_response()
    }
}

async fn report(Path(id): Path<String>) -> Response {
    if id == "done" {
        ([("content-type", "text/plain")], fixtures::REPORT).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Report not available"})),
        )
            .into_response()
    }
}

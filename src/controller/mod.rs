//! Job lifecycle controller.
//!
//! Owns the selected image, the active job, its polling loop, the assembled
//! result and the capture listener. User intents arrive as [`Command`]s
//! through a [`ControllerHandle`]; completions of background work arrive as
//! [`Event`]s. Both are applied one at a time by [`JobController::apply`],
//! which checks every event against the current state so that responses for
//! a superseded job or submission are dropped instead of applied.
//!
//! Observers follow the controller through a [`Snapshot`] published on a
//! `watch` channel.

pub mod error;
pub mod polling;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::ClientConfig;
use crate::models::analysis::{AnalysisResult, StatusPayload};
use crate::models::image::SelectedImage;
use crate::models::job::{Job, JobId};
use crate::services::artifacts::ArtifactStore;
use crate::services::assembler::{assemble_result, AssemblyError};
use crate::services::capture::{CaptureListener, CaptureOutcome};
use crate::services::job_service::{JobService, ServiceError};

pub use error::AnalysisError;
use polling::{PollSettings, PollingHandle};
pub use state::{ControllerState, Phase, ResultView, Snapshot};

const COMMAND_BUFFER: usize = 16;

/// Tunables of the controller.
#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub poll_interval: Duration,
    pub max_polls: Option<u32>,
    pub max_image_bytes: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_polls: None,
            max_image_bytes: 10 * 1024 * 1024,
        }
    }
}

impl From<&ClientConfig> for ControllerSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_polls: config.max_polls,
            max_image_bytes: config.max_image_bytes,
        }
    }
}

/// User intents.
pub enum Command {
    SelectFile(SelectedImage),
    StartAnalysis(oneshot::Sender<Result<(), AnalysisError>>),
    Teardown,
}

/// Completions of background work, tagged with what they were issued for.
pub enum Event {
    Submitted {
        generation: u64,
        outcome: Result<JobId, ServiceError>,
    },
    Status {
        job_id: JobId,
        outcome: Result<StatusPayload, ServiceError>,
    },
    PollLimitReached {
        job_id: JobId,
        polls: u32,
    },
    Assembled {
        job_id: JobId,
        outcome: Result<AnalysisResult, AssemblyError>,
    },
    Captured(CaptureOutcome),
}

/// Everything the controller can be asked to apply.
pub enum Input {
    Command(Command),
    Event(Event),
}

pub struct JobController<S: JobService + ?Sized> {
    service: Arc<S>,
    artifacts: ArtifactStore,
    settings: ControllerSettings,

    state: ControllerState,
    selected: Option<SelectedImage>,
    message: Option<String>,
    generation: u64,
    poller: Option<PollingHandle>,
    capture: Option<CaptureListener>,

    commands: mpsc::Receiver<Command>,
    events_tx: mpsc::UnboundedSender<Event>,
    events: mpsc::UnboundedReceiver<Event>,
    captures_tx: mpsc::UnboundedSender<CaptureOutcome>,
    captures: mpsc::UnboundedReceiver<CaptureOutcome>,
    snapshot: watch::Sender<Snapshot>,
}

impl<S: JobService + ?Sized + 'static> JobController<S> {
    pub fn new(
        service: Arc<S>,
        artifacts: ArtifactStore,
        settings: ControllerSettings,
    ) -> (Self, ControllerHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (captures_tx, captures) = mpsc::unbounded_channel();
        let (snapshot, snapshot_rx) = watch::channel(Snapshot::default());

        let controller = Self {
            service,
            artifacts,
            settings,
            state: ControllerState::Idle,
            selected: None,
            message: None,
            generation: 0,
            poller: None,
            capture: None,
            commands,
            events_tx,
            events,
            captures_tx,
            captures,
            snapshot,
        };

        let handle = ControllerHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
        };

        (controller, handle)
    }

    /// Sender a [`CaptureListener`] delivers its outcome to.
    pub fn capture_sender(&self) -> mpsc::UnboundedSender<CaptureOutcome> {
        self.captures_tx.clone()
    }

    /// Take ownership of a capture listener so it is closed on teardown.
    pub fn attach_capture(&mut self, listener: CaptureListener) {
        if let Some(previous) = self.capture.replace(listener) {
            previous.close();
        }
    }

    /// Apply commands and events until teardown or until every handle is gone.
    pub async fn run(mut self) {
        loop {
            let input = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => Input::Command(command),
                    None => Input::Command(Command::Teardown),
                },
                Some(event) = self.events.recv() => Input::Event(event),
                Some(outcome) = self.captures.recv() => Input::Event(Event::Captured(outcome)),
            };

            if !self.apply(input) {
                break;
            }
        }

        self.teardown();
    }

    /// Single mutation entry point. Returns `false` once torn down.
    pub fn apply(&mut self, input: Input) -> bool {
        let reply = match input {
            Input::Command(Command::SelectFile(image)) => {
                self.select_file(image);
                None
            }
            Input::Command(Command::StartAnalysis(reply)) => Some((reply, self.start_analysis())),
            Input::Command(Command::Teardown) => return false,
            Input::Event(event) => {
                self.handle_event(event);
                None
            }
        };

        // Observers see the new state before the caller hears back.
        self.publish();
        if let Some((reply, result)) = reply {
            let _ = reply.send(result);
        }
        true
    }

    fn select_file(&mut self, image: SelectedImage) {
        tracing::info!(name = %image.name, bytes = image.bytes.len(), "Image selected");
        self.reset();
        self.selected = Some(image);
    }

    fn start_analysis(&mut self) -> Result<(), AnalysisError> {
        let Some(image) = self.selected.clone() else {
            let err = AnalysisError::no_image_selected();
            self.message = Some(err.user_message());
            return Err(err);
        };

        if let Err(e) = image.validate(self.settings.max_image_bytes) {
            let err = AnalysisError::from(e);
            self.message = Some(err.user_message());
            return Err(err);
        }

        self.reset();
        self.selected = Some(image.clone());
        let generation = self.generation;
        self.state = ControllerState::Submitting { generation };

        tracing::info!(name = %image.name, generation, "Submitting image for analysis");

        let service = Arc::clone(&self.service);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let outcome = service.submit_job(&image).await;
            let _ = events.send(Event::Submitted { generation, outcome });
        });

        Ok(())
    }

    /// Drop the current job, its poller and result, and invalidate every
    /// response still in flight for them.
    fn reset(&mut self) {
        self.stop_polling();
        self.generation += 1;
        self.state = ControllerState::Idle;
        self.message = None;
    }

    fn start_polling(&mut self, job_id: JobId) {
        self.stop_polling();
        let settings = PollSettings {
            interval: self.settings.poll_interval,
            max_polls: self.settings.max_polls,
        };
        self.poller = Some(PollingHandle::start(
            Arc::clone(&self.service),
            job_id,
            settings,
            self.events_tx.clone(),
        ));
    }

    fn stop_polling(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.cancel();
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Submitted { generation, outcome } => self.on_submitted(generation, outcome),
            Event::Status { job_id, outcome } => self.on_status(job_id, outcome),
            Event::PollLimitReached { job_id, polls } => {
                if self.polling_job(&job_id).is_some() {
                    self.fail(AnalysisError::PollLimitReached(polls));
                }
            }
            Event::Assembled { job_id, outcome } => self.on_assembled(job_id, outcome),
            Event::Captured(outcome) => self.on_captured(outcome),
        }
    }

    fn on_submitted(&mut self, generation: u64, outcome: Result<JobId, ServiceError>) {
        if !matches!(self.state, ControllerState::Submitting { generation: current } if current == generation)
        {
            tracing::debug!(generation, "Discarding stale submission response");
            return;
        }

        match outcome {
            Ok(job_id) => {
                tracing::info!(job_id = %job_id, "Analysis job submitted");
                metrics::counter!("analysis_jobs_submitted_total").increment(1);
                self.start_polling(job_id.clone());
                self.state = ControllerState::Polling(Job::submitted(job_id));
            }
            Err(e) => {
                tracing::error!(error = %e, "Job submission failed");
                self.fail(AnalysisError::Submission(e));
            }
        }
    }

    fn polling_job(&mut self, job_id: &JobId) -> Option<&mut Job> {
        match &mut self.state {
            ControllerState::Polling(job) if &job.id == job_id => Some(job),
            _ => None,
        }
    }

    fn on_status(&mut self, job_id: JobId, outcome: Result<StatusPayload, ServiceError>) {
        let Some(job) = self.polling_job(&job_id) else {
            tracing::debug!(job_id = %job_id, "Discarding status for inactive job");
            return;
        };

        let payload = match outcome {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Status check failed");
                self.fail(AnalysisError::StatusFetch(e));
                return;
            }
        };

        match payload {
            StatusPayload::Submitted => {}
            StatusPayload::Processing { position_in_queue } => {
                if job.mark_processing(position_in_queue) {
                    tracing::info!(job_id = %job_id, position = ?position_in_queue, "Job processing");
                }
            }
            StatusPayload::Completed(analysis) => {
                job.mark_completed();
                let job = job.clone();
                // Polling must be gone before the artifacts are requested.
                self.stop_polling();
                self.state = ControllerState::Assembling(job);

                let service = Arc::clone(&self.service);
                let artifacts = self.artifacts.clone();
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let outcome = assemble_result(&*service, &artifacts, &job_id, analysis).await;
                    let _ = events.send(Event::Assembled { job_id, outcome });
                });
            }
            StatusPayload::Failed { error } | StatusPayload::Error { error } => {
                let message = error.unwrap_or_else(|| "Analysis failed".to_string());
                tracing::warn!(job_id = %job_id, error = %message, "Job failed on the server");
                self.fail(AnalysisError::JobFailed(message));
            }
            StatusPayload::NotFound { .. } => {
                tracing::warn!(job_id = %job_id, "Job not found on the server");
                self.fail(AnalysisError::JobNotFound(job_id));
            }
        }
    }

    fn on_assembled(&mut self, job_id: JobId, outcome: Result<AnalysisResult, AssemblyError>) {
        let ControllerState::Assembling(job) = &self.state else {
            tracing::debug!(job_id = %job_id, "Discarding result for inactive job");
            return;
        };
        if job.id != job_id {
            tracing::debug!(job_id = %job_id, "Discarding result for superseded job");
            return;
        }

        match outcome {
            Ok(result) => {
                let elapsed = (Utc::now() - job.submitted_at).to_std().unwrap_or_default();
                metrics::counter!("analysis_jobs_completed_total").increment(1);
                metrics::histogram!("analysis_job_duration_seconds").record(elapsed.as_secs_f64());
                tracing::info!(job_id = %job_id, elapsed_ms = elapsed.as_millis() as u64, "Analysis resolved");
                self.state = ControllerState::Resolved(result);
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Result assembly failed");
                self.fail(AnalysisError::ArtifactFetch(e));
            }
        }
    }

    fn on_captured(&mut self, outcome: CaptureOutcome) {
        match outcome {
            Ok(image) if self.state.in_flight() => {
                // The running job is left alone until the user starts a new analysis.
                tracing::info!(name = %image.name, "Captured image stored for the next analysis");
                self.selected = Some(image);
            }
            Ok(image) => self.select_file(image),
            Err(e) => {
                let err = AnalysisError::Capture(e);
                tracing::warn!(error = %err, "Capture failed");
                self.message = Some(err.user_message());
            }
        }
    }

    fn fail(&mut self, error: AnalysisError) {
        self.stop_polling();
        metrics::counter!("analysis_jobs_failed_total").increment(1);

        let job = match std::mem::replace(&mut self.state, ControllerState::Idle) {
            ControllerState::Polling(mut job) | ControllerState::Assembling(mut job) => {
                job.mark_failed(error.user_message());
                Some(job)
            }
            _ => None,
        };

        self.message = Some(error.user_message());
        self.state = ControllerState::Failed { job, error };
    }

    fn teardown(&mut self) {
        self.stop_polling();
        if let Some(listener) = self.capture.take() {
            listener.close();
        }
        self.generation += 1;
        self.state = ControllerState::Idle;
        tracing::info!("Job controller torn down");
    }

    fn publish(&self) {
        let next = Snapshot {
            phase: self.state.phase(),
            selected_image: self.selected.as_ref().map(|image| image.name.clone()),
            job: match &self.state {
                ControllerState::Polling(job) | ControllerState::Assembling(job) => Some(job.clone()),
                ControllerState::Failed { job, .. } => job.clone(),
                _ => None,
            },
            result: match &self.state {
                ControllerState::Resolved(result) => Some(ResultView::from(result)),
                _ => None,
            },
            message: self.message.clone(),
            polling: self.poller.is_some(),
        };

        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

impl<S: JobService + ?Sized> Drop for JobController<S> {
    fn drop(&mut self) {
        if let Some(listener) = self.capture.take() {
            listener.close();
        }
    }
}

/// Cloneable front of a running [`JobController`].
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Snapshot>,
}

impl ControllerHandle {
    /// Replace the selected image, discarding any job and result.
    pub async fn select_file(&self, image: SelectedImage) -> Result<(), AnalysisError> {
        self.commands
            .send(Command::SelectFile(image))
            .await
            .map_err(|_| AnalysisError::ControllerClosed)
    }

    /// Submit the selected image. Fails without touching the network when no
    /// valid image is selected.
    pub async fn start_analysis(&self) -> Result<(), AnalysisError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::StartAnalysis(reply))
            .await
            .map_err(|_| AnalysisError::ControllerClosed)?;
        response.await.map_err(|_| AnalysisError::ControllerClosed)?
    }

    pub async fn teardown(&self) {
        let _ = self.commands.send(Command::Teardown).await;
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    pub fn current(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Wait until the analysis resolved or failed.
    pub async fn wait_until_settled(&self) -> Result<Snapshot, AnalysisError> {
        self.wait_for(|snapshot| snapshot.phase.is_settled()).await
    }

    /// Wait until `predicate` holds for the published snapshot.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<Snapshot, AnalysisError>
    where
        F: FnMut(&Snapshot) -> bool,
    {
        let mut receiver = self.snapshot.clone();
        let snapshot = receiver
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map_err(|_| AnalysisError::ControllerClosed)?;
        Ok(snapshot.clone())
    }
}

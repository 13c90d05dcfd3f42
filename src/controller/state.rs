use std::path::PathBuf;

use crate::controller::error::AnalysisError;
use crate::models::analysis::{AnalysisResult, CompletedPayload};
use crate::models::job::{Job, JobId};

/// Lifecycle state owned by the controller.
#[derive(Debug)]
pub enum ControllerState {
    Idle,
    /// Waiting for the submission tagged with this generation.
    Submitting { generation: u64 },
    Polling(Job),
    /// Completed on the server, artifacts being downloaded.
    Assembling(Job),
    Resolved(AnalysisResult),
    Failed {
        job: Option<Job>,
        error: AnalysisError,
    },
}

impl ControllerState {
    pub fn phase(&self) -> Phase {
        match self {
            ControllerState::Idle => Phase::Idle,
            ControllerState::Submitting { .. } => Phase::Submitting,
            ControllerState::Polling(_) => Phase::Polling,
            ControllerState::Assembling(_) => Phase::Assembling,
            ControllerState::Resolved(_) => Phase::Resolved,
            ControllerState::Failed { .. } => Phase::Failed,
        }
    }

    /// Whether a job is between submission and its final outcome.
    pub fn in_flight(&self) -> bool {
        matches!(
            self,
            ControllerState::Submitting { .. }
                | ControllerState::Polling(_)
                | ControllerState::Assembling(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Submitting,
    Polling,
    Assembling,
    Resolved,
    Failed,
}

impl Phase {
    pub fn is_settled(self) -> bool {
        matches!(self, Phase::Resolved | Phase::Failed)
    }
}

/// Read-only view of a resolved analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultView {
    pub job_id: JobId,
    pub analysis: CompletedPayload,
    /// Valid until the controller moves on from this result.
    pub image_path: PathBuf,
    pub report: String,
}

impl From<&AnalysisResult> for ResultView {
    fn from(result: &AnalysisResult) -> Self {
        Self {
            job_id: result.job_id.clone(),
            analysis: result.analysis.clone(),
            image_path: result.image.path().to_path_buf(),
            report: result.report.clone(),
        }
    }
}

/// What observers see of the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub phase: Phase,
    pub selected_image: Option<String>,
    pub job: Option<Job>,
    pub result: Option<ResultView>,
    pub message: Option<String>,
    pub polling: bool,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            selected_image: None,
            job: None,
            result: None,
            message: None,
            polling: false,
        }
    }
}

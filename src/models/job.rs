use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Opaque job identifier assigned by the analysis service on submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of an analysis job as tracked by the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Submitted => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }
}

/// Where a processing job stands in the server's queue.
///
/// The server reports a zero-based index while the job waits, and `null` once
/// the job has left the queue. A job that never reported a position carries no
/// `QueuePosition` at all.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueuePosition {
    Queued(u32),
    Started,
}

/// One submitted analysis request.
///
/// Only built from a successful submission, so every `Job` has an id.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub queue_position: Option<QueuePosition>,
    pub error_message: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn submitted(id: JobId) -> Self {
        Self {
            id,
            status: JobStatus::Submitted,
            queue_position: None,
            error_message: None,
            submitted_at: Utc::now(),
        }
    }

    /// Record a `processing` observation. Returns whether anything changed.
    pub fn mark_processing(&mut self, position: Option<QueuePosition>) -> bool {
        let was = self.status;
        if !self.advance_to(JobStatus::Processing) {
            return false;
        }
        if was == JobStatus::Processing && self.queue_position == position {
            return false;
        }
        self.queue_position = position;
        true
    }

    pub fn mark_completed(&mut self) -> bool {
        if !self.advance_to(JobStatus::Completed) {
            return false;
        }
        self.queue_position = None;
        true
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) -> bool {
        if !self.advance_to(JobStatus::Failed) {
            return false;
        }
        self.queue_position = None;
        self.error_message = Some(message.into());
        true
    }

    // Status only moves forward and never leaves a terminal state.
    // Re-observing the current non-terminal status is allowed.
    fn advance_to(&mut self, next: JobStatus) -> bool {
        if self.status.is_terminal() || next.rank() < self.status.rank() {
            return false;
        }
        self.status = next;
        true
    }

    /// Human-readable progress line for a job that has not finished yet.
    pub fn progress_message(&self) -> String {
        match self.queue_position {
            Some(QueuePosition::Queued(index)) => format!(
                "Processing image... (Position in queue: {})",
                index.saturating_add(1)
            ),
            Some(QueuePosition::Started) => {
                "Processing image... (Analysis started)".to_string()
            }
            None => "Processing image...".to_string(),
        }
    }
}

use crate::models::image::ImageValidationError;
use crate::models::job::JobId;
use crate::services::assembler::AssemblyError;
use crate::services::capture::CaptureError;
use crate::services::job_service::ServiceError;

pub const NO_IMAGE_SELECTED: &str = "Please select an image first";

/// Every way an analysis can go wrong, as seen by the user.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("{0}")]
    Validation(String),

    #[error("Job submission failed: {0}")]
    Submission(#[source] ServiceError),

    #[error("Status check failed: {0}")]
    StatusFetch(#[source] ServiceError),

    #[error("Analysis failed: {0}")]
    JobFailed(String),

    #[error("Job {0} is unknown to the analysis service")]
    JobNotFound(JobId),

    #[error("No result after {0} status checks")]
    PollLimitReached(u32),

    #[error("Result download failed: {0}")]
    ArtifactFetch(#[source] AssemblyError),

    #[error("Screenshot capture failed: {0}")]
    Capture(#[source] CaptureError),

    #[error("Job controller has shut down")]
    ControllerClosed,
}

impl From<ImageValidationError> for AnalysisError {
    fn from(e: ImageValidationError) -> Self {
        AnalysisError::Validation(e.to_string())
    }
}

impl AnalysisError {
    pub fn no_image_selected() -> Self {
        AnalysisError::Validation(NO_IMAGE_SELECTED.to_string())
    }

    /// The one message shown for this failure. Protocol details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            AnalysisError::Validation(message) => message.clone(),
            AnalysisError::Submission(ServiceError::Api { message, .. }) => {
                format!("The image was rejected: {message}")
            }
            AnalysisError::Submission(_) => {
                "Could not reach the analysis service. Please try again.".to_string()
            }
            AnalysisError::StatusFetch(_) => {
                "Lost track of the analysis job. Please submit the image again.".to_string()
            }
            AnalysisError::JobFailed(message) => message.clone(),
            AnalysisError::JobNotFound(_) => {
                "The analysis job was not found; its results may have expired.".to_string()
            }
            AnalysisError::PollLimitReached(_) => {
                "The analysis is taking too long. Please try again later.".to_string()
            }
            AnalysisError::ArtifactFetch(_) => {
                "The analysis finished but its results could not be downloaded.".to_string()
            }
            AnalysisError::Capture(_) => {
                "The screenshot could not be retrieved and the capture has ended.".to_string()
            }
            AnalysisError::ControllerClosed => "The analysis session has ended.".to_string(),
        }
    }
}

use crate::models::analysis::{AnalysisResult, CompletedPayload};
use crate::models::job::JobId;
use crate::services::artifacts::ArtifactStore;
use crate::services::job_service::{JobService, ServiceError};

/// Download the artifacts of a completed job and bundle them with its status.
///
/// Image and report are fetched concurrently; if either fails the whole
/// assembly fails and nothing partial is returned.
pub async fn assemble_result<S: JobService + ?Sized>(
    service: &S,
    artifacts: &ArtifactStore,
    job_id: &JobId,
    analysis: CompletedPayload,
) -> Result<AnalysisResult, AssemblyError> {
    let image = async {
        service
            .fetch_result_image(job_id)
            .await
            .map_err(AssemblyError::Image)
    };
    let report = async { service.fetch_report(job_id).await.map_err(AssemblyError::Report) };

    let (image_bytes, report) = tokio::try_join!(image, report)?;

    let image = artifacts
        .store_image(job_id, &image_bytes)
        .await
        .map_err(AssemblyError::Store)?;

    tracing::info!(
        job_id = %job_id,
        image_bytes = image_bytes.len(),
        report_chars = report.len(),
        "Analysis result assembled"
    );

    Ok(AnalysisResult {
        job_id: job_id.clone(),
        analysis,
        image,
        report,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("Failed to fetch result image: {0}")]
    Image(#[source] ServiceError),

    #[error("Failed to fetch report: {0}")]
    Report(#[source] ServiceError),

    #[error("Failed to store result image: {0}")]
    Store(#[source] std::io::Error),
}

use garde::Validate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::job::{JobId, QueuePosition};
use crate::services::artifacts::ImageHandle;

/// Body of `GET /job_status/{id}`, tagged by its `status` field.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusPayload {
    Submitted,
    Processing {
        #[serde(default, deserialize_with = "deserialize_position")]
        position_in_queue: Option<QueuePosition>,
    },
    Completed(CompletedPayload),
    Failed {
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        #[serde(default)]
        error: Option<String>,
    },
    NotFound {
        #[serde(default)]
        message: Option<String>,
    },
}

impl StatusPayload {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StatusPayload::Submitted | StatusPayload::Processing { .. })
    }

    /// Parse and validate a status body.
    pub fn parse(body: &str) -> Result<Self, String> {
        let payload: StatusPayload = serde_json::from_str(body).map_err(|e| e.to_string())?;
        if let StatusPayload::Completed(completed) = &payload {
            completed.validate().map_err(|e| e.to_string())?;
        }
        Ok(payload)
    }
}

// A present `null` means the job already left the queue; a missing field
// stays `None` through `#[serde(default)]`.
fn deserialize_position<'de, D>(deserializer: D) -> Result<Option<QueuePosition>, D::Error>
where
    D: Deserializer<'de>,
{
    let index: Option<u32> = Option::deserialize(deserializer)?;
    Ok(Some(match index {
        Some(index) => QueuePosition::Queued(index),
        None => QueuePosition::Started,
    }))
}

/// Analysis fields embedded in a `completed` status.
///
/// The service may report completion without the fields once its stored
/// results have expired; the artifact downloads then fail and that failure is
/// what the user sees.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct CompletedPayload {
    /// Sum of the per-rooftop percentages. Overlapping masks can push it past 100.
    #[garde(range(min = 0.0))]
    pub total_coverage_percentage: Option<f64>,

    #[garde(range(min = 0.0))]
    pub total_energy_potential: Option<f64>,

    #[serde(default)]
    #[garde(dive)]
    pub rooftops: Vec<Rooftop>,

    #[serde(default)]
    #[garde(skip)]
    pub message: Option<String>,
}

/// One detected rooftop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct Rooftop {
    #[garde(skip)]
    pub id: u32,

    #[garde(range(min = 0.0, max = 100.0))]
    pub percentage: f64,

    #[serde(default)]
    #[garde(range(min = 0.0))]
    pub area_pixels: Option<f64>,

    #[garde(range(min = 0.0))]
    pub area_m2: f64,

    #[garde(range(min = 0.0))]
    pub energy_potential_kwh_per_year: f64,

    #[serde(default)]
    #[garde(skip)]
    pub potential_panel_count: Option<u32>,

    #[serde(default)]
    #[garde(range(min = 0.0))]
    pub co2_saved_kg_per_year: Option<f64>,
}

/// Everything a finished analysis produced.
#[derive(Debug)]
pub struct AnalysisResult {
    pub job_id: JobId,
    pub analysis: CompletedPayload,
    pub image: ImageHandle,
    pub report: String,
}

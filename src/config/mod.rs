use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Client configuration, read from `GEOPV_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the rooftop analysis service (e.g., "http://localhost:5000")
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Delay between two status checks of the active job
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Give up after this many status checks. Unset means poll until terminal.
    #[serde(default)]
    pub max_polls: Option<u32>,

    /// Per-request timeout for calls to the analysis service. Unset means none.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// Loopback address the capture listener binds to
    #[serde(default = "default_capture_bind_addr")]
    pub capture_bind_addr: String,

    /// Browser origins allowed to post captures (comma-separated)
    #[serde(default = "default_capture_allowed_origins")]
    pub capture_allowed_origins: Vec<String>,

    /// Directory file references in a capture must resolve into. Unset refuses them.
    #[serde(default)]
    pub capture_dir: Option<PathBuf>,

    /// Directory for ephemeral result images
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// Largest image accepted for submission or capture
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    /// Nominatim geocoding endpoint
    #[serde(default = "default_nominatim_url")]
    pub nominatim_url: String,
}

fn default_api_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_capture_bind_addr() -> String {
    "127.0.0.1:5175".to_string()
}

fn default_capture_allowed_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string()]
}

fn default_artifact_dir() -> PathBuf {
    std::env::temp_dir().join("geopv")
}

fn default_max_image_bytes() -> usize {
    10 * 1024 * 1024 // 10 MB
}

fn default_nominatim_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed("GEOPV_").from_env()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

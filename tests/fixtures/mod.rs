//! Status bodies and images shared by the integration tests.

#![allow(dead_code)]

/// Smallest byte string recognised as a PNG.
pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01";

pub const SUBMITTED: &str = r#"{"status":"submitted"}"#;

pub const QUEUED_AT_3: &str = r#"{"status":"processing","position_in_queue":3}"#;

pub const QUEUED_AT_2: &str = r#"{"status":"processing","position_in_queue":2}"#;

pub const STARTED: &str = r#"{"status":"processing","position_in_queue":null}"#;

pub const COMPLETED: &str = r#"{
    "status": "completed",
    "total_coverage_percentage": 37.25,
    "total_energy_potential": 18250.5,
    "image_path": "results/abc_rooftop_detection_result.png",
    "report_path": "results/abc_rooftop_solar_potential_report.txt",
    "rooftops": [
        {"id": 1, "percentage": 21.5, "area_pixels": 5400.0, "area_m2": 96.2,
         "energy_potential_kwh_per_year": 10400.0},
        {"id": 2, "percentage": 15.75, "area_pixels": 3900.0, "area_m2": 70.1,
         "energy_potential_kwh_per_year": 7850.5}
    ]
}"#;

pub const FAILED_LOW_RES: &str = r#"{"status":"failed","error":"low resolution"}"#;

pub const NOT_FOUND: &str = r#"{"status":"not_found","message":"No job found with ID abc"}"#;

pub const REPORT: &str = "Rooftop Solar Potential Analysis Report\n\
    Total rooftop coverage: 37.25%\n\
    - Total potential annual energy generation: 18250.50 kWh/year\n";

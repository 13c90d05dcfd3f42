//! GeoPV rooftop analysis client
//!
//! Submits aerial images to the rooftop analysis service, tracks the
//! resulting background job until it finishes, and assembles the detection
//! image, report and per-rooftop solar figures for display. A loopback
//! capture listener lets an externally opened map window hand a screenshot
//! back to the client.

pub mod app_state;
pub mod config;
pub mod controller;
pub mod models;
pub mod routes;
pub mod services;

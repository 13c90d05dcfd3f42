pub mod artifacts;
pub mod assembler;
pub mod capture;
pub mod geocode;
pub mod job_service;

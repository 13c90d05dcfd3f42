pub mod analysis;
pub mod image;
pub mod job;

//! Data model for a convergence run.

pub mod config;
pub mod desired;
pub mod report;
pub mod resource;

//! Task API models
//!
//! Shapes exchanged between the task-dispatch layer and the release orchestrator.

pub mod models;

pub use models::*;

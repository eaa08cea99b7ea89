//! releasectl
//!
//! Drives platform CLIs (`cf`, `helm`) to create, prune and roll back
//! versioned application releases.

pub mod autoscaler;
pub mod cache;
pub mod collaborators;
pub mod command;
pub mod errors;
pub mod filesys;
pub mod helm;
pub mod logs;
pub mod manifest;
pub mod orchestrator;
pub mod platform;
pub mod process;
pub mod storage;
pub mod tracker;
pub mod utils;
pub mod workdir;

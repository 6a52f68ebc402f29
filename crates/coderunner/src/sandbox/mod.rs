//! Per-language sandbox management
//!
//! One long-lived container per language, tracked by the [`SandboxRegistry`].
//! The registry serializes access (`Idle → Busy → Idle`) and collapses
//! overlapping recoveries into one. [`Lifecycle`] does the engine work:
//! ensuring the image exists, then force-removing, creating and starting the
//! container under its deterministic name.

use std::time::Duration;

use thiserror::Error;

pub use crate::sandbox::lifecycle::Lifecycle;
pub use crate::sandbox::provision::ImageProvisioner;
pub use crate::sandbox::registry::{Lease, RecycleStart, RecycleTicket, SandboxRegistry};
use crate::engine::EngineError;

mod lifecycle;
mod provision;
mod registry;

/// Errors that occur while acquiring or rebuilding a sandbox
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to build image {image}: {message}")]
    ImageBuildFailure { image: String, message: String },

    #[error("container {name} failed to start: {message}")]
    ContainerStartFailure { name: String, message: String },

    #[error("sandbox for '{language}' still unavailable after {waited:?}")]
    Unavailable { language: String, waited: Duration },

    #[error("no sandbox registered for language '{0}'")]
    NotRegistered(String),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

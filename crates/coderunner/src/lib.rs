//! A library for running untrusted code in per-language container sandboxes.
//!
//! Coderunner keeps one long-lived container per configured language and runs
//! each submission inside it through the container engine's exec facility.
//! Every run ends in exactly one terminal outcome (completed, timed out,
//! output limit exceeded, failed setup or stopped), and any outcome that may
//! leave the sandbox dirty triggers a full recreation before the next request.
//!
//! # Features
//!
//! - **Per-language sandboxes**: One container per language, serialized access, bounded waits.
//! - **Compiled and interpreted languages**: Source write, optional input file, compile, then run.
//! - **Resource ceilings**: Wall clock and per-channel output limits with partial output preserved.
//! - **Self-healing**: Missing images are built on demand; vanished containers are recreated.
//! - **TOML configuration**: Images, commands and limits per language.

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, Language};
pub use engine::{ContainerEngine, DockerCli, EngineError};
pub use runner::{ExecuteError, OUTPUT_LIMIT_MARKER, Runner, TIMEOUT_MARKER};
pub use sandbox::SandboxError;
pub use types::{
    ExecutionLimits, ExecutionRequest, ExecutionResult, SandboxInfo, SandboxState, SetupStep,
    TerminalReason,
};

pub mod config;
pub mod engine;
pub mod runner;
pub mod sandbox;
pub mod types;

//! Code runner for coderunner
//!
//! Provides the high-level API: run a submission in its language's sandbox,
//! stop an in-flight run, and inspect or warm up sandboxes.

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

pub use crate::runner::capture::{OUTPUT_LIMIT_MARKER, TIMEOUT_MARKER};

mod capture;
mod deadline;
mod entry;
mod execute;
pub(crate) mod plan;

use crate::{
    config::Config,
    engine::{ContainerEngine, DockerCli, EngineError},
    sandbox::{Lifecycle, SandboxError, SandboxRegistry},
    types::{ExecutionRequest, ExecutionResult, SandboxInfo},
};

/// Errors that occur during execution
///
/// Timeouts, output overruns and failed setup steps are not errors; they come
/// back as an [`ExecutionResult`] carrying whatever output was captured.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("unsupported language '{0}'")]
    UnsupportedLanguage(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to start command in sandbox: {0}")]
    ExecStartFailure(#[source] EngineError),

    #[error("output stream failed: {0}")]
    StreamError(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl ExecuteError {
    /// Whether the sandbox was busy or recycling for longer than the bounded wait
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ExecuteError::Sandbox(SandboxError::Unavailable { .. }))
    }
}

/// High-level runner for code execution
///
/// Owns one sandbox per configured language. Share it between tasks with an
/// `Arc`; requests for the same language are serialized, requests for
/// different languages run independently.
#[derive(Debug)]
pub struct Runner<E = DockerCli> {
    config: Arc<Config>,
    registry: SandboxRegistry,
    lifecycle: Lifecycle<E>,
}

impl Runner<DockerCli> {
    /// Create a new runner using the docker CLI
    pub fn new(config: Config) -> Self {
        let engine = DockerCli::from_config(&config);
        Self::with_engine(config, engine)
    }

    /// Create a new runner with default configuration
    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }
}

impl<E: ContainerEngine> Runner<E> {
    /// Create a runner on top of any container engine
    pub fn with_engine(config: Config, engine: E) -> Self {
        let config = Arc::new(config);
        Self {
            registry: SandboxRegistry::new(&config),
            lifecycle: Lifecycle::new(Arc::new(engine), Arc::clone(&config)),
            config,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &E {
        self.lifecycle.engine()
    }

    /// Run a submission to one terminal outcome
    pub async fn execute(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, ExecuteError> {
        execute::execute(&self.config, &self.registry, &self.lifecycle, request).await
    }

    /// Force-recreate a language's sandbox, interrupting any run in progress.
    ///
    /// The interrupted run returns with [`TerminalReason::Stopped`]. Returns
    /// once the sandbox is idle again.
    ///
    /// [`TerminalReason::Stopped`]: crate::types::TerminalReason::Stopped
    #[instrument(skip(self))]
    pub async fn stop_execution(&self, language: &str) -> Result<(), ExecuteError> {
        self.check_language(language)?;
        self.lifecycle.stop(&self.registry, language).await?;
        Ok(())
    }

    /// Snapshot of every sandbox for status display
    pub fn list_sandboxes(&self) -> Vec<SandboxInfo> {
        self.registry.snapshot()
    }

    /// Provision a language's sandbox ahead of its first run.
    ///
    /// Builds the image if needed and starts the container; a sandbox that is
    /// already running is left alone.
    #[instrument(skip(self))]
    pub async fn start_sandbox(&self, language: &str) -> Result<SandboxInfo, ExecuteError> {
        self.check_language(language)?;
        let lease = self
            .registry
            .acquire(language, self.config.acquire_wait())
            .await?;
        self.lifecycle.ensure_ready(&lease).await?;
        lease.release();

        self.registry
            .snapshot()
            .into_iter()
            .find(|info| info.language == language)
            .ok_or_else(|| ExecuteError::UnsupportedLanguage(language.to_string()))
    }

    /// Rebuild the registry from containers already running in the engine.
    ///
    /// Call once at startup so sandboxes left by a previous process are
    /// reused. Returns how many were adopted.
    pub async fn sync_with_engine(&self) -> Result<usize, ExecuteError> {
        Ok(self.lifecycle.sync(&self.registry).await?)
    }

    fn check_language(&self, language: &str) -> Result<(), ExecuteError> {
        self.config
            .get_language(language)
            .map(|_| ())
            .map_err(|_| ExecuteError::UnsupportedLanguage(language.to_string()))
    }
}

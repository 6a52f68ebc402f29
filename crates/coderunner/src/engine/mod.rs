//! Container engine interface
//!
//! Everything coderunner asks of the container engine goes through
//! [`ContainerEngine`]: image presence and builds, container create / start /
//! remove / inspect by name, and exec with separate stdout and stderr streams.
//! [`DockerCli`] implements it on top of the `docker` command-line client.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::mpsc;

pub use crate::engine::command::{DockerAction, DockerCommand};
pub use crate::engine::docker::DockerCli;

mod command;
mod docker;
#[cfg(test)]
pub(crate) mod fake;

/// Errors reported by the container engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to spawn engine client: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("engine command failed: {0}")]
    CommandFailed(String),

    #[error("image build for {image} failed: {message}")]
    BuildFailed { image: String, message: String },

    #[error("container {0} not found")]
    ContainerNotFound(String),

    #[error("exec stream broke: {0}")]
    Stream(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parameters for creating a sandbox container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub working_dir: String,
    /// Keep stdin open on the container's main process
    pub interactive: bool,
    /// Allocate a pseudo-terminal for the container's main process
    pub tty: bool,
}

impl ContainerSpec {
    /// Spec for a long-lived sandbox: stdin attached and a terminal allocated
    pub fn sandbox(
        name: impl Into<String>,
        image: impl Into<String>,
        working_dir: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            working_dir: working_dir.into(),
            interactive: true,
            tty: true,
        }
    }
}

/// What the engine reports about a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatus {
    pub id: String,
    pub running: bool,
}

/// A command to run inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub container: String,
    /// Argument vector; never joined into a shell string
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    pub env: BTreeMap<String, String>,
    /// Bytes written to the process's stdin, which is then closed
    pub stdin: Option<Vec<u8>>,
}

impl ExecSpec {
    pub fn new(container: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            container: container.into(),
            command,
            working_dir: None,
            env: BTreeMap::new(),
            stdin: None,
        }
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn envs<'a>(mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn stdin(mut self, data: Option<Vec<u8>>) -> Self {
        self.stdin = data;
        self
    }
}

/// One event from a running exec, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    /// The process exited. Always the last event when present.
    Exited(Option<i32>),
}

/// Demultiplexed output of an exec
///
/// Ends (`next` returns `None`) after `Exited`, or early when the engine
/// severs the stream. Dropping it abandons the exec client.
#[derive(Debug)]
pub struct ExecStream {
    rx: mpsc::Receiver<Result<ExecEvent, EngineError>>,
}

pub type ExecSender = mpsc::Sender<Result<ExecEvent, EngineError>>;

impl ExecStream {
    /// Create a connected sender / stream pair
    pub fn channel(capacity: usize) -> (ExecSender, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }

    /// Receive the next event
    pub async fn next(&mut self) -> Option<Result<ExecEvent, EngineError>> {
        self.rx.recv().await
    }
}

/// Output of an exec collected to completion
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Combined diagnostic text, stderr first
    pub fn message(&self) -> String {
        let stderr = String::from_utf8_lossy(&self.stderr);
        let stdout = String::from_utf8_lossy(&self.stdout);
        match (stderr.trim().is_empty(), stdout.trim().is_empty()) {
            (false, false) => format!("{}\n{}", stderr.trim_end(), stdout.trim_end()),
            (false, true) => stderr.trim_end().to_owned(),
            (true, false) => stdout.trim_end().to_owned(),
            (true, true) => match self.exit_code {
                Some(code) => format!("exited with code {code}"),
                None => "terminated without an exit code".to_owned(),
            },
        }
    }
}

impl ExecStream {
    /// Drain the stream, buffering both channels
    pub async fn collect(mut self) -> Result<ExecOutput, EngineError> {
        let mut output = ExecOutput::default();
        while let Some(event) = self.next().await {
            match event? {
                ExecEvent::Stdout(data) => output.stdout.extend_from_slice(&data),
                ExecEvent::Stderr(data) => output.stderr.extend_from_slice(&data),
                ExecEvent::Exited(code) => {
                    output.exit_code = code;
                    break;
                }
            }
        }
        Ok(output)
    }
}

/// Operations coderunner needs from a container engine.
pub trait ContainerEngine: Send + Sync + 'static {
    /// Whether the image exists in the engine's local store
    fn image_exists(&self, image: &str) -> impl Future<Output = Result<bool, EngineError>> + Send;

    /// Build an image from a context directory, blocking until the build ends
    fn build_image(
        &self,
        image: &str,
        context: &Path,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Force-remove a container by name. A missing container is not an error.
    fn remove_container(&self, name: &str) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Create a container, returning its engine handle
    fn create_container(
        &self,
        spec: &ContainerSpec,
    ) -> impl Future<Output = Result<String, EngineError>> + Send;

    fn start_container(&self, name: &str) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Inspect a container by name; `None` when it does not exist
    fn inspect_container(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<ContainerStatus>, EngineError>> + Send;

    /// Start a command inside a running container
    fn exec(&self, spec: ExecSpec) -> impl Future<Output = Result<ExecStream, EngineError>> + Send;
}

/// Whether an engine error message means the object does not exist
pub(crate) fn is_not_found(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("no such container")
        || lower.contains("no such image")
        || lower.contains("no such object")
}

/// Resolve a build context path for logging and errors
pub(crate) fn display_context(context: &Path) -> PathBuf {
    std::fs::canonicalize(context).unwrap_or_else(|_| context.to_path_buf())
}

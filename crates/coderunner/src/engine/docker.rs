//! Container engine backed by the docker CLI
//!
//! Every operation spawns the configured docker binary. Exec output is read
//! from the client's stdout and stderr pipes by a pump task and forwarded as
//! [`ExecEvent`]s.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::engine::command::{DockerAction, DockerCommand};
use crate::engine::{
    ContainerEngine, ContainerSpec, ContainerStatus, EngineError, ExecEvent, ExecSender, ExecSpec,
    ExecStream, display_context, is_not_found,
};

/// Lines of build output kept for the failure message
const BUILD_LOG_TAIL: usize = 20;

/// Read size for exec output pipes
const READ_CHUNK: usize = 8192;

/// Buffered events between the pump task and the consumer
const EVENT_BUFFER: usize = 64;

/// Docker CLI client
#[derive(Debug, Clone)]
pub struct DockerCli {
    docker_path: PathBuf,
}

impl DockerCli {
    pub fn new(docker_path: impl Into<PathBuf>) -> Self {
        Self {
            docker_path: docker_path.into(),
        }
    }

    /// Client using the docker binary named in the configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.docker_binary())
    }

    /// Get the path to the docker binary
    pub fn docker_path(&self) -> &Path {
        &self.docker_path
    }

    fn command(&self, target: &str, action: DockerAction) -> DockerCommand {
        DockerCommand::new(&self.docker_path, target).action(action)
    }

    /// Run a docker command to completion, capturing both pipes
    async fn output(&self, command: DockerCommand) -> Result<Output, EngineError> {
        let args = command.build();
        debug!(?args, "running docker command");

        let program = args
            .first()
            .ok_or_else(|| EngineError::CommandFailed("empty command arguments".to_string()))?;
        Command::new(program)
            .args(&args[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(EngineError::SpawnFailed)
    }
}

impl ContainerEngine for DockerCli {
    #[instrument(skip(self))]
    async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
        let command = self
            .command(image, DockerAction::ImageInspect)
            .format("{{.Id}}");
        let output = self.output(command).await?;

        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_not_found(&stderr) {
            Ok(false)
        } else {
            Err(EngineError::CommandFailed(stderr.trim().to_string()))
        }
    }

    #[instrument(skip(self))]
    async fn build_image(&self, image: &str, context: &Path) -> Result<(), EngineError> {
        let args = self
            .command(image, DockerAction::Build)
            .context(context)
            .build();
        debug!(?args, context = %display_context(context).display(), "building image");

        let program = args
            .first()
            .ok_or_else(|| EngineError::CommandFailed("empty command arguments".to_string()))?;
        let mut child = Command::new(program)
            .args(&args[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(EngineError::SpawnFailed)?;

        // Progress goes to stderr with --progress=plain; drain both pipes so
        // neither can fill up and stall the build
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (stdout_tail, stderr_tail) = tokio::join!(log_lines(stdout), log_lines(stderr));

        let status = child.wait().await?;
        if status.success() {
            debug!("image built");
            return Ok(());
        }

        let mut tail: Vec<String> = stderr_tail?.into_iter().collect();
        if tail.is_empty() {
            tail = stdout_tail?.into_iter().collect();
        }
        let message = if tail.is_empty() {
            format!("docker build exited with {status}")
        } else {
            tail.join("\n")
        };

        Err(EngineError::BuildFailed {
            image: image.to_string(),
            message,
        })
    }

    #[instrument(skip(self))]
    async fn remove_container(&self, name: &str) -> Result<(), EngineError> {
        let command = self.command(name, DockerAction::Remove).force(true);
        let output = self.output(command).await?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_not_found(&stderr) {
            debug!("container already absent");
            Ok(())
        } else {
            Err(EngineError::CommandFailed(stderr.trim().to_string()))
        }
    }

    #[instrument(skip(self, spec), fields(name = %spec.name, image = %spec.image))]
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let command = self
            .command(&spec.name, DockerAction::Create)
            .image(&spec.image)
            .interactive(spec.interactive)
            .tty(spec.tty)
            .working_dir(&spec.working_dir);
        let output = self.output(command).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::CommandFailed(stderr.trim().to_string()));
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(EngineError::CommandFailed(
                "docker create printed no container id".to_string(),
            ));
        }
        debug!(%id, "container created");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn start_container(&self, name: &str) -> Result<(), EngineError> {
        let output = self.output(self.command(name, DockerAction::Start)).await?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_not_found(&stderr) {
            Err(EngineError::ContainerNotFound(name.to_string()))
        } else {
            Err(EngineError::CommandFailed(stderr.trim().to_string()))
        }
    }

    #[instrument(skip(self))]
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerStatus>, EngineError> {
        let command = self
            .command(name, DockerAction::Inspect)
            .format("{{.Id}} {{.State.Running}}");
        let output = self.output(command).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return if is_not_found(&stderr) {
                Ok(None)
            } else {
                Err(EngineError::CommandFailed(stderr.trim().to_string()))
            };
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_inspect(&stdout).map(Some)
    }

    #[instrument(skip(self, spec), fields(container = %spec.container))]
    async fn exec(&self, spec: ExecSpec) -> Result<ExecStream, EngineError> {
        let ExecSpec {
            container,
            command,
            working_dir,
            env,
            stdin,
        } = spec;

        let mut builder = self
            .command(&container, DockerAction::Exec)
            .interactive(stdin.is_some())
            .command(command);
        if let Some(dir) = working_dir {
            builder = builder.working_dir(dir);
        }
        for (key, value) in env {
            builder = builder.env(key, value);
        }
        let args = builder.build();
        debug!(?args, "starting exec");

        let program = args
            .first()
            .ok_or_else(|| EngineError::CommandFailed("empty command arguments".to_string()))?;
        let mut child = Command::new(program)
            .args(&args[1..])
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(EngineError::SpawnFailed)?;

        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            // Written concurrently with the reads so a program that prints
            // before consuming its input cannot deadlock the client
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&data).await {
                    debug!(?e, "exec stdin closed early");
                }
                // Dropping the pipe delivers EOF
            });
        }

        let (tx, stream) = ExecStream::channel(EVENT_BUFFER);
        tokio::spawn(pump(child, tx));
        Ok(stream)
    }
}

/// Forward an exec client's output until it exits or the consumer goes away
async fn pump(mut child: Child, tx: ExecSender) {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut stdout_buf = vec![0u8; READ_CHUNK];
    let mut stderr_buf = vec![0u8; READ_CHUNK];

    while stdout.is_some() || stderr.is_some() {
        let event = tokio::select! {
            // Consumer dropped the stream; abandon the client
            _ = tx.closed() => {
                if let Err(e) = child.kill().await {
                    debug!(?e, "failed to kill abandoned exec client");
                }
                return;
            }

            result = read_some(&mut stdout, &mut stdout_buf), if stdout.is_some() => {
                match result {
                    Ok(0) => {
                        stdout = None;
                        continue;
                    }
                    Ok(n) => Ok(ExecEvent::Stdout(stdout_buf[..n].to_vec())),
                    Err(e) => Err(EngineError::Stream(e.to_string())),
                }
            }

            result = read_some(&mut stderr, &mut stderr_buf), if stderr.is_some() => {
                match result {
                    Ok(0) => {
                        stderr = None;
                        continue;
                    }
                    Ok(n) => Ok(ExecEvent::Stderr(stderr_buf[..n].to_vec())),
                    Err(e) => Err(EngineError::Stream(e.to_string())),
                }
            }
        };

        let failed = event.is_err();
        if tx.send(event).await.is_err() || failed {
            let _ = child.kill().await;
            return;
        }
    }

    let event = match child.wait().await {
        Ok(status) => Ok(ExecEvent::Exited(status.code())),
        Err(e) => {
            warn!(?e, "failed to reap exec client");
            Err(EngineError::Stream(e.to_string()))
        }
    };
    let _ = tx.send(event).await;
}

async fn read_some<R>(reader: &mut Option<R>, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(reader) => reader.read(buf).await,
        None => Ok(0),
    }
}

/// Log each output line at debug level, keeping the last few
async fn log_lines<R>(reader: Option<R>) -> Result<VecDeque<String>, EngineError>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(BUILD_LOG_TAIL);
    let Some(reader) = reader else {
        return Ok(tail);
    };

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        debug!(target: "coderunner::build", "{line}");
        if tail.len() == BUILD_LOG_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Ok(tail)
}

/// Parse `{{.Id}} {{.State.Running}}` inspect output
fn parse_inspect(output: &str) -> Result<ContainerStatus, EngineError> {
    let mut parts = output.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(id), Some(running)) => Ok(ContainerStatus {
            id: id.to_string(),
            running: running == "true",
        }),
        _ => Err(EngineError::CommandFailed(format!(
            "unexpected inspect output: {}",
            output.trim()
        ))),
    }
}

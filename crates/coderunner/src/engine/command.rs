//! Command builder for the docker CLI
//!
//! Builds command-line arguments for each engine operation. The program to
//! run inside a container is always appended as separate arguments after the
//! container name, so submitted source code never passes through a shell
//! command line.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Builder for docker command-line arguments
#[derive(Debug)]
pub struct DockerCommand {
    /// Path to the docker binary
    docker_path: PathBuf,
    action: DockerAction,
    /// Container name or image reference the action applies to
    target: String,
    /// Image for `create`
    image: Option<String>,
    /// Build context for `build`
    context: Option<PathBuf>,
    /// --format for inspect actions
    format: Option<String>,
    /// -i, --interactive
    interactive: bool,
    /// -t, --tty
    tty: bool,
    /// -f, --force
    force: bool,
    /// -w, --workdir
    working_dir: Option<String>,
    /// -e, --env
    env: BTreeMap<String, String>,
    command: Vec<String>,
}

impl DockerCommand {
    /// Create a new docker command builder
    pub fn new(docker_path: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            docker_path: docker_path.into(),
            action: DockerAction::Inspect,
            target: target.into(),
            image: None,
            context: None,
            format: None,
            interactive: false,
            tty: false,
            force: false,
            working_dir: None,
            env: BTreeMap::new(),
            command: Vec::new(),
        }
    }

    /// Set the action to perform
    pub fn action(mut self, action: DockerAction) -> Self {
        self.action = action;
        self
    }

    /// Set the image a container is created from
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the build context directory
    pub fn context(mut self, path: impl Into<PathBuf>) -> Self {
        self.context = Some(path.into());
        self
    }

    /// Set a Go template for inspect output
    pub fn format(mut self, template: impl Into<String>) -> Self {
        self.format = Some(template.into());
        self
    }

    /// Keep stdin attached
    pub fn interactive(mut self, enable: bool) -> Self {
        self.interactive = enable;
        self
    }

    /// Allocate a pseudo-terminal
    pub fn tty(mut self, enable: bool) -> Self {
        self.tty = enable;
        self
    }

    /// Force the operation (kill a running container before removal)
    pub fn force(mut self, enable: bool) -> Self {
        self.force = enable;
        self
    }

    /// Set the working directory inside the container
    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the command to run inside the container
    pub fn command(mut self, cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Build the command-line arguments
    ///
    /// Consumes self to avoid cloning the command vector.
    pub fn build(self) -> Vec<String> {
        let mut args = vec![self.docker_path.to_string_lossy().into_owned()];

        match self.action {
            DockerAction::ImageInspect => {
                args.extend(["image".to_string(), "inspect".to_string()]);
                if let Some(format) = self.format {
                    args.push(format!("--format={format}"));
                }
                args.push(self.target);
            }
            DockerAction::Build => {
                args.push("build".to_string());
                args.push(format!("--tag={}", self.target));
                args.push("--progress=plain".to_string());
                let context = self.context.unwrap_or_else(|| PathBuf::from("."));
                args.push(context.to_string_lossy().into_owned());
            }
            DockerAction::Remove => {
                args.push("rm".to_string());
                if self.force {
                    args.push("--force".to_string());
                }
                args.push(self.target);
            }
            DockerAction::Create => {
                args.push("create".to_string());
                args.push(format!("--name={}", self.target));
                push_session_flags(&mut args, self.interactive, self.tty);
                if let Some(ref dir) = self.working_dir {
                    args.push(format!("--workdir={dir}"));
                }
                push_env(&mut args, &self.env);
                if let Some(image) = self.image {
                    args.push(image);
                }
                args.extend(self.command);
            }
            DockerAction::Start => {
                args.push("start".to_string());
                args.push(self.target);
            }
            DockerAction::Inspect => {
                args.extend(["container".to_string(), "inspect".to_string()]);
                if let Some(format) = self.format {
                    args.push(format!("--format={format}"));
                }
                args.push(self.target);
            }
            DockerAction::Exec => {
                args.push("exec".to_string());
                push_session_flags(&mut args, self.interactive, self.tty);
                if let Some(ref dir) = self.working_dir {
                    args.push(format!("--workdir={dir}"));
                }
                push_env(&mut args, &self.env);
                args.push(self.target);
                args.extend(self.command);
            }
        }

        args
    }

    /// Get the docker binary path
    pub fn docker_path(&self) -> &Path {
        &self.docker_path
    }

    /// Get the container name or image the command targets
    pub fn target(&self) -> &str {
        &self.target
    }
}

fn push_session_flags(args: &mut Vec<String>, interactive: bool, tty: bool) {
    if interactive {
        args.push("--interactive".to_string());
    }
    if tty {
        args.push("--tty".to_string());
    }
}

fn push_env(args: &mut Vec<String>, env: &BTreeMap<String, String>) {
    for (key, value) in env {
        args.push(format!("--env={key}={value}"));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockerAction {
    /// Look up an image in the local store
    ImageInspect,
    /// Build an image from a context directory
    Build,
    /// Remove a container
    Remove,
    /// Create a container
    Create,
    /// Start a created container
    Start,
    /// Look up a container
    Inspect,
    /// Run a command in a running container
    Exec,
}

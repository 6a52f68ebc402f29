use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::language::{CommandVars, CompileConfig, EntryPoint, Language, RunConfig};
use crate::types::{ExecutionLimits, seconds};

pub mod language;
mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../coderunner.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("language '{0}' not found in configuration")]
    LanguageNotFound(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for coderunner
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the docker binary (uses PATH if not specified).
    #[serde(default)]
    pub docker_path: Option<PathBuf>,

    /// Prefix of every sandbox container name; the language ID is appended.
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,

    /// Working directory inside every sandbox.
    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    /// Directory holding per-language image build contexts.
    #[serde(default = "default_build_root")]
    pub build_root: PathBuf,

    /// Seconds a request waits for a busy or recycling sandbox before
    /// giving up with `SandboxUnavailable`.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: f64,

    /// Seconds a freshly started container has to report a running state.
    #[serde(default = "default_start_timeout")]
    pub start_timeout: f64,

    /// Recreate the sandbox after every run, not only after failures.
    ///
    /// Guarantees no file written by one run is visible to the next, at the
    /// cost of a container restart per request.
    #[serde(default)]
    pub recreate_after_each_run: bool,

    /// Default limits applied to all executions.
    /// This will be overridden if the request specifies different limits
    #[serde(default)]
    pub default_limits: ExecutionLimits,

    /// Language configurations keyed by language ID
    #[serde(default)]
    pub languages: HashMap<String, Language>,
}

impl Config {
    /// Create a new config with embedded default languages
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            docker_path: None,
            container_prefix: default_container_prefix(),
            working_dir: default_working_dir(),
            build_root: default_build_root(),
            acquire_timeout: default_acquire_timeout(),
            start_timeout: default_start_timeout(),
            recreate_after_each_run: false,
            default_limits: ExecutionLimits::default(),
            languages: HashMap::new(),
        }
    }

    /// Get a language by ID
    pub fn get_language(&self, id: &str) -> Result<&Language, ConfigError> {
        self.languages
            .get(id)
            .ok_or_else(|| ConfigError::LanguageNotFound(id.to_string()))
    }

    /// Get the path to the docker binary
    pub fn docker_binary(&self) -> PathBuf {
        self.docker_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("docker"))
    }

    /// Deterministic sandbox container name for a language
    pub fn sandbox_name(&self, id: &str) -> String {
        format!("{}{id}", self.container_prefix)
    }

    /// Build context directory for a language's image
    pub fn build_context(&self, id: &str, language: &Language) -> PathBuf {
        match &language.build_context {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.build_root.join(path),
            None => self.build_root.join(id),
        }
    }

    /// Merge limits: built-in defaults → config defaults → language → request
    pub fn effective_limits(
        &self,
        language: &Language,
        overrides: Option<&ExecutionLimits>,
    ) -> ExecutionLimits {
        let mut limits = ExecutionLimits::default().with_overrides(&self.default_limits);
        if let Some(ref lang_limits) = language.limits {
            limits = limits.with_overrides(lang_limits);
        }
        if let Some(user_limits) = overrides {
            limits = limits.with_overrides(user_limits);
        }
        limits
    }

    /// Bounded wait for acquiring a sandbox
    pub fn acquire_wait(&self) -> Duration {
        seconds(self.acquire_timeout)
    }

    /// Bounded wait for a started container to report running
    pub fn start_wait(&self) -> Duration {
        seconds(self.start_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_container_prefix() -> String {
    "code-runner-".to_owned()
}

fn default_working_dir() -> String {
    "/app".to_owned()
}

fn default_build_root() -> PathBuf {
    PathBuf::from("docker")
}

fn default_acquire_timeout() -> f64 {
    30.0
}

fn default_start_timeout() -> f64 {
    10.0
}

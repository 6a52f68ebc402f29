use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default wall clock ceiling for a run, in seconds
pub const DEFAULT_WALL_TIME_LIMIT: f64 = 5.0;

/// Default per-channel output ceiling, in bytes
pub const DEFAULT_MAX_OUTPUT: u64 = 10 * 1024;

/// Default wall clock ceiling for each setup step (write, compile), in seconds
pub const DEFAULT_COMPILE_TIME_LIMIT: f64 = 30.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Wall clock time limit for the run command in seconds
    #[serde(default)]
    pub wall_time_limit: Option<f64>,

    /// Maximum captured bytes per output channel
    #[serde(default)]
    pub max_output: Option<u64>,

    /// Wall clock time limit for each setup step in seconds
    #[serde(default)]
    pub compile_time_limit: Option<f64>,
}

impl ExecutionLimits {
    /// 1 kilobyte in bytes
    pub const KB: u64 = 1024;

    /// Create new execution limits with the default ceilings
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits with every field unset, useful as an override base
    pub fn unset() -> Self {
        Self {
            wall_time_limit: None,
            max_output: None,
            compile_time_limit: None,
        }
    }

    /// Set the wall clock time limit in seconds
    pub fn with_wall_time_limit(mut self, seconds: f64) -> Self {
        self.wall_time_limit = Some(seconds);
        self
    }

    /// Set the per-channel output ceiling in bytes
    pub fn with_max_output(mut self, bytes: u64) -> Self {
        self.max_output = Some(bytes);
        self
    }

    /// Set the setup step time limit in seconds
    pub fn with_compile_time_limit(mut self, seconds: f64) -> Self {
        self.compile_time_limit = Some(seconds);
        self
    }

    /// Apply overrides from another ExecutionLimits, preferring values from `overrides`
    pub fn with_overrides(&self, overrides: &ExecutionLimits) -> ExecutionLimits {
        ExecutionLimits {
            wall_time_limit: overrides.wall_time_limit.or(self.wall_time_limit),
            max_output: overrides.max_output.or(self.max_output),
            compile_time_limit: overrides.compile_time_limit.or(self.compile_time_limit),
        }
    }

    /// Wall clock ceiling for the run command
    pub fn wall_time(&self) -> Duration {
        seconds(self.wall_time_limit.unwrap_or(DEFAULT_WALL_TIME_LIMIT))
    }

    /// Wall clock ceiling for a single setup step
    pub fn compile_time(&self) -> Duration {
        seconds(
            self.compile_time_limit
                .unwrap_or(DEFAULT_COMPILE_TIME_LIMIT),
        )
    }

    /// Byte ceiling applied to each output channel independently
    pub fn output_ceiling(&self) -> usize {
        let bytes = self.max_output.unwrap_or(DEFAULT_MAX_OUTPUT);
        usize::try_from(bytes).unwrap_or(usize::MAX)
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            wall_time_limit: Some(DEFAULT_WALL_TIME_LIMIT),
            max_output: Some(DEFAULT_MAX_OUTPUT),
            compile_time_limit: Some(DEFAULT_COMPILE_TIME_LIMIT),
        }
    }
}

/// Convert a configured number of seconds into a duration.
///
/// Negative, NaN and out of range values collapse to zero rather than panicking.
pub(crate) fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// A single submission
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Language ID as configured (e.g. "python", "cpp")
    pub language: String,

    /// Source code to run
    pub source: String,

    /// Optional standard input for the program
    pub stdin: Option<String>,

    /// Optional per-request limit overrides
    pub limits: Option<ExecutionLimits>,
}

impl ExecutionRequest {
    pub fn new(language: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            source: source.into(),
            stdin: None,
            limits: None,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = Some(limits);
        self
    }
}

/// How an execution ended. Exactly one per execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// The program ran to its natural end
    Completed,

    /// The wall clock ceiling elapsed first
    TimedOut,

    /// An output channel hit its byte ceiling first
    OutputLimitExceeded,

    /// A setup step (source write, input write, compile) failed
    Failed,

    /// The sandbox was force-recreated by a stop request mid-run
    Stopped,
}

impl TerminalReason {
    /// Whether the sandbox must be recreated after this outcome
    pub fn requires_recreation(&self) -> bool {
        matches!(
            self,
            TerminalReason::TimedOut | TerminalReason::OutputLimitExceeded | TerminalReason::Failed
        )
    }
}

/// In-sandbox steps that run before the program itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStep {
    WriteSource,
    WriteInput,
    Compile,
}

impl std::fmt::Display for SetupStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SetupStep::WriteSource => "write source",
            SetupStep::WriteInput => "write input",
            SetupStep::Compile => "compile",
        };
        f.write_str(name)
    }
}

/// Result of an execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    /// Captured standard output, possibly truncated
    pub stdout: String,

    /// Captured standard error, possibly truncated
    pub stderr: String,

    /// Wall clock time spent running the program
    pub elapsed: Duration,

    /// Which terminal outcome fired first
    pub terminal_reason: TerminalReason,

    /// Exit code reported by the engine, if the program exited on its own
    pub exit_code: Option<i32>,

    /// The setup step that failed, when `terminal_reason` is `Failed`
    pub failed_step: Option<SetupStep>,

    /// Set when the recreation this outcome triggered did not succeed.
    ///
    /// The sandbox is then rebuilt on its next use.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recreation_error: Option<String>,
}

impl ExecutionResult {
    /// Result for a setup step that failed before the program could run
    pub fn setup_failure(
        step: SetupStep,
        message: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            elapsed: Duration::ZERO,
            terminal_reason: TerminalReason::Failed,
            exit_code,
            failed_step: Some(step),
            recreation_error: None,
        }
    }

    /// Check if the program completed with exit code 0 and a clean error channel
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.terminal_reason == TerminalReason::Completed
            && self.exit_code.unwrap_or(0) == 0
            && self.stderr.is_empty()
    }

    /// Check if the program completed but reported an error of its own
    #[must_use]
    pub fn is_runtime_error(&self) -> bool {
        self.terminal_reason == TerminalReason::Completed && !self.is_success()
    }
}

/// Lifecycle state of a language's sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Idle,
    Busy,
    Recycling,
}

impl std::fmt::Display for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SandboxState::Idle => "idle",
            SandboxState::Busy => "busy",
            SandboxState::Recycling => "recycling",
        };
        f.write_str(name)
    }
}

/// Read-only snapshot of one sandbox for status display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxInfo {
    pub language: String,
    pub name: String,
    pub state: SandboxState,
    pub engine_handle: Option<String>,
}

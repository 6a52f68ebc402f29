//! Single execution dispatch
//!
//! One request goes through lease, readiness check, setup steps and the run
//! itself. Exactly one terminal outcome is reported. Whatever outcome left
//! the sandbox in an unknown state triggers a recreation before the lease is
//! given up.

use std::time::Duration;

use tokio::time::{Instant, timeout};
use tracing::{debug, info, instrument, warn};

use crate::{
    config::Config,
    engine::{ContainerEngine, ExecEvent, ExecSpec},
    runner::{
        ExecuteError,
        capture::{Channel, OutputCapture},
        deadline::Deadline,
        plan::{ExecutionPlan, SetupCommand, remove_files},
    },
    sandbox::{Lease, Lifecycle, SandboxRegistry},
    types::{ExecutionRequest, ExecutionResult, TerminalReason},
};

enum Setup {
    Done,
    Stopped,
    Failed(ExecutionResult),
}

#[instrument(skip_all, fields(language = %request.language))]
pub(crate) async fn execute<E: ContainerEngine>(
    config: &Config,
    registry: &SandboxRegistry,
    lifecycle: &Lifecycle<E>,
    request: ExecutionRequest,
) -> Result<ExecutionResult, ExecuteError> {
    let language = config
        .get_language(&request.language)
        .map_err(|_| ExecuteError::UnsupportedLanguage(request.language.clone()))?;
    if request.source.trim().is_empty() {
        return Err(ExecuteError::InvalidRequest("source code is empty".to_string()));
    }

    let limits = config.effective_limits(language, request.limits.as_ref());
    let plan = ExecutionPlan::new(language, &request.source, request.stdin.as_deref());

    let lease = registry
        .acquire(&request.language, config.acquire_wait())
        .await?;
    let acquired = Instant::now();

    // A stop while provisioning owns the sandbox from here on
    tokio::select! {
        biased;

        _ = lease.revoked() => {
            info!("execution stopped while provisioning");
            return Ok(stopped(acquired.elapsed()));
        }
        ready = lifecycle.ensure_ready(&lease) => match ready {
            Ok(_) => {}
            Err(_) if !lease.is_current() => {
                info!("execution stopped while provisioning");
                return Ok(stopped(acquired.elapsed()));
            }
            Err(e) => return Err(e.into()),
        },
    }

    let container = config.sandbox_name(&request.language);
    let engine = lifecycle.engine();

    for step in &plan.setup {
        let setup = run_setup(
            engine,
            config,
            &container,
            step,
            limits.compile_time(),
            &lease,
        );
        match setup.await {
            Ok(Setup::Done) => {}
            Ok(Setup::Stopped) => {
                info!(step = %step.step, "execution stopped during setup");
                return Ok(stopped(acquired.elapsed()));
            }
            Err(_) if !lease.is_current() => {
                info!(step = %step.step, "execution stopped during setup");
                return Ok(stopped(acquired.elapsed()));
            }
            Ok(Setup::Failed(result)) => {
                info!(step = %step.step, exit_code = ?result.exit_code, "setup step failed");
                let recreation_error = recover(lifecycle, lease).await;
                return Ok(ExecutionResult {
                    recreation_error,
                    ..result
                });
            }
            Err(e) => {
                recover(lifecycle, lease).await;
                return Err(e);
            }
        }
    }

    if !lease.is_current() {
        info!("execution stopped before the program started");
        return Ok(stopped(acquired.elapsed()));
    }
    let spec = ExecSpec::new(&container, plan.run)
        .working_dir(&config.working_dir)
        .envs(&plan.run_env)
        .stdin(plan.run_stdin);
    let mut stream = match engine.exec(spec).await {
        Ok(stream) => stream,
        Err(e) => {
            recover(lifecycle, lease).await;
            return Err(ExecuteError::ExecStartFailure(e));
        }
    };

    let mut capture = OutputCapture::new(limits.output_ceiling());
    let mut deadline = Deadline::start(limits.wall_time());
    let mut exit_code = None;

    let outcome = 'run: loop {
        tokio::select! {
            biased;

            _ = lease.revoked() => break 'run Ok(TerminalReason::Stopped),
            _ = &mut deadline => break 'run Ok(TerminalReason::TimedOut),
            event = stream.next() => match event {
                Some(Ok(ExecEvent::Stdout(data))) => {
                    if capture.push(Channel::Stdout, &data) {
                        break 'run Ok(TerminalReason::OutputLimitExceeded);
                    }
                }
                Some(Ok(ExecEvent::Stderr(data))) => {
                    if capture.push(Channel::Stderr, &data) {
                        break 'run Ok(TerminalReason::OutputLimitExceeded);
                    }
                }
                Some(Ok(ExecEvent::Exited(code))) => {
                    exit_code = code;
                    break 'run Ok(TerminalReason::Completed);
                }
                Some(Err(e)) => break 'run Err(e.to_string()),
                None => break 'run Err("stream ended before the program exited".to_string()),
            },
        }
    };
    let elapsed = deadline.elapsed();
    let limit = deadline.limit();
    drop(stream);

    let reason = match outcome {
        Ok(reason) => reason,
        Err(message) => {
            recover(lifecycle, lease).await;
            return Err(ExecuteError::StreamError(message));
        }
    };

    if reason == TerminalReason::Stopped {
        info!(?elapsed, "execution stopped");
        let (stdout, stderr) = capture.finish(false);
        return Ok(ExecutionResult {
            stdout,
            stderr,
            ..stopped(elapsed)
        });
    }

    match reason {
        TerminalReason::TimedOut => debug!(?limit, "wall clock ceiling reached"),
        TerminalReason::OutputLimitExceeded => debug!(
            channel = ?capture.overflowed(),
            ceiling = limits.output_ceiling(),
            "output ceiling reached"
        ),
        _ => {}
    }
    let (stdout, stderr) = capture.finish(reason == TerminalReason::TimedOut);
    let mut result = ExecutionResult {
        stdout,
        stderr,
        elapsed,
        terminal_reason: reason,
        exit_code,
        failed_step: None,
        recreation_error: None,
    };

    if reason.requires_recreation() || config.recreate_after_each_run {
        result.recreation_error = recover(lifecycle, lease).await;
    } else {
        if let Some(file) = plan.cleanup {
            clean_up(engine, config, &container, file).await;
        }
        lease.release();
    }

    info!(?reason, ?elapsed, exit_code = ?result.exit_code, "execution finished");
    Ok(result)
}

async fn run_setup<E: ContainerEngine>(
    engine: &E,
    config: &Config,
    container: &str,
    step: &SetupCommand,
    limit: Duration,
    lease: &Lease,
) -> Result<Setup, ExecuteError> {
    if !lease.is_current() {
        return Ok(Setup::Stopped);
    }
    debug!(step = %step.step, "running setup step");
    let spec = ExecSpec::new(container, step.command.clone())
        .working_dir(&config.working_dir)
        .envs(&step.env)
        .stdin(step.stdin.clone());
    let stream = engine
        .exec(spec)
        .await
        .map_err(ExecuteError::ExecStartFailure)?;

    tokio::select! {
        biased;

        _ = lease.revoked() => Ok(Setup::Stopped),
        collected = timeout(limit, stream.collect()) => match collected {
            Err(_) => Ok(Setup::Failed(ExecutionResult::setup_failure(
                step.step,
                format!("{} timed out after {limit:?}", step.step),
                None,
            ))),
            Ok(Err(e)) => Err(ExecuteError::StreamError(e.to_string())),
            Ok(Ok(output)) if output.success() => Ok(Setup::Done),
            Ok(Ok(output)) => Ok(Setup::Failed(ExecutionResult::setup_failure(
                step.step,
                output.message(),
                output.exit_code,
            ))),
        },
    }
}

/// Best-effort removal of per-run files after a clean run
async fn clean_up<E: ContainerEngine>(engine: &E, config: &Config, container: &str, file: &str) {
    let spec = ExecSpec::new(container, remove_files(&[file])).working_dir(&config.working_dir);
    let removed = match engine.exec(spec).await {
        Ok(stream) => stream.collect().await.map(|output| output.success()),
        Err(e) => Err(e),
    };
    match removed {
        Ok(true) => {}
        Ok(false) => warn!(file, "failed to remove per-run file"),
        Err(e) => warn!(file, error = %e, "failed to remove per-run file"),
    }
}

/// Recreate the sandbox, returning why it failed if it did.
///
/// A failed recreation leaves the sandbox to be rebuilt on next use.
async fn recover<E: ContainerEngine>(lifecycle: &Lifecycle<E>, lease: Lease) -> Option<String> {
    lifecycle.recycle(lease).await.err().map(|e| e.to_string())
}

fn stopped(elapsed: Duration) -> ExecutionResult {
    ExecutionResult {
        stdout: String::new(),
        stderr: String::new(),
        elapsed,
        terminal_reason: TerminalReason::Stopped,
        exit_code: None,
        failed_step: None,
        recreation_error: None,
    }
}

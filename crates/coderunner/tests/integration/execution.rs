use std::sync::Arc;
use std::time::Duration;

use coderunner::{
    ExecutionLimits, ExecutionRequest, OUTPUT_LIMIT_MARKER, Runner, TIMEOUT_MARKER,
    TerminalReason,
};

use super::{cleanup, fixture_source, test_config};

#[tokio::test]
#[ignore = "requires docker"]
async fn test_run_python_hello_world() {
    let runner = Runner::new(test_config("py-hello"));

    let result = runner
        .execute(ExecutionRequest::new("python", fixture_source("hello.py")))
        .await
        .expect("Execution failed");

    assert!(result.is_success());
    assert_eq!(result.terminal_reason, TerminalReason::Completed);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.stdout, "Hello, World!\n");

    cleanup(&runner).await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_run_python_with_stdin() {
    let runner = Runner::new(test_config("py-stdin"));

    let request =
        ExecutionRequest::new("python", fixture_source("echo.py")).with_stdin("hello\nworld\n");
    let result = runner.execute(request).await.expect("Execution failed");

    assert!(result.is_success());
    assert_eq!(result.stdout, "HELLO\nWORLD\n");

    cleanup(&runner).await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_shell_metacharacters_reach_program_verbatim() {
    let runner = Runner::new(test_config("py-quote"));

    let source = r#"print("$(echo injected) `id` ; && \" ' \\")"#;
    let result = runner
        .execute(ExecutionRequest::new("python", source))
        .await
        .expect("Execution failed");

    assert_eq!(result.stdout, "$(echo injected) `id` ; && \" ' \\\n");

    cleanup(&runner).await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_runtime_error_reported_on_stderr() {
    let runner = Runner::new(test_config("js-throw"));

    let result = runner
        .execute(ExecutionRequest::new("javascript", fixture_source("throw.js")))
        .await
        .expect("Execution failed");

    assert_eq!(result.terminal_reason, TerminalReason::Completed);
    assert!(result.is_runtime_error());
    assert_eq!(result.stdout, "before\n");
    assert!(result.stderr.contains("boom"));
    assert_ne!(result.exit_code, Some(0));

    cleanup(&runner).await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_timeout_keeps_partial_output() {
    let runner = Runner::new(test_config("py-timeout"));

    let limits = ExecutionLimits::unset().with_wall_time_limit(1.0);
    let request =
        ExecutionRequest::new("python", fixture_source("infinite_loop.py")).with_limits(limits);
    let result = runner.execute(request).await.expect("Execution failed");

    assert_eq!(result.terminal_reason, TerminalReason::TimedOut);
    assert_eq!(result.stdout, "started\n");
    assert!(result.stderr.ends_with(TIMEOUT_MARKER));
    assert!(result.elapsed >= Duration::from_secs(1));
    assert!(result.elapsed < Duration::from_secs(5));

    // The recreated sandbox serves the next request
    let next = runner
        .execute(ExecutionRequest::new("python", fixture_source("hello.py")))
        .await
        .expect("Execution failed");
    assert!(next.is_success());

    cleanup(&runner).await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_output_limit_truncates() {
    let runner = Runner::new(test_config("js-spam"));

    let limits = ExecutionLimits::unset().with_max_output(4096);
    let request =
        ExecutionRequest::new("javascript", fixture_source("spam.js")).with_limits(limits);
    let result = runner.execute(request).await.expect("Execution failed");

    assert_eq!(result.terminal_reason, TerminalReason::OutputLimitExceeded);
    let kept = result
        .stdout
        .strip_suffix(OUTPUT_LIMIT_MARKER)
        .expect("marker missing");
    assert_eq!(kept.len(), 4096);

    cleanup(&runner).await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_no_residue_after_timeout() {
    let runner = Runner::new(test_config("py-residue"));
    let limits = ExecutionLimits::unset().with_wall_time_limit(1.0);

    let first = runner
        .execute(
            ExecutionRequest::new("python", fixture_source("leave_file.py"))
                .with_limits(limits.clone()),
        )
        .await
        .expect("Execution failed");
    assert_eq!(first.terminal_reason, TerminalReason::TimedOut);
    assert!(first.stdout.starts_with("False"));

    let second = runner
        .execute(
            ExecutionRequest::new("python", fixture_source("leave_file.py")).with_limits(limits),
        )
        .await
        .expect("Execution failed");
    assert!(second.stdout.starts_with("False"));

    cleanup(&runner).await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_stop_interrupts_execution() {
    let runner = Arc::new(Runner::new(test_config("py-stop")));
    runner
        .start_sandbox("python")
        .await
        .expect("Failed to start sandbox");

    let limits = ExecutionLimits::unset().with_wall_time_limit(30.0);
    let task = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move {
            runner
                .execute(
                    ExecutionRequest::new("python", fixture_source("infinite_loop.py"))
                        .with_limits(limits),
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    runner
        .stop_execution("python")
        .await
        .expect("Failed to stop");

    let result = task
        .await
        .expect("task panicked")
        .expect("Execution failed");
    assert_eq!(result.terminal_reason, TerminalReason::Stopped);

    cleanup(&runner).await;
}

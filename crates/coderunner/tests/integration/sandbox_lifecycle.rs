use coderunner::{ContainerEngine, ExecuteError, Runner, SandboxState};

use super::{cleanup, test_config};

#[tokio::test]
#[ignore = "requires docker"]
async fn test_start_sandbox_runs_container() {
    let runner = Runner::new(test_config("start"));

    let info = runner
        .start_sandbox("python")
        .await
        .expect("Failed to start sandbox");
    assert_eq!(info.name, "coderunner-test-start-python");
    assert_eq!(info.state, SandboxState::Idle);

    let status = runner
        .engine()
        .inspect_container(&info.name)
        .await
        .expect("Failed to inspect container")
        .expect("Container should exist");
    assert!(status.running);
    assert_eq!(Some(status.id), info.engine_handle);

    cleanup(&runner).await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_stop_recreates_container() {
    let runner = Runner::new(test_config("stop"));

    let before = runner
        .start_sandbox("javascript")
        .await
        .expect("Failed to start sandbox");
    runner
        .stop_execution("javascript")
        .await
        .expect("Failed to stop sandbox");

    let after = runner
        .list_sandboxes()
        .into_iter()
        .find(|info| info.language == "javascript")
        .expect("javascript sandbox missing");
    assert_eq!(after.state, SandboxState::Idle);
    assert!(after.engine_handle.is_some());
    assert_ne!(after.engine_handle, before.engine_handle);

    cleanup(&runner).await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_sync_adopts_running_containers() {
    let config = test_config("sync");
    let first = Runner::new(config.clone());
    let started = first
        .start_sandbox("python")
        .await
        .expect("Failed to start sandbox");

    let second = Runner::new(config);
    let adopted = second.sync_with_engine().await.expect("Failed to sync");
    assert_eq!(adopted, 1);

    let python = second
        .list_sandboxes()
        .into_iter()
        .find(|info| info.language == "python")
        .expect("python sandbox missing");
    assert_eq!(python.engine_handle, started.engine_handle);

    cleanup(&second).await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_externally_removed_container_is_recreated() {
    let runner = Runner::new(test_config("vanish"));
    let info = runner
        .start_sandbox("python")
        .await
        .expect("Failed to start sandbox");

    runner
        .engine()
        .remove_container(&info.name)
        .await
        .expect("Failed to remove container");

    let result = runner
        .execute(coderunner::ExecutionRequest::new("python", "print('back')"))
        .await
        .expect("Execution failed");
    assert_eq!(result.stdout, "back\n");

    cleanup(&runner).await;
}

#[tokio::test]
async fn test_unknown_language_rejected() {
    let runner = Runner::new(test_config("unknown"));
    let result = runner.start_sandbox("brainfuck").await;
    assert!(matches!(result, Err(ExecuteError::UnsupportedLanguage(_))));
}

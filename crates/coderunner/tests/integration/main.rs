//! Integration tests for coderunner
//!
//! These tests require a docker daemon reachable through the `docker` CLI.
//! Run with: cargo test -p coderunner --features integration-tests
//!
//! Tests that start containers are marked `#[ignore]`. To include them:
//!    cargo test -p coderunner --features integration-tests -- --include-ignored

#![cfg(feature = "integration-tests")]

use std::fs;
use std::path::PathBuf;

use coderunner::config::Config;
use coderunner::{ContainerEngine, Runner};

mod config_loading;
mod execution;
mod sandbox_lifecycle;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Image build contexts shipped with the workspace
const BUILD_ROOT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../docker");

/// Helper to get fixture file content
pub(crate) fn fixture_source(name: &str) -> String {
    let path = format!("{FIXTURES_PATH}/sources/{name}");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

/// Default config with container names unique to one test, so tests running
/// in parallel never recreate each other's sandboxes.
pub(crate) fn test_config(test: &str) -> Config {
    let mut config = Config::default();
    config.container_prefix = format!("coderunner-test-{test}-");
    config.build_root = PathBuf::from(BUILD_ROOT);
    config
}

/// Remove every container a test's runner created
pub(crate) async fn cleanup(runner: &Runner) {
    for sandbox in runner.list_sandboxes() {
        runner
            .engine()
            .remove_container(&sandbox.name)
            .await
            .expect("Failed to remove container");
    }
}

use std::path::Path;

use coderunner::config::{Config, EntryPoint};

use super::FIXTURES_PATH;

#[test]
fn test_load_valid_config() {
    let path = format!("{}/configs/valid_full.toml", FIXTURES_PATH);
    let config = Config::from_file(&path).expect("Failed to load config");

    assert!(config.languages.contains_key("cpp"));
    assert!(config.languages.contains_key("python"));
    assert_eq!(config.default_limits.wall_time_limit, Some(2.0));
    assert_eq!(config.default_limits.max_output, Some(4096));
    assert!(config.recreate_after_each_run);
    assert_eq!(config.sandbox_name("cpp"), "judge-cpp");
    assert_eq!(config.docker_binary(), Path::new("/usr/local/bin/docker"));

    let python = config.get_language("python").unwrap();
    assert_eq!(
        config.build_context("python", python),
        Path::new("images/python3")
    );

    let cpp = config.get_language("cpp").unwrap();
    assert_eq!(cpp.compile.as_ref().unwrap().entry_point, EntryPoint::CMain);
    let limits = config.effective_limits(cpp, None);
    assert_eq!(limits.wall_time_limit, Some(1.0));
    assert_eq!(limits.max_output, Some(4096));
}

#[test]
fn test_load_minimal_config() {
    let path = format!("{}/configs/valid_minimal.toml", FIXTURES_PATH);
    let config = Config::from_file(&path).expect("Failed to load config");

    assert!(config.languages.contains_key("test"));
    assert_eq!(config.sandbox_name("test"), "code-runner-test");
    assert!(!config.recreate_after_each_run);
}

#[test]
fn test_load_invalid_empty_image() {
    let path = format!("{}/configs/invalid_empty_image.toml", FIXTURES_PATH);
    let result = Config::from_file(&path);
    assert!(result.is_err());
}

#[test]
fn test_load_invalid_empty_run_command() {
    let path = format!("{}/configs/invalid_empty_run_command.toml", FIXTURES_PATH);
    let result = Config::from_file(&path);
    assert!(result.is_err());
}

#[test]
fn test_load_invalid_missing_code_placeholder() {
    let path = format!(
        "{}/configs/invalid_missing_code_placeholder.toml",
        FIXTURES_PATH
    );
    let result = Config::from_file(&path);
    assert!(result.is_err());
}

#[test]
fn test_load_invalid_language_id() {
    let path = format!("{}/configs/invalid_language_id.toml", FIXTURES_PATH);
    let result = Config::from_file(&path);
    assert!(result.is_err());
}

#[test]
fn test_load_nonexistent_file() {
    let result = Config::from_file("/nonexistent/path/config.toml");
    assert!(result.is_err());
}

#[test]
fn test_default_config_has_all_languages() {
    let config = Config::default();
    for id in ["python", "javascript", "java", "cpp"] {
        assert!(config.languages.contains_key(id), "missing {id}");
    }
}

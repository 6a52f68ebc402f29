use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::ExecutionLimits;

/// Runtime descriptor for a programming language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Language {
    /// Human-readable name for the language (e.g., "Python 3")
    pub name: String,

    /// Container image backing this language's sandbox
    pub image: String,

    /// Build context used when the image is missing.
    ///
    /// Relative paths resolve against the config's `build_root`. Defaults to
    /// `<build_root>/<language id>`.
    #[serde(default)]
    pub build_context: Option<PathBuf>,

    /// Compilation configuration (None for interpreted languages)
    #[serde(default)]
    pub compile: Option<CompileConfig>,

    /// Execution configuration
    pub run: RunConfig,

    /// Limits for this language (overrides defaults)
    #[serde(default)]
    pub limits: Option<ExecutionLimits>,
}

impl Language {
    /// Check if the language is compiled
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    /// Expand placeholders in the given command
    ///
    /// `{code}` is substituted last so that placeholder-like text inside the
    /// submitted source is never expanded a second time. Every element stays a
    /// separate argument; nothing here is ever handed to a shell as one string.
    pub fn expand_command(command: &[String], vars: &CommandVars<'_>) -> Vec<String> {
        command
            .iter()
            .map(|arg| {
                arg.replace("{source}", vars.source)
                    .replace("{output}", vars.output)
                    .replace("{binary}", vars.output)
                    .replace("{entry}", vars.entry)
                    .replace("{code}", vars.code)
            })
            .collect()
    }
}

/// Values substituted into command templates
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandVars<'a> {
    /// Source file name inside the sandbox working directory
    pub source: &'a str,
    /// Compiled output name
    pub output: &'a str,
    /// Entry point name (the main class for Java)
    pub entry: &'a str,
    /// Raw submitted source, for interpreters taking the program inline
    pub code: &'a str,
}

/// How a compiled language's source is checked for a top-level entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPoint {
    /// Source is written as-is
    #[default]
    None,

    /// C/C++ `main` function; bare statements are wrapped in one
    CMain,

    /// Java class declaring `public static void main`; bare statements are
    /// wrapped in `public class Main`
    JavaClass,
}

/// Configuration for the compilation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Command and arguments with placeholders
    /// Placeholders: {source}, {output}, {entry}
    pub command: Vec<String>,

    /// Source file name in the sandbox (e.g., "main.cpp")
    pub source_name: String,

    /// Output binary name (e.g., "main")
    #[serde(default = "default_output_name")]
    pub output_name: String,

    /// Entry point detection strategy
    #[serde(default)]
    pub entry_point: EntryPoint,

    /// Environment variables to set during compilation
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Configuration for the execution step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Command and arguments with placeholders
    /// Placeholders: {code}, {source}, {binary}, {entry}
    pub command: Vec<String>,

    /// Environment Variables to set
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_output_name() -> String {
    "main".to_owned()
}

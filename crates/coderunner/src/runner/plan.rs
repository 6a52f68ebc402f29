//! Command sequence for one execution
//!
//! Payloads (source text and program input) only ever travel as exec stdin or
//! as a single argv element; none of them is spliced into a shell command.

use std::collections::HashMap;

use crate::config::{CommandVars, Language};
use crate::runner::entry::{self, PreparedSource};
use crate::types::SetupStep;

/// Companion file holding the program's input for compiled runs
pub(crate) const INPUT_FILE: &str = "input.txt";

/// Writes exec stdin to the file named by `$1`
pub(crate) const WRITE_FILE_SCRIPT: &str = r#"cat > "$1""#;

/// Runs `$2...` with stdin redirected from the file named by `$1`
pub(crate) const INPUT_REDIRECT_SCRIPT: &str = r#"f="$1"; shift; exec "$@" < "$f""#;

/// A command that must succeed before the program runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SetupCommand {
    pub step: SetupStep,
    pub command: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExecutionPlan {
    /// Setup commands, run strictly in order
    pub setup: Vec<SetupCommand>,
    /// The program itself
    pub run: Vec<String>,
    pub run_env: HashMap<String, String>,
    /// Bytes piped to the program's stdin
    pub run_stdin: Option<Vec<u8>>,
    /// File to delete after a completed run
    pub cleanup: Option<&'static str>,
}

impl ExecutionPlan {
    pub fn new(language: &Language, source: &str, stdin: Option<&str>) -> Self {
        match language.compile {
            Some(ref compile) => {
                let PreparedSource {
                    text,
                    file_name,
                    entry,
                } = entry::prepare(
                    compile.entry_point,
                    source,
                    &compile.source_name,
                    &compile.output_name,
                );
                let vars = CommandVars {
                    source: &file_name,
                    output: &compile.output_name,
                    entry: &entry,
                    code: "",
                };

                let mut setup = vec![write_file(
                    SetupStep::WriteSource,
                    &file_name,
                    text.into_bytes(),
                )];
                if let Some(input) = stdin {
                    setup.push(write_file(
                        SetupStep::WriteInput,
                        INPUT_FILE,
                        input.as_bytes().to_vec(),
                    ));
                }
                setup.push(SetupCommand {
                    step: SetupStep::Compile,
                    command: Language::expand_command(&compile.command, &vars),
                    stdin: None,
                    env: compile.env.clone(),
                });

                let mut run = Language::expand_command(&language.run.command, &vars);
                if stdin.is_some() {
                    run = redirect_input(run);
                }

                Self {
                    setup,
                    run,
                    run_env: language.run.env.clone(),
                    run_stdin: None,
                    cleanup: stdin.map(|_| INPUT_FILE),
                }
            }
            None => {
                let vars = CommandVars {
                    code: source,
                    ..Default::default()
                };
                Self {
                    setup: Vec::new(),
                    run: Language::expand_command(&language.run.command, &vars),
                    run_env: language.run.env.clone(),
                    run_stdin: stdin.map(|input| input.as_bytes().to_vec()),
                    cleanup: None,
                }
            }
        }
    }
}

fn write_file(step: SetupStep, file_name: &str, contents: Vec<u8>) -> SetupCommand {
    SetupCommand {
        step,
        command: shell(WRITE_FILE_SCRIPT, [file_name.to_owned()]),
        stdin: Some(contents),
        env: HashMap::new(),
    }
}

fn redirect_input(run: Vec<String>) -> Vec<String> {
    shell(
        INPUT_REDIRECT_SCRIPT,
        std::iter::once(INPUT_FILE.to_owned()).chain(run),
    )
}

/// `sh -c SCRIPT sh ARGS...`; ARGS arrive as positional parameters
fn shell(script: &str, args: impl IntoIterator<Item = String>) -> Vec<String> {
    ["sh", "-c", script, "sh"]
        .into_iter()
        .map(str::to_owned)
        .chain(args)
        .collect()
}

/// Command removing leftover files after a run
pub(crate) fn remove_files(files: &[&str]) -> Vec<String> {
    ["rm", "-f", "--"]
        .into_iter()
        .chain(files.iter().copied())
        .map(str::to_owned)
        .collect()
}

//! Scripted in-memory container engine for tests
//!
//! Containers are file maps. Exec understands the commands coderunner issues
//! (file writes, the input redirect, `rm -f`) plus two stand-in toolchains:
//! `fakecc SRC -o OUT` "compiles" by copying (failing on `syntax error`), and
//! `fakerun PROGRAM` / `./OUT` interpret a tiny line language:
//!
//! ```text
//! print TEXT     eprint TEXT     sleep MS     spam BYTES
//! touch FILE     exists FILE     cat-stdin    exit CODE     hang
//! ```
//!
//! Removing a container kills every exec still running inside it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use crate::config::Config;
use crate::engine::{
    ContainerEngine, ContainerSpec, ContainerStatus, EngineError, ExecEvent, ExecSender, ExecSpec,
    ExecStream,
};
use crate::runner::plan::{INPUT_REDIRECT_SCRIPT, WRITE_FILE_SCRIPT};

/// Config with one interpreted (`script`) and one compiled (`compiled`) language
pub(crate) const TEST_CONFIG: &str = r#"
acquire_timeout = 2.0
start_timeout = 1.0

[languages.script]
name = "Script"
image = "code-runner-script"

[languages.script.run]
command = ["fakerun", "{code}"]

[languages.compiled]
name = "Compiled"
image = "code-runner-compiled"

[languages.compiled.compile]
command = ["fakecc", "{source}", "-o", "{output}"]
source_name = "main.src"
output_name = "main"

[languages.compiled.run]
command = ["./{binary}"]
"#;

pub(crate) fn test_config() -> Config {
    Config::parse_toml(TEST_CONFIG).expect("test config should parse")
}

type Files = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// Engine calls observed so far
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Counts {
    pub builds: usize,
    pub creates: usize,
    pub starts: usize,
    pub removes: usize,
    pub execs: usize,
}

#[derive(Debug)]
struct FakeContainer {
    id: String,
    running: bool,
    files: Files,
    /// Dropped on removal, which ends every exec holding a receiver
    _alive: watch::Sender<()>,
    alive: watch::Receiver<()>,
}

#[derive(Debug, Default)]
struct FakeState {
    images: HashSet<String>,
    containers: HashMap<String, FakeContainer>,
    next_id: u64,
    counts: Counts,
    built_contexts: Vec<PathBuf>,
    execs: Vec<ExecSpec>,
    fail_builds: bool,
    never_running: bool,
    build_delay: Duration,
    compile_delay: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct FakeEngine {
    state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(self, image: &str) -> Self {
        self.lock().images.insert(image.to_string());
        self
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_builds(&self, fail: bool) {
        self.lock().fail_builds = fail;
    }

    /// Started containers never report a running state
    pub fn never_running(&self, never: bool) {
        self.lock().never_running = never;
    }

    pub fn slow_builds(&self, delay: Duration) {
        self.lock().build_delay = delay;
    }

    pub fn slow_compiles(&self, delay: Duration) {
        self.lock().compile_delay = delay;
    }

    pub fn counts(&self) -> Counts {
        self.lock().counts
    }

    pub fn built_contexts(&self) -> Vec<PathBuf> {
        self.lock().built_contexts.clone()
    }

    /// Every exec issued, in order
    pub fn execs(&self) -> Vec<ExecSpec> {
        self.lock().execs.clone()
    }

    pub fn container(&self, name: &str) -> Option<ContainerStatus> {
        self.lock().containers.get(name).map(|c| ContainerStatus {
            id: c.id.clone(),
            running: c.running,
        })
    }

    /// Contents of a file inside a container
    pub fn file(&self, container: &str, file: &str) -> Option<Vec<u8>> {
        let state = self.lock();
        let files = state
            .containers
            .get(container)?
            .files
            .lock()
            .ok()?
            .get(file)
            .cloned();
        files
    }

    /// Remove a container behind the registry's back
    pub fn remove_externally(&self, name: &str) {
        self.lock().containers.remove(name);
    }
}

impl ContainerEngine for FakeEngine {
    async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
        Ok(self.lock().images.contains(image))
    }

    async fn build_image(&self, image: &str, context: &Path) -> Result<(), EngineError> {
        let delay = self.lock().build_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        state.counts.builds += 1;
        state.built_contexts.push(context.to_path_buf());
        if state.fail_builds {
            return Err(EngineError::BuildFailed {
                image: image.to_string(),
                message: "#5 ERROR: build failed: exit code 1".to_string(),
            });
        }
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.counts.removes += 1;
        state.containers.remove(name);
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let mut state = self.lock();
        state.counts.creates += 1;
        if state.containers.contains_key(&spec.name) {
            return Err(EngineError::CommandFailed(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        if !state.images.contains(&spec.image) {
            return Err(EngineError::CommandFailed(format!(
                "No such image: {}",
                spec.image
            )));
        }

        state.next_id += 1;
        let id = format!("fake{:04}", state.next_id);
        let (alive_tx, alive_rx) = watch::channel(());
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                id: id.clone(),
                running: false,
                files: Files::default(),
                _alive: alive_tx,
                alive: alive_rx,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.counts.starts += 1;
        let running = !state.never_running;
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| EngineError::ContainerNotFound(name.to_string()))?;
        container.running = running;
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerStatus>, EngineError> {
        Ok(self.container(name))
    }

    async fn exec(&self, spec: ExecSpec) -> Result<ExecStream, EngineError> {
        let (files, alive, compile_delay) = {
            let mut state = self.lock();
            state.counts.execs += 1;
            state.execs.push(spec.clone());
            let container = state
                .containers
                .get(&spec.container)
                .ok_or_else(|| EngineError::ContainerNotFound(spec.container.clone()))?;
            if !container.running {
                return Err(EngineError::CommandFailed(format!(
                    "container {} is not running",
                    spec.container
                )));
            }
            (
                Arc::clone(&container.files),
                container.alive.clone(),
                state.compile_delay,
            )
        };

        let (tx, stream) = ExecStream::channel(16);
        let exec = Exec { files, alive, tx };
        tokio::spawn(run_exec(spec, exec, compile_delay));
        Ok(stream)
    }
}

fn read_file(files: &Files, name: &str) -> Option<Vec<u8>> {
    files
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
}

fn write_file(files: &Files, name: &str, contents: Vec<u8>) {
    files
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name.to_string(), contents);
}

struct Exec {
    files: Files,
    alive: watch::Receiver<()>,
    tx: ExecSender,
}

impl Exec {
    /// Send an event; `false` once the consumer has gone away
    async fn emit(&self, event: ExecEvent) -> bool {
        self.tx.send(Ok(event)).await.is_ok()
    }

    async fn fail(&self, message: &str, code: i32) {
        if self.emit(ExecEvent::Stderr(format!("{message}\n").into_bytes())).await {
            self.emit(ExecEvent::Exited(Some(code))).await;
        }
    }

    /// Resolves when the container is removed
    async fn killed(&mut self) {
        while self.alive.changed().await.is_ok() {}
    }
}

async fn run_exec(spec: ExecSpec, mut exec: Exec, compile_delay: Duration) {
    let mut argv = spec.command;
    let mut stdin = spec.stdin.unwrap_or_default();

    let redirect = ["sh", "-c", INPUT_REDIRECT_SCRIPT, "sh"];
    if argv.len() > 5 && argv.iter().zip(redirect).all(|(a, b)| a == b) {
        stdin = read_file(&exec.files, &argv[4]).unwrap_or_default();
        argv.drain(..5);
    }

    match argv.first().map(String::as_str) {
        Some("sh") if argv.len() == 5 && argv[2] == WRITE_FILE_SCRIPT => {
            write_file(&exec.files, &argv[4], stdin);
            exec.emit(ExecEvent::Exited(Some(0))).await;
        }
        Some("fakecc") if argv.len() == 4 => {
            if !compile_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(compile_delay) => {}
                    _ = exec.killed() => return,
                }
            }
            let Some(source) = read_file(&exec.files, &argv[1]) else {
                exec.fail(&format!("fakecc: {}: no such file", argv[1]), 1).await;
                return;
            };
            if String::from_utf8_lossy(&source).contains("syntax error") {
                exec.fail(&format!("{}:1: error: syntax error", argv[1]), 1).await;
                return;
            }
            write_file(&exec.files, &argv[3], source);
            exec.emit(ExecEvent::Exited(Some(0))).await;
        }
        Some("fakerun") if argv.len() == 2 => {
            let program = argv[1].clone();
            interpret(&mut exec, &program, &stdin).await;
        }
        Some(path) if path.starts_with("./") => match read_file(&exec.files, &path[2..]) {
            Some(binary) => {
                let program = String::from_utf8_lossy(&binary).into_owned();
                interpret(&mut exec, &program, &stdin).await;
            }
            None => exec.fail(&format!("sh: {path}: not found"), 127).await,
        },
        Some("rm") => {
            {
                let mut files = exec.files.lock().unwrap_or_else(PoisonError::into_inner);
                for name in argv.iter().skip(1).filter(|a| !a.starts_with('-')) {
                    files.remove(name);
                }
            }
            exec.emit(ExecEvent::Exited(Some(0))).await;
        }
        other => {
            exec.fail(&format!("{}: command not found", other.unwrap_or("")), 127)
                .await
        }
    }
}

async fn interpret(exec: &mut Exec, program: &str, stdin: &[u8]) {
    for line in program.lines() {
        let line = line.trim();
        let (op, arg) = line.split_once(' ').unwrap_or((line, ""));
        let sent = match op {
            "" => true,
            "print" => exec.emit(ExecEvent::Stdout(format!("{arg}\n").into_bytes())).await,
            "eprint" => exec.emit(ExecEvent::Stderr(format!("{arg}\n").into_bytes())).await,
            "sleep" => {
                let ms = arg.parse().unwrap_or(0);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => true,
                    _ = exec.killed() => return,
                }
            }
            "spam" => {
                let mut remaining: usize = arg.parse().unwrap_or(0);
                let mut sent = true;
                while remaining > 0 && sent {
                    let n = remaining.min(1000);
                    sent = exec.emit(ExecEvent::Stdout(vec![b'x'; n])).await;
                    remaining -= n;
                }
                sent
            }
            "touch" => {
                write_file(&exec.files, arg, Vec::new());
                true
            }
            "exists" => {
                let answer = if read_file(&exec.files, arg).is_some() {
                    "yes"
                } else {
                    "no"
                };
                exec.emit(ExecEvent::Stdout(format!("{answer}\n").into_bytes())).await
            }
            "cat-stdin" => exec.emit(ExecEvent::Stdout(stdin.to_vec())).await,
            "exit" => {
                exec.emit(ExecEvent::Exited(Some(arg.parse().unwrap_or(1)))).await;
                return;
            }
            "hang" => {
                exec.killed().await;
                return;
            }
            unknown => {
                exec.fail(&format!("unknown instruction: {unknown}"), 2).await;
                return;
            }
        };
        if !sent {
            return;
        }
    }
    exec.emit(ExecEvent::Exited(Some(0))).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn started(engine: &FakeEngine, name: &str) {
        let spec = ContainerSpec::sandbox(name, "code-runner-script", "/app");
        engine.create_container(&spec).await.unwrap();
        engine.start_container(name).await.unwrap();
    }

    #[tokio::test]
    async fn interprets_programs() {
        let engine = FakeEngine::new().with_image("code-runner-script");
        started(&engine, "box").await;

        let spec = ExecSpec::new("box", vec!["fakerun".into(), "print a\neprint b\nexit 3".into()]);
        let output = engine.exec(spec).await.unwrap().collect().await.unwrap();
        assert_eq!(output.stdout, b"a\n");
        assert_eq!(output.stderr, b"b\n");
        assert_eq!(output.exit_code, Some(3));
    }

    #[tokio::test]
    async fn removal_ends_hung_exec() {
        let engine = FakeEngine::new().with_image("code-runner-script");
        started(&engine, "box").await;

        let spec = ExecSpec::new("box", vec!["fakerun".into(), "print up\nhang".into()]);
        let mut stream = engine.exec(spec).await.unwrap();
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            ExecEvent::Stdout(b"up\n".to_vec())
        );

        engine.remove_container("box").await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn exec_in_missing_container_fails() {
        let engine = FakeEngine::new();
        let result = engine.exec(ExecSpec::new("ghost", vec!["true".into()])).await;
        assert!(matches!(result, Err(EngineError::ContainerNotFound(_))));
    }
}

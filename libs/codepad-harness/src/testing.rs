// In-memory environment for deterministic tests
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::environment::{
    Environment, EnvironmentHandle, OutputChunk, ProcessControl, ProcessHandle, CHUNK_BUFFER,
};
use crate::error::{HarnessError, HarnessResult};

/// One scripted action of a fake process
#[derive(Debug, Clone)]
pub enum Step {
    Stdout(String),
    Stderr(String),
    Sleep(Duration),
    /// Exit with the given code
    Exit(i64),
    /// Run until killed
    Hang,
}

#[derive(Debug, Default)]
pub struct Probe {
    pub kills: AtomicUsize,
    /// A kill arrived while the process was still running
    pub killed: AtomicBool,
    exited: AtomicBool,
}

struct FakeControl {
    kill: CancellationToken,
    probe: Arc<Probe>,
}

#[async_trait]
impl ProcessControl for FakeControl {
    async fn kill(&self) -> HarnessResult<()> {
        self.probe.kills.fetch_add(1, Ordering::SeqCst);
        if !self.probe.exited.load(Ordering::SeqCst) {
            self.probe.killed.store(true, Ordering::SeqCst);
        }
        self.kill.cancel();
        Ok(())
    }
}

pub struct FakeProcess {
    steps: Vec<Step>,
}

impl FakeProcess {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn spawn(self) -> (ProcessHandle, Arc<Probe>) {
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_BUFFER);
        let (exit_tx, exit_rx) = oneshot::channel();
        let kill = CancellationToken::new();
        let probe = Arc::new(Probe::default());

        let token = kill.clone();
        let task_probe = probe.clone();
        tokio::spawn(async move {
            let mut code = 0;
            for step in self.steps {
                match step {
                    Step::Stdout(text) => {
                        let _ = chunk_tx.send(Ok(OutputChunk::stdout(text))).await;
                    }
                    Step::Stderr(text) => {
                        let _ = chunk_tx.send(Ok(OutputChunk::stderr(text))).await;
                    }
                    Step::Sleep(duration) => {
                        tokio::select! {
                            _ = tokio::time::sleep(duration) => {}
                            _ = token.cancelled() => { code = -1; break; }
                        }
                    }
                    Step::Exit(exit_code) => {
                        code = exit_code;
                        break;
                    }
                    Step::Hang => {
                        token.cancelled().await;
                        code = -1;
                        break;
                    }
                }
            }
            drop(chunk_tx);
            task_probe.exited.store(true, Ordering::SeqCst);
            let _ = exit_tx.send(Ok(code));
        });

        let control = FakeControl { kill, probe: probe.clone() };
        (ProcessHandle::new(chunk_rx, exit_rx, Box::new(control)), probe)
    }
}

pub type Behavior = dyn Fn(&str, &[String], &HashMap<String, String>) -> Vec<Step> + Send + Sync;

/// Environment whose processes follow a scripted behavior
pub struct ScriptedEnvironment {
    behavior: Arc<Behavior>,
    files: Mutex<HashMap<String, String>>,
    pub boots: AtomicUsize,
    pub teardowns: AtomicUsize,
    pub spawns: AtomicUsize,
    /// Number of upcoming boots that fail
    pub failing_boots: AtomicUsize,
    pub boot_delay: Duration,
}

impl ScriptedEnvironment {
    pub fn new<F>(behavior: F) -> Self
    where
        F: Fn(&str, &[String], &HashMap<String, String>) -> Vec<Step> + Send + Sync + 'static,
    {
        Self {
            behavior: Arc::new(behavior),
            files: Mutex::new(HashMap::new()),
            boots: AtomicUsize::new(0),
            teardowns: AtomicUsize::new(0),
            spawns: AtomicUsize::new(0),
            failing_boots: AtomicUsize::new(0),
            boot_delay: Duration::ZERO,
        }
    }

    pub fn with_boot_delay(mut self, delay: Duration) -> Self {
        self.boot_delay = delay;
        self
    }

    pub fn file(&self, name: &str) -> Option<String> {
        self.files.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl Environment for ScriptedEnvironment {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn boot(&self) -> HarnessResult<EnvironmentHandle> {
        if !self.boot_delay.is_zero() {
            tokio::time::sleep(self.boot_delay).await;
        }
        let n = self.boots.fetch_add(1, Ordering::SeqCst);

        let failing = self.failing_boots.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_boots.store(failing - 1, Ordering::SeqCst);
            return Err(HarnessError::Provision("scripted boot failure".to_string()));
        }

        Ok(EnvironmentHandle {
            id: format!("scripted-{}", n),
            workdir: "/scripted".to_string(),
        })
    }

    async fn mount(&self, _handle: &EnvironmentHandle, filename: &str, contents: &str) -> HarnessResult<()> {
        crate::environment::check_file_name(filename)?;
        self.files
            .lock()
            .unwrap()
            .insert(filename.to_string(), contents.to_string());
        Ok(())
    }

    async fn spawn(
        &self,
        _handle: &EnvironmentHandle,
        command: &str,
        args: &[String],
    ) -> HarnessResult<ProcessHandle> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        let files = self.files.lock().unwrap().clone();
        let steps = (self.behavior)(command, args, &files);
        let (process, _probe) = FakeProcess::new(steps).spawn();
        Ok(process)
    }

    async fn teardown(&self, _handle: &EnvironmentHandle) -> HarnessResult<()> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Extracts the argument literals the composed Python trailer binds
pub fn python_args(script: &str) -> Vec<String> {
    let binding = format!("{} = [", crate::script::ARGS_NAME);
    let mut lines = script.lines().skip_while(|l| !l.starts_with(&binding));
    lines.next();
    lines
        .take_while(|l| l.trim() != "]")
        .map(|l| l.trim().trim_end_matches(',').to_string())
        .collect()
}

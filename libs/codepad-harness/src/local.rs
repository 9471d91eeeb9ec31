use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::environment::{
    check_file_name, ChunkSender, Environment, EnvironmentHandle, OutputChunk, OutputKind,
    ProcessControl, ProcessHandle, Utf8Decoder, CHUNK_BUFFER,
};
use crate::error::{HarnessError, HarnessResult};

/// Runs processes directly on the host inside a scratch directory.
///
/// Provides the same contract as the Docker backend but NO isolation: no
/// memory limit, no network policy, no filesystem jail. Use only for
/// development and tests.
pub struct LocalEnvironment {
    root: PathBuf,
}

impl LocalEnvironment {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root: root.unwrap_or_else(std::env::temp_dir),
        }
    }
}

/// Forward one pipe into the chunk channel until EOF
async fn pump<R>(mut reader: R, kind: OutputKind, tx: ChunkSender)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 4096];
    let mut decoder = Utf8Decoder::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.push(&buf[..n]);
                if text.is_empty() {
                    continue;
                }
                if tx.send(Ok(OutputChunk { kind, text })).await.is_err() {
                    // reader abandoned the stream
                    return;
                }
            }
            Err(e) => {
                if let Some(text) = decoder.finish() {
                    let _ = tx.send(Ok(OutputChunk { kind, text })).await;
                }
                let _ = tx.send(Err(HarnessError::Stream(e.to_string()))).await;
                return;
            }
        }
    }

    if let Some(text) = decoder.finish() {
        let _ = tx.send(Ok(OutputChunk { kind, text })).await;
    }
}

/// SIGKILL every process in the group led by `pid`
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    // ESRCH just means the whole group is already gone
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

struct LocalControl {
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
}

#[async_trait]
impl ProcessControl for LocalControl {
    async fn kill(&self) -> HarnessResult<()> {
        if let Some(tx) = self.kill_tx.lock().await.take() {
            // supervisor already gone means the process already exited
            let _ = tx.send(());
        }
        Ok(())
    }
}

#[async_trait]
impl Environment for LocalEnvironment {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn boot(&self) -> HarnessResult<EnvironmentHandle> {
        let id = format!("codepad-{}", uuid::Uuid::new_v4());
        let workdir = self.root.join(&id);

        tokio::fs::create_dir_all(&workdir)
            .await
            .map_err(|e| HarnessError::Provision(format!("cannot create {}: {}", workdir.display(), e)))?;

        debug!(workdir = %workdir.display(), "Local environment booted");

        Ok(EnvironmentHandle {
            id,
            workdir: workdir.to_string_lossy().into_owned(),
        })
    }

    async fn mount(&self, handle: &EnvironmentHandle, filename: &str, contents: &str) -> HarnessResult<()> {
        check_file_name(filename)?;

        let path = Path::new(&handle.workdir).join(filename);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| HarnessError::Mount {
                filename: filename.to_string(),
                reason: e.to_string(),
            })
    }

    async fn spawn(
        &self,
        handle: &EnvironmentHandle,
        command: &str,
        args: &[String],
    ) -> HarnessResult<ProcessHandle> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(&handle.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // own process group, so a kill also reaches anything the code forked
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| HarnessError::Spawn {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_BUFFER);
        let (exit_tx, exit_rx) = oneshot::channel();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, OutputKind::Stdout, chunk_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, OutputKind::Stderr, chunk_tx.clone()));
        }
        drop(chunk_tx);

        let command_name = command.to_string();
        let pid = child.id();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Some(pid) = pid {
                        kill_process_group(pid);
                    }
                    if let Err(e) = child.kill().await {
                        warn!(command = %command_name, error = %e, "Failed to kill process");
                    }
                    child.wait().await
                }
            };

            // descendants left behind would hold the pipes open and outlive the run
            if let Some(pid) = pid {
                kill_process_group(pid);
            }

            let code = status
                .map(|s| s.code().map(i64::from).unwrap_or(-1))
                .map_err(|e| HarnessError::Stream(e.to_string()));
            let _ = exit_tx.send(code);
        });

        Ok(ProcessHandle::new(
            chunk_rx,
            exit_rx,
            Box::new(LocalControl {
                kill_tx: Mutex::new(Some(kill_tx)),
            }),
        ))
    }

    async fn teardown(&self, handle: &EnvironmentHandle) -> HarnessResult<()> {
        match tokio::fs::remove_dir_all(&handle.workdir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HarnessError::Provision(format!(
                "cannot remove {}: {}",
                handle.workdir, e
            ))),
        }
    }
}

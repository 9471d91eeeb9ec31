/// Execution Environment - the isolated sandbox the harness runs code in
///
/// An environment hosts a small filesystem and spawns processes inside it.
/// Backends:
/// - `DockerEnvironment`: one long-lived container per boot (production)
/// - `LocalEnvironment`: a scratch directory on the host (development, tests)
///
/// The harness never talks to a backend directly; it goes through the
/// `Provisioner`, which owns the single booted handle.

use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

use crate::config::{Backend, HarnessConfig};
use crate::error::{HarnessError, HarnessResult};

/// Capacity of the chunk channel between a process and its reader
pub const CHUNK_BUFFER: usize = 256;

/// A booted environment. Cheap to clone, shared by every run of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentHandle {
    /// Container id or scratch directory name
    pub id: String,
    /// Directory scripts are mounted into and processes start in
    pub workdir: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub kind: OutputKind,
    pub text: String,
}

impl OutputChunk {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Stderr,
            text: text.into(),
        }
    }
}

pub type ChunkSender = mpsc::Sender<HarnessResult<OutputChunk>>;
pub type ExitSender = oneshot::Sender<HarnessResult<i64>>;

/// Output of one process, in emission order.
///
/// Ends when every producer has dropped its sender, i.e. when the process
/// has closed its pipes.
pub struct OutputStream {
    rx: mpsc::Receiver<HarnessResult<OutputChunk>>,
}

impl OutputStream {
    pub fn new(rx: mpsc::Receiver<HarnessResult<OutputChunk>>) -> Self {
        Self { rx }
    }

    /// A stream that is already over
    pub fn finished() -> Self {
        let (_tx, rx) = mpsc::channel(1);
        Self { rx }
    }
}

impl Stream for OutputStream {
    type Item = HarnessResult<OutputChunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Backend-specific way to stop a running process
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Must be idempotent: killing an exited process is not an error
    async fn kill(&self) -> HarnessResult<()>;
}

/// A spawned process, owned by whoever supervises it
pub struct ProcessHandle {
    output: Option<OutputStream>,
    exit: Option<oneshot::Receiver<HarnessResult<i64>>>,
    control: Box<dyn ProcessControl>,
}

impl ProcessHandle {
    pub fn new(
        output: mpsc::Receiver<HarnessResult<OutputChunk>>,
        exit: oneshot::Receiver<HarnessResult<i64>>,
        control: Box<dyn ProcessControl>,
    ) -> Self {
        Self {
            output: Some(OutputStream::new(output)),
            exit: Some(exit),
            control,
        }
    }

    /// Hand out the output stream. Later calls get an empty stream.
    pub fn output(&mut self) -> OutputStream {
        self.output.take().unwrap_or_else(OutputStream::finished)
    }

    /// Exit code of the process; `-1` when it was ended by a signal
    pub async fn wait(&mut self) -> HarnessResult<i64> {
        match self.exit.take() {
            Some(rx) => rx.await.unwrap_or_else(|_| {
                Err(HarnessError::Stream(
                    "process supervisor went away without an exit status".to_string(),
                ))
            }),
            None => Err(HarnessError::Stream("exit status already consumed".to_string())),
        }
    }

    pub async fn kill(&self) -> HarnessResult<()> {
        self.control.kill().await
    }
}

#[async_trait]
pub trait Environment: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    async fn boot(&self) -> HarnessResult<EnvironmentHandle>;

    /// Create or overwrite one file in the working directory
    async fn mount(&self, handle: &EnvironmentHandle, filename: &str, contents: &str) -> HarnessResult<()>;

    async fn spawn(
        &self,
        handle: &EnvironmentHandle,
        command: &str,
        args: &[String],
    ) -> HarnessResult<ProcessHandle>;

    /// Called once after setup commands succeeded, before any user code runs
    async fn seal(&self, _handle: &EnvironmentHandle) -> HarnessResult<()> {
        Ok(())
    }

    async fn teardown(&self, handle: &EnvironmentHandle) -> HarnessResult<()>;
}

/// Decodes process output that may split a multi-byte character across reads.
///
/// Only complete UTF-8 prefixes are emitted; an incomplete trailing sequence
/// waits for the next read. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is left at end of stream
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(rest)
    }
}

/// True for a single path component that cannot escape the working directory
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

pub(crate) fn check_file_name(filename: &str) -> HarnessResult<()> {
    if is_plain_file_name(filename) {
        Ok(())
    } else {
        Err(HarnessError::Mount {
            filename: filename.to_string(),
            reason: "file name must be a single path component".to_string(),
        })
    }
}

/// Build the backend selected by the configuration
pub fn create_environment(config: &HarnessConfig) -> anyhow::Result<Arc<dyn Environment>> {
    match config.backend {
        Backend::Docker => {
            tracing::info!(image = %config.docker.image, "Using Docker execution environment");
            let env = crate::docker::DockerEnvironment::connect(config.docker.clone())?;
            Ok(Arc::new(env))
        }
        Backend::Local => {
            tracing::warn!("Using local execution environment - NO isolation, trusted use only");
            Ok(Arc::new(crate::local::LocalEnvironment::new(config.local.root.clone())))
        }
    }
}

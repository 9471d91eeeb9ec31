/// Docker execution environment
///
/// **Lifecycle:**
/// 1. Boot: pull the image if missing, create one long-lived container
///    (`sleep infinity`) with memory/CPU limits, start it
/// 2. Setup commands run through `exec` (network still attached)
/// 3. Seal: detach the container from the bridge network when configured
/// 4. Mount: base64 round-trip through an `exec` into the working dir
/// 5. Spawn: `exec` under `setsid`, wrapped so the first stdout line is the
///    PID of the new session; `kill -9 -- -<pid>` takes down the whole group
/// 6. Teardown: force-remove the container

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::network::DisconnectNetworkOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::DockerConfig;
use crate::environment::{
    check_file_name, Environment, EnvironmentHandle, OutputChunk, ProcessControl, ProcessHandle,
    Utf8Decoder, CHUNK_BUFFER,
};
use crate::error::{HarnessError, HarnessResult};

/// Encoded scripts travel as one `sh -c` argument, which Linux caps at
/// 128 KiB (MAX_ARG_STRLEN)
const MAX_MOUNT_BYTES: usize = 96 * 1024;

/// Prints the shell PID, then replaces the shell with the real command
const PID_WRAPPER: &str = "echo $$; exec \"$@\"";

/// Shell command that writes `contents` to `filename` in the working dir
fn mount_command(filename: &str, contents: &str) -> HarnessResult<String> {
    let encoded = general_purpose::STANDARD.encode(contents);
    if encoded.len() > MAX_MOUNT_BYTES {
        return Err(HarnessError::Mount {
            filename: filename.to_string(),
            reason: format!(
                "file is too large ({} bytes, at most {} after encoding)",
                contents.len(),
                MAX_MOUNT_BYTES
            ),
        });
    }
    Ok(format!("echo '{}' | base64 -d > {}", encoded, filename))
}

/// Argument vector that runs `command` in its own session
fn wrapped_command(command: &str, args: &[String]) -> Vec<String> {
    let mut cmd = vec![
        "setsid".to_string(),
        "-w".to_string(),
        "sh".to_string(),
        "-c".to_string(),
        PID_WRAPPER.to_string(),
        "sh".to_string(),
        command.to_string(),
    ];
    cmd.extend(args.iter().cloned());
    cmd
}

fn memory_limit_bytes(config: &DockerConfig) -> i64 {
    (config.memory_limit_mb as i64) * 1024 * 1024
}

fn nano_cpus(config: &DockerConfig) -> i64 {
    (config.cpu_limit as f64 * 1_000_000_000.0) as i64
}

pub struct DockerEnvironment {
    docker: Docker,
    config: DockerConfig,
}

impl DockerEnvironment {
    pub fn connect(config: DockerConfig) -> anyhow::Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| anyhow::anyhow!("Failed to connect to Docker daemon: {}", e))?;
        Ok(Self { docker, config })
    }

    /// Pull the image when it is not cached locally
    async fn ensure_image(&self, image: &str) -> HarnessResult<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!("Image cache hit: {}", image);
            return Ok(());
        }

        warn!("Image cache miss: {} (pulling now)", image);

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| HarnessError::Provision(format!("failed to pull {}: {}", image, e)))?;
        }

        info!("Image pulled successfully: {}", image);
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<(), bollard::errors::Error> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker.remove_container(container_id, Some(options)).await
    }
}

/// Run a short command to completion and return (stdout, stderr, exit code)
async fn exec_collect(
    docker: &Docker,
    container_id: &str,
    cmd: Vec<String>,
    workdir: &str,
) -> Result<(String, String, Option<i64>), bollard::errors::Error> {
    let exec_config = CreateExecOptions {
        cmd: Some(cmd),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        working_dir: Some(workdir.to_string()),
        ..Default::default()
    };

    let exec = docker.create_exec(container_id, exec_config).await?;
    let start_config = StartExecOptions {
        detach: false,
        ..Default::default()
    };

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    if let StartExecResults::Attached { mut output, .. } = docker.start_exec(&exec.id, Some(start_config)).await? {
        while let Some(msg) = output.next().await {
            match msg? {
                LogOutput::StdOut { message } => stdout.extend_from_slice(&message),
                LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                _ => {}
            }
        }
    }

    let stdout = String::from_utf8_lossy(&stdout).into_owned();
    let stderr = String::from_utf8_lossy(&stderr).into_owned();
    let exit_code = wait_exec_exit(docker, &exec.id).await?;
    Ok((stdout, stderr, exit_code))
}

/// The exec may still be flagged running for a moment after its streams close
async fn wait_exec_exit(docker: &Docker, exec_id: &str) -> Result<Option<i64>, bollard::errors::Error> {
    for _ in 0..20 {
        let inspect = docker.inspect_exec(exec_id).await?;
        if inspect.running != Some(true) {
            return Ok(inspect.exit_code);
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    Ok(docker.inspect_exec(exec_id).await?.exit_code)
}

#[derive(Debug, Default)]
struct LatchState {
    pid: Option<i64>,
    requested: bool,
}

/// Pairs the PID reported by the wrapper with kill requests that may
/// arrive before it
#[derive(Debug, Default)]
struct KillLatch {
    state: Mutex<LatchState>,
}

impl KillLatch {
    /// Record a kill request. Returns the PID when it is already known;
    /// otherwise the forwarder kills as soon as the PID shows up.
    fn request(&self) -> Option<i64> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.requested = true;
        state.pid
    }

    /// Record the PID. Returns true when a kill is already pending.
    fn report(&self, pid: i64) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.pid = Some(pid);
        state.requested
    }
}

/// SIGKILL the process group led by `pid`
async fn kill_group(docker: &Docker, container_id: &str, pid: i64) -> HarnessResult<()> {
    let cmd = vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("kill -9 -- -{}", pid),
    ];
    match exec_collect(docker, container_id, cmd, "/").await {
        Ok((_, stderr, code)) => {
            // nonzero usually means the group exited on its own meanwhile
            if code != Some(0) {
                debug!(pid, stderr = %stderr.trim(), "kill reported nonzero status");
            }
            Ok(())
        }
        Err(e) => Err(HarnessError::Stream(format!("failed to kill pid {}: {}", pid, e))),
    }
}

struct DockerControl {
    docker: Docker,
    container_id: String,
    latch: Arc<KillLatch>,
    exited: Arc<AtomicBool>,
}

#[async_trait]
impl ProcessControl for DockerControl {
    async fn kill(&self) -> HarnessResult<()> {
        if self.exited.load(Ordering::SeqCst) {
            return Ok(());
        }

        match self.latch.request() {
            Some(pid) => kill_group(&self.docker, &self.container_id, pid).await,
            None => {
                debug!(container = %self.container_id, "PID not reported yet, kill deferred");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Environment for DockerEnvironment {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn boot(&self) -> HarnessResult<EnvironmentHandle> {
        let image = self.config.image.clone();
        self.ensure_image(&image).await?;

        let container_name = format!("codepad-{}", uuid::Uuid::new_v4());
        let config = Config {
            image: Some(image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            entrypoint: Some(vec![]),
            working_dir: Some(self.config.workdir.clone()),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(memory_limit_bytes(&self.config)),
                nano_cpus: Some(nano_cpus(&self.config)),
                // reaps the processes a kill leaves behind
                init: Some(true),
                readonly_rootfs: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| HarnessError::Provision(format!("failed to create container: {}", e)))?;

        if let Err(e) = self
            .docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
        {
            if let Err(remove_err) = self.remove(&container.id).await {
                warn!(container = %container.id, error = %remove_err, "Failed to remove unstarted container");
            }
            return Err(HarnessError::Provision(format!("failed to start container: {}", e)));
        }

        info!(container = %container.id, image = %image, "Container started");

        Ok(EnvironmentHandle {
            id: container.id,
            workdir: self.config.workdir.clone(),
        })
    }

    async fn seal(&self, handle: &EnvironmentHandle) -> HarnessResult<()> {
        if !self.config.network_disabled {
            return Ok(());
        }

        let options = DisconnectNetworkOptions {
            container: handle.id.as_str(),
            force: true,
        };
        self.docker
            .disconnect_network("bridge", options)
            .await
            .map_err(|e| HarnessError::Provision(format!("failed to disable network: {}", e)))?;

        info!(container = %handle.id, "Container network disabled");
        Ok(())
    }

    async fn mount(&self, handle: &EnvironmentHandle, filename: &str, contents: &str) -> HarnessResult<()> {
        check_file_name(filename)?;
        let write_command = mount_command(filename, contents)?;
        let cmd = vec!["sh".to_string(), "-c".to_string(), write_command];

        let (_, stderr, code) = exec_collect(&self.docker, &handle.id, cmd, &handle.workdir)
            .await
            .map_err(|e| HarnessError::Mount {
                filename: filename.to_string(),
                reason: e.to_string(),
            })?;

        if code != Some(0) {
            return Err(HarnessError::Mount {
                filename: filename.to_string(),
                reason: format!("write exited with {:?}: {}", code, stderr.trim()),
            });
        }

        Ok(())
    }

    async fn spawn(
        &self,
        handle: &EnvironmentHandle,
        command: &str,
        args: &[String],
    ) -> HarnessResult<ProcessHandle> {
        let spawn_err = |reason: String| HarnessError::Spawn {
            command: command.to_string(),
            reason,
        };

        let exec_config = CreateExecOptions {
            cmd: Some(wrapped_command(command, args)),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(handle.workdir.clone()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&handle.id, exec_config)
            .await
            .map_err(|e| spawn_err(e.to_string()))?;

        let start_config = StartExecOptions {
            detach: false,
            ..Default::default()
        };

        let mut output = match self
            .docker
            .start_exec(&exec.id, Some(start_config))
            .await
            .map_err(|e| spawn_err(e.to_string()))?
        {
            StartExecResults::Attached { output, .. } => output,
            StartExecResults::Detached => return Err(spawn_err("exec started detached".to_string())),
        };

        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_BUFFER);
        let (exit_tx, exit_rx) = oneshot::channel();
        let latch = Arc::new(KillLatch::default());
        let exited = Arc::new(AtomicBool::new(false));

        let docker = self.docker.clone();
        let container_id = handle.id.clone();
        let exec_id = exec.id.clone();
        let task_latch = latch.clone();
        let task_exited = exited.clone();

        tokio::spawn(async move {
            // stdout seen before the PID line is complete
            let mut preamble: Option<String> = Some(String::new());
            let mut stdout = Utf8Decoder::new();
            let mut stderr = Utf8Decoder::new();

            while let Some(msg) = output.next().await {
                let chunk = match msg {
                    Ok(LogOutput::StdOut { message }) => {
                        let text = stdout.push(&message);
                        match preamble.as_mut() {
                            Some(pending) => {
                                pending.push_str(&text);
                                let Some(idx) = pending.find('\n') else {
                                    continue;
                                };
                                let rest = pending.split_off(idx + 1);
                                if let Ok(pid) = pending.trim().parse::<i64>() {
                                    if task_latch.report(pid) {
                                        if let Err(e) = kill_group(&docker, &container_id, pid).await {
                                            warn!(pid, error = %e, "Deferred kill failed");
                                        }
                                    }
                                }
                                preamble = None;
                                if rest.is_empty() {
                                    continue;
                                }
                                Ok(OutputChunk::stdout(rest))
                            }
                            None if text.is_empty() => continue,
                            None => Ok(OutputChunk::stdout(text)),
                        }
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        let text = stderr.push(&message);
                        if text.is_empty() {
                            continue;
                        }
                        Ok(OutputChunk::stderr(text))
                    }
                    Ok(_) => continue,
                    Err(e) => Err(HarnessError::Stream(e.to_string())),
                };

                let failed = chunk.is_err();
                if chunk_tx.send(chunk).await.is_err() || failed {
                    break;
                }
            }

            if let Some(text) = stdout.finish() {
                let _ = chunk_tx.send(Ok(OutputChunk::stdout(text))).await;
            }
            if let Some(text) = stderr.finish() {
                let _ = chunk_tx.send(Ok(OutputChunk::stderr(text))).await;
            }
            drop(chunk_tx);

            let code = wait_exec_exit(&docker, &exec_id)
                .await
                .map(|code| code.unwrap_or(-1))
                .map_err(|e| HarnessError::Stream(e.to_string()));
            task_exited.store(true, Ordering::SeqCst);
            let _ = exit_tx.send(code);
        });

        let control = DockerControl {
            docker: self.docker.clone(),
            container_id: handle.id.clone(),
            latch,
            exited,
        };

        Ok(ProcessHandle::new(chunk_rx, exit_rx, Box::new(control)))
    }

    async fn teardown(&self, handle: &EnvironmentHandle) -> HarnessResult<()> {
        self.remove(&handle.id)
            .await
            .map_err(|e| HarnessError::Provision(format!("failed to remove container {}: {}", handle.id, e)))?;
        info!(container = %handle.id, "Container removed");
        Ok(())
    }
}

/// Environment Provisioner
///
/// Owns the one environment a session runs in:
/// - `ensure()` boots it on first use and runs setup commands once
/// - concurrent callers wait on the same boot (the slot lock is held across
///   boot + setup), so an environment is never booted twice
/// - memoized by slot occupancy, not by re-checking liveness
/// - a failed boot or setup leaves the slot empty so the next call retries
/// - `teardown()` releases the environment; the next `ensure()` reboots

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::environment::{Environment, EnvironmentHandle};
use crate::error::{HarnessError, HarnessResult};
use crate::supervisor::run_with_timeout;

/// Upper bound for a single setup command (package installs can be slow)
const SETUP_TIMEOUT: Duration = Duration::from_secs(600);

fn into_provision(e: HarnessError) -> HarnessError {
    match e {
        HarnessError::Provision(_) => e,
        other => HarnessError::Provision(other.to_string()),
    }
}

pub struct Provisioner {
    env: Arc<dyn Environment>,
    setup: Vec<Vec<String>>,
    slot: Mutex<Option<EnvironmentHandle>>,
}

impl Provisioner {
    pub fn new(env: Arc<dyn Environment>, setup: Vec<Vec<String>>) -> Self {
        Self {
            env,
            setup,
            slot: Mutex::new(None),
        }
    }

    pub fn environment(&self) -> &Arc<dyn Environment> {
        &self.env
    }

    pub async fn is_ready(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    #[tracing::instrument(skip(self), fields(backend = self.env.name()))]
    pub async fn ensure(&self) -> HarnessResult<EnvironmentHandle> {
        let mut slot = self.slot.lock().await;
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.clone());
        }

        let start = Instant::now();
        info!("Booting execution environment");

        let handle = self.env.boot().await.map_err(into_provision)?;

        let prepared = match self.run_setup(&handle).await {
            Ok(()) => self
                .env
                .seal(&handle)
                .await
                .map_err(into_provision),
            Err(e) => Err(e),
        };

        if let Err(e) = prepared {
            error!(environment = %handle.id, error = %e, "Environment setup failed");
            if let Err(teardown_err) = self.env.teardown(&handle).await {
                warn!(environment = %handle.id, error = %teardown_err, "Failed to release half-booted environment");
            }
            return Err(e);
        }

        info!(
            environment = %handle.id,
            boot_ms = start.elapsed().as_millis() as u64,
            "Execution environment ready"
        );

        *slot = Some(handle.clone());
        Ok(handle)
    }

    async fn run_setup(&self, handle: &EnvironmentHandle) -> HarnessResult<()> {
        let never = CancellationToken::new();

        for cmd in &self.setup {
            let Some((command, args)) = cmd.split_first() else {
                continue;
            };
            info!(command = %cmd.join(" "), "Running setup command");

            let process = self
                .env
                .spawn(handle, command, args)
                .await
                .map_err(into_provision)?;

            let completed = run_with_timeout(process, SETUP_TIMEOUT, &never)
                .await
                .map_err(|e| HarnessError::Provision(format!("`{}`: {}", cmd.join(" "), e)))?;

            if completed.exit_code != 0 {
                let detail = completed.output.error_summary().unwrap_or("no output").to_string();
                return Err(HarnessError::Provision(format!(
                    "`{}` exited with code {}: {}",
                    cmd.join(" "),
                    completed.exit_code,
                    detail
                )));
            }
        }

        Ok(())
    }

    /// Release the environment. A no-op when nothing is booted.
    pub async fn teardown(&self) -> HarnessResult<()> {
        let handle = self.slot.lock().await.take();
        match handle {
            Some(handle) => {
                info!(environment = %handle.id, "Tearing down execution environment");
                self.env.teardown(&handle).await
            }
            None => Ok(()),
        }
    }
}

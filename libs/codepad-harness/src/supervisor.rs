/// Timeout & Cancellation Controller
///
/// Races a process against a deadline and an external cancellation token.
/// - Process finishes first: its output and exit code are returned.
/// - Deadline first: the process is killed and `Timeout` is returned. Output
///   gathered before the kill is dropped; a timed-out run reports only the
///   timeout.
/// - Token first: the process is killed and `Cancelled` is returned.
///
/// A kill is issued on every path, including success. Killing an exited
/// process is a no-op for every backend.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::environment::ProcessHandle;
use crate::error::{HarnessError, HarnessResult};
use crate::reducer::{reduce, ReducedOutput};

/// A process that exited on its own before the deadline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed {
    pub output: ReducedOutput,
    pub exit_code: i64,
}

pub async fn run_with_timeout(
    mut process: ProcessHandle,
    timeout: Duration,
    cancel: &CancellationToken,
) -> HarnessResult<Completed> {
    let timeout_ms = timeout.as_millis() as u64;
    let output = process.output();

    let outcome = {
        let work = async {
            let output = reduce(output).await?;
            let exit_code = process.wait().await?;
            Ok::<_, HarnessError>(Completed { output, exit_code })
        };

        tokio::select! {
            result = work => result,
            _ = tokio::time::sleep(timeout) => {
                warn!(timeout_ms, "Execution timed out, killing process");
                Err(HarnessError::Timeout { timeout_ms })
            }
            _ = cancel.cancelled() => {
                debug!("Execution cancelled, killing process");
                Err(HarnessError::Cancelled)
            }
        }
    };

    if let Err(e) = process.kill().await {
        warn!(error = %e, "Failed to kill process during cleanup");
    }

    outcome
}

/// Await `fut` unless the token fires first
pub async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> HarnessResult<T>
where
    F: Future<Output = HarnessResult<T>>,
{
    if cancel.is_cancelled() {
        return Err(HarnessError::Cancelled);
    }

    tokio::select! {
        result = fut => result,
        _ = cancel.cancelled() => Err(HarnessError::Cancelled),
    }
}

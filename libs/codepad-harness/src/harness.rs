/// Harness - High-Level Orchestration
///
/// Glue between the provisioner, script composer, process supervisor and the
/// judge. Knows nothing about how a backend isolates code or how verdicts are
/// rendered.
///
/// Every run reuses the same script file in the one shared environment, so
/// runs are serialized by `run_lock`.

use codepad_common::problems::DEFAULT_FUNCTION_NAME;
use codepad_common::types::{ExecutionRequest, ExecutionResult, JudgeVerdict, Language, TestFixture};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::environment::{create_environment, Environment};
use crate::error::{HarnessError, HarnessResult};
use crate::judge::Judge;
use crate::provisioner::Provisioner;
use crate::script::compose;
use crate::supervisor::{cancellable, run_with_timeout, Completed};

pub struct Harness {
    provisioner: Provisioner,
    config: HarnessConfig,
    run_lock: Mutex<()>,
}

impl Harness {
    pub fn new(env: Arc<dyn Environment>, config: HarnessConfig) -> Self {
        let setup = config.setup_commands().to_vec();
        Self {
            provisioner: Provisioner::new(env, setup),
            config,
            run_lock: Mutex::new(()),
        }
    }

    /// Build the harness with the backend named in the configuration
    pub fn from_config(config: HarnessConfig) -> anyhow::Result<Self> {
        let env = create_environment(&config)?;
        Ok(Self::new(env, config))
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    pub fn languages(&self) -> Vec<Language> {
        self.config.list_languages()
    }

    /// Boot the environment ahead of the first run
    pub async fn warm_up(&self) -> HarnessResult<()> {
        self.provisioner.ensure().await.map(|_| ())
    }

    pub async fn is_ready(&self) -> bool {
        self.provisioner.is_ready().await
    }

    /// Release the environment; the next run boots a fresh one
    pub async fn shutdown(&self) -> HarnessResult<()> {
        self.provisioner.teardown().await
    }

    /// Run one request to completion.
    ///
    /// A nonzero exit becomes `HarnessError::Execution`; a run that outlives
    /// the timeout becomes `HarnessError::Timeout` with no output attached.
    #[tracing::instrument(skip(self, request, cancel), fields(language = %request.language))]
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> HarnessResult<Completed> {
        let language = self.config.language(&request.language)?;
        let function_name = request.function_name.as_deref().unwrap_or(DEFAULT_FUNCTION_NAME);
        let script = compose(
            request.language,
            &request.source_code,
            request.injected_input.as_deref(),
            function_name,
        )?;

        let _slot = cancellable(cancel, async { Ok::<_, HarnessError>(self.run_lock.lock().await) }).await?;

        if cancel.is_cancelled() {
            return Err(HarnessError::Cancelled);
        }
        let handle = self.provisioner.ensure().await?;
        let env = self.provisioner.environment();

        cancellable(cancel, env.mount(&handle, &language.file_name, &script)).await?;
        debug!(file = %language.file_name, bytes = script.len(), "Script mounted");

        let process = cancellable(
            cancel,
            env.spawn(&handle, &language.execution.command, &language.execution.args),
        )
        .await?;

        let completed = run_with_timeout(process, self.timeout(), cancel).await?;

        if completed.exit_code != 0 {
            let message = completed
                .output
                .error_summary()
                .unwrap_or("no error output")
                .to_string();
            return Err(HarnessError::Execution {
                code: completed.exit_code,
                message,
                output: completed.output.stdout,
            });
        }

        Ok(completed)
    }

    /// Ad-hoc run; every failure is folded into the returned record
    pub async fn run_once(&self, request: &ExecutionRequest) -> ExecutionResult {
        let start = Instant::now();
        let outcome = self.execute(request, &CancellationToken::new()).await;
        let result = to_execution_result(outcome, start.elapsed());

        if result.timed_out {
            warn!(language = %request.language, "Run timed out");
        } else if let Some(error) = &result.error_message {
            info!(language = %request.language, error = %error, "Run failed");
        } else {
            info!(
                language = %request.language,
                execution_ms = result.execution_time_ms,
                "Run completed"
            );
        }

        result
    }

    /// Graded submission over `fixtures`, in declaration order
    pub async fn run_suite(
        &self,
        language: Language,
        source_code: &str,
        function_name: &str,
        fixtures: &[TestFixture],
        cancel: &CancellationToken,
    ) -> JudgeVerdict {
        Judge::new(self)
            .run(language, source_code, function_name, fixtures, cancel)
            .await
    }
}

/// Fold a run outcome into the record shown to users
pub fn to_execution_result(outcome: HarnessResult<Completed>, elapsed: Duration) -> ExecutionResult {
    let execution_time_ms = elapsed.as_millis() as u64;
    match outcome {
        Ok(completed) => ExecutionResult {
            raw_output: completed.output.stdout,
            exit_code: Some(completed.exit_code),
            timed_out: false,
            error_message: None,
            execution_time_ms,
        },
        Err(e @ HarnessError::Timeout { .. }) => ExecutionResult {
            raw_output: String::new(),
            exit_code: None,
            timed_out: true,
            error_message: Some(e.to_string()),
            execution_time_ms,
        },
        Err(HarnessError::Execution { code, message, output }) => {
            let error_message = HarnessError::Execution {
                code,
                message,
                output: String::new(),
            }
            .to_string();
            ExecutionResult {
                raw_output: output,
                exit_code: Some(code),
                timed_out: false,
                error_message: Some(error_message),
                execution_time_ms,
            }
        }
        Err(e) => ExecutionResult {
            raw_output: String::new(),
            exit_code: None,
            timed_out: false,
            error_message: Some(e.to_string()),
            execution_time_ms,
        },
    }
}

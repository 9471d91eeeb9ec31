use thiserror::Error;

/// Failure classes of one harness run.
///
/// Callers decide how to surface these; the judge turns every variant into a
/// failed fixture row and keeps going.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HarnessError {
    #[error("failed to provision execution environment: {0}")]
    Provision(String),

    #[error("cannot compose script: {0}")]
    Compose(String),

    #[error("failed to mount {filename}: {reason}")]
    Mount { filename: String, reason: String },

    #[error("failed to spawn {command}: {reason}")]
    Spawn { command: String, reason: String },

    #[error("failed to read process output: {0}")]
    Stream(String),

    #[error("timed out after {timeout_ms}ms, possible infinite loop")]
    Timeout { timeout_ms: u64 },

    #[error("process exited with code {code}: {message}")]
    Execution {
        code: i64,
        message: String,
        /// stdout gathered before the failing exit
        output: String,
    },

    #[error("execution cancelled")]
    Cancelled,

    #[error("language {0} is not configured")]
    UnsupportedLanguage(String),
}

impl HarnessError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HarnessError::Timeout { .. })
    }

    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::Provision(_) => "provision",
            HarnessError::Compose(_) => "compose",
            HarnessError::Mount { .. } => "mount",
            HarnessError::Spawn { .. } => "spawn",
            HarnessError::Stream(_) => "stream",
            HarnessError::Timeout { .. } => "timeout",
            HarnessError::Execution { .. } => "execution",
            HarnessError::Cancelled => "cancelled",
            HarnessError::UnsupportedLanguage(_) => "unsupported_language",
        }
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Languages the harness knows how to compose and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
}

impl Language {
    pub fn all() -> [Language; 3] {
        [Language::Python, Language::JavaScript, Language::TypeScript]
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::JavaScript => write!(f, "javascript"),
            Language::TypeScript => write!(f, "typescript"),
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "javascript" | "js" => Ok(Language::JavaScript),
            "typescript" | "ts" => Ok(Language::TypeScript),
            other => Err(format!("unknown language: {}", other)),
        }
    }
}

/// One run of submitted code. Consumed once by the harness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub language: Language,
    pub source_code: String,
    /// Argument literal(s) injected into the script, one per line
    #[serde(default)]
    pub injected_input: Option<String>,
    /// Function invoked with the injected input, `solution` when unset
    #[serde(default)]
    pub function_name: Option<String>,
}

impl ExecutionRequest {
    pub fn new(language: Language, source_code: impl Into<String>) -> Self {
        Self {
            language,
            source_code: source_code.into(),
            injected_input: None,
            function_name: None,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>, function_name: Option<String>) -> Self {
        self.injected_input = Some(input.into());
        self.function_name = function_name;
        self
    }
}

/// Outcome of a single harness invocation, as shown to a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub raw_output: String,
    pub exit_code: Option<i64>,
    pub timed_out: bool,
    pub error_message: Option<String>,
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        !self.timed_out && self.error_message.is_none() && self.exit_code == Some(0)
    }
}

/// A graded (input, expected output) pair belonging to a problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFixture {
    pub input: String,
    #[serde(alias = "expected")]
    pub expected_output: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl TestFixture {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
            description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureResult {
    pub fixture: TestFixture,
    pub actual_last_line: String,
    pub passed: bool,
    pub timed_out: bool,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

/// Aggregated report for one submission. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub fixture_results: Vec<FixtureResult>,
    pub passed_count: usize,
    pub total_count: usize,
}

impl JudgeVerdict {
    pub fn from_results(fixture_results: Vec<FixtureResult>) -> Self {
        let passed_count = fixture_results.iter().filter(|r| r.passed).count();
        let total_count = fixture_results.len();
        Self {
            fixture_results,
            passed_count,
            total_count,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.passed_count == self.total_count
    }

    pub fn summary(&self) -> String {
        format!("Passed {}/{} tests.", self.passed_count, self.total_count)
    }
}

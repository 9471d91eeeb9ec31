/// Test-Case Judge
///
/// Runs every fixture of a submission, one at a time and in declaration
/// order, and reduces the outcomes into a `JudgeVerdict`.
///
/// **Comparison rule:** the last line of the trimmed stdout must equal the
/// fixture's expected output exactly. No case folding, no inner whitespace
/// normalization.
///
/// **Failure policy:** a timeout, crash or infrastructure error fails that
/// fixture only; judging continues with the next one.

use codepad_common::types::{ExecutionRequest, FixtureResult, JudgeVerdict, Language, TestFixture};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::harness::Harness;
use crate::reducer::last_line;
use crate::supervisor::Completed;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JudgeState {
    Idle,
    Running(usize),
    FixturePassed(usize),
    FixtureFailed(usize),
    FixtureTimedOut(usize),
    Summarized(JudgeVerdict),
}

/// Grade one fixture from its run outcome
pub fn evaluate_fixture(
    fixture: &TestFixture,
    outcome: HarnessResult<Completed>,
    elapsed: Duration,
) -> FixtureResult {
    let execution_time_ms = elapsed.as_millis() as u64;

    match outcome {
        Ok(completed) => {
            let actual = last_line(&completed.output.stdout).to_string();
            let passed = actual == fixture.expected_output;
            FixtureResult {
                fixture: fixture.clone(),
                actual_last_line: actual,
                passed,
                timed_out: false,
                error: None,
                execution_time_ms,
            }
        }
        Err(e) => {
            let actual_last_line = match &e {
                HarnessError::Execution { output, .. } => last_line(output).to_string(),
                _ => String::new(),
            };
            FixtureResult {
                fixture: fixture.clone(),
                actual_last_line,
                passed: false,
                timed_out: e.is_timeout(),
                error: Some(e.to_string()),
                execution_time_ms,
            }
        }
    }
}

pub struct Judge<'a> {
    harness: &'a Harness,
    state: JudgeState,
}

impl<'a> Judge<'a> {
    pub fn new(harness: &'a Harness) -> Self {
        Self {
            harness,
            state: JudgeState::Idle,
        }
    }

    pub fn state(&self) -> &JudgeState {
        &self.state
    }

    fn transition(&mut self, next: JudgeState) {
        debug!(from = ?self.state, to = ?next, "Judge transition");
        self.state = next;
    }

    #[tracing::instrument(
        skip(self, source_code, fixtures, cancel),
        fields(language = %language, fixtures = fixtures.len())
    )]
    pub async fn run(
        &mut self,
        language: Language,
        source_code: &str,
        function_name: &str,
        fixtures: &[TestFixture],
        cancel: &CancellationToken,
    ) -> JudgeVerdict {
        let mut results = Vec::with_capacity(fixtures.len());

        for (idx, fixture) in fixtures.iter().enumerate() {
            self.transition(JudgeState::Running(idx));

            let request = ExecutionRequest::new(language, source_code)
                .with_input(fixture.input.clone(), Some(function_name.to_string()));

            let start = Instant::now();
            let outcome = self.harness.execute(&request, cancel).await;
            if let Err(e) = &outcome {
                debug!(test = idx + 1, kind = e.kind(), "Run did not complete cleanly");
            }
            let result = evaluate_fixture(fixture, outcome, start.elapsed());

            if result.passed {
                info!(test = idx + 1, execution_ms = result.execution_time_ms, "Test passed");
                self.transition(JudgeState::FixturePassed(idx));
            } else if result.timed_out {
                warn!(test = idx + 1, "Test timed out, possible infinite loop");
                self.transition(JudgeState::FixtureTimedOut(idx));
            } else {
                match &result.error {
                    Some(error) => warn!(test = idx + 1, error = %error, "Test errored"),
                    None => info!(
                        test = idx + 1,
                        expected = %fixture.expected_output,
                        actual = %result.actual_last_line,
                        "Test failed"
                    ),
                }
                self.transition(JudgeState::FixtureFailed(idx));
            }

            results.push(result);
        }

        let verdict = JudgeVerdict::from_results(results);
        info!(
            passed = verdict.passed_count,
            total = verdict.total_count,
            "{}",
            verdict.summary()
        );

        self.transition(JudgeState::Summarized(verdict.clone()));
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use crate::reducer::ReducedOutput;
    use crate::testing::{python_args, ScriptedEnvironment, Step};
    use std::sync::Arc;
    use tokio::time::Instant as TokioInstant;

    fn completed(stdout: &str) -> HarnessResult<Completed> {
        Ok(Completed {
            output: ReducedOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
            exit_code: 0,
        })
    }

    /// Pretends to be `python3`: evaluates `solution(x) = x` for the bound
    /// argument, hangs on `while True`, raises on `raise`.
    fn python_like(script: &str) -> Vec<Step> {
        let arg = python_args(script).into_iter().next().unwrap_or_default();
        if script.contains("while True: pass") {
            return vec![Step::Hang];
        }
        if script.contains("raise") && arg == "2" {
            return vec![Step::Stderr("Traceback\nValueError: two\n".into()), Step::Exit(1)];
        }
        vec![
            Step::Stdout("debug line\n".into()),
            Step::Stdout(format!("{}\n", arg.trim_matches('"'))),
            Step::Exit(0),
        ]
    }

    fn config() -> HarnessConfig {
        let mut config = HarnessConfig::local();
        config.local.setup = Vec::new();
        config
    }

    fn harness() -> Harness {
        let env = Arc::new(ScriptedEnvironment::new(|_, _, files| {
            python_like(files.get("script.py").map(String::as_str).unwrap_or(""))
        }));
        Harness::new(env, config())
    }

    #[test]
    fn test_evaluate_exact_match() {
        let fixture = TestFixture::new("5", "5");
        let result = evaluate_fixture(&fixture, completed("noise\n5\n"), Duration::from_millis(4));
        assert!(result.passed);
        assert_eq!(result.actual_last_line, "5");
        assert_eq!(result.execution_time_ms, 4);
    }

    #[test]
    fn test_evaluate_is_case_and_space_sensitive() {
        let fixture = TestFixture::new("x", "[0,1]");
        assert!(!evaluate_fixture(&fixture, completed("[0, 1]\n"), Duration::ZERO).passed);

        let fixture = TestFixture::new("x", "Fizz");
        assert!(!evaluate_fixture(&fixture, completed("fizz\n"), Duration::ZERO).passed);
    }

    #[test]
    fn test_evaluate_timeout_never_passes() {
        // even when the expected output is empty
        let fixture = TestFixture::new("x", "");
        let result = evaluate_fixture(
            &fixture,
            Err(HarnessError::Timeout { timeout_ms: 15_000 }),
            Duration::from_secs(15),
        );
        assert!(!result.passed);
        assert!(result.timed_out);
        assert!(result.error.unwrap().contains("possible infinite loop"));
    }

    #[test]
    fn test_evaluate_execution_error_keeps_last_line() {
        let fixture = TestFixture::new("x", "1");
        let result = evaluate_fixture(
            &fixture,
            Err(HarnessError::Execution {
                code: 1,
                message: "boom".to_string(),
                output: "partial\n1\n".to_string(),
            }),
            Duration::ZERO,
        );
        assert!(!result.passed);
        assert!(!result.timed_out);
        assert_eq!(result.actual_last_line, "1");
    }

    #[tokio::test]
    async fn test_identity_solution_passes_all() {
        let harness = harness();
        let fixtures = vec![TestFixture::new("5", "5"), TestFixture::new("\"a\"", "a")];

        let mut judge = Judge::new(&harness);
        assert_eq!(judge.state(), &JudgeState::Idle);

        let verdict = judge
            .run(Language::Python, "def solution(x): return x", "solution", &fixtures, &CancellationToken::new())
            .await;

        assert_eq!(verdict.passed_count, 2);
        assert_eq!(verdict.total_count, 2);
        assert_eq!(verdict.summary(), "Passed 2/2 tests.");
        assert!(verdict.all_passed());
        assert_eq!(judge.state(), &JudgeState::Summarized(verdict));
    }

    #[tokio::test]
    async fn test_results_follow_declaration_order() {
        let harness = harness();
        let fixtures = vec![
            TestFixture::new("30", "30"),
            TestFixture::new("10", "10"),
            TestFixture::new("20", "wrong"),
        ];

        let verdict = harness
            .run_suite(Language::Python, "def solution(x): return x", "solution", &fixtures, &CancellationToken::new())
            .await;

        let actual: Vec<&str> = verdict
            .fixture_results
            .iter()
            .map(|r| r.actual_last_line.as_str())
            .collect();
        assert_eq!(actual, vec!["30", "10", "20"]);
        assert_eq!(verdict.fixture_results[2].fixture.expected_output, "wrong");
        assert_eq!(verdict.passed_count, 2);
    }

    #[tokio::test]
    async fn test_error_in_one_fixture_does_not_abort() {
        let harness = harness();
        let fixtures = vec![
            TestFixture::new("1", "1"),
            TestFixture::new("2", "2"),
            TestFixture::new("3", "3"),
        ];
        let source = "def solution(x):\n    if x == 2:\n        raise ValueError('two')\n    return x";

        let verdict = harness
            .run_suite(Language::Python, source, "solution", &fixtures, &CancellationToken::new())
            .await;

        assert_eq!(verdict.total_count, 3);
        assert_eq!(verdict.passed_count, 2);
        assert!(verdict.fixture_results[0].passed);
        assert!(!verdict.fixture_results[1].passed);
        assert!(verdict.fixture_results[1]
            .error
            .as_deref()
            .unwrap()
            .contains("ValueError: two"));
        assert!(verdict.fixture_results[2].passed);
        assert!(!verdict.all_passed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_infinite_loop_times_out_at_deadline() {
        let harness = harness();
        let fixtures = vec![TestFixture::new("1", "1")];

        let mut judge = Judge::new(&harness);
        let start = TokioInstant::now();
        let verdict = judge
            .run(Language::Python, "def solution(x):\n    while True: pass", "solution", &fixtures, &CancellationToken::new())
            .await;
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(15_000));
        assert!(elapsed < Duration::from_millis(16_000));
        assert!(verdict.fixture_results[0].timed_out);
        assert!(!verdict.fixture_results[0].passed);
        assert_eq!(verdict.passed_count, 0);
        assert_eq!(verdict.summary(), "Passed 0/1 tests.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_abort_batch() {
        let env = Arc::new(ScriptedEnvironment::new(|_, _, files| {
            let script = files.get("script.py").cloned().unwrap_or_default();
            match python_args(&script).first().map(String::as_str) {
                Some("1") => vec![Step::Hang],
                Some(arg) => vec![Step::Stdout(format!("{}\n", arg)), Step::Exit(0)],
                None => vec![Step::Exit(0)],
            }
        }));
        let harness = Harness::new(env, config());
        let fixtures = vec![TestFixture::new("1", "1"), TestFixture::new("2", "2")];

        let verdict = harness
            .run_suite(Language::Python, "", "solution", &fixtures, &CancellationToken::new())
            .await;

        assert!(verdict.fixture_results[0].timed_out);
        assert!(verdict.fixture_results[1].passed);
        assert_eq!(verdict.passed_count, 1);
    }

    #[tokio::test]
    async fn test_cancelled_suite_fails_remaining_fixtures() {
        let harness = harness();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let fixtures = vec![TestFixture::new("1", "1"), TestFixture::new("2", "2")];

        let verdict = harness
            .run_suite(Language::Python, "", "solution", &fixtures, &cancel)
            .await;

        assert_eq!(verdict.passed_count, 0);
        assert_eq!(verdict.total_count, 2);
        for result in &verdict.fixture_results {
            assert_eq!(result.error.as_deref(), Some("execution cancelled"));
        }
    }

    #[tokio::test]
    async fn test_repeated_judging_is_deterministic() {
        let harness = harness();
        let fixtures = vec![TestFixture::new("4", "4"), TestFixture::new("5", "6")];

        let first = harness
            .run_suite(Language::Python, "def solution(x): return x", "solution", &fixtures, &CancellationToken::new())
            .await;
        let second = harness
            .run_suite(Language::Python, "def solution(x): return x", "solution", &fixtures, &CancellationToken::new())
            .await;

        let passed = |v: &JudgeVerdict| v.fixture_results.iter().map(|r| r.passed).collect::<Vec<_>>();
        assert_eq!(passed(&first), passed(&second));
        assert_eq!(passed(&first), vec![true, false]);
    }

    #[tokio::test]
    async fn test_empty_fixture_list() {
        let harness = harness();
        let verdict = harness
            .run_suite(Language::Python, "", "solution", &[], &CancellationToken::new())
            .await;
        assert_eq!(verdict.total_count, 0);
        assert_eq!(verdict.summary(), "Passed 0/0 tests.");
    }

    fn python3_harness() -> Harness {
        let mut config = config();
        config.timeout_ms = 3_000;
        Harness::new(Arc::new(crate::local::LocalEnvironment::new(None)), config)
    }

    #[tokio::test]
    #[ignore] // Requires python3
    async fn test_python3_identity_and_two_sum() {
        let harness = python3_harness();

        let verdict = harness
            .run_suite(
                Language::Python,
                "def solution(x):\n    return x\n",
                "solution",
                &[TestFixture::new("5", "5"), TestFixture::new("\"a\"", "a")],
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(verdict.summary(), "Passed 2/2 tests.");

        let two_sum = "def two_sum_solution(nums, target):\n    seen = {}\n    for i, n in enumerate(nums):\n        if target - n in seen:\n            return str([seen[target - n], i]).replace(' ', '')\n        seen[n] = i\n";
        let verdict = harness
            .run_suite(
                Language::Python,
                two_sum,
                "two_sum_solution",
                &[TestFixture::new("[2,7,11,15]\n9", "[0,1]"), TestFixture::new("[3,3]\n6", "[0,1]")],
                &CancellationToken::new(),
            )
            .await;
        assert!(verdict.all_passed());

        harness.shutdown().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires python3
    async fn test_python3_infinite_loop_is_killed() {
        let harness = python3_harness();
        let fixtures = vec![TestFixture::new("1", "1"), TestFixture::new("2", "2")];
        let source = "def solution(x):\n    while x == 1:\n        pass\n    return x\n";

        let verdict = harness
            .run_suite(Language::Python, source, "solution", &fixtures, &CancellationToken::new())
            .await;

        assert!(verdict.fixture_results[0].timed_out);
        assert!(verdict.fixture_results[1].passed);
        harness.shutdown().await.unwrap();
    }
}

// HTTP route handlers for the Codepad API

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use codepad_common::problems::{ProblemFilter, DEFAULT_FUNCTION_NAME};
use codepad_common::types::{ExecutionRequest, JudgeVerdict, Language, TestFixture};
use codepad_harness::{to_execution_result, CancellationToken};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::metrics;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub language: Language,
    pub source_code: String,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub function_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProblemSubmission {
    pub language: Language,
    pub source_code: String,
}

#[derive(Debug, Deserialize)]
pub struct FixtureSubmission {
    pub language: Language,
    pub source_code: String,
    #[serde(default)]
    pub function_name: Option<String>,
    pub test_cases: Vec<TestFixture>,
}

#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    pub submission_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem_id: Option<u32>,
    pub summary: String,
    #[serde(flatten)]
    pub verdict: JudgeVerdict,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": message.into()
        })),
    )
        .into_response()
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /problems - List problems, newest first
pub async fn list_problems(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ProblemFilter>,
) -> impl IntoResponse {
    match state.problems.list(&filter).await {
        Ok(problems) => (StatusCode::OK, Json(problems)).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list problems");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to list problems: {}", e))
        }
    }
}

/// GET /problems/{id} - One problem with its test cases
pub async fn get_problem(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let problem_id = match id.parse::<u32>() {
        Ok(id) => id,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid problem ID format"),
    };

    match state.problems.get(problem_id).await {
        Ok(Some(problem)) => (StatusCode::OK, Json(problem)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Problem {} not found", problem_id)),
        Err(e) => {
            error!(problem_id, error = %e, "Failed to fetch problem");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to fetch problem: {}", e))
        }
    }
}

/// POST /run - Ad-hoc run of the editor contents
pub async fn run_code(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RunRequest>,
) -> impl IntoResponse {
    let mut request = ExecutionRequest::new(payload.language, payload.source_code);
    if let Some(input) = payload.input {
        request = request.with_input(input, payload.function_name);
    }

    // The run lives in its own task so a dropped connection cancels it
    // through the token instead of abandoning a live process.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let harness = state.harness.clone();
    let span = info_span!("run", run_id = %Uuid::new_v4(), language = %request.language);

    let task = tokio::spawn(
        async move {
            let start = Instant::now();
            let outcome = harness.execute(&request, &cancel).await;
            to_execution_result(outcome, start.elapsed())
        }
        .instrument(span),
    );

    match task.await {
        Ok(result) => {
            metrics::record_run(&result);
            info!(
                timed_out = result.timed_out,
                exit_code = ?result.exit_code,
                execution_ms = result.execution_time_ms,
                "Run finished"
            );
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(e) => {
            error!(error = %e, "Run task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Run failed unexpectedly")
        }
    }
}

async fn judge_detached(
    state: &AppState,
    problem_id: Option<u32>,
    language: Language,
    source_code: String,
    function_name: String,
    fixtures: Vec<TestFixture>,
) -> Response {
    let submission_id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let harness = state.harness.clone();
    let span = info_span!("submission", submission_id = %submission_id, problem_id = ?problem_id);

    info!(
        submission_id = %submission_id,
        language = %language,
        test_cases = fixtures.len(),
        "Submission received"
    );

    let task = tokio::spawn(
        async move {
            harness
                .run_suite(language, &source_code, &function_name, &fixtures, &cancel)
                .await
        }
        .instrument(span),
    );

    match task.await {
        Ok(verdict) => {
            metrics::record_verdict(&verdict);
            info!(
                submission_id = %submission_id,
                passed = verdict.passed_count,
                total = verdict.total_count,
                "Submission judged"
            );
            (
                StatusCode::OK,
                Json(SubmissionResponse {
                    submission_id: submission_id.to_string(),
                    problem_id,
                    summary: verdict.summary(),
                    verdict,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(submission_id = %submission_id, error = %e, "Judge task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Judging failed unexpectedly")
        }
    }
}

/// POST /problems/{id}/submit - Judge against a stored problem
pub async fn submit_problem(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<ProblemSubmission>,
) -> impl IntoResponse {
    let problem_id = match id.parse::<u32>() {
        Ok(id) => id,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid problem ID format"),
    };

    let problem = match state.problems.get(problem_id).await {
        Ok(Some(problem)) => problem,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, format!("Problem {} not found", problem_id))
        }
        Err(e) => {
            error!(problem_id, error = %e, "Failed to fetch problem");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to fetch problem: {}", e),
            );
        }
    };

    judge_detached(
        &state,
        Some(problem_id),
        payload.language,
        payload.source_code,
        problem.function_name,
        problem.test_cases,
    )
    .await
}

/// POST /submit - Judge against test cases supplied in the request
pub async fn submit_fixtures(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<FixtureSubmission>,
) -> impl IntoResponse {
    if payload.test_cases.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "At least one test case is required");
    }

    let function_name = payload
        .function_name
        .unwrap_or_else(|| DEFAULT_FUNCTION_NAME.to_string());

    judge_detached(
        &state,
        None,
        payload.language,
        payload.source_code,
        function_name,
        payload.test_cases,
    )
    .await
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use codepad_common::problems::FileProblemStore;
    use codepad_harness::config::LanguageExecution;
    use codepad_harness::local::LocalEnvironment;
    use codepad_harness::{Harness, HarnessConfig};
    use tower::ServiceExt;

    /// Python runs are replaced by a shell that always prints 5
    fn state() -> Arc<AppState> {
        let mut config = HarnessConfig::local();
        for lang in &mut config.languages {
            if lang.name == Language::Python {
                lang.execution = LanguageExecution {
                    command: "sh".to_string(),
                    args: vec!["-c".to_string(), "echo 5".to_string()],
                };
            }
        }
        let harness = Harness::new(Arc::new(LocalEnvironment::new(None)), config);

        let catalog = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../data/problems.json");
        let problems = FileProblemStore::load(&catalog).unwrap();

        Arc::new(AppState {
            harness: Arc::new(harness),
            problems: Arc::new(problems),
        })
    }

    async fn send(state: Arc<AppState>, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = crate::app(state).oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_get_problem_status_codes() {
        let (status, body) = send(state(), get("/problems/2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Two Sum");
        assert_eq!(body["function_name"], "two_sum_solution");

        let (status, _) = send(state(), get("/problems/abc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(state(), get("/problems/99")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Problem 99 not found");
    }

    #[tokio::test]
    async fn test_list_problems_filter() {
        let (status, body) = send(state(), get("/problems?difficulty=Medium&category=all")).await;
        assert_eq!(status, StatusCode::OK);
        let problems = body.as_array().unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0]["title"], "Reverse Linked List");

        let (_, body) = send(state(), get("/problems")).await;
        let titles: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["Reverse Linked List", "Two Sum", "FizzBuzz"]);
    }

    #[tokio::test]
    async fn test_run_returns_execution_result() {
        let state = state();
        let (status, body) = send(
            state.clone(),
            post("/run", serde_json::json!({"language": "python", "source_code": "print(5)"})),
        )
        .await;
        state.harness.shutdown().await.unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["raw_output"], "5\n");
        assert_eq!(body["exit_code"], 0);
        assert_eq!(body["timed_out"], false);
    }

    #[tokio::test]
    async fn test_run_unconfigured_language_is_folded() {
        let mut config = HarnessConfig::local();
        config.languages.retain(|l| l.name == Language::Python);
        let state = Arc::new(AppState {
            harness: Arc::new(Harness::new(Arc::new(LocalEnvironment::new(None)), config)),
            problems: state().problems.clone(),
        });

        let (status, body) = send(
            state,
            post("/run", serde_json::json!({"language": "typescript", "source_code": "1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error_message"], "language typescript is not configured");
    }

    #[tokio::test]
    async fn test_submit_fixtures_verdict() {
        let state = state();
        let (status, body) = send(
            state.clone(),
            post(
                "/submit",
                serde_json::json!({
                    "language": "python",
                    "source_code": "def solution(x): return 5",
                    "test_cases": [
                        {"input": "1", "expected_output": "5"},
                        {"input": "2", "expected_output": "6"}
                    ]
                }),
            ),
        )
        .await;
        state.harness.shutdown().await.unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["passed_count"], 1);
        assert_eq!(body["total_count"], 2);
        assert_eq!(body["summary"], "Passed 1/2 tests.");
        assert_eq!(body["fixture_results"][1]["actual_last_line"], "5");
        assert!(body["submission_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_payloads() {
        let (status, _) = send(
            state(),
            post(
                "/submit",
                serde_json::json!({"language": "python", "source_code": "", "test_cases": []}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            state(),
            post(
                "/submit",
                serde_json::json!({"language": "cobol", "source_code": "", "test_cases": []}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_submit_problem_uses_catalog_fixtures() {
        let state = state();
        let (status, body) = send(
            state.clone(),
            post(
                "/problems/1/submit",
                serde_json::json!({"language": "python", "source_code": "def fizz_buzz_solution(n): pass"}),
            ),
        )
        .await;
        state.harness.shutdown().await.unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["problem_id"], 1);
        assert_eq!(body["total_count"], 4);
        assert_eq!(body["passed_count"], 0);

        let (status, _) = send(
            state,
            post("/problems/42/submit", serde_json::json!({"language": "python", "source_code": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

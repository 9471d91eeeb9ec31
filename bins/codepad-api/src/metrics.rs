// Prometheus metrics for runs and submissions
use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
};
use codepad_common::types::{ExecutionResult, JudgeVerdict};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};
use tracing::error;

lazy_static! {
    pub static ref RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "codepad_runs_total",
        "Harness runs by outcome",
        &["outcome"]
    )
    .expect("register codepad_runs_total");
    pub static ref FIXTURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "codepad_fixtures_total",
        "Judged test cases by outcome",
        &["outcome"]
    )
    .expect("register codepad_fixtures_total");
    pub static ref SUBMISSIONS_TOTAL: IntCounter = register_int_counter!(
        "codepad_submissions_total",
        "Graded submissions"
    )
    .expect("register codepad_submissions_total");
    pub static ref RUN_DURATION: Histogram = register_histogram!(
        "codepad_run_duration_seconds",
        "Wall-clock time of a single run",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0]
    )
    .expect("register codepad_run_duration_seconds");
}

fn run_outcome(timed_out: bool, failed: bool) -> &'static str {
    if timed_out {
        "timeout"
    } else if failed {
        "error"
    } else {
        "success"
    }
}

pub fn record_run(result: &ExecutionResult) {
    let outcome = run_outcome(result.timed_out, result.error_message.is_some());
    RUNS_TOTAL.with_label_values(&[outcome]).inc();
    RUN_DURATION.observe(result.execution_time_ms as f64 / 1000.0);
}

pub fn record_verdict(verdict: &JudgeVerdict) {
    SUBMISSIONS_TOTAL.inc();
    for result in &verdict.fixture_results {
        let outcome = if result.passed {
            "passed"
        } else if result.timed_out {
            "timed_out"
        } else {
            "failed"
        };
        FIXTURES_TOTAL.with_label_values(&[outcome]).inc();
        RUN_DURATION.observe(result.execution_time_ms as f64 / 1000.0);
    }
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_outcome_labels() {
        assert_eq!(run_outcome(true, true), "timeout");
        assert_eq!(run_outcome(false, true), "error");
        assert_eq!(run_outcome(false, false), "success");
    }

    #[test]
    fn test_record_run_counts_by_outcome() {
        let before = RUNS_TOTAL.with_label_values(&["timeout"]).get();
        record_run(&ExecutionResult {
            timed_out: true,
            error_message: Some("timed out after 15000ms, possible infinite loop".to_string()),
            execution_time_ms: 15_000,
            ..Default::default()
        });
        assert_eq!(RUNS_TOTAL.with_label_values(&["timeout"]).get(), before + 1);
    }
}

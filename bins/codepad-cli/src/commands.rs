// CLI commands for running and judging solutions
use anyhow::{bail, Context, Result};
use codepad_common::problems::{
    sort_newest_first, FileProblemStore, ProblemFilter, ProblemStore, DEFAULT_FUNCTION_NAME,
};
use codepad_common::redis::RedisProblemStore;
use codepad_common::types::{ExecutionRequest, JudgeVerdict, Language, TestFixture};
use codepad_harness::{CancellationToken, Harness, HarnessConfig};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub enum FixtureSource {
    Problem(u32),
    File(PathBuf),
}

/// Fixture files are either a bare array or `{"test_cases": [...]}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FixturesJson {
    List(Vec<TestFixture>),
    Wrapped { test_cases: Vec<TestFixture> },
}

fn load_fixtures(path: &Path) -> Result<Vec<TestFixture>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixtures file {}", path.display()))?;
    let parsed: FixturesJson = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse fixtures file {}", path.display()))?;

    let fixtures = match parsed {
        FixturesJson::List(fixtures) => fixtures,
        FixturesJson::Wrapped { test_cases } => test_cases,
    };
    if fixtures.is_empty() {
        bail!("No test cases in {}", path.display());
    }
    Ok(fixtures)
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read source file {}", path.display()))
}

fn build_harness(config_path: Option<&Path>) -> Result<Harness> {
    let config = match config_path {
        Some(path) => {
            let mut config = HarnessConfig::load(path)?;
            config.apply_env_overrides()?;
            config
        }
        None => HarnessConfig::load_default()?,
    };
    println!("⚙️  Backend: {:?}, timeout {}ms", config.backend, config.timeout_ms);
    Harness::from_config(config)
}

/// Run a file once. Returns false when the run failed or timed out.
pub async fn run_file(
    config_path: Option<&Path>,
    language: Language,
    file: &Path,
    input: Option<String>,
    function: Option<String>,
) -> Result<bool> {
    let source = read_source(file)?;
    let harness = build_harness(config_path)?;

    let mut request = ExecutionRequest::new(language, source);
    if let Some(input) = input {
        request = request.with_input(input, function);
    }

    println!("🚀 Running {} ({})...", file.display(), language);
    let result = harness.run_once(&request).await;
    harness.shutdown().await?;

    print!("{}", result.raw_output);
    if !result.raw_output.is_empty() && !result.raw_output.ends_with('\n') {
        println!();
    }

    if result.timed_out {
        println!("⏱️  {}", result.error_message.as_deref().unwrap_or("Timed out"));
        return Ok(false);
    }
    if let Some(error) = &result.error_message {
        println!("❌ {}", error);
        return Ok(false);
    }

    println!("✅ Finished in {}ms", result.execution_time_ms);
    Ok(true)
}

/// Function under test: explicit flag, then the problem's, then the default
fn resolve_function(explicit: Option<String>, from_problem: Option<&str>) -> String {
    explicit
        .or_else(|| from_problem.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_FUNCTION_NAME.to_string())
}

fn print_verdict(verdict: &JudgeVerdict) {
    for (idx, result) in verdict.fixture_results.iter().enumerate() {
        let label = result
            .fixture
            .description
            .clone()
            .unwrap_or_else(|| format!("input {:?}", result.fixture.input));

        if result.passed {
            println!("  ✅ Test {}: {} ({}ms)", idx + 1, label, result.execution_time_ms);
        } else if result.timed_out {
            println!("  ⏱️  Test {}: {} timed out", idx + 1, label);
        } else {
            println!(
                "  ❌ Test {}: {} expected {:?}, got {:?}",
                idx + 1,
                label,
                result.fixture.expected_output,
                result.actual_last_line
            );
            if let Some(error) = &result.error {
                println!("     {}", error);
            }
        }
    }
    println!("\n📊 {}", verdict.summary());
}

/// Judge a file. Returns whether every test passed.
pub async fn judge_file(
    config_path: Option<&Path>,
    problems_path: &Path,
    language: Language,
    file: &Path,
    fixtures: FixtureSource,
    function: Option<String>,
) -> Result<bool> {
    let source = read_source(file)?;

    let (fixtures, function_name) = match fixtures {
        FixtureSource::Problem(id) => {
            let store = FileProblemStore::load(problems_path)?;
            let problem = store
                .get(id)
                .await?
                .with_context(|| format!("Problem {} not found in {}", id, problems_path.display()))?;
            println!("📝 {} ({}, {})", problem.title, problem.difficulty, problem.category);
            let function_name = resolve_function(function, Some(&problem.function_name));
            (problem.test_cases, function_name)
        }
        FixtureSource::File(path) => (load_fixtures(&path)?, resolve_function(function, None)),
    };

    let harness = build_harness(config_path)?;
    println!("🧪 Judging {} against {} test(s)...", file.display(), fixtures.len());

    let verdict = harness
        .run_suite(language, &source, &function_name, &fixtures, &CancellationToken::new())
        .await;
    harness.shutdown().await?;

    print_verdict(&verdict);
    Ok(verdict.all_passed())
}

pub async fn list_problems(
    problems_path: &Path,
    difficulty: Option<String>,
    category: Option<String>,
) -> Result<()> {
    let store = FileProblemStore::load(problems_path)?;
    let problems = store.list(&ProblemFilter { difficulty, category }).await?;

    if problems.is_empty() {
        println!("No problems match");
        return Ok(());
    }

    for problem in &problems {
        println!(
            "{:>4}  {:<28} {:<8} {:<18} {} test(s)",
            problem.id,
            problem.title,
            problem.difficulty.to_string(),
            problem.category,
            problem.test_cases.len()
        );
    }
    Ok(())
}

pub async fn seed_redis(problems_path: &Path, redis_url: &str) -> Result<()> {
    let store = FileProblemStore::load(problems_path)?;
    let redis = RedisProblemStore::connect(redis_url).await?;

    let mut problems = store.problems().to_vec();
    sort_newest_first(&mut problems);

    println!("🌱 Seeding {} problem(s) into {}...", problems.len(), redis_url);
    for problem in &problems {
        redis.put(problem).await?;
        println!("  ✅ {} {}", problem.id, problem.title);
    }
    println!("Database has been seeded.");
    Ok(())
}

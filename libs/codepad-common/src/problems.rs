// Problem catalog: the read-only source of fixtures for graded submissions
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::types::TestFixture;

pub const DEFAULT_FUNCTION_NAME: &str = "solution";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "Easy"),
            Difficulty::Medium => write!(f, "Medium"),
            Difficulty::Hard => write!(f, "Hard"),
        }
    }
}

fn default_function_name() -> String {
    DEFAULT_FUNCTION_NAME.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: u32,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_function_name")]
    pub function_name: String,
    #[serde(default)]
    pub test_cases: Vec<TestFixture>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Listing filter. `None` or the literal `all` disables a field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProblemFilter {
    pub difficulty: Option<String>,
    pub category: Option<String>,
}

impl ProblemFilter {
    fn active(value: &Option<String>) -> Option<&str> {
        value
            .as_deref()
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
    }

    pub fn matches(&self, problem: &Problem) -> bool {
        if let Some(difficulty) = Self::active(&self.difficulty) {
            if !problem.difficulty.to_string().eq_ignore_ascii_case(difficulty) {
                return false;
            }
        }
        if let Some(category) = Self::active(&self.category) {
            if !problem.category.eq_ignore_ascii_case(category) {
                return false;
            }
        }
        true
    }
}

/// Newest first, ties broken by id
pub fn sort_newest_first(problems: &mut [Problem]) {
    problems.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
}

#[async_trait]
pub trait ProblemStore: Send + Sync {
    async fn list(&self, filter: &ProblemFilter) -> Result<Vec<Problem>>;
    async fn get(&self, id: u32) -> Result<Option<Problem>>;
}

#[derive(Debug, Deserialize, Serialize)]
struct ProblemsJson {
    problems: Vec<Problem>,
}

/// Problem catalog loaded from a JSON file
#[derive(Debug, Clone)]
pub struct FileProblemStore {
    path: PathBuf,
    problems: Vec<Problem>,
}

impl FileProblemStore {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Problem catalog not found: {}", path.display());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let parsed: ProblemsJson = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        let mut seen = std::collections::HashSet::new();
        for problem in &parsed.problems {
            if !seen.insert(problem.id) {
                bail!("Duplicate problem id {} in {}", problem.id, path.display());
            }
        }

        tracing::debug!(path = %path.display(), count = parsed.problems.len(), "Loaded problem catalog");

        Ok(Self {
            path: path.to_path_buf(),
            problems: parsed.problems,
        })
    }

    pub fn load_default() -> Result<Self> {
        Self::load(Path::new("data/problems.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }
}

#[async_trait]
impl ProblemStore for FileProblemStore {
    async fn list(&self, filter: &ProblemFilter) -> Result<Vec<Problem>> {
        let mut problems: Vec<Problem> = self
            .problems
            .iter()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        sort_newest_first(&mut problems);
        Ok(problems)
    }

    async fn get(&self, id: u32) -> Result<Option<Problem>> {
        Ok(self.problems.iter().find(|p| p.id == id).cloned())
    }
}

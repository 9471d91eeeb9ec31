use crate::problems::{sort_newest_first, Problem, ProblemFilter, ProblemStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;

/// Redis key layout for the problem catalog.
/// Keys are deterministic so the seeding CLI and the API never drift.

pub const PROBLEM_PREFIX: &str = "codepad:problem";
pub const PROBLEM_INDEX: &str = "codepad:problems";

/// Key holding one problem's JSON document
pub fn problem_key(id: u32) -> String {
    format!("{}:{}", PROBLEM_PREFIX, id)
}

fn to_redis_error(kind: &'static str, e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, kind, e.to_string()))
}

/// Store a problem and register its id in the index set
pub async fn put_problem(
    conn: &mut redis::aio::ConnectionManager,
    problem: &Problem,
) -> redis::RedisResult<()> {
    let payload = serde_json::to_string(problem)
        .map_err(|e| to_redis_error("serialization error", e))?;

    let _: () = conn.set(problem_key(problem.id), payload).await?;
    let _: () = conn.sadd(PROBLEM_INDEX, problem.id).await?;
    Ok(())
}

/// Fetch one problem
pub async fn get_problem(
    conn: &mut redis::aio::ConnectionManager,
    id: u32,
) -> redis::RedisResult<Option<Problem>> {
    let payload: Option<String> = conn.get(problem_key(id)).await?;

    match payload {
        Some(data) => {
            let problem = serde_json::from_str(&data)
                .map_err(|e| to_redis_error("deserialization error", e))?;
            Ok(Some(problem))
        }
        None => Ok(None),
    }
}

/// Problem store backed by Redis, read by the API when `REDIS_URL` is set
#[derive(Clone)]
pub struct RedisProblemStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisProblemStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Invalid Redis URL")?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        Ok(Self { conn })
    }

    pub async fn put(&self, problem: &Problem) -> Result<()> {
        let mut conn = self.conn.clone();
        put_problem(&mut conn, problem)
            .await
            .with_context(|| format!("Failed to store problem {}", problem.id))
    }
}

#[async_trait]
impl ProblemStore for RedisProblemStore {
    async fn list(&self, filter: &ProblemFilter) -> Result<Vec<Problem>> {
        let mut conn = self.conn.clone();
        let ids: Vec<u32> = conn
            .smembers(PROBLEM_INDEX)
            .await
            .context("Failed to read problem index")?;

        let mut problems = Vec::with_capacity(ids.len());
        for id in ids {
            match get_problem(&mut conn, id).await? {
                Some(problem) if filter.matches(&problem) => problems.push(problem),
                Some(_) => {}
                None => tracing::warn!(problem_id = id, "Indexed problem has no document"),
            }
        }

        sort_newest_first(&mut problems);
        Ok(problems)
    }

    async fn get(&self, id: u32) -> Result<Option<Problem>> {
        let mut conn = self.conn.clone();
        get_problem(&mut conn, id)
            .await
            .with_context(|| format!("Failed to fetch problem {}", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_key_format() {
        assert_eq!(problem_key(7), "codepad:problem:7");
        assert_eq!(problem_key(7), problem_key(7));
    }

    #[test]
    fn test_index_is_outside_problem_namespace() {
        assert!(!PROBLEM_INDEX.starts_with(&format!("{}:", PROBLEM_PREFIX)));
    }
}

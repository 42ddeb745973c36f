pub mod in_memory;
pub mod redis_backend;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    models::{Problem, ProblemId},
    store::{ProblemStore, StoreError},
};

const ALL_PROBLEMS_KEY: &str = "all_problems";

#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()>;

    async fn delete(&self, keys: &[String]) -> anyhow::Result<()>;

    async fn clear(&self) -> anyhow::Result<()>;
}

/// Read-through cache in front of a [`ProblemStore`]. Cache failures are logged and
/// the call falls through to the inner store.
pub struct CachedProblemStore {
    inner: Arc<dyn ProblemStore>,
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl CachedProblemStore {
    pub fn new(inner: Arc<dyn ProblemStore>, cache: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }

    /// Drops the cached copy of one problem together with the listing that contains it.
    pub async fn invalidate(&self, id: ProblemId) {
        let keys = vec![problem_key(id), ALL_PROBLEMS_KEY.to_string()];
        if let Err(err) = self.cache.delete(&keys).await {
            tracing::warn!(backend = self.cache.name(), problem_id = id, error = %err, "cache invalidation failed");
        }
    }

    pub async fn clear(&self) {
        match self.cache.clear().await {
            Ok(()) => tracing::info!(backend = self.cache.name(), "problem cache cleared"),
            Err(err) => {
                tracing::warn!(backend = self.cache.name(), error = %err, "problem cache clear failed")
            }
        }
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    tracing::debug!(key, "cache hit");
                    Some(value)
                }
                Err(err) => {
                    tracing::warn!(key, error = %err, "discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => {
                tracing::debug!(key, "cache miss");
                None
            }
            Err(err) => {
                tracing::warn!(backend = self.cache.name(), key, error = %err, "cache read failed");
                None
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) {
        let Ok(raw) = serde_json::to_string(value) else {
            return;
        };
        if let Err(err) = self.cache.set(key, raw, self.ttl).await {
            tracing::warn!(backend = self.cache.name(), key, error = %err, "cache write failed");
        }
    }
}

#[async_trait]
impl ProblemStore for CachedProblemStore {
    async fn get_problem(&self, id: ProblemId) -> Result<Problem, StoreError> {
        let key = problem_key(id);
        if let Some(problem) = self.read::<Problem>(&key).await {
            return Ok(problem);
        }
        let problem = self.inner.get_problem(id).await?;
        self.write(&key, &problem).await;
        Ok(problem)
    }

    async fn list_problems(&self) -> Result<Vec<Problem>, StoreError> {
        if let Some(problems) = self.read::<Vec<Problem>>(ALL_PROBLEMS_KEY).await {
            return Ok(problems);
        }
        let problems = self.inner.list_problems().await?;
        self.write(ALL_PROBLEMS_KEY, &problems).await;
        Ok(problems)
    }

    async fn record_solve(&self, identity: &str, problem_id: ProblemId) -> Result<(), StoreError> {
        self.inner.record_solve(identity, problem_id).await
    }
}

fn problem_key(id: ProblemId) -> String {
    format!("problem:{id}")
}

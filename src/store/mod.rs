mod in_memory;
mod seed;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Problem, ProblemId};

pub use in_memory::InMemoryProblemStore;
pub use seed::seed_problems;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("problem {0} not found")]
    NotFound(ProblemId),
    #[error("no problem found in the store")]
    Empty,
}

/// Source of problem data. Every call returns an owned copy, so callers may mutate
/// the result without affecting anyone else.
#[async_trait]
pub trait ProblemStore: Send + Sync {
    async fn get_problem(&self, id: ProblemId) -> Result<Problem, StoreError>;

    async fn list_problems(&self) -> Result<Vec<Problem>, StoreError>;

    async fn random_problem(&self) -> Result<Problem, StoreError> {
        let problems = self.list_problems().await?;
        pick_random(problems)
    }

    /// Counts a solve once per (identity, problem) pair.
    async fn record_solve(&self, identity: &str, problem_id: ProblemId) -> Result<(), StoreError>;
}

pub(crate) fn pick_random(mut problems: Vec<Problem>) -> Result<Problem, StoreError> {
    use rand::Rng;

    if problems.is_empty() {
        return Err(StoreError::Empty);
    }
    let idx = rand::thread_rng().gen_range(0..problems.len());
    Ok(problems.swap_remove(idx))
}

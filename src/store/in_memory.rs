use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use crate::{
    models::{Problem, ProblemId},
    store::{ProblemStore, StoreError},
};

#[derive(Default)]
pub struct InMemoryProblemStore {
    problems: DashMap<ProblemId, Problem>,
    solves: DashSet<(String, ProblemId)>,
}

impl InMemoryProblemStore {
    pub fn new(problems: Vec<Problem>) -> Self {
        let store = Self::default();
        for problem in problems {
            store.problems.insert(problem.id, problem);
        }
        store
    }

    pub async fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read problems from {}", path.display()))?;
        let problems: Vec<Problem> =
            serde_json::from_str(&raw).context("problems file is not a JSON array of problems")?;
        Ok(Self::new(problems))
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn solved_count(&self, identity: &str) -> usize {
        self.solves
            .iter()
            .filter(|entry| entry.key().0 == identity)
            .count()
    }
}

#[async_trait]
impl ProblemStore for InMemoryProblemStore {
    async fn get_problem(&self, id: ProblemId) -> Result<Problem, StoreError> {
        self.problems
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_problems(&self) -> Result<Vec<Problem>, StoreError> {
        let mut problems: Vec<Problem> = self
            .problems
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        problems.sort_by_key(|p| p.id);
        Ok(problems)
    }

    async fn record_solve(&self, identity: &str, problem_id: ProblemId) -> Result<(), StoreError> {
        if !self.problems.contains_key(&problem_id) {
            return Err(StoreError::NotFound(problem_id));
        }
        if self.solves.insert((identity.to_string(), problem_id)) {
            tracing::info!(
                identity,
                problem_id,
                solved = self.solved_count(identity),
                "solve recorded"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryProblemStore;
    use crate::store::{ProblemStore, StoreError, seed_problems};

    #[tokio::test]
    async fn returned_problems_are_independent_copies() {
        let store = InMemoryProblemStore::new(seed_problems());
        let mut first = store.get_problem(1).await.unwrap();
        first.title.push_str(" (edited)");
        first.test_cases.clear();

        let second = store.get_problem(1).await.unwrap();
        assert_eq!(second.title, "Two Sum");
        assert_eq!(second.test_cases.len(), 3);
    }

    #[tokio::test]
    async fn random_problem_fails_on_empty_store() {
        let store = InMemoryProblemStore::new(Vec::new());
        assert!(matches!(store.random_problem().await, Err(StoreError::Empty)));

        let seeded = InMemoryProblemStore::new(seed_problems());
        let picked = seeded.random_problem().await.unwrap();
        assert!(picked.id == 1 || picked.id == 2);
    }

    #[tokio::test]
    async fn solves_are_counted_once_per_problem() {
        let store = InMemoryProblemStore::new(seed_problems());
        store.record_solve("alice", 1).await.unwrap();
        store.record_solve("alice", 1).await.unwrap();
        store.record_solve("alice", 2).await.unwrap();
        assert_eq!(store.solved_count("alice"), 2);
        assert!(matches!(
            store.record_solve("alice", 99).await,
            Err(StoreError::NotFound(99))
        ));
    }
}

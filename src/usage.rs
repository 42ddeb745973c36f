use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;

use crate::config::UsageConfig;

/// Free-tier bookkeeping consulted before a participant may enter the queue.
#[async_trait]
pub trait UsagePolicy: Send + Sync {
    /// Read-only check, used to refuse a connection before upgrading it.
    async fn can_play(&self, identity: &str) -> anyhow::Result<bool>;

    /// Counts one game if the allowance still has room. Check and increment happen
    /// together, so concurrent connections cannot overrun the cap.
    async fn try_consume(&self, identity: &str) -> anyhow::Result<bool>;
}

/// Per-identity daily match counter. Counts reset at UTC midnight.
#[derive(Clone)]
pub struct DailyUsageLimiter {
    state: Arc<Mutex<DailyCounts>>,
    daily_limit: u32,
    premium: Arc<HashSet<String>>,
}

struct DailyCounts {
    day: NaiveDate,
    games: HashMap<String, u32>,
}

impl DailyUsageLimiter {
    pub fn new(config: &UsageConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(DailyCounts {
                day: today(),
                games: HashMap::new(),
            })),
            daily_limit: config.daily_free_games,
            premium: Arc::new(config.premium_identities.clone()),
        }
    }

    async fn counts_for_today(&self) -> tokio::sync::MutexGuard<'_, DailyCounts> {
        let mut state = self.state.lock().await;
        let now = today();
        if state.day != now {
            state.day = now;
            state.games.clear();
        }
        state
    }
}

#[async_trait]
impl UsagePolicy for DailyUsageLimiter {
    async fn can_play(&self, identity: &str) -> anyhow::Result<bool> {
        if self.premium.contains(identity) {
            return Ok(true);
        }
        let state = self.counts_for_today().await;
        let used = state.games.get(identity).copied().unwrap_or(0);
        Ok(used < self.daily_limit)
    }

    async fn try_consume(&self, identity: &str) -> anyhow::Result<bool> {
        if self.premium.contains(identity) {
            return Ok(true);
        }
        let mut state = self.counts_for_today().await;
        let used = state.games.entry(identity.to_string()).or_insert(0);
        if *used >= self.daily_limit {
            return Ok(false);
        }
        *used += 1;
        Ok(true)
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{DailyUsageLimiter, UsagePolicy};
    use crate::config::UsageConfig;

    fn limiter(daily_free_games: u32) -> DailyUsageLimiter {
        DailyUsageLimiter::new(&UsageConfig {
            daily_free_games,
            premium_identities: HashSet::from(["vip".to_string()]),
        })
    }

    #[tokio::test]
    async fn free_identities_stop_at_the_daily_cap() {
        let limiter = limiter(2);
        assert!(limiter.can_play("alice").await.unwrap());
        assert!(limiter.try_consume("alice").await.unwrap());
        assert!(limiter.can_play("alice").await.unwrap());
        assert!(limiter.try_consume("alice").await.unwrap());
        assert!(!limiter.can_play("alice").await.unwrap());
        assert!(!limiter.try_consume("alice").await.unwrap());
        assert!(limiter.can_play("bob").await.unwrap());
    }

    #[tokio::test]
    async fn premium_identities_are_never_counted() {
        let limiter = limiter(0);
        assert!(!limiter.can_play("alice").await.unwrap());
        for _ in 0..5 {
            assert!(limiter.try_consume("vip").await.unwrap());
        }
        assert!(limiter.can_play("vip").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_connections_cannot_overrun_the_cap() {
        let limiter = limiter(3);
        let attempts: Vec<_> = (0..12)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.try_consume("alice").await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);
        assert!(!limiter.can_play("alice").await.unwrap());
    }
}

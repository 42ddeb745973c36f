mod auth;
mod cache;
mod config;
mod error;
mod judge;
mod metrics;
mod models;
mod protocol;
mod room;
mod sandbox;
mod store;
mod transport;
mod usage;

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::{
    auth::StaticTokenAuth,
    cache::{CacheBackend, CachedProblemStore, in_memory::InMemoryCache, redis_backend::RedisCache},
    config::{ArenaConfig, CacheConfig, LogFormat},
    judge::{Judge, JudgeQueue, spawn_worker_pool},
    metrics::MetricsRegistry,
    room::Room,
    sandbox::SandboxFactory,
    store::{InMemoryProblemStore, ProblemStore, seed_problems},
    transport::{AppState, routes},
    usage::DailyUsageLimiter,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = ArenaConfig::from_env().context("failed to build arena config")?;
    init_tracing(&cfg);

    let metrics = Arc::new(MetricsRegistry::new());
    let store = build_store(&cfg).await?;
    let sandbox = SandboxFactory::from_config(&cfg.sandbox).await;
    tracing::info!(backend = sandbox.name(), "sandbox backend selected");

    let judge = Arc::new(Judge::new(
        sandbox,
        store.clone(),
        cfg.sandbox.build_limits.clone(),
        cfg.sandbox.run_limits.clone(),
    ));
    let queue = JudgeQueue::new(cfg.judge.queue_capacity, metrics.clone());
    let room = Arc::new(Room::new(store, queue.clone(), metrics.clone()));
    spawn_worker_pool(cfg.judge.workers, queue.receiver(), judge, room.clone());

    let app = routes(AppState {
        room,
        identity: Arc::new(StaticTokenAuth::new(cfg.auth.tokens.clone())),
        usage: Arc::new(DailyUsageLimiter::new(&cfg.usage)),
        metrics,
        auth_required: cfg.auth.required,
        outbound_capacity: cfg.outbound_queue_capacity,
    });

    let listener = TcpListener::bind(cfg.bind_addr)
        .await
        .context("failed to bind listener")?;
    tracing::info!(addr = %cfg.bind_addr, workers = cfg.judge.workers, "code arena listening");

    axum::serve(listener, app)
        .await
        .context("arena server error")?;

    Ok(())
}

async fn build_store(cfg: &ArenaConfig) -> anyhow::Result<Arc<dyn ProblemStore>> {
    let problems = match &cfg.store.problems_path {
        Some(path) => InMemoryProblemStore::from_path(path).await?,
        None => InMemoryProblemStore::new(seed_problems()),
    };
    tracing::info!(problems = problems.len(), "problem store loaded");
    let problems: Arc<dyn ProblemStore> = Arc::new(problems);

    let (cache, ttl): (Arc<dyn CacheBackend>, Duration) = match &cfg.cache {
        CacheConfig::Disabled => return Ok(problems),
        CacheConfig::InMemory { ttl } => {
            let cache: Arc<dyn CacheBackend> = Arc::new(InMemoryCache::new());
            (cache, *ttl)
        }
        CacheConfig::Redis {
            url,
            key_prefix,
            ttl,
        } => {
            let cache: Arc<dyn CacheBackend> = Arc::new(
                RedisCache::new(url.clone(), key_prefix.clone())
                    .await
                    .context("failed to connect to redis cache")?,
            );
            (cache, *ttl)
        }
    };
    tracing::info!(backend = cache.name(), ttl_secs = ttl.as_secs(), "problem cache enabled");

    // Entries left from a previous run may describe problems that changed since.
    let cached = CachedProblemStore::new(problems, cache, ttl);
    cached.clear().await;
    Ok(Arc::new(cached))
}

fn init_tracing(cfg: &ArenaConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn", cfg.log_level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match cfg.log_format {
        LogFormat::Json => builder
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .init(),
        LogFormat::Text => builder.compact().init(),
    }
}

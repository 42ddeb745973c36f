use std::{
    collections::{HashMap, HashSet},
    env,
    net::SocketAddr,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};

use crate::models::ExecutionLimits;

#[derive(Debug, Clone)]
pub struct ArenaConfig {
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub log_format: LogFormat,
    pub outbound_queue_capacity: usize,
    pub judge: JudgeConfig,
    pub sandbox: SandboxConfig,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub auth: AuthConfig,
    pub usage: UsageConfig,
}

#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub backend: SandboxBackendKind,
    pub image: String,
    pub docker_bin: String,
    pub docker_user: Option<String>,
    pub process_isolate: bool,
    pub build_limits: ExecutionLimits,
    pub run_limits: ExecutionLimits,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub problems_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum CacheConfig {
    Disabled,
    InMemory { ttl: Duration },
    Redis { url: String, key_prefix: String, ttl: Duration },
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub required: bool,
    /// token -> identity
    pub tokens: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct UsageConfig {
    pub daily_free_games: u32,
    pub premium_identities: HashSet<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "compact" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unsupported log format: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SandboxBackendKind {
    #[default]
    Docker,
    Process,
}

impl FromStr for SandboxBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "process" => Ok(Self::Process),
            _ => Err(format!("unsupported sandbox backend: {s}")),
        }
    }
}

impl ArenaConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse::<SocketAddr>()
            .context("invalid BIND_ADDR")?;

        let backend = env::var("SANDBOX_BACKEND")
            .unwrap_or_else(|_| "docker".to_string())
            .parse::<SandboxBackendKind>()
            .map_err(|e| anyhow!(e))?;

        let sandbox = SandboxConfig {
            backend,
            image: env::var("SANDBOX_IMAGE").unwrap_or_else(|_| "gcc:latest".to_string()),
            docker_bin: env::var("SANDBOX_DOCKER_BIN").unwrap_or_else(|_| "docker".to_string()),
            docker_user: env::var("SANDBOX_DOCKER_USER").ok().filter(|s| !s.is_empty()),
            process_isolate: env_parse("SANDBOX_PROCESS_ISOLATE", true),
            build_limits: ExecutionLimits {
                cpu_cores: env_parse("BUILD_CPU_CORES", 1.0),
                memory_mb: env_parse("BUILD_MEMORY_MB", 512),
                timeout_ms: env_parse("BUILD_TIMEOUT_MS", 30_000),
                max_processes: env_parse("BUILD_MAX_PROCESSES", 128),
                max_output_bytes: env_parse("BUILD_MAX_OUTPUT_BYTES", 64 * 1024),
            }
            .normalized(),
            run_limits: ExecutionLimits {
                cpu_cores: env_parse("RUN_CPU_CORES", 0.5),
                memory_mb: env_parse("RUN_MEMORY_MB", 128),
                timeout_ms: env_parse("RUN_TIMEOUT_MS", 2_000),
                max_processes: env_parse("RUN_MAX_PROCESSES", 32),
                max_output_bytes: env_parse("RUN_MAX_OUTPUT_BYTES", 64 * 1024),
            }
            .normalized(),
        };

        let ttl = Duration::from_secs(env_parse("CACHE_TTL_SECS", 3_600u64).max(1));
        let cache = match env::var("CACHE_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "none" | "off" | "disabled" => CacheConfig::Disabled,
            "memory" | "in_memory" => CacheConfig::InMemory { ttl },
            "redis" => CacheConfig::Redis {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
                key_prefix: env::var("CACHE_KEY_PREFIX")
                    .unwrap_or_else(|_| "arena:cache".to_string()),
                ttl,
            },
            other => return Err(anyhow!("unsupported CACHE_BACKEND: {other}")),
        };

        Ok(Self {
            bind_addr,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: env_parse("LOG_FORMAT", LogFormat::Text),
            outbound_queue_capacity: env_parse("OUTBOUND_QUEUE_CAPACITY", 16usize).max(1),
            judge: JudgeConfig {
                workers: env_parse("JUDGE_WORKERS", 4usize).max(1),
                queue_capacity: env_parse("JUDGE_QUEUE_CAPACITY", 256usize).max(1),
            },
            sandbox,
            store: StoreConfig {
                problems_path: env::var("PROBLEMS_PATH").ok().map(PathBuf::from),
            },
            cache,
            auth: AuthConfig {
                required: env_parse("AUTH_REQUIRED", true),
                tokens: parse_auth_tokens(
                    &env::var("AUTH_TOKENS").unwrap_or_else(|_| "dev:dev-token".to_string()),
                ),
            },
            usage: UsageConfig {
                daily_free_games: env_parse("DAILY_FREE_GAMES", 10u32),
                premium_identities: parse_csv("PREMIUM_IDENTITIES", "").into_iter().collect(),
            },
        })
    }
}

fn parse_auth_tokens(input: &str) -> HashMap<String, String> {
    let mut tokens = HashMap::new();
    for raw in input.split(',') {
        let entry = raw.trim();
        if entry.is_empty() {
            continue;
        }
        if let Some((identity, token)) = entry.split_once(':')
            && !identity.trim().is_empty()
            && !token.trim().is_empty()
        {
            tokens.insert(token.trim().to_string(), identity.trim().to_string());
        }
    }
    tokens
}

fn parse_csv(key: &str, default: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

use std::env;
use std::time::Duration;

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Assembled once at startup from the process environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub http_port: u16,
    pub http_workers: usize,
    pub terminal_ws_port: u16,
    pub stats_ws_port: u16,
    pub log_level: String,
    pub production: bool,

    // vault
    pub vault_master_key: Option<String>,

    // ssh pool
    pub ssh_connect_timeout: Duration,
    pub ssh_auth_timeout: Duration,
    pub ssh_pool_max_size: usize,
    pub ssh_pool_idle_timeout: Duration,

    // tasks
    pub tasks_num_workers: usize,
    pub tasks_queue_capacity: usize,
    pub tasks_concurrent_per_host: usize,
    pub tasks_default_timeout_secs: u64,
    pub tasks_output_max_bytes: usize,
    pub tasks_store_output_default: bool,

    // terminal
    pub terminal_idle_timeout: Duration,
    pub terminal_max_sessions: usize,

    // stats
    pub stats_poll_interval: Duration,
    pub stats_cpu_threshold: f64,
    pub stats_mem_threshold: f64,
    pub stats_disk_threshold: f64,

    // webhooks
    pub webhook_max_retries: u32,
    pub webhook_timeout: Duration,
    pub webhook_allow_local: bool,

    // auth
    pub jwt_secret: String,
    pub jwt_ttl: Duration,
    pub session_ttl: Duration,

    // rate limit
    pub rate_limit_general_per_min: u32,
    pub rate_limit_login_per_min: u32,

    // lifecycle
    pub cleanup_interval: Duration,
    pub audit_retention_days: i64,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            db_path: env_or("FLEETCTL_DB_PATH", "fleetctl.db"),
            http_port: env_parse("FLEETCTL_HTTP_PORT", 9083),
            http_workers: env_parse("FLEETCTL_HTTP_WORKERS", 4),
            terminal_ws_port: env_parse("FLEETCTL_TERMINAL_WS_PORT", 9084),
            stats_ws_port: env_parse("FLEETCTL_STATS_WS_PORT", 9085),
            log_level: env_or("LOG_LEVEL", "info"),
            production: env_or("FLEETCTL_PRODUCTION", "0") == "1",

            vault_master_key: env::var("FLEETCTL_VAULT_MASTER_KEY").ok(),

            ssh_connect_timeout: Duration::from_secs(env_parse("SSH_CONNECT_TIMEOUT", 30)),
            ssh_auth_timeout: Duration::from_secs(env_parse("SSH_AUTH_TIMEOUT", 15)),
            ssh_pool_max_size: env_parse("SSH_POOL_MAX_SIZE", 16),
            ssh_pool_idle_timeout: Duration::from_secs(env_parse("SSH_POOL_IDLE_TIMEOUT", 300)),

            tasks_num_workers: env_parse("TASKS_NUM_WORKERS", 4),
            tasks_queue_capacity: env_parse("TASKS_QUEUE_CAPACITY", 256),
            tasks_concurrent_per_host: env_parse("TASKS_CONCURRENT_PER_SERVER", 1),
            tasks_default_timeout_secs: env_parse("TASKS_DEFAULT_TIMEOUT", 60),
            tasks_output_max_bytes: env_parse("TASKS_OUTPUT_MAX_BYTES", 65536),
            tasks_store_output_default: env_or("TASKS_STORE_OUTPUT_DEFAULT", "0") == "1",

            terminal_idle_timeout: Duration::from_secs(env_parse("TERMINAL_IDLE_TIMEOUT", 900)),
            terminal_max_sessions: env_parse("TERMINAL_MAX_SESSIONS", 32),

            stats_poll_interval: Duration::from_secs(env_parse("STATS_POLL_INTERVAL", 3)),
            stats_cpu_threshold: env_parse("STATS_CPU_THRESHOLD", 80.0),
            stats_mem_threshold: env_parse("STATS_MEM_THRESHOLD", 80.0),
            stats_disk_threshold: env_parse("STATS_DISK_THRESHOLD", 80.0),

            webhook_max_retries: env_parse("WEBHOOK_MAX_RETRIES", 3),
            webhook_timeout: Duration::from_secs(env_parse("WEBHOOK_TIMEOUT", 10)),
            webhook_allow_local: env_or("WEBHOOK_ALLOW_LOCAL", "0") == "1",

            jwt_secret: env_or("FLEETCTL_JWT_SECRET", "dev-insecure-jwt-secret-change-me"),
            jwt_ttl: Duration::from_secs(env_parse("JWT_TTL_SECONDS", 3600)),
            session_ttl: Duration::from_secs(env_parse("SESSION_TTL_SECONDS", 86400)),

            rate_limit_general_per_min: env_parse("RATE_LIMIT_GENERAL_PER_MIN", 300),
            rate_limit_login_per_min: env_parse("RATE_LIMIT_LOGIN_PER_MIN", 10),

            cleanup_interval: Duration::from_secs(env_parse("CLEANUP_INTERVAL_SECS", 60)),
            audit_retention_days: env_parse("AUDIT_RETENTION_DAYS", 90),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::from_env();
        assert_eq!(cfg.http_port, 9083);
        assert!(cfg.tasks_num_workers > 0);
        assert!(cfg.ssh_pool_max_size > 0);
    }
}

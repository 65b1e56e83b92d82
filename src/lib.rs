pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod inventory;
pub mod lifecycle;
pub mod metrics;
pub mod models;
pub mod policy;
pub mod rate_limit;
pub mod routes;
pub mod sanitize;
pub mod ssh_pool;
pub mod stats;
pub mod tasks;
pub mod terminal;
pub mod vault;
pub mod webhooks;

use std::sync::Arc;

use rocket_cors::CorsOptions;

use auth::TokenIssuer;
use cache::AppCache;
use config::Config;
use db::Db;
use events::EventBus;
use lifecycle::LifecycleManager;
use metrics::Metrics;
use policy::CommandPolicy;
use rate_limit::{RateLimitConfig, RateLimiter};
use ssh_pool::SshPool;
use tasks::TaskEngine;
use vault::Vault;

/// Everything `main.rs` needs to also stand up the terminal and stats
/// WebSocket brokers on their own ports, handed back alongside the built
/// Rocket instance since those listeners live outside Rocket's router.
///
/// SQLite is opened once per long-lived owner rather than shared through a
/// single handle: the webhook dispatcher, task engine, and lifecycle manager
/// each get their own `Db::new(db_path)` instead of the one Rocket manages --
/// WAL mode makes this safe for a single local file.
pub struct App {
    pub rocket: rocket::Rocket<rocket::Build>,
    pub vault: Arc<Vault>,
    pub ssh: Arc<SshPool>,
    pub events: Arc<EventBus>,
    pub tokens: Arc<TokenIssuer>,
    pub lifecycle: Arc<LifecycleManager>,
    pub config: Config,
}

/// Assembles every shared component and the Rocket router: construct
/// state, subscribe the webhook dispatcher before anything else touches
/// the event bus, then mount routes and catchers.
pub fn build(config: Config) -> App {
    let rocket_db = Db::new(&config.db_path);
    LifecycleManager::validate_and_recover(&config, &rocket_db);

    let vault = Arc::new(Vault::new(config.vault_master_key.as_deref(), config.production));
    let events = Arc::new(EventBus::new());
    let ssh = Arc::new(SshPool::new(
        config.ssh_pool_max_size,
        config.ssh_pool_idle_timeout,
        config.ssh_connect_timeout,
        config.ssh_auth_timeout,
    ));

    // Subscribe the webhook dispatcher before any request handler can
    // publish onto the bus, so no early event is dropped.
    let webhook_receiver = events.subscribe();
    let webhook_db = Arc::new(Db::new(&config.db_path));
    webhooks::spawn_dispatcher(webhook_db, webhook_receiver, config.webhook_allow_local, config.webhook_timeout);

    let policy = CommandPolicy::default();
    let engine = TaskEngine::new(
        Arc::new(Db::new(&config.db_path)),
        vault.clone(),
        ssh.clone(),
        events.clone(),
        policy,
        config.tasks_queue_capacity,
        config.tasks_num_workers,
        config.tasks_concurrent_per_host,
        config.tasks_output_max_bytes,
    );

    let tokens = Arc::new(TokenIssuer::new(&config.jwt_secret, config.jwt_ttl));
    let rate_limiter = RateLimiter::new();
    let rate_limit_config = RateLimitConfig::from_env();
    let app_cache = AppCache::default();
    let app_metrics = Metrics::new();

    let lifecycle = Arc::new(LifecycleManager::new(
        Arc::new(Db::new(&config.db_path)),
        ssh.clone(),
        config.audit_retention_days,
        config.cleanup_interval,
    ));
    lifecycle.clone().spawn_cleanup_jobs();

    let cors = CorsOptions::default().to_cors().expect("failed to build CORS configuration");

    let figment = rocket::Config::figment()
        .merge(("port", config.http_port))
        .merge(("workers", config.http_workers));

    let rocket = rocket::custom(figment)
        .manage(rocket_db)
        .manage(Vault::new(config.vault_master_key.as_deref(), config.production))
        .manage(ssh.clone())
        .manage(events.clone())
        .manage(engine)
        .manage(tokens.clone())
        .manage(rate_limiter)
        .manage(rate_limit_config)
        .manage(app_cache)
        .manage(app_metrics)
        .manage(config.clone())
        .attach(cors)
        .register("/", rocket::catchers![routes::too_many_requests, routes::not_found])
        .mount(
            "/",
            rocket::routes![
                routes::health,
                routes::ready,
                routes::metrics,
                routes::setup,
                routes::login,
                routes::me,
                routes::create_host,
                routes::list_hosts,
                routes::get_host,
                routes::delete_host,
                routes::get_inventory,
                routes::collect_inventory,
                routes::submit_task,
                routes::get_task,
                routes::list_tasks,
                routes::cancel_task,
                routes::create_vault_key,
                routes::list_vault_keys,
                routes::delete_vault_key,
                routes::create_webhook,
                routes::list_webhooks,
                routes::update_webhook,
                routes::delete_webhook,
                routes::list_webhook_deliveries,
                routes::list_alerts,
                routes::mark_alert_read,
                routes::list_audit_logs,
                routes::export_audit_logs_csv,
            ],
        );

    App {
        rocket,
        vault,
        ssh,
        events,
        tokens,
        lifecycle,
        config,
    }
}

use std::net::SocketAddr;
use std::sync::Arc;

use fleetctl::config::Config;
use fleetctl::db::Db;
use fleetctl::stats::StatsBroker;
use fleetctl::terminal::TerminalBroker;
use tokio::sync::Mutex;
use tracing::info;

#[rocket::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env();
    let app = fleetctl::build(config.clone());

    let terminal_broker = Arc::new(TerminalBroker {
        db: Arc::new(Db::new(&config.db_path)),
        vault: app.vault.clone(),
        ssh: app.ssh.clone(),
        events: app.events.clone(),
        tokens: app.tokens.clone(),
        idle_timeout: config.terminal_idle_timeout,
        max_sessions: config.terminal_max_sessions,
        active: Mutex::new(0),
    });
    let terminal_addr = SocketAddr::from(([0, 0, 0, 0], config.terminal_ws_port));
    tokio::spawn(async move {
        if let Err(e) = fleetctl::terminal::run(terminal_broker, terminal_addr).await {
            tracing::error!(error = %e, "terminal websocket listener exited");
        }
    });

    let stats_broker = StatsBroker::new(
        Arc::new(Db::new(&config.db_path)),
        app.vault.clone(),
        app.ssh.clone(),
        app.events.clone(),
        config.stats_poll_interval,
        config.stats_cpu_threshold,
        config.stats_mem_threshold,
        config.stats_disk_threshold,
    );
    let stats_addr = SocketAddr::from(([0, 0, 0, 0], config.stats_ws_port));
    tokio::spawn(async move {
        if let Err(e) = fleetctl::stats::run(stats_broker, stats_addr).await {
            tracing::error!(error = %e, "stats websocket listener exited");
        }
    });

    let lifecycle = app.lifecycle.clone();
    let ignite = match app.rocket.ignite().await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "failed to ignite rocket");
            return;
        }
    };
    let shutdown_handle = ignite.shutdown();

    tokio::spawn(async move {
        fleetctl::lifecycle::LifecycleManager::wait_for_shutdown_signal().await;
        info!("shutdown signal received, notifying rocket");
        shutdown_handle.notify();
    });

    if let Err(e) = ignite.launch().await {
        tracing::error!(error = %e, "rocket server error");
    }

    lifecycle.shutdown().await;
}

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::db::Db;
use crate::ssh_pool::SshPool;

/// Startup validation/recovery plus signal-driven shutdown sequencing
/// and periodic background cleanup jobs for a long-running service.
pub struct LifecycleManager {
    db: Arc<Db>,
    ssh: Arc<SshPool>,
    audit_retention_days: i64,
    cleanup_interval: Duration,
}

impl LifecycleManager {
    pub fn new(db: Arc<Db>, ssh: Arc<SshPool>, audit_retention_days: i64, cleanup_interval: Duration) -> Self {
        LifecycleManager {
            db,
            ssh,
            audit_retention_days,
            cleanup_interval,
        }
    }

    /// Refuses to start if a production deployment is missing critical
    /// secrets, then reconciles any rows left mid-flight by a prior crash.
    pub fn validate_and_recover(config: &Config, db: &Db) {
        if config.production {
            if config.vault_master_key.is_none() {
                panic!("FLEETCTL_VAULT_MASTER_KEY must be set in production mode");
            }
            if config.jwt_secret == "dev-insecure-jwt-secret-change-me" {
                panic!("FLEETCTL_JWT_SECRET must be set to a real secret in production mode");
            }
        }

        let interrupted_tasks = db.interrupt_running_tasks().unwrap_or(0);
        if interrupted_tasks > 0 {
            warn!(count = interrupted_tasks, "recovered running tasks as interrupted on startup");
        }
        let interrupted_sessions = db.interrupt_active_terminal_sessions().unwrap_or(0);
        if interrupted_sessions > 0 {
            warn!(count = interrupted_sessions, "recovered active terminal sessions as interrupted on startup");
        }
    }

    /// Spawns the periodic audit-log and monitoring-history retention jobs.
    /// Each tick's errors are logged, never propagated -- a failed prune
    /// must not take down the scheduler.
    pub fn spawn_cleanup_jobs(self: Arc<Self>) {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(manager.cleanup_interval).await;
                match manager.db.prune_audit_older_than_days(manager.audit_retention_days) {
                    Ok(n) if n > 0 => info!(deleted = n, "pruned aged audit log rows"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "audit log retention prune failed"),
                }
                match manager.db.prune_monitoring_older_than_days(manager.audit_retention_days) {
                    Ok(n) if n > 0 => info!(deleted = n, "pruned aged monitoring history rows"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "monitoring history retention prune failed"),
                }
            }
        });
    }

    /// Resolves once SIGTERM or SIGINT (or Ctrl-C on platforms without unix
    /// signals) is observed, for callers to race against their serve loops.
    pub async fn wait_for_shutdown_signal() {
        #[cfg(unix)]
        {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received ctrl-c");
        }
    }

    /// Marks in-flight work as interrupted and tears down the SSH pool. REST/
    /// WebSocket listeners are expected to already have stopped accepting by
    /// the time this runs.
    pub async fn shutdown(&self) {
        info!("shutting down: marking running tasks and active sessions as interrupted");
        let _ = self.db.interrupt_running_tasks();
        let _ = self.db.interrupt_active_terminal_sessions();
        self.ssh.close_all().await;
        info!("shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateHost, Task, TaskStatus};

    #[test]
    fn validate_and_recover_reconciles_running_task() {
        let db = Db::open_in_memory();
        let user = db.create_user("admin", "a@example.com", "hash", "admin").unwrap();
        let host = db
            .create_host(&CreateHost {
                name: "h1".into(),
                host: "10.0.0.1".into(),
                port: None,
                username: "ops".into(),
                description: "".into(),
                agent_port: 9100,
                tags: vec![],
                group_ref: None,
                ssh_key_path: None,
                ssh_password: None,
                ssh_key_vault_ref: None,
            })
            .unwrap();
        let task = Task {
            id: "t1".into(),
            host_ref: host.id,
            user_ref: user.id,
            command: "uptime".into(),
            status: TaskStatus::Running.as_str().into(),
            exit_code: None,
            stdout: None,
            stderr: None,
            timeout_seconds: 60,
            store_output: false,
            created_at: crate::db::now_iso(),
            started_at: None,
            finished_at: None,
        };
        db.insert_task(&task).unwrap();

        let config = Config::from_env();
        LifecycleManager::validate_and_recover(&config, &db);

        let fetched = db.get_task("t1").unwrap();
        assert_eq!(fetched.status, "interrupted");
    }
}

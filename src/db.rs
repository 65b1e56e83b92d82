use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Mutex;

use crate::error::StoreError;
use crate::models::*;

pub struct Db {
    pub conn: Mutex<Connection>,
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

impl Db {
    pub fn new(path: &str) -> Self {
        let conn = Connection::open(path).expect("failed to open database");
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .expect("failed to set pragmas");
        let db = Db {
            conn: Mutex::new(conn),
        };
        db.migrate();
        db
    }

    pub fn open_in_memory() -> Self {
        let conn = Connection::open_in_memory().expect("failed to open in-memory database");
        conn.execute_batch("PRAGMA foreign_keys=ON;").expect("pragma");
        let db = Db {
            conn: Mutex::new(conn),
        };
        db.migrate();
        db
    }

    fn migrate(&self) {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL DEFAULT '',
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'viewer',
                is_active INTEGER NOT NULL DEFAULT 1,
                last_login TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS hosts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                host TEXT NOT NULL,
                port INTEGER NOT NULL DEFAULT 22,
                username TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                agent_port INTEGER NOT NULL DEFAULT 9100,
                tags TEXT NOT NULL DEFAULT '[]',
                group_ref TEXT,
                status TEXT NOT NULL DEFAULT 'unknown',
                last_seen TEXT,
                ssh_key_path TEXT,
                ssh_password_wrapped TEXT,
                ssh_key_vault_ref TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_hosts_status ON hosts(status);

            CREATE TABLE IF NOT EXISTS vault_keys (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                public_key TEXT,
                private_key_enc BLOB NOT NULL,
                iv BLOB NOT NULL,
                auth_tag BLOB NOT NULL,
                key_type TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                created_by_user_id INTEGER NOT NULL REFERENCES users(id),
                created_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_vault_keys_deleted ON vault_keys(deleted_at);

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                host_ref INTEGER NOT NULL REFERENCES hosts(id),
                user_ref INTEGER NOT NULL REFERENCES users(id),
                command TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                exit_code INTEGER,
                stdout TEXT,
                stderr TEXT,
                timeout_seconds INTEGER NOT NULL DEFAULT 60,
                store_output INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_host ON tasks(host_ref, created_at);
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

            CREATE TABLE IF NOT EXISTS terminal_sessions (
                id TEXT PRIMARY KEY,
                host_ref INTEGER NOT NULL REFERENCES hosts(id),
                user_ref INTEGER NOT NULL REFERENCES users(id),
                vault_key_ref TEXT,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                last_activity TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active'
            );
            CREATE INDEX IF NOT EXISTS idx_terminal_status ON terminal_sessions(status);

            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                user_ref INTEGER,
                action TEXT NOT NULL,
                target_type TEXT NOT NULL,
                target_id TEXT NOT NULL,
                meta TEXT NOT NULL DEFAULT '{}',
                ip TEXT,
                user_agent TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_log(created_at);
            CREATE INDEX IF NOT EXISTS idx_audit_target ON audit_log(target_type, target_id);

            CREATE TABLE IF NOT EXISTS webhooks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                secret TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                event_types TEXT,
                retry_max INTEGER NOT NULL DEFAULT 3,
                timeout INTEGER NOT NULL DEFAULT 10,
                created_by INTEGER NOT NULL REFERENCES users(id),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_triggered_at TEXT
            );

            CREATE TABLE IF NOT EXISTS webhook_deliveries (
                id TEXT PRIMARY KEY,
                webhook_ref TEXT NOT NULL REFERENCES webhooks(id) ON DELETE CASCADE,
                event_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                status TEXT NOT NULL,
                status_code INTEGER,
                response_body TEXT,
                error TEXT,
                attempt INTEGER NOT NULL DEFAULT 1,
                delivered_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_deliveries_webhook ON webhook_deliveries(webhook_ref, delivered_at);

            CREATE TABLE IF NOT EXISTS host_inventory (
                host_ref INTEGER PRIMARY KEY REFERENCES hosts(id),
                collected_at TEXT NOT NULL,
                facts TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS monitoring_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host_ref INTEGER NOT NULL REFERENCES hosts(id),
                metric_type TEXT NOT NULL,
                value TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_monitoring_host_time ON monitoring_history(host_ref, timestamp);

            -- alerts table: persists threshold-evaluation output as its
            -- own owning entity rather than embedding it in events.
            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                host_ref INTEGER NOT NULL REFERENCES hosts(id),
                metric_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                value REAL NOT NULL,
                threshold REAL NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_host_read_created ON alerts(host_ref, is_read, created_at);
            ",
        )
        .expect("failed to run migrations");
    }
}

fn host_from_row(row: &Row) -> rusqlite::Result<Host> {
    let tags_json: String = row.get("tags")?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
    Ok(Host {
        id: row.get("id")?,
        name: row.get("name")?,
        host: row.get("host")?,
        port: row.get::<_, i64>("port")? as u16,
        username: row.get("username")?,
        description: row.get("description")?,
        agent_port: row.get::<_, i64>("agent_port")? as u16,
        tags,
        group_ref: row.get("group_ref")?,
        status: HostStatus::from_str(&row.get::<_, String>("status")?),
        last_seen: row.get("last_seen")?,
        ssh_key_path: row.get("ssh_key_path")?,
        ssh_password_wrapped: row.get("ssh_password_wrapped")?,
        ssh_key_vault_ref: row.get("ssh_key_vault_ref")?,
    })
}

impl Db {
    pub fn create_host(&self, h: &CreateHost) -> Result<Host, StoreError> {
        let conn = self.conn.lock().unwrap();
        let now = now_iso();
        let tags_json = serde_json::to_string(&h.tags).unwrap();
        conn.execute(
            "INSERT INTO hosts (name, host, port, username, description, agent_port, tags,
                group_ref, status, ssh_key_path, ssh_password_wrapped, ssh_key_vault_ref,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'unknown', ?9, ?10, ?11, ?12, ?12)",
            params![
                h.name,
                h.host,
                h.port.unwrap_or(22) as i64,
                h.username,
                h.description,
                h.agent_port as i64,
                tags_json,
                h.group_ref,
                h.ssh_key_path,
                h.ssh_password, // wrapped by the caller before reaching the store
                h.ssh_key_vault_ref,
                now,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Constraint("a host with this name already exists".into())
            }
            other => StoreError::Sqlite(other),
        })?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_host(id)
    }

    pub fn get_host(&self, id: i64) -> Result<Host, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM hosts WHERE id = ?1", params![id], host_from_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn list_hosts(&self, limit: i64, offset: i64) -> Result<Vec<Host>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM hosts ORDER BY name LIMIT ?1 OFFSET ?2")?;
        let rows = stmt
            .query_map(params![limit, offset], host_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn update_host_status(&self, id: i64, status: HostStatus) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE hosts SET status = ?1, last_seen = ?2 WHERE id = ?3",
            params![status.as_str(), now_iso(), id],
        )?;
        Ok(())
    }

    pub fn delete_host(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM hosts WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // --- Users ---

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM users WHERE username = ?1",
            params![username],
            user_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn get_user(&self, id: i64) -> Result<User, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM users WHERE id = ?1", params![id], user_from_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<User, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO users (username, email, password_hash, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![username, email, password_hash, role, now_iso()],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Constraint("username already taken".into())
            }
            other => StoreError::Sqlite(other),
        })?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_user(id)
    }

    pub fn touch_last_login(&self, user_id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![now_iso(), user_id],
        )?;
        Ok(())
    }

    pub fn count_users(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .map_err(StoreError::from)
    }

    // --- Tasks ---

    pub fn insert_task(&self, t: &Task) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tasks (id, host_ref, user_ref, command, status, timeout_seconds,
                store_output, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                t.id,
                t.host_ref,
                t.user_ref,
                t.command,
                t.status,
                t.timeout_seconds,
                t.store_output as i64,
                t.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Result<Task, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM tasks WHERE id = ?1", params![id], task_from_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn list_tasks_for_host(&self, host_ref: i64, limit: i64) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks WHERE host_ref = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![host_ref, limit], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        exit_code: Option<i32>,
        stdout: Option<&str>,
        stderr: Option<&str>,
        started_at: Option<&str>,
        finished_at: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET status = ?1,
                exit_code = COALESCE(?2, exit_code),
                stdout = COALESCE(?3, stdout),
                stderr = COALESCE(?4, stderr),
                started_at = COALESCE(?5, started_at),
                finished_at = COALESCE(?6, finished_at)
             WHERE id = ?7",
            params![status.as_str(), exit_code, stdout, stderr, started_at, finished_at, id],
        )?;
        Ok(())
    }

    /// Startup recovery: any task left `running` when the process died is
    /// marked `interrupted` rather than silently resumed.
    pub fn interrupt_running_tasks(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE tasks SET status = 'interrupted', finished_at = ?1
             WHERE status IN ('queued', 'running')",
            params![now_iso()],
        )?;
        Ok(n)
    }

    // --- Terminal sessions ---

    pub fn insert_terminal_session(&self, s: &TerminalSession) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO terminal_sessions (id, host_ref, user_ref, vault_key_ref, started_at,
                last_activity, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                s.id,
                s.host_ref,
                s.user_ref,
                s.vault_key_ref,
                s.started_at,
                s.last_activity,
                s.status,
            ],
        )?;
        Ok(())
    }

    pub fn touch_terminal_session(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE terminal_sessions SET last_activity = ?1 WHERE id = ?2",
            params![now_iso(), id],
        )?;
        Ok(())
    }

    pub fn close_terminal_session(&self, id: &str, status: TerminalStatus) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE terminal_sessions SET status = ?1, ended_at = ?2 WHERE id = ?3",
            params![status.as_str(), now_iso(), id],
        )?;
        Ok(())
    }

    pub fn interrupt_active_terminal_sessions(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE terminal_sessions SET status = 'interrupted', ended_at = ?1
             WHERE status = 'active'",
            params![now_iso()],
        )?;
        Ok(n)
    }

    // --- Audit log ---

    pub fn insert_audit(&self, a: &AuditLog) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO audit_log (id, user_ref, action, target_type, target_id, meta, ip,
                user_agent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                a.id,
                a.user_ref,
                a.action,
                a.target_type,
                a.target_id,
                a.meta.to_string(),
                a.ip,
                a.user_agent,
                a.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn list_audit(&self, limit: i64, offset: i64) -> Result<Vec<AuditLog>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM audit_log ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt
            .query_map(params![limit, offset], audit_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn prune_audit_older_than_days(&self, days: i64) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let n = conn.execute(
            "DELETE FROM audit_log WHERE created_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(n)
    }

    // --- Webhooks ---

    pub fn create_webhook(&self, w: &CreateWebhook, created_by: i64) -> Result<Webhook, StoreError> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_iso();
        let event_types_json = w.event_types.as_ref().map(|v| serde_json::to_string(v).unwrap());
        conn.execute(
            "INSERT INTO webhooks (id, name, url, secret, enabled, event_types, retry_max,
                timeout, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                id,
                w.name,
                w.url,
                w.secret,
                event_types_json,
                w.retry_max,
                w.timeout,
                created_by,
                now,
            ],
        )?;
        drop(conn);
        self.get_webhook(&id)
    }

    pub fn get_webhook(&self, id: &str) -> Result<Webhook, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM webhooks WHERE id = ?1", params![id], webhook_from_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn list_active_webhooks(&self) -> Result<Vec<Webhook>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM webhooks WHERE enabled = 1")?;
        let rows = stmt
            .query_map([], webhook_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn touch_webhook_triggered(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE webhooks SET last_triggered_at = ?1 WHERE id = ?2",
            params![now_iso(), id],
        )?;
        Ok(())
    }

    pub fn list_webhooks(&self, limit: i64, offset: i64) -> Result<Vec<Webhook>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM webhooks ORDER BY created_at DESC LIMIT ?1 OFFSET ?2")?;
        let rows = stmt
            .query_map(params![limit, offset], webhook_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn update_webhook(&self, id: &str, w: &CreateWebhook, enabled: bool) -> Result<Webhook, StoreError> {
        let conn = self.conn.lock().unwrap();
        let event_types_json = w.event_types.as_ref().map(|v| serde_json::to_string(v).unwrap());
        let n = conn.execute(
            "UPDATE webhooks SET name = ?1, url = ?2, secret = ?3, enabled = ?4, event_types = ?5,
                retry_max = ?6, timeout = ?7, updated_at = ?8 WHERE id = ?9",
            params![
                w.name,
                w.url,
                w.secret,
                enabled as i64,
                event_types_json,
                w.retry_max,
                w.timeout,
                now_iso(),
                id,
            ],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        drop(conn);
        self.get_webhook(id)
    }

    pub fn delete_webhook(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM webhooks WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn list_deliveries(&self, webhook_ref: &str, limit: i64) -> Result<Vec<WebhookDelivery>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM webhook_deliveries WHERE webhook_ref = ?1 ORDER BY delivered_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![webhook_ref, limit], delivery_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn insert_delivery(&self, d: &WebhookDelivery) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO webhook_deliveries (id, webhook_ref, event_id, event_type, status,
                status_code, response_body, error, attempt, delivered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                d.id,
                d.webhook_ref,
                d.event_id,
                d.event_type,
                d.status,
                d.status_code,
                d.response_body,
                d.error,
                d.attempt,
                d.delivered_at,
            ],
        )?;
        Ok(())
    }

    // --- Alerts ---

    pub fn insert_alert(&self, a: &Alert) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO alerts (id, host_ref, metric_type, severity, message, value, threshold,
                is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
            params![
                a.id,
                a.host_ref,
                a.metric_type,
                a.severity,
                a.message,
                a.value,
                a.threshold,
                a.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn list_unread_alerts(&self, limit: i64) -> Result<Vec<Alert>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM alerts WHERE is_read = 0 ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], alert_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_alerts(&self, limit: i64, offset: i64) -> Result<Vec<Alert>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM alerts ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt
            .query_map(params![limit, offset], alert_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn mark_alert_read(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("UPDATE alerts SET is_read = 1 WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // --- Inventory / monitoring ---

    pub fn upsert_inventory(&self, host_ref: i64, facts: &serde_json::Value) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO host_inventory (host_ref, collected_at, facts) VALUES (?1, ?2, ?3)
             ON CONFLICT(host_ref) DO UPDATE SET collected_at = excluded.collected_at,
                facts = excluded.facts",
            params![host_ref, now_iso(), facts.to_string()],
        )?;
        Ok(())
    }

    pub fn get_inventory(&self, host_ref: i64) -> Result<HostInventory, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT host_ref, collected_at, facts FROM host_inventory WHERE host_ref = ?1",
            params![host_ref],
            |row| {
                let facts_str: String = row.get("facts")?;
                Ok(HostInventory {
                    host_ref: row.get("host_ref")?,
                    collected_at: row.get("collected_at")?,
                    facts: serde_json::from_str(&facts_str).unwrap_or(serde_json::Value::Null),
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            other => StoreError::Sqlite(other),
        })
    }

    pub fn insert_monitoring_sample(&self, s: &MonitoringSample) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO monitoring_history (host_ref, metric_type, value, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![s.host_ref, s.metric_type, s.value.to_string(), s.timestamp],
        )?;
        Ok(())
    }

    pub fn prune_monitoring_older_than_days(&self, days: i64) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let n = conn.execute(
            "DELETE FROM monitoring_history WHERE timestamp < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(n)
    }
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        role: row.get("role")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        last_login: row.get("last_login")?,
    })
}

fn task_from_row(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get("id")?,
        host_ref: row.get("host_ref")?,
        user_ref: row.get("user_ref")?,
        command: row.get("command")?,
        status: row.get("status")?,
        exit_code: row.get("exit_code")?,
        stdout: row.get("stdout")?,
        stderr: row.get("stderr")?,
        timeout_seconds: row.get("timeout_seconds")?,
        store_output: row.get::<_, i64>("store_output")? != 0,
        created_at: row.get("created_at")?,
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
    })
}

fn audit_from_row(row: &Row) -> rusqlite::Result<AuditLog> {
    let meta_str: String = row.get("meta")?;
    Ok(AuditLog {
        id: row.get("id")?,
        user_ref: row.get("user_ref")?,
        action: row.get("action")?,
        target_type: row.get("target_type")?,
        target_id: row.get("target_id")?,
        meta: serde_json::from_str(&meta_str).unwrap_or(serde_json::Value::Null),
        ip: row.get("ip")?,
        user_agent: row.get("user_agent")?,
        created_at: row.get("created_at")?,
    })
}

fn webhook_from_row(row: &Row) -> rusqlite::Result<Webhook> {
    let event_types_str: Option<String> = row.get("event_types")?;
    Ok(Webhook {
        id: row.get("id")?,
        name: row.get("name")?,
        url: row.get("url")?,
        secret: row.get("secret")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        event_types: event_types_str.and_then(|s| serde_json::from_str(&s).ok()),
        retry_max: row.get("retry_max")?,
        timeout: row.get("timeout")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        last_triggered_at: row.get("last_triggered_at")?,
    })
}

fn delivery_from_row(row: &Row) -> rusqlite::Result<WebhookDelivery> {
    Ok(WebhookDelivery {
        id: row.get("id")?,
        webhook_ref: row.get("webhook_ref")?,
        event_id: row.get("event_id")?,
        event_type: row.get("event_type")?,
        status: row.get("status")?,
        status_code: row.get("status_code")?,
        response_body: row.get("response_body")?,
        error: row.get("error")?,
        attempt: row.get("attempt")?,
        delivered_at: row.get("delivered_at")?,
    })
}

fn alert_from_row(row: &Row) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: row.get("id")?,
        host_ref: row.get("host_ref")?,
        metric_type: row.get("metric_type")?,
        severity: row.get("severity")?,
        message: row.get("message")?,
        value: row.get("value")?,
        threshold: row.get("threshold")?,
        is_read: row.get::<_, i64>("is_read")? != 0,
        created_at: row.get("created_at")?,
    })
}

/// Escapes a single CSV cell: quotes fields containing a comma, quote, or
/// newline, and apostrophe-prefixes cells a spreadsheet would otherwise
/// interpret as a formula (leading `=`, `+`, `-`, `@`, tab, or CR).
pub fn csv_escape(field: &str) -> String {
    let needs_formula_guard = field
        .chars()
        .next()
        .map(|c| matches!(c, '=' | '+' | '-' | '@' | '\t' | '\r'))
        .unwrap_or(false);
    let guarded = if needs_formula_guard {
        format!("'{field}")
    } else {
        field.to_string()
    };
    if guarded.contains(',') || guarded.contains('"') || guarded.contains('\n') {
        format!("\"{}\"", guarded.replace('"', "\"\""))
    } else {
        guarded
    }
}

pub fn render_csv(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    out.push_str(
        &headers
            .iter()
            .map(|h| csv_escape(h))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push_str("\r\n");
    for row in rows {
        out.push_str(&row.iter().map(|c| csv_escape(c)).collect::<Vec<_>>().join(","));
        out.push_str("\r\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_escape_defuses_formula_prefixes() {
        assert_eq!(csv_escape("=cmd()"), "'=cmd()");
        assert_eq!(csv_escape("+1+1"), "'+1+1");
        assert_eq!(csv_escape("-1"), "'-1");
        assert_eq!(csv_escape("@SUM(A1)"), "'@SUM(A1)");
        assert_eq!(csv_escape("plain"), "plain");
    }

    #[test]
    fn csv_escape_still_quotes_commas_and_quotes() {
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn csv_escape_quotes_after_formula_guard_when_needed() {
        assert_eq!(csv_escape("=a,b"), "\"'=a,b\"");
    }

    #[test]
    fn host_crud_roundtrip() {
        let db = Db::open_in_memory();
        let created = db
            .create_host(&CreateHost {
                name: "web1".into(),
                host: "10.0.0.5".into(),
                port: Some(22),
                username: "ops".into(),
                description: "".into(),
                agent_port: 9100,
                tags: vec!["prod".into()],
                group_ref: None,
                ssh_key_path: None,
                ssh_password: None,
                ssh_key_vault_ref: None,
            })
            .unwrap();
        assert_eq!(created.name, "web1");
        let fetched = db.get_host(created.id).unwrap();
        assert_eq!(fetched.tags, vec!["prod".to_string()]);

        db.update_host_status(created.id, HostStatus::Online).unwrap();
        let fetched = db.get_host(created.id).unwrap();
        assert_eq!(fetched.status, HostStatus::Online);
    }

    #[test]
    fn duplicate_host_name_is_conflict() {
        let db = Db::open_in_memory();
        let h = CreateHost {
            name: "dup".into(),
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
        };
        db.create_host(&h).unwrap();
        let err = db.create_host(&h).unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[test]
    fn interrupt_running_tasks_marks_interrupted() {
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
            store_output: true,
            created_at: now_iso(),
            started_at: None,
            finished_at: None,
        };
        db.insert_task(&task).unwrap();
        let n = db.interrupt_running_tasks().unwrap();
        assert_eq!(n, 1);
        let fetched = db.get_task("t1").unwrap();
        assert_eq!(fetched.status, "interrupted");
    }
}

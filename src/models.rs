use serde::{Deserialize, Serialize};

// --- Hosts ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Unknown,
    Online,
    Offline,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Unknown => "unknown",
            HostStatus::Online => "online",
            HostStatus::Offline => "offline",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "online" => HostStatus::Online,
            "offline" => HostStatus::Offline,
            _ => HostStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub description: String,
    pub agent_port: u16,
    pub tags: Vec<String>,
    pub group_ref: Option<String>,
    pub status: HostStatus,
    pub last_seen: Option<String>,
    #[serde(skip_serializing)]
    pub ssh_key_path: Option<String>,
    #[serde(skip_serializing)]
    pub ssh_password_wrapped: Option<String>,
    pub ssh_key_vault_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateHost {
    pub name: String,
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub group_ref: Option<String>,
    #[serde(default)]
    pub ssh_key_path: Option<String>,
    #[serde(default)]
    pub ssh_password: Option<String>,
    #[serde(default)]
    pub ssh_key_vault_ref: Option<String>,
}

fn default_agent_port() -> u16 {
    9100
}

// --- Vault keys ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Rsa,
    Ed25519,
    Ecdsa,
    Dsa,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Rsa => "rsa",
            KeyType::Ed25519 => "ed25519",
            KeyType::Ecdsa => "ecdsa",
            KeyType::Dsa => "dsa",
        }
    }
}

/// Metadata for a stored key. Never carries plaintext, iv, auth_tag, or ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultKeyMetadata {
    pub id: String,
    pub name: String,
    pub key_type: String,
    pub fingerprint: String,
    pub public_key: Option<String>,
    pub created_by: i64,
    pub created_at: String,
    pub deleted_at: Option<String>,
}

// --- Users & sessions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
    Viewer,
    Auditor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
            Role::Viewer => "viewer",
            Role::Auditor => "auditor",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "operator" => Some(Role::Operator),
            "viewer" => Some(Role::Viewer),
            "auditor" => Some(Role::Auditor),
            _ => None,
        }
    }

    /// Fixed role -> permission expansion.
    pub fn permissions(&self) -> Vec<&'static str> {
        match self {
            Role::Admin => vec!["*"],
            Role::Operator => vec![
                "server:view",
                "server:edit",
                "terminal:use",
                "alerts:view",
                "task:create",
                "task:cancel_own",
            ],
            Role::Viewer => vec!["server:view", "alerts:view"],
            Role::Auditor => vec!["server:view", "alerts:view", "audit:view"],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
    pub last_login: Option<String>,
}

// --- Tasks ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Success,
    Failed,
    Timeout,
    Cancelled,
    Interrupted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Interrupted => "interrupted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub host_ref: i64,
    pub user_ref: i64,
    pub command: String,
    pub status: String,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub timeout_seconds: i64,
    pub store_output: bool,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTask {
    pub command: String,
    #[serde(default)]
    pub timeout_seconds: Option<i64>,
    #[serde(default)]
    pub store_output: Option<bool>,
}

// --- Terminal sessions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStatus {
    Active,
    Closed,
    Timeout,
    Stopped,
    Interrupted,
    Error,
}

impl TerminalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalStatus::Active => "active",
            TerminalStatus::Closed => "closed",
            TerminalStatus::Timeout => "timeout",
            TerminalStatus::Stopped => "stopped",
            TerminalStatus::Interrupted => "interrupted",
            TerminalStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSession {
    pub id: String,
    pub host_ref: i64,
    pub user_ref: i64,
    pub vault_key_ref: Option<String>,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub last_activity: String,
    pub status: String,
}

// --- Audit ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: String,
    pub user_ref: Option<i64>,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub meta: serde_json::Value,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: String,
}

// --- Webhooks ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub enabled: bool,
    pub event_types: Option<Vec<String>>,
    pub retry_max: i64,
    pub timeout: i64,
    pub created_by: i64,
    pub created_at: String,
    pub updated_at: String,
    pub last_triggered_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateWebhook {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub event_types: Option<Vec<String>>,
    #[serde(default = "default_retry_max")]
    pub retry_max: i64,
    #[serde(default = "default_webhook_timeout")]
    pub timeout: i64,
}

fn default_retry_max() -> i64 {
    3
}

fn default_webhook_timeout() -> i64 {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Failed,
    Retrying,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Retrying => "retrying",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: String,
    pub webhook_ref: String,
    pub event_id: String,
    pub event_type: String,
    pub status: String,
    pub status_code: Option<i64>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub attempt: i64,
    pub delivered_at: String,
}

// --- Events ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_id: String,
    pub event_type: String,
    pub user_ref: Option<i64>,
    pub target_type: String,
    pub target_id: String,
    pub meta: serde_json::Value,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub severity: String,
    pub timestamp: String,
}

// --- Inventory ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInventory {
    pub host_ref: i64,
    pub collected_at: String,
    pub facts: serde_json::Value,
}

// --- Monitoring ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSample {
    pub host_ref: i64,
    pub metric_type: String,
    pub value: serde_json::Value,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub host_ref: i64,
    pub metric_type: String,
    pub severity: String,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub is_read: bool,
    pub created_at: String,
}

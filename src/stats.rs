use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{now_iso, Db};
use crate::events::EventBus;
use crate::models::{Alert, AlertSeverity, HostStatus, MonitoringSample};
use crate::ssh_pool::{Credential, PoolKey, SshPool};
use crate::vault::Vault;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame {
    Ping,
    Subscribe { server_ids: Option<Vec<i64>> },
}

struct ClientEntry {
    sender: mpsc::UnboundedSender<Message>,
    subscription: Arc<Mutex<Option<Vec<i64>>>>,
}

/// Periodic metric puller and fan-out broadcaster. The ticker snapshots
/// `clients` under its lock, then iterates and sends outside it, so it
/// never holds the lock while doing SSH I/O or per-client sends.
pub struct StatsBroker {
    pub db: Arc<Db>,
    pub vault: Arc<Vault>,
    pub ssh: Arc<SshPool>,
    pub events: Arc<EventBus>,
    pub poll_interval: Duration,
    pub cpu_threshold: f64,
    pub mem_threshold: f64,
    pub disk_threshold: f64,
    clients: Mutex<HashMap<Uuid, ClientEntry>>,
}

impl StatsBroker {
    pub fn new(
        db: Arc<Db>,
        vault: Arc<Vault>,
        ssh: Arc<SshPool>,
        events: Arc<EventBus>,
        poll_interval: Duration,
        cpu_threshold: f64,
        mem_threshold: f64,
        disk_threshold: f64,
    ) -> Arc<Self> {
        Arc::new(StatsBroker {
            db,
            vault,
            ssh,
            events,
            poll_interval,
            cpu_threshold,
            mem_threshold,
            disk_threshold,
            clients: Mutex::new(HashMap::new()),
        })
    }
}

pub async fn run(broker: Arc<StatsBroker>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "stats websocket listener started");

    let ticker_broker = broker.clone();
    tokio::spawn(async move {
        run_ticker(ticker_broker).await;
    });

    loop {
        let (stream, peer) = listener.accept().await?;
        let broker = broker.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(broker, stream).await {
                warn!(%peer, error = %e, "stats connection ended with error");
            }
        });
    }
}

async fn handle_connection(broker: Arc<StatsBroker>, stream: TcpStream) -> Result<(), String> {
    let mut ws = tokio_tungstenite::accept_async(stream).await.map_err(|e| e.to_string())?;

    let id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = Arc::new(Mutex::new(None));
    broker.clients.lock().await.insert(
        id,
        ClientEntry {
            sender: tx.clone(),
            subscription: subscription.clone(),
        },
    );

    let connected = json!({
        "type": "connection",
        "status": "connected",
        "update_interval": broker.poll_interval.as_secs(),
    });
    let _ = ws.send(Message::Text(connected.to_string())).await;

    let result = loop {
        tokio::select! {
            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Ping) => {
                                let _ = ws.send(Message::Text(json!({"type":"pong"}).to_string())).await;
                            }
                            Ok(ClientFrame::Subscribe { server_ids }) => {
                                *subscription.lock().await = server_ids.clone();
                                let effective: Value = match server_ids {
                                    Some(ids) => json!(ids),
                                    None => json!("all"),
                                };
                                let reply = json!({"type":"subscription_updated","subscribed_to":effective});
                                let _ = ws.send(Message::Text(reply.to_string())).await;
                            }
                            Err(_) => {
                                let _ = ws.send(Message::Text(json!({"type":"error","message":"unrecognized frame"}).to_string())).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Err(e)) => break Err(e.to_string()),
                    _ => {}
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if ws.send(frame).await.is_err() {
                            break Ok(());
                        }
                    }
                    None => break Ok(()),
                }
            }
        }
    };

    broker.clients.lock().await.remove(&id);
    result
}

async fn run_ticker(broker: Arc<StatsBroker>) {
    loop {
        let hosts = match broker.db.list_hosts(1000, 0) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "stats ticker failed to list hosts");
                tokio::time::sleep(broker.poll_interval).await;
                continue;
            }
        };

        let mut data = Vec::with_capacity(hosts.len());
        for host in &hosts {
            let entry = collect_one(&broker, host).await;
            data.push(entry);
        }

        let snapshot: Vec<(Uuid, mpsc::UnboundedSender<Message>, Option<Vec<i64>>)> = {
            let clients = broker.clients.lock().await;
            let mut out = Vec::with_capacity(clients.len());
            for (id, entry) in clients.iter() {
                let sub = entry.subscription.lock().await.clone();
                out.push((*id, entry.sender.clone(), sub));
            }
            out
        };

        let mut dead = Vec::new();
        for (id, sender, subscription) in snapshot {
            let filtered: Vec<&Value> = match &subscription {
                None => data.iter().collect(),
                Some(ids) => data
                    .iter()
                    .filter(|d| d.get("host_ref").and_then(|v| v.as_i64()).map(|hid| ids.contains(&hid)).unwrap_or(false))
                    .collect(),
            };
            let frame = json!({ "type": "stats_update", "data": filtered });
            if sender.send(Message::Text(frame.to_string())).is_err() {
                dead.push(id);
            }
        }
        if !dead.is_empty() {
            let mut clients = broker.clients.lock().await;
            for id in dead {
                clients.remove(&id);
            }
        }

        tokio::time::sleep(broker.poll_interval).await;
    }
}

async fn collect_one(broker: &StatsBroker, host: &crate::models::Host) -> Value {
    let credential = if let Some(vault_ref) = &host.ssh_key_vault_ref {
        match broker.db.vault_decrypt(&broker.vault, vault_ref) {
            Ok(pem) => Credential::KeyPem(pem),
            Err(e) => return host_error_entry(broker, host, &e.to_string()).await,
        }
    } else if let Some(path) = &host.ssh_key_path {
        Credential::KeyFilePath(path.clone())
    } else if let Some(pass) = &host.ssh_password_wrapped {
        Credential::Password(pass.clone())
    } else {
        return host_error_entry(broker, host, "no usable credential").await;
    };

    let key = PoolKey::new(&host.username, &host.host, host.port);
    let command = format!(
        "curl -s -m 5 http://127.0.0.1:{}/stats 2>/dev/null",
        host.agent_port
    );
    let exec_result = broker.ssh.exec(&key, &credential, &command, Duration::from_secs(8)).await;

    let raw = match exec_result {
        Ok((0, stdout, _)) => String::from_utf8_lossy(&stdout).to_string(),
        Ok((code, _, stderr)) => {
            return host_error_entry(
                broker,
                host,
                &format!("agent returned exit code {code}: {}", String::from_utf8_lossy(&stderr)),
            )
            .await
        }
        Err(e) => return host_error_entry(broker, host, &e.to_string()).await,
    };

    let metrics: Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => return host_error_entry(broker, host, &format!("invalid agent response: {e}")).await,
    };

    let _ = broker.db.update_host_status(host.id, HostStatus::Online);
    evaluate_thresholds(broker, host, &metrics);
    record_samples(broker, host, &metrics);

    json!({ "host_ref": host.id, "name": host.name, "metrics": metrics })
}

async fn host_error_entry(broker: &StatsBroker, host: &crate::models::Host, error: &str) -> Value {
    let _ = broker.db.update_host_status(host.id, HostStatus::Offline);
    json!({ "host_ref": host.id, "name": host.name, "error": error })
}

fn evaluate_thresholds(broker: &StatsBroker, host: &crate::models::Host, metrics: &Value) {
    let checks = [
        ("cpu_percent", broker.cpu_threshold),
        ("mem_percent", broker.mem_threshold),
        ("disk_percent", broker.disk_threshold),
    ];
    for (field, threshold) in checks {
        let Some(value) = metrics.get(field).and_then(Value::as_f64) else {
            continue;
        };
        if value <= threshold {
            continue;
        }
        let severity = if value > 95.0 { AlertSeverity::Critical } else { AlertSeverity::Warning };
        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            host_ref: host.id,
            metric_type: field.to_string(),
            severity: severity.as_str().to_string(),
            message: format!("{field} at {value:.1}% exceeds threshold of {threshold:.1}%"),
            value,
            threshold,
            is_read: false,
            created_at: now_iso(),
        };
        if broker.db.insert_alert(&alert).is_ok() {
            broker.events.emit(
                "alert.raised",
                None,
                "host",
                &host.id.to_string(),
                json!({ "metric_type": field, "value": value, "threshold": threshold }),
                severity.as_str(),
            );
        }
    }
}

fn record_samples(broker: &StatsBroker, host: &crate::models::Host, metrics: &Value) {
    for field in ["cpu_percent", "mem_percent", "disk_percent"] {
        if let Some(value) = metrics.get(field) {
            let sample = MonitoringSample {
                host_ref: host.id,
                metric_type: field.to_string(),
                value: value.clone(),
                timestamp: now_iso(),
            };
            let _ = broker.db.insert_monitoring_sample(&sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_frame_parses() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Ping));
    }

    #[test]
    fn subscribe_frame_parses_null_as_all() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"subscribe","server_ids":null}"#).unwrap();
        match frame {
            ClientFrame::Subscribe { server_ids } => assert!(server_ids.is_none()),
            _ => panic!("expected subscribe"),
        }
    }

    #[test]
    fn subscribe_frame_parses_explicit_ids() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"subscribe","server_ids":[1,2,3]}"#).unwrap();
        match frame {
            ClientFrame::Subscribe { server_ids } => assert_eq!(server_ids, Some(vec![1, 2, 3])),
            _ => panic!("expected subscribe"),
        }
    }
}

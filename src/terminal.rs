use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::TokenIssuer;
use crate::db::{now_iso, Db};
use crate::events::EventBus;
use crate::models::{TerminalSession, TerminalStatus};
use crate::ssh_pool::{Credential, PoolKey, SshPool};
use crate::vault::Vault;

const DEFAULT_COLS: u32 = 120;
const DEFAULT_ROWS: u32 = 30;

#[derive(Debug, Deserialize)]
struct HandshakeFrame {
    token: String,
    server_id: i64,
    #[serde(default)]
    ssh_key_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame {
    Input { data: String },
    Resize { cols: u32, rows: u32 },
    Close,
}

/// Shared dependencies every terminal session driver routine needs, bundled
/// so `accept_loop` can clone one `Arc` per connection instead of five.
pub struct TerminalBroker {
    pub db: Arc<Db>,
    pub vault: Arc<Vault>,
    pub ssh: Arc<SshPool>,
    pub events: Arc<EventBus>,
    pub tokens: Arc<TokenIssuer>,
    pub idle_timeout: Duration,
    pub max_sessions: usize,
    pub active: Mutex<usize>,
}

/// Listens on its own port and spawns one driver routine per accepted
/// connection, so no global lock is held across sessions.
pub async fn run(broker: Arc<TerminalBroker>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "terminal websocket listener started");
    loop {
        let (stream, peer) = listener.accept().await?;
        let broker = broker.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(broker, stream, peer).await {
                warn!(%peer, error = %e, "terminal connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    broker: Arc<TerminalBroker>,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<(), String> {
    {
        let mut active = broker.active.lock().await;
        if *active >= broker.max_sessions {
            return Err("terminal session limit reached".into());
        }
        *active += 1;
    }
    let result = drive_session(&broker, stream, peer).await;
    let mut active = broker.active.lock().await;
    *active = active.saturating_sub(1);
    result
}

async fn drive_session(
    broker: &Arc<TerminalBroker>,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<(), String> {
    let mut ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| e.to_string())?;

    let handshake = match ws.next().await {
        Some(Ok(Message::Text(text))) => {
            serde_json::from_str::<HandshakeFrame>(&text).map_err(|e| e.to_string())?
        }
        _ => return Err("expected handshake frame".into()),
    };

    let claims = match broker.tokens.verify(&handshake.token) {
        Ok(c) => c,
        Err(e) => {
            send_error(&mut ws, &e.to_string()).await;
            return Err(e.to_string());
        }
    };
    if claims.role != "admin" && claims.role != "operator" {
        send_error(&mut ws, "terminal access requires admin or operator role").await;
        return Err("forbidden".into());
    }

    let host = broker.db.get_host(handshake.server_id).map_err(|e| e.to_string())?;
    let credential = if let Some(vault_ref) = &handshake.ssh_key_id.clone().or(host.ssh_key_vault_ref.clone()) {
        match broker.db.vault_decrypt(&broker.vault, vault_ref) {
            Ok(pem) => Credential::KeyPem(pem),
            Err(e) => {
                send_error(&mut ws, &format!("vault key unavailable: {e}")).await;
                return Err(e.to_string());
            }
        }
    } else if let Some(path) = &host.ssh_key_path {
        Credential::KeyFilePath(path.clone())
    } else if let Some(pass) = &host.ssh_password_wrapped {
        Credential::Password(pass.clone())
    } else {
        send_error(&mut ws, "host has no usable credential").await;
        return Err("no credential".into());
    };

    let key = PoolKey::new(&host.username, &host.host, host.port);
    let pooled = broker
        .ssh
        .get_session(&key, &credential)
        .await
        .map_err(|e| e.to_string())?;
    let mut channel = pooled
        .handle
        .channel_open_session()
        .await
        .map_err(|e| e.to_string())?;
    channel
        .request_pty(true, "xterm-256color", DEFAULT_COLS, DEFAULT_ROWS, 0, 0, &[])
        .await
        .map_err(|e| e.to_string())?;
    channel.request_shell(true).await.map_err(|e| e.to_string())?;

    let session_id = Uuid::new_v4().to_string();
    let started_at = now_iso();
    let session_row = TerminalSession {
        id: session_id.clone(),
        host_ref: host.id,
        user_ref: claims.user_id,
        vault_key_ref: handshake.ssh_key_id.clone(),
        started_at: started_at.clone(),
        ended_at: None,
        last_activity: started_at.clone(),
        status: TerminalStatus::Active.as_str().into(),
    };
    broker.db.insert_terminal_session(&session_row).map_err(|e| e.to_string())?;
    broker.events.emit(
        "terminal.connect",
        Some(claims.user_id),
        "terminal_session",
        &session_id,
        json!({ "host_ref": host.id, "peer": peer.to_string() }),
        "info",
    );

    send_frame(&mut ws, json!({ "type": "connected", "session_id": session_id })).await;

    let final_status = run_io_loop(broker, &mut ws, &mut channel, &session_id).await;

    let ended_at = now_iso();
    let _ = broker.db.close_terminal_session(&session_id, final_status);
    let duration_ms = elapsed_ms(&started_at, &ended_at);
    broker.events.emit(
        "terminal.close",
        Some(claims.user_id),
        "terminal_session",
        &session_id,
        json!({ "status": final_status.as_str(), "duration_ms": duration_ms }),
        "info",
    );

    Ok(())
}

async fn run_io_loop(
    broker: &Arc<TerminalBroker>,
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
    channel: &mut russh::Channel<russh::client::Msg>,
    session_id: &str,
) -> TerminalStatus {
    loop {
        tokio::select! {
            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let _ = broker.db.touch_terminal_session(session_id);
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Input { data }) => {
                                if channel.data(data.as_bytes()).await.is_err() {
                                    return TerminalStatus::Error;
                                }
                            }
                            Ok(ClientFrame::Resize { cols, rows }) => {
                                let _ = channel.window_change(cols, rows, 0, 0).await;
                            }
                            Ok(ClientFrame::Close) => return TerminalStatus::Closed,
                            Err(e) => {
                                debug!(session_id, error = %e, "ignoring malformed terminal frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return TerminalStatus::Closed,
                    Some(Err(e)) => {
                        error!(session_id, error = %e, "terminal websocket error");
                        return TerminalStatus::Error;
                    }
                    _ => {}
                }
            }
            channel_msg = channel.wait() => {
                match channel_msg {
                    Some(russh::ChannelMsg::Data { data }) => {
                        let encoded = String::from_utf8_lossy(&data).to_string();
                        send_frame(ws, json!({ "type": "output", "data": encoded })).await;
                    }
                    Some(russh::ChannelMsg::Eof) | Some(russh::ChannelMsg::Close) | None => {
                        send_frame(ws, json!({ "type": "disconnected", "reason": "remote shell exited" })).await;
                        return TerminalStatus::Closed;
                    }
                    _ => {}
                }
            }
            _ = tokio::time::sleep(broker.idle_timeout) => {
                send_frame(ws, json!({ "type": "error", "message": "idle timeout" })).await;
                return TerminalStatus::Timeout;
            }
        }
    }
}

async fn send_frame(ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>, frame: serde_json::Value) {
    let _ = ws.send(Message::Text(frame.to_string())).await;
}

async fn send_error(ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>, message: &str) {
    send_frame(ws, json!({ "type": "error", "message": message })).await;
}

fn elapsed_ms(started_at: &str, ended_at: &str) -> i64 {
    let parse = |s: &str| chrono::DateTime::parse_from_rfc3339(s).ok();
    match (parse(started_at), parse(ended_at)) {
        (Some(start), Some(end)) => (end - start).num_milliseconds(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_frame_parses_with_optional_key_id() {
        let raw = r#"{"token":"t","server_id":3}"#;
        let frame: HandshakeFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.server_id, 3);
        assert!(frame.ssh_key_id.is_none());
    }

    #[test]
    fn client_frame_discriminates_on_type_tag() {
        let input: ClientFrame = serde_json::from_str(r#"{"type":"input","data":"ls\n"}"#).unwrap();
        assert!(matches!(input, ClientFrame::Input { .. }));
        let resize: ClientFrame = serde_json::from_str(r#"{"type":"resize","cols":80,"rows":24}"#).unwrap();
        assert!(matches!(resize, ClientFrame::Resize { cols: 80, rows: 24 }));
        let close: ClientFrame = serde_json::from_str(r#"{"type":"close"}"#).unwrap();
        assert!(matches!(close, ClientFrame::Close));
    }

    #[test]
    fn elapsed_ms_computes_positive_duration() {
        let ms = elapsed_ms("2026-01-01T00:00:00+00:00", "2026-01-01T00:00:05+00:00");
        assert_eq!(ms, 5000);
    }
}

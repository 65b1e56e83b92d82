use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use russh::client::{self, Handle};
use russh_keys::decode_secret_key;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::SshError;

/// Accept-any host-key policy, chosen over TOFU pinning for this
/// control plane's threat model; see DESIGN.md for the tradeoff.
pub struct AcceptAnyHandler;

#[async_trait::async_trait]
impl client::Handler for AcceptAnyHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

#[derive(Clone, Eq, Hash, PartialEq, Debug)]
pub struct PoolKey {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl PoolKey {
    pub fn new(user: &str, host: &str, port: u16) -> Self {
        PoolKey {
            user: user.to_string(),
            host: host.to_string(),
            port,
        }
    }

    pub fn as_label(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

struct PoolEntry {
    handle: Arc<Handle<AcceptAnyHandler>>,
    last_used: Instant,
    active_streams: Arc<AtomicUsize>,
}

/// Credential material to authenticate an SSH connection, tried in
/// order: vault-stored key PEM, then a key file path, then a password.
pub enum Credential {
    KeyPem(String),
    KeyFilePath(String),
    Password(String),
}

pub struct SshPool {
    entries: Mutex<HashMap<PoolKey, PoolEntry>>,
    idle_timeout: Duration,
    max_size: usize,
    connect_timeout: Duration,
    auth_timeout: Duration,
}

pub struct PooledSession {
    pub handle: Arc<Handle<AcceptAnyHandler>>,
    _guard: ActiveStreamGuard,
}

struct ActiveStreamGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for ActiveStreamGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

const MAX_STREAMS_PER_SESSION: usize = 4;

impl SshPool {
    pub fn new(max_size: usize, idle_timeout: Duration, connect_timeout: Duration, auth_timeout: Duration) -> Self {
        SshPool {
            entries: Mutex::new(HashMap::new()),
            idle_timeout,
            max_size,
            connect_timeout,
            auth_timeout,
        }
    }

    fn sweep(entries: &mut HashMap<PoolKey, PoolEntry>, idle_timeout: Duration) {
        let now = Instant::now();
        entries.retain(|_, e| {
            let idle = now.duration_since(e.last_used) > idle_timeout;
            let active = e.active_streams.load(Ordering::Relaxed);
            !(idle && active == 0)
        });
    }

    fn enforce_size(entries: &mut HashMap<PoolKey, PoolEntry>, max_size: usize) {
        while entries.len() >= max_size {
            let victim = entries
                .iter()
                .filter(|(_, e)| e.active_streams.load(Ordering::Relaxed) == 0)
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match victim {
                Some(k) => {
                    entries.remove(&k);
                }
                None => break,
            }
        }
    }

    /// Returns a pooled or freshly-connected session for `key`, opening a
    /// second connection when the pooled one is already fanning out
    /// `MAX_STREAMS_PER_SESSION` concurrent channels.
    pub async fn get_session(
        &self,
        key: &PoolKey,
        credential: &Credential,
    ) -> Result<PooledSession, SshError> {
        {
            let mut entries = self.entries.lock().await;
            Self::sweep(&mut entries, self.idle_timeout);
            if let Some(entry) = entries.get_mut(key) {
                let active = entry.active_streams.load(Ordering::Relaxed);
                if active < MAX_STREAMS_PER_SESSION {
                    entry.last_used = Instant::now();
                    entry.active_streams.fetch_add(1, Ordering::Relaxed);
                    return Ok(PooledSession {
                        handle: Arc::clone(&entry.handle),
                        _guard: ActiveStreamGuard {
                            counter: Arc::clone(&entry.active_streams),
                        },
                    });
                }
                debug!(target = %key.as_label(), active, "ssh session at max streams, opening a new connection");
            }
        }

        let handle = Arc::new(self.connect(key, credential).await?);
        let active_streams = Arc::new(AtomicUsize::new(1));

        let mut entries = self.entries.lock().await;
        Self::enforce_size(&mut entries, self.max_size);
        entries.insert(
            key.clone(),
            PoolEntry {
                handle: Arc::clone(&handle),
                last_used: Instant::now(),
                active_streams: Arc::clone(&active_streams),
            },
        );

        Ok(PooledSession {
            handle,
            _guard: ActiveStreamGuard {
                counter: active_streams,
            },
        })
    }

    async fn connect(&self, key: &PoolKey, credential: &Credential) -> Result<Handle<AcceptAnyHandler>, SshError> {
        let config = Arc::new(client::Config::default());
        debug!(target = %key.as_label(), "ssh connecting");
        let mut session = tokio::time::timeout(
            self.connect_timeout,
            client::connect(config, (key.host.as_str(), key.port), AcceptAnyHandler),
        )
        .await
        .map_err(|_| SshError::ConnectTimeout)?
        .map_err(|e| SshError::Protocol(e.to_string()))?;

        let auth_fut = async {
            match credential {
                Credential::KeyPem(pem) => {
                    let key_pair = decode_secret_key(pem, None)
                        .map_err(|e| SshError::AuthFailed(format!("invalid key material: {e}")))?;
                    let ok = session
                        .authenticate_publickey(&key.user, Arc::new(key_pair))
                        .await
                        .map_err(|e| SshError::Protocol(e.to_string()))?;
                    if !ok {
                        return Err(SshError::AuthFailed("public key rejected".into()));
                    }
                    Ok(())
                }
                Credential::KeyFilePath(path) => {
                    let expanded = shellexpand_home(path);
                    let pem = tokio::fs::read_to_string(&expanded)
                        .await
                        .map_err(SshError::Io)?;
                    let key_pair = decode_secret_key(&pem, None)
                        .map_err(|e| SshError::AuthFailed(format!("invalid key file: {e}")))?;
                    let ok = session
                        .authenticate_publickey(&key.user, Arc::new(key_pair))
                        .await
                        .map_err(|e| SshError::Protocol(e.to_string()))?;
                    if !ok {
                        return Err(SshError::AuthFailed("public key rejected".into()));
                    }
                    Ok(())
                }
                Credential::Password(pass) => {
                    let ok = session
                        .authenticate_password(&key.user, pass)
                        .await
                        .map_err(|e| SshError::Protocol(e.to_string()))?;
                    if !ok {
                        return Err(SshError::AuthFailed("password rejected".into()));
                    }
                    Ok(())
                }
            }
        };
        tokio::time::timeout(self.auth_timeout, auth_fut)
            .await
            .map_err(|_| SshError::AuthTimeout)??;

        debug!(target = %key.as_label(), "ssh authenticated");
        Ok(session)
    }

    /// Runs a single command to completion over a pooled session and
    /// returns (exit_code, stdout, stderr).
    pub async fn exec(
        &self,
        key: &PoolKey,
        credential: &Credential,
        command: &str,
        timeout: Duration,
    ) -> Result<(i32, Vec<u8>, Vec<u8>), SshError> {
        let session = self.get_session(key, credential).await?;
        let mut channel = session
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::Protocol(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::Protocol(e.to_string()))?;

        let run = async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut exit_code = -1i32;
            loop {
                match channel.wait().await {
                    Some(russh::ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                    Some(russh::ChannelMsg::ExtendedData { data, ext: 1 }) => {
                        stderr.extend_from_slice(&data)
                    }
                    Some(russh::ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = exit_status as i32;
                    }
                    Some(russh::ChannelMsg::Eof) | Some(russh::ChannelMsg::Close) | None => break,
                    _ => {}
                }
            }
            Ok::<_, SshError>((exit_code, stdout, stderr))
        };

        tokio::time::timeout(timeout, run)
            .await
            .map_err(|_| SshError::Protocol(format!("command timed out after {}s", timeout.as_secs())))?
    }

    /// Liveness probe used by the lifecycle manager's periodic health
    /// sweep: a zero-argument channel open/close with no command exec.
    pub async fn probe(&self, key: &PoolKey, credential: &Credential) -> bool {
        match self.get_session(key, credential).await {
            Ok(session) => session.handle.channel_open_session().await.is_ok(),
            Err(e) => {
                warn!(target = %key.as_label(), error = %e, "ssh liveness probe failed");
                false
            }
        }
    }

    pub async fn close_all(&self) {
        let mut entries = self.entries.lock().await;
        entries.clear();
    }
}

fn shellexpand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_key_label_matches_user_host_port_shape() {
        let k = PoolKey::new("ops", "10.0.0.5", 22);
        assert_eq!(k.as_label(), "ops@10.0.0.5:22");
    }

    #[test]
    fn expands_leading_tilde_from_home() {
        unsafe {
            std::env::set_var("HOME", "/home/ops");
        }
        assert_eq!(shellexpand_home("~/.ssh/id_ed25519"), "/home/ops/.ssh/id_ed25519");
        assert_eq!(shellexpand_home("/abs/path"), "/abs/path");
    }
}

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::broadcast;
use tracing::{error, warn};
use uuid::Uuid;

use crate::db::{now_iso, Db};
use crate::error::WebhookError;
use crate::models::{DeliveryStatus, DomainEvent, WebhookDelivery};

type HmacSha256 = Hmac<Sha256>;

/// Blocks resolution to loopback, private, link-local, CGNAT, and
/// multicast ranges before any outbound webhook POST.
pub fn is_safe_ip(mut ip: IpAddr) -> bool {
    if let IpAddr::V6(ipv6) = ip {
        if let Some(mapped) = ipv6.to_ipv4_mapped() {
            ip = IpAddr::V4(mapped);
        } else if let Some(compat) = ipv6.to_ipv4() {
            ip = IpAddr::V4(compat);
        }
    }

    if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() {
        return false;
    }

    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            let is_private = o[0] == 10
                || o[0] == 0
                || o[0] == 255
                || (o[0] == 172 && (16..=31).contains(&o[1]))
                || (o[0] == 192 && o[1] == 168)
                || (o[0] == 169 && o[1] == 254)
                || (o[0] == 100 && (64..=127).contains(&o[1]));
            !is_private
        }
        IpAddr::V6(v6) => {
            let seg = v6.segments();
            let is_private = (seg[0] & 0xfe00) == 0xfc00 || (seg[0] & 0xffc0) == 0xfe80;
            !is_private
        }
    }
}

async fn resolve_and_check(url: &reqwest::Url, allow_local: bool) -> Result<(), WebhookError> {
    if allow_local {
        return Ok(());
    }
    let host = url
        .host_str()
        .ok_or_else(|| WebhookError::InvalidUrl("missing host".into()))?;
    let port = url.port_or_known_default().unwrap_or(443);
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| WebhookError::InvalidUrl(format!("dns resolution failed: {e}")))?;
    let mut any_safe = false;
    for addr in addrs {
        if is_safe_ip(addr.ip()) {
            any_safe = true;
        } else {
            warn!(host, ip = %addr.ip(), "webhook target resolved to a disallowed address");
        }
    }
    if !any_safe {
        return Err(WebhookError::UnsafeTarget);
    }
    Ok(())
}

fn event_matches(event: &DomainEvent, event_types: &Option<Vec<String>>) -> bool {
    match event_types {
        None => true,
        Some(types) => types.iter().any(|t| t == &event.event_type || t == "*"),
    }
}

/// Subscribes to the event bus and delivers matching events to every
/// enabled webhook, with an SSRF guard and bounded retry/backoff.
pub fn spawn_dispatcher(
    db: Arc<Db>,
    mut receiver: broadcast::Receiver<DomainEvent>,
    allow_local: bool,
    timeout: Duration,
) {
    tokio::spawn(async move {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build webhook http client");

        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Err(e) = deliver_to_all(&db, &client, &event, allow_local) {
                        error!(error = %e, "webhook delivery pass failed");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "webhook dispatcher lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("webhook dispatcher exiting: event bus closed");
                    break;
                }
            }
        }
    });
}

fn deliver_to_all(
    db: &Arc<Db>,
    client: &reqwest::Client,
    event: &DomainEvent,
    allow_local: bool,
) -> Result<(), WebhookError> {
    let webhooks = db.list_active_webhooks()?;
    for webhook in webhooks {
        if !event_matches(event, &webhook.event_types) {
            continue;
        }

        let body = serde_json::json!({
            "event_id": event.event_id,
            "event_type": event.event_type,
            "target_type": event.target_type,
            "target_id": event.target_id,
            "meta": event.meta,
            "severity": event.severity,
            "timestamp": event.timestamp,
        })
        .to_string();

        let db = db.clone();
        let client = client.clone();
        let event = event.clone();
        tokio::spawn(async move {
            deliver_with_retry(&db, &client, &webhook, &event, &body, allow_local).await;
        });
    }
    Ok(())
}

async fn deliver_with_retry(
    db: &Db,
    client: &reqwest::Client,
    webhook: &crate::models::Webhook,
    event: &DomainEvent,
    body: &str,
    allow_local: bool,
) {
    let url = match reqwest::Url::parse(&webhook.url) {
        Ok(u) => u,
        Err(e) => {
            warn!(webhook = %webhook.id, error = %e, "invalid webhook url");
            return;
        }
    };
    if let Err(e) = resolve_and_check(&url, allow_local).await {
        warn!(webhook = %webhook.id, error = %e, "refusing to deliver to unsafe webhook target");
        record_delivery(db, webhook, event, DeliveryStatus::Failed, None, None, Some(e.to_string()), 0);
        return;
    }

    let max_attempts = webhook.retry_max.max(1) as u32;
    for attempt in 1..=max_attempts {
        let mut request = client
            .post(url.clone())
            .header("Content-Type", "application/json")
            .header("X-Fleetctl-Event", &event.event_type)
            .header("X-Fleetctl-Webhook-Id", &webhook.id)
            .header("X-Fleetctl-Delivery-Id", Uuid::new_v4().to_string());

        if let Some(secret) = &webhook.secret {
            if let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) {
                mac.update(body.as_bytes());
                let sig = hex::encode(mac.finalize().into_bytes());
                request = request.header("X-sm-signature", format!("sha256={sig}"));
            }
        }

        match request.body(body.to_string()).send().await {
            Ok(resp) if resp.status().is_success() => {
                let status = resp.status().as_u16() as i64;
                let response_body = read_truncated_body(resp).await;
                let _ = db.touch_webhook_triggered(&webhook.id);
                record_delivery(db, webhook, event, DeliveryStatus::Success, Some(status), response_body, None, attempt);
                return;
            }
            Ok(resp) => {
                let status = resp.status().as_u16() as i64;
                let response_body = read_truncated_body(resp).await;
                if attempt == max_attempts {
                    record_delivery(db, webhook, event, DeliveryStatus::Failed, Some(status), response_body, Some(format!("http {status}")), attempt);
                }
            }
            Err(e) => {
                if attempt == max_attempts {
                    record_delivery(db, webhook, event, DeliveryStatus::Failed, None, None, Some(e.to_string()), attempt);
                }
            }
        }

        if attempt < max_attempts {
            let backoff = Duration::from_millis(200 * 2u64.pow(attempt - 1));
            tokio::time::sleep(backoff).await;
        }
    }
}

const RESPONSE_BODY_MAX_BYTES: usize = 10 * 1024;

async fn read_truncated_body(resp: reqwest::Response) -> Option<String> {
    match resp.text().await {
        Ok(text) => {
            let bytes = text.as_bytes();
            if bytes.len() <= RESPONSE_BODY_MAX_BYTES {
                Some(text)
            } else {
                Some(String::from_utf8_lossy(&bytes[..RESPONSE_BODY_MAX_BYTES]).to_string())
            }
        }
        Err(_) => None,
    }
}

fn record_delivery(
    db: &Db,
    webhook: &crate::models::Webhook,
    event: &DomainEvent,
    status: DeliveryStatus,
    status_code: Option<i64>,
    response_body: Option<String>,
    error: Option<String>,
    attempt: u32,
) {
    let delivery = WebhookDelivery {
        id: Uuid::new_v4().to_string(),
        webhook_ref: webhook.id.clone(),
        event_id: event.event_id.clone(),
        event_type: event.event_type.clone(),
        status: status.as_str().to_string(),
        status_code,
        response_body,
        error,
        attempt: attempt as i64,
        delivered_at: now_iso(),
    };
    if let Err(e) = db.insert_delivery(&delivery) {
        error!(webhook = %webhook.id, error = %e, "failed to persist webhook delivery row");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn rejects_loopback_and_private_ranges() {
        assert!(!is_safe_ip(IpAddr::from_str("127.0.0.1").unwrap()));
        assert!(!is_safe_ip(IpAddr::from_str("10.0.0.1").unwrap()));
        assert!(!is_safe_ip(IpAddr::from_str("192.168.1.1").unwrap()));
        assert!(!is_safe_ip(IpAddr::from_str("169.254.169.254").unwrap()));
        assert!(!is_safe_ip(IpAddr::from_str("100.64.0.1").unwrap()));
        assert!(!is_safe_ip(IpAddr::from_str("fc00::1").unwrap()));
        assert!(!is_safe_ip(IpAddr::from_str("fe80::1").unwrap()));
    }

    #[test]
    fn unwraps_ipv4_mapped_ipv6_before_checking() {
        assert!(!is_safe_ip(IpAddr::from_str("::ffff:127.0.0.1").unwrap()));
        assert!(!is_safe_ip(IpAddr::from_str("::ffff:10.0.0.1").unwrap()));
    }

    #[test]
    fn allows_public_addresses() {
        assert!(is_safe_ip(IpAddr::from_str("8.8.8.8").unwrap()));
        assert!(is_safe_ip(IpAddr::from_str("2001:4860:4860::8888").unwrap()));
    }

    #[test]
    fn event_type_filter_matches_wildcard_and_exact() {
        let event = DomainEvent {
            event_id: "e1".into(),
            event_type: "task.completed".into(),
            user_ref: None,
            target_type: "task".into(),
            target_id: "t1".into(),
            meta: serde_json::json!({}),
            ip: None,
            user_agent: None,
            severity: "info".into(),
            timestamp: now_iso(),
        };
        assert!(event_matches(&event, &None));
        assert!(event_matches(&event, &Some(vec!["*".into()])));
        assert!(event_matches(&event, &Some(vec!["task.completed".into()])));
        assert!(!event_matches(&event, &Some(vec!["host.offline".into()])));
    }
}

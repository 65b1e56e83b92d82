// Route decomposition by domain area; shared request guards live here,
// route functions in submodules.

mod alerts;
mod audit;
mod auth;
mod hosts;
mod system;
mod tasks;
mod vault;
mod webhooks;

pub use alerts::{list_alerts, mark_alert_read};
pub use audit::{export_audit_logs_csv, list_audit_logs};
pub use auth::{login, me, setup};
pub use hosts::{collect_inventory, create_host, delete_host, get_host, get_inventory, list_hosts};
pub use system::{health, metrics, not_found, ready, too_many_requests};
pub use tasks::{cancel_task, get_task, list_tasks, submit_task};
pub use vault::{create_vault_key, delete_vault_key, list_vault_keys};
pub use webhooks::{create_webhook, delete_webhook, list_webhook_deliveries, list_webhooks, update_webhook};

use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};

use crate::auth::{has_permission, JwtClaimsData};
use crate::auth::TokenIssuer;
use crate::error::ApiError;

/// Client address, preferring `X-Forwarded-For` since the service
/// usually sits behind a reverse proxy.
pub struct ClientIp(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = req
            .headers()
            .get_one("X-Forwarded-For")
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| req.remote().map(|r| r.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}

/// Verified JWT claims for the caller: a full role/permission
/// principal, not just a pass/fail admin key check.
pub struct AuthUser(pub JwtClaimsData);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = ApiError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(issuer) = req.rocket().state::<TokenIssuer>() else {
            return Outcome::Error((
                Status::InternalServerError,
                ApiError::new(Status::InternalServerError, "token issuer not configured"),
            ));
        };
        let token = req
            .headers()
            .get_one("Authorization")
            .and_then(|h| h.strip_prefix("Bearer "));
        let Some(token) = token else {
            return Outcome::Error((
                Status::Unauthorized,
                ApiError::new(Status::Unauthorized, "missing bearer token"),
            ));
        };
        match issuer.verify(token) {
            Ok(claims) => Outcome::Success(AuthUser(claims)),
            Err(e) => Outcome::Error((Status::Unauthorized, e.into())),
        }
    }
}

impl AuthUser {
    pub fn require(&self, permission: &str) -> Result<(), ApiError> {
        if has_permission(&self.0.role, permission) {
            Ok(())
        } else {
            Err(ApiError::new(Status::Forbidden, format!("missing permission: {permission}")))
        }
    }
}

/// Applies the general-bucket rate limit for `bucket`, returning the
/// standard 429 response shape on rejection. Route handlers that need a
/// stricter bucket (e.g. `login`) pass its name explicitly.
pub fn enforce_rate_limit(
    limiter: &crate::rate_limit::RateLimiter,
    config: &crate::rate_limit::RateLimitConfig,
    bucket: &str,
    ip: &str,
) -> Result<(), crate::rate_limit::RateLimitedError> {
    if limiter.is_blocked(ip) {
        return Err(crate::rate_limit::RateLimitedError {
            info: crate::rate_limit::RateLimitInfo {
                allowed: false,
                limit: 0,
                remaining: 0,
                retry_after_secs: 900,
            },
            message: "ip address is blocked".into(),
        });
    }
    let (max, window) = config.limit_for(bucket);
    let info = limiter.check_with_info(&format!("{bucket}:{ip}"), max, window);
    if info.allowed {
        Ok(())
    } else {
        Err(crate::rate_limit::RateLimitedError {
            info,
            message: format!("rate limit exceeded for {bucket}"),
        })
    }
}

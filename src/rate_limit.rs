use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rocket::http::{Header, Status};
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::Request;

/// General + login two-bucket rate limit scheme, plus per-endpoint
/// overrides keyed by route name.
pub struct RateLimitConfig {
    pub general_max: usize,
    pub general_window_secs: u64,
    pub login_max: usize,
    pub login_window_secs: u64,
    pub endpoint_overrides: HashMap<String, (usize, u64)>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            general_max: 300,
            general_window_secs: 60,
            login_max: 10,
            login_window_secs: 60,
            endpoint_overrides: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("RATE_LIMIT_GENERAL_PER_MIN") {
            if let Ok(n) = v.parse() {
                cfg.general_max = n;
            }
        }
        if let Ok(v) = std::env::var("RATE_LIMIT_LOGIN_PER_MIN") {
            if let Ok(n) = v.parse() {
                cfg.login_max = n;
            }
        }
        cfg
    }

    pub fn limit_for(&self, bucket: &str) -> (usize, u64) {
        if let Some(&(max, window)) = self.endpoint_overrides.get(bucket) {
            return (max, window);
        }
        match bucket {
            "login" => (self.login_max, self.login_window_secs),
            _ => (self.general_max, self.general_window_secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    pub retry_after_secs: u64,
}

/// Sliding-window limiter keyed by `"bucket:ip"`, plus a standing IP
/// block list that short-circuits every bucket check.
const DEFAULT_BLOCK_DURATION: Duration = Duration::from_secs(900);

pub struct RateLimiter {
    windows: Mutex<HashMap<String, Vec<Instant>>>,
    blocked_ips: Mutex<HashMap<String, Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            windows: Mutex::new(HashMap::new()),
            blocked_ips: Mutex::new(HashMap::new()),
        }
    }

    /// Blocks `ip` for the default 15-minute window, used after
    /// login-bucket exhaustion.
    pub fn block_ip(&self, ip: &str) {
        self.block_ip_for(ip, DEFAULT_BLOCK_DURATION);
    }

    pub fn block_ip_for(&self, ip: &str, duration: Duration) {
        let expires_at = Instant::now() + duration;
        self.blocked_ips.lock().unwrap().insert(ip.to_string(), expires_at);
    }

    pub fn unblock_ip(&self, ip: &str) {
        self.blocked_ips.lock().unwrap().remove(ip);
    }

    pub fn is_blocked(&self, ip: &str) -> bool {
        let mut blocked = self.blocked_ips.lock().unwrap();
        match blocked.get(ip) {
            Some(expires_at) if *expires_at > Instant::now() => true,
            Some(_) => {
                blocked.remove(ip);
                false
            }
            None => false,
        }
    }

    pub fn check(&self, key: &str, max: usize, window_secs: u64) -> bool {
        self.check_with_info(key, max, window_secs).allowed
    }

    pub fn check_with_info(&self, key: &str, max: usize, window_secs: u64) -> RateLimitInfo {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let window = Duration::from_secs(window_secs);

        let entries = windows.entry(key.to_string()).or_default();
        entries.retain(|t| now.duration_since(*t) < window);

        if entries.len() >= max {
            let oldest = entries.iter().min().copied().unwrap_or(now);
            let elapsed = now.duration_since(oldest);
            let retry_after = if elapsed < window {
                (window - elapsed).as_secs() + 1
            } else {
                1
            };
            return RateLimitInfo {
                allowed: false,
                limit: max,
                remaining: 0,
                retry_after_secs: retry_after,
            };
        }

        entries.push(now);
        RateLimitInfo {
            allowed: true,
            limit: max,
            remaining: max - entries.len(),
            retry_after_secs: 0,
        }
    }
}

pub struct RateLimited<T> {
    pub inner: Json<T>,
    pub info: RateLimitInfo,
}

impl<T> RateLimited<T> {
    pub fn new(inner: Json<T>, info: RateLimitInfo) -> Self {
        RateLimited { inner, info }
    }
}

impl<'r, 'o: 'r, T: serde::Serialize + 'o> Responder<'r, 'o> for RateLimited<T> {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        Response::build_from(self.inner.respond_to(req)?)
            .header(Header::new("X-RateLimit-Limit", self.info.limit.to_string()))
            .header(Header::new("X-RateLimit-Remaining", self.info.remaining.to_string()))
            .header(Header::new("X-RateLimit-Reset", self.info.retry_after_secs.to_string()))
            .ok()
    }
}

pub struct RateLimitedError {
    pub info: RateLimitInfo,
    pub message: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for RateLimitedError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let body = Json(serde_json::json!({
            "error": self.message,
            "retry_after_secs": self.info.retry_after_secs,
        }));
        Response::build_from(body.respond_to(req)?)
            .status(Status::TooManyRequests)
            .header(Header::new("X-RateLimit-Limit", self.info.limit.to_string()))
            .header(Header::new("X-RateLimit-Remaining", "0"))
            .header(Header::new("Retry-After", self.info.retry_after_secs.to_string()))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_then_blocks() {
        let rl = RateLimiter::new();
        for _ in 0..3 {
            assert!(rl.check("login:1.2.3.4", 3, 60));
        }
        assert!(!rl.check("login:1.2.3.4", 3, 60));
    }

    #[test]
    fn buckets_are_independent_by_key() {
        let rl = RateLimiter::new();
        assert!(rl.check("general:1.2.3.4", 1, 60));
        assert!(rl.check("login:1.2.3.4", 1, 60));
    }

    #[test]
    fn ip_block_list_is_independent_of_windows() {
        let rl = RateLimiter::new();
        assert!(!rl.is_blocked("9.9.9.9"));
        rl.block_ip("9.9.9.9");
        assert!(rl.is_blocked("9.9.9.9"));
        rl.unblock_ip("9.9.9.9");
        assert!(!rl.is_blocked("9.9.9.9"));
    }

    #[test]
    fn block_ip_for_expires_after_duration() {
        let rl = RateLimiter::new();
        rl.block_ip_for("9.9.9.9", Duration::from_millis(10));
        assert!(rl.is_blocked("9.9.9.9"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(!rl.is_blocked("9.9.9.9"));
    }

    #[test]
    fn login_bucket_is_stricter_than_general_by_default() {
        let cfg = RateLimitConfig::default();
        let (login_max, _) = cfg.limit_for("login");
        let (general_max, _) = cfg.limit_for("other");
        assert!(login_max < general_max);
    }
}

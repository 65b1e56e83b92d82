use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::{json, Value};

/// In-process counter/gauge registry exposed at `/api/metrics`, built
/// as a plain struct plus `Mutex`/atomics (see `RateLimiter`) rather
/// than a dedicated metrics-registry crate.
pub struct Metrics {
    requests_total: Mutex<HashMap<(String, u16), u64>>,
    tasks_submitted: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    webhook_deliveries_total: AtomicU64,
    webhook_deliveries_failed: AtomicU64,
    terminal_sessions_active: AtomicI64,
    queue_depth: AtomicI64,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            requests_total: Mutex::new(HashMap::new()),
            tasks_submitted: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            webhook_deliveries_total: AtomicU64::new(0),
            webhook_deliveries_failed: AtomicU64::new(0),
            terminal_sessions_active: AtomicI64::new(0),
            queue_depth: AtomicI64::new(0),
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, route: &str, status: u16) {
        let mut map = self.requests_total.lock().unwrap();
        *map.entry((route.to_string(), status)).or_insert(0) += 1;
    }

    pub fn task_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_completed(&self, ok: bool) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn webhook_delivered(&self, ok: bool) {
        self.webhook_deliveries_total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.webhook_deliveries_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn terminal_session_opened(&self) {
        self.terminal_sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn terminal_session_closed(&self) {
        self.terminal_sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn set_queue_depth(&self, depth: i64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn to_json(&self) -> Value {
        let by_route: Vec<Value> = self
            .requests_total
            .lock()
            .unwrap()
            .iter()
            .map(|((route, status), count)| json!({"route": route, "status": status, "count": count}))
            .collect();
        json!({
            "requests_total": by_route,
            "tasks_submitted": self.tasks_submitted.load(Ordering::Relaxed),
            "tasks_completed": self.tasks_completed.load(Ordering::Relaxed),
            "tasks_failed": self.tasks_failed.load(Ordering::Relaxed),
            "webhook_deliveries_total": self.webhook_deliveries_total.load(Ordering::Relaxed),
            "webhook_deliveries_failed": self.webhook_deliveries_failed.load(Ordering::Relaxed),
            "terminal_sessions_active": self.terminal_sessions_active.load(Ordering::Relaxed),
            "queue_depth": self.queue_depth.load(Ordering::Relaxed),
        })
    }

    /// Renders the same counters as Prometheus text exposition format,
    /// selected when the request's `Accept` header prefers `text/plain`.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        out.push_str("# HELP fleetctl_requests_total HTTP requests by route and status\n");
        out.push_str("# TYPE fleetctl_requests_total counter\n");
        for ((route, status), count) in self.requests_total.lock().unwrap().iter() {
            out.push_str(&format!(
                "fleetctl_requests_total{{route=\"{route}\",status=\"{status}\"}} {count}\n"
            ));
        }
        out.push_str("# TYPE fleetctl_tasks_submitted counter\n");
        out.push_str(&format!("fleetctl_tasks_submitted {}\n", self.tasks_submitted.load(Ordering::Relaxed)));
        out.push_str("# TYPE fleetctl_tasks_completed counter\n");
        out.push_str(&format!("fleetctl_tasks_completed {}\n", self.tasks_completed.load(Ordering::Relaxed)));
        out.push_str("# TYPE fleetctl_tasks_failed counter\n");
        out.push_str(&format!("fleetctl_tasks_failed {}\n", self.tasks_failed.load(Ordering::Relaxed)));
        out.push_str("# TYPE fleetctl_webhook_deliveries_total counter\n");
        out.push_str(&format!("fleetctl_webhook_deliveries_total {}\n", self.webhook_deliveries_total.load(Ordering::Relaxed)));
        out.push_str("# TYPE fleetctl_webhook_deliveries_failed counter\n");
        out.push_str(&format!("fleetctl_webhook_deliveries_failed {}\n", self.webhook_deliveries_failed.load(Ordering::Relaxed)));
        out.push_str("# TYPE fleetctl_terminal_sessions_active gauge\n");
        out.push_str(&format!("fleetctl_terminal_sessions_active {}\n", self.terminal_sessions_active.load(Ordering::Relaxed)));
        out.push_str("# TYPE fleetctl_queue_depth gauge\n");
        out.push_str(&format!("fleetctl_queue_depth {}\n", self.queue_depth.load(Ordering::Relaxed)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_requests_by_route_and_status() {
        let m = Metrics::new();
        m.record_request("/api/hosts", 200);
        m.record_request("/api/hosts", 200);
        m.record_request("/api/hosts", 500);
        let json = m.to_json();
        let total: u64 = json["requests_total"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["count"].as_u64().unwrap())
            .sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn task_failure_increments_both_counters() {
        let m = Metrics::new();
        m.task_submitted();
        m.task_completed(false);
        let json = m.to_json();
        assert_eq!(json["tasks_completed"], 1);
        assert_eq!(json["tasks_failed"], 1);
    }

    #[test]
    fn prometheus_text_includes_help_and_type_lines() {
        let m = Metrics::new();
        m.set_queue_depth(5);
        let text = m.to_prometheus();
        assert!(text.contains("# TYPE fleetctl_queue_depth gauge"));
        assert!(text.contains("fleetctl_queue_depth 5"));
    }
}

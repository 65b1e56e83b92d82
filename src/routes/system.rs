use rocket::http::{ContentType, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::serde::json::Json;
use rocket::{get, State};
use serde_json::{json, Value};

use crate::db::Db;
use crate::metrics::Metrics;

pub struct Accept(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Accept {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(Accept(req.headers().get_one("Accept").map(str::to_string)))
    }
}

#[get("/api/v1/health")]
pub fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "fleetctl",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness probe: unlike `health`, this actually touches the store so
/// a load balancer can tell a wedged database apart from a live one.
#[get("/api/v1/ready")]
pub fn ready(db: &State<Db>) -> Result<Json<Value>, (Status, Json<Value>)> {
    let conn = db.conn.lock().unwrap();
    match conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0)) {
        Ok(_) => Ok(Json(json!({ "status": "ready" }))),
        Err(e) => Err((
            Status::ServiceUnavailable,
            Json(json!({ "status": "not_ready", "error": e.to_string() })),
        )),
    }
}

/// Serves counters as JSON by default, or Prometheus text exposition
/// format when the client's `Accept` header prefers `text/plain`.
#[get("/api/v1/metrics")]
pub fn metrics(metrics: &State<Metrics>, accept: Accept) -> (ContentType, String) {
    let wants_prometheus = accept
        .0
        .map(|a| a.contains("text/plain") && !a.contains("application/json"))
        .unwrap_or(false);
    if wants_prometheus {
        (ContentType::Plain, metrics.to_prometheus())
    } else {
        (ContentType::JSON, metrics.to_json().to_string())
    }
}

#[rocket::catch(429)]
pub fn too_many_requests() -> Json<Value> {
    Json(json!({ "error": "too many requests" }))
}

#[rocket::catch(404)]
pub fn not_found() -> Json<Value> {
    Json(json!({ "error": "not found" }))
}

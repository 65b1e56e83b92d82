use std::sync::Arc;
use std::time::Duration;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{get, post, State};
use serde_json::json;

use crate::config::Config;
use crate::db::Db;
use crate::error::{ApiError, ApiResult};
use crate::events::EventBus;
use crate::metrics::Metrics;
use crate::models::{CreateTask, Task};
use crate::tasks::TaskEngine;

use super::AuthUser;

#[post("/api/v1/hosts/<host_id>/tasks", format = "json", data = "<body>")]
pub async fn submit_task(
    db: &State<Db>,
    engine: &State<Arc<TaskEngine>>,
    config: &State<Config>,
    events: &State<Arc<EventBus>>,
    metrics: &State<Metrics>,
    user: AuthUser,
    host_id: i64,
    body: Json<CreateTask>,
) -> ApiResult<Json<serde_json::Value>> {
    user.require("task:create")?;
    let host = db.get_host(host_id)?;
    if body.command.trim().is_empty() {
        return Err(ApiError::new(Status::BadRequest, "command must not be empty"));
    }

    let req = body.into_inner();
    let task_id = engine
        .submit(
            host.id,
            &host.host,
            host.port,
            &host.username,
            host.ssh_key_vault_ref.as_deref(),
            host.ssh_key_path.as_deref(),
            host.ssh_password_wrapped.as_deref(),
            user.0.user_id,
            req,
            Duration::from_secs(config.tasks_default_timeout_secs),
            config.tasks_store_output_default,
        )
        .await
        .map_err(|reason| ApiError::new(Status::Forbidden, reason))?;

    metrics.task_submitted();
    events.emit(
        "task.submitted",
        Some(user.0.user_id),
        "task",
        &task_id,
        json!({ "host_ref": host.id }),
        "info",
    );
    Ok(Json(json!({ "task_id": task_id })))
}

#[get("/api/v1/tasks/<id>")]
pub fn get_task(db: &State<Db>, user: AuthUser, id: String) -> ApiResult<Json<Task>> {
    user.require("server:view")?;
    Ok(Json(db.get_task(&id)?))
}

#[get("/api/v1/hosts/<host_id>/tasks?<limit>")]
pub fn list_tasks(db: &State<Db>, user: AuthUser, host_id: i64, limit: Option<i64>) -> ApiResult<Json<Vec<Task>>> {
    user.require("server:view")?;
    Ok(Json(db.list_tasks_for_host(host_id, limit.unwrap_or(50).clamp(1, 500))?))
}

#[post("/api/v1/tasks/<id>/cancel")]
pub async fn cancel_task(
    db: &State<Db>,
    engine: &State<Arc<TaskEngine>>,
    events: &State<Arc<EventBus>>,
    user: AuthUser,
    id: String,
) -> ApiResult<Json<serde_json::Value>> {
    let task = db.get_task(&id)?;
    if user.0.user_id != task.user_ref {
        user.require("*")?;
    } else {
        user.require("task:cancel_own")?;
    }
    let cancelled = engine.cancel(&id).await;
    if cancelled {
        events.emit("task.cancelled", Some(user.0.user_id), "task", &id, json!({}), "info");
    }
    Ok(Json(json!({ "cancelled": cancelled })))
}

use rocket::serde::json::Json;
use rocket::{get, post, State};
use serde_json::json;

use crate::db::Db;
use crate::error::ApiResult;
use crate::models::Alert;

use super::AuthUser;

#[get("/api/v1/alerts?<limit>&<offset>")]
pub fn list_alerts(db: &State<Db>, user: AuthUser, limit: Option<i64>, offset: Option<i64>) -> ApiResult<Json<Vec<Alert>>> {
    user.require("alerts:view")?;
    Ok(Json(db.list_alerts(limit.unwrap_or(100).clamp(1, 500), offset.unwrap_or(0).max(0))?))
}

#[post("/api/v1/alerts/<id>/read")]
pub fn mark_alert_read(db: &State<Db>, user: AuthUser, id: String) -> ApiResult<Json<serde_json::Value>> {
    user.require("alerts:view")?;
    db.mark_alert_read(&id)?;
    Ok(Json(json!({ "marked_read": id })))
}

use rocket::http::ContentType;
use rocket::serde::json::Json;
use rocket::{get, State};

use crate::db::{render_csv, Db};
use crate::error::ApiResult;
use crate::models::AuditLog;

use super::AuthUser;

#[get("/api/v1/audit-logs?<limit>&<offset>")]
pub fn list_audit_logs(db: &State<Db>, user: AuthUser, limit: Option<i64>, offset: Option<i64>) -> ApiResult<Json<Vec<AuditLog>>> {
    user.require("audit:view")?;
    Ok(Json(db.list_audit(limit.unwrap_or(100).clamp(1, 1000), offset.unwrap_or(0).max(0))?))
}

/// Formula-defused CSV export of the same rows `list_audit_logs` returns,
/// for pulling into a spreadsheet without re-triggering its cells.
#[get("/api/v1/audit-logs/export.csv?<limit>")]
pub fn export_audit_logs_csv(db: &State<Db>, user: AuthUser, limit: Option<i64>) -> ApiResult<(ContentType, String)> {
    user.require("audit:view")?;
    let rows = db.list_audit(limit.unwrap_or(10_000).clamp(1, 100_000), 0)?;
    let headers = ["id", "user_ref", "action", "target_type", "target_id", "ip", "created_at"];
    let body_rows: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            vec![
                r.id.clone(),
                r.user_ref.map(|u| u.to_string()).unwrap_or_default(),
                r.action.clone(),
                r.target_type.clone(),
                r.target_id.clone(),
                r.ip.clone().unwrap_or_default(),
                r.created_at.clone(),
            ]
        })
        .collect();
    Ok((ContentType::CSV, render_csv(&headers, &body_rows)))
}

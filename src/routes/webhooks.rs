use std::sync::Arc;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{delete, get, post, put, State};
use serde::Deserialize;
use serde_json::json;

use crate::db::Db;
use crate::error::{ApiError, ApiResult};
use crate::events::EventBus;
use crate::models::{CreateWebhook, Webhook, WebhookDelivery};

use super::AuthUser;

#[post("/api/v1/webhooks", format = "json", data = "<body>")]
pub fn create_webhook(
    db: &State<Db>,
    events: &State<Arc<EventBus>>,
    user: AuthUser,
    body: Json<CreateWebhook>,
) -> ApiResult<Json<Webhook>> {
    user.require("*")?;
    if reqwest::Url::parse(&body.url).is_err() {
        return Err(ApiError::new(Status::BadRequest, "url is not valid"));
    }
    let webhook = db.create_webhook(&body, user.0.user_id)?;
    events.emit("webhook.created", Some(user.0.user_id), "webhook", &webhook.id, json!({ "url": webhook.url }), "info");
    Ok(Json(webhook))
}

#[get("/api/v1/webhooks?<limit>&<offset>")]
pub fn list_webhooks(db: &State<Db>, user: AuthUser, limit: Option<i64>, offset: Option<i64>) -> ApiResult<Json<Vec<Webhook>>> {
    user.require("*")?;
    Ok(Json(db.list_webhooks(limit.unwrap_or(100).clamp(1, 500), offset.unwrap_or(0).max(0))?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateWebhookRequest {
    #[serde(flatten)]
    pub fields: CreateWebhook,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[put("/api/v1/webhooks/<id>", format = "json", data = "<body>")]
pub fn update_webhook(
    db: &State<Db>,
    user: AuthUser,
    id: String,
    body: Json<UpdateWebhookRequest>,
) -> ApiResult<Json<Webhook>> {
    user.require("*")?;
    let req = body.into_inner();
    Ok(Json(db.update_webhook(&id, &req.fields, req.enabled)?))
}

#[delete("/api/v1/webhooks/<id>")]
pub fn delete_webhook(db: &State<Db>, events: &State<Arc<EventBus>>, user: AuthUser, id: String) -> ApiResult<Json<serde_json::Value>> {
    user.require("*")?;
    db.delete_webhook(&id)?;
    events.emit("webhook.deleted", Some(user.0.user_id), "webhook", &id, json!({}), "warning");
    Ok(Json(json!({ "deleted": id })))
}

#[get("/api/v1/webhooks/<id>/deliveries?<limit>")]
pub fn list_webhook_deliveries(db: &State<Db>, user: AuthUser, id: String, limit: Option<i64>) -> ApiResult<Json<Vec<WebhookDelivery>>> {
    user.require("*")?;
    Ok(Json(db.list_deliveries(&id, limit.unwrap_or(50).clamp(1, 500))?))
}

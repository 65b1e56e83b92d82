use std::sync::Arc;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{delete, get, post, State};
use serde_json::json;

use crate::cache::AppCache;
use crate::db::Db;
use crate::error::{ApiError, ApiResult};
use crate::events::EventBus;
use crate::inventory;
use crate::models::{CreateHost, Host, HostInventory};
use crate::sanitize::{is_valid_host_or_ip, is_valid_port, sanitize_string};
use crate::ssh_pool::{Credential, PoolKey, SshPool};
use crate::vault::Vault;

use super::AuthUser;

fn validate_create_host(body: &CreateHost) -> Result<(), ApiError> {
    if sanitize_string(&body.name, 128, false).is_none() {
        return Err(ApiError::new(Status::BadRequest, "name is required"));
    }
    if !is_valid_host_or_ip(&body.host) {
        return Err(ApiError::new(Status::BadRequest, "host is not a valid hostname or IP"));
    }
    if let Some(port) = body.port {
        if !is_valid_port(port as i64) {
            return Err(ApiError::new(Status::BadRequest, "port is out of range"));
        }
    }
    if sanitize_string(&body.username, 64, false).is_none() {
        return Err(ApiError::new(Status::BadRequest, "username is required"));
    }
    Ok(())
}

#[post("/api/v1/hosts", format = "json", data = "<body>")]
pub fn create_host(
    db: &State<Db>,
    events: &State<Arc<EventBus>>,
    cache: &State<AppCache>,
    user: AuthUser,
    body: Json<CreateHost>,
) -> ApiResult<Json<Host>> {
    user.require("server:edit")?;
    validate_create_host(&body)?;
    let host = db.create_host(&body)?;
    cache.hosts_list.clear();
    events.emit(
        "host.created",
        Some(user.0.user_id),
        "host",
        &host.id.to_string(),
        json!({ "name": host.name }),
        "info",
    );
    Ok(Json(host))
}

/// Cached for 10s (`AppCache::hosts_list`) since the inventory list is
/// one of the noisiest dashboard polls and changes rarely by comparison.
#[get("/api/v1/hosts?<limit>&<offset>")]
pub fn list_hosts(
    db: &State<Db>,
    cache: &State<AppCache>,
    user: AuthUser,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<Json<Vec<Host>>> {
    user.require("server:view")?;
    let limit = limit.unwrap_or(100).clamp(1, 500);
    let offset = offset.unwrap_or(0).max(0);
    let cache_key = format!("{limit}:{offset}");
    if let Some(cached) = cache.hosts_list.get(&cache_key) {
        return Ok(Json(serde_json::from_value(cached).unwrap_or_default()));
    }
    let hosts = db.list_hosts(limit, offset)?;
    cache.hosts_list.set(cache_key, json!(hosts));
    Ok(Json(hosts))
}

#[get("/api/v1/hosts/<id>")]
pub fn get_host(db: &State<Db>, user: AuthUser, id: i64) -> ApiResult<Json<Host>> {
    user.require("server:view")?;
    Ok(Json(db.get_host(id)?))
}

#[delete("/api/v1/hosts/<id>")]
pub fn delete_host(
    db: &State<Db>,
    events: &State<Arc<EventBus>>,
    cache: &State<AppCache>,
    user: AuthUser,
    id: i64,
) -> ApiResult<Json<serde_json::Value>> {
    user.require("server:edit")?;
    db.delete_host(id)?;
    cache.hosts_list.clear();
    events.emit("host.deleted", Some(user.0.user_id), "host", &id.to_string(), json!({}), "warning");
    Ok(Json(json!({ "deleted": id })))
}

#[get("/api/v1/hosts/<id>/inventory")]
pub fn get_inventory(db: &State<Db>, user: AuthUser, id: i64) -> ApiResult<Json<HostInventory>> {
    user.require("server:view")?;
    Ok(Json(db.get_inventory(id)?))
}

/// Runs the fixed read-only command set against the host over a direct,
/// unpooled SSH session and stores the result as the new latest snapshot.
#[post("/api/v1/hosts/<id>/inventory/collect")]
pub async fn collect_inventory(
    db: &State<Db>,
    vault: &State<Vault>,
    ssh: &State<Arc<SshPool>>,
    events: &State<Arc<EventBus>>,
    user: AuthUser,
    id: i64,
) -> ApiResult<Json<HostInventory>> {
    user.require("server:edit")?;
    let host = db.get_host(id)?;

    let credential = if let Some(vault_ref) = &host.ssh_key_vault_ref {
        Credential::KeyPem(db.vault_decrypt(vault, vault_ref)?)
    } else if let Some(path) = &host.ssh_key_path {
        Credential::KeyFilePath(path.clone())
    } else if let Some(pass) = &host.ssh_password_wrapped {
        Credential::Password(pass.clone())
    } else {
        return Err(ApiError::new(Status::BadRequest, "host has no usable credential"));
    };

    let key = PoolKey::new(&host.username, &host.host, host.port);
    let facts = inventory::collect(ssh, &key, &credential)
        .await
        .map_err(|e| ApiError::new(Status::BadGateway, e.to_string()))?;
    db.upsert_inventory(id, &facts)?;
    events.emit("host.inventory_collected", Some(user.0.user_id), "host", &id.to_string(), json!({}), "info");
    Ok(Json(db.get_inventory(id)?))
}

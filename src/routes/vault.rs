use std::sync::Arc;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{delete, get, post, State};
use serde::Deserialize;
use serde_json::json;

use crate::db::Db;
use crate::error::{ApiError, ApiResult};
use crate::events::EventBus;
use crate::models::VaultKeyMetadata;
use crate::vault::Vault;

use super::AuthUser;

#[derive(Debug, Deserialize)]
pub struct CreateVaultKeyRequest {
    pub name: String,
    pub private_key: String,
    #[serde(default)]
    pub description: String,
}

/// Stores an SSH private key encrypted at rest. Never returns the
/// plaintext it was given -- only the metadata row.
#[post("/api/v1/vault/keys", format = "json", data = "<body>")]
pub fn create_vault_key(
    db: &State<Db>,
    vault: &State<Vault>,
    events: &State<Arc<EventBus>>,
    user: AuthUser,
    body: Json<CreateVaultKeyRequest>,
) -> ApiResult<Json<VaultKeyMetadata>> {
    user.require("*")?;
    if body.name.trim().is_empty() {
        return Err(ApiError::new(Status::BadRequest, "name is required"));
    }
    let meta = db.vault_create_key(vault, &body.name, &body.private_key, &body.description, user.0.user_id)?;
    events.emit("vault.key_created", Some(user.0.user_id), "vault_key", &meta.id, json!({ "name": meta.name }), "info");
    Ok(Json(meta))
}

#[get("/api/v1/vault/keys")]
pub fn list_vault_keys(db: &State<Db>, user: AuthUser) -> ApiResult<Json<Vec<VaultKeyMetadata>>> {
    user.require("*")?;
    Ok(Json(db.vault_list()?))
}

#[delete("/api/v1/vault/keys/<id>")]
pub fn delete_vault_key(db: &State<Db>, events: &State<Arc<EventBus>>, user: AuthUser, id: String) -> ApiResult<Json<serde_json::Value>> {
    user.require("*")?;
    db.vault_soft_delete(&id)?;
    events.emit("vault.key_deleted", Some(user.0.user_id), "vault_key", &id, json!({}), "warning");
    Ok(Json(json!({ "deleted": id })))
}

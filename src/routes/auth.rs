use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::{get, post, State};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::{self as auth_lib, TokenIssuer};
use crate::db::Db;
use crate::error::{ApiError, ApiResult};
use crate::events::EventBus;
use crate::models::Role;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::sanitize::sanitize_string;

use super::{enforce_rate_limit, AuthUser, ClientIp};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: Value,
}

/// First-run bootstrap: creates the initial admin account. Refuses once
/// any user already exists, so this can never be used to mint a second
/// admin without already holding one.
#[post("/api/v1/setup", format = "json", data = "<body>")]
pub fn setup(db: &State<Db>, body: Json<LoginRequest>) -> ApiResult<Json<Value>> {
    if db.count_users()? > 0 {
        return Err(ApiError::new(rocket::http::Status::Conflict, "setup has already run"));
    }
    let username = sanitize_string(&body.username, 64, false)
        .ok_or_else(|| ApiError::new(rocket::http::Status::BadRequest, "username is required"))?;
    if body.password.len() < 12 {
        return Err(ApiError::new(rocket::http::Status::BadRequest, "password must be at least 12 characters"));
    }
    let hash = auth_lib::hash_password(&body.password);
    let user = db.create_user(&username, "", &hash, Role::Admin.as_str())?;
    Ok(Json(json!({ "id": user.id, "username": user.username, "role": user.role })))
}

#[post("/api/v1/auth/login", format = "json", data = "<body>")]
pub fn login(
    db: &State<Db>,
    tokens: &State<TokenIssuer>,
    events: &State<Arc<EventBus>>,
    limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    ip: ClientIp,
    body: Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    if let Err(rate_err) = enforce_rate_limit(limiter, rate_config, "login", &ip.0) {
        // Login bucket exhaustion means repeated failed/attempted logins
        // from this address; block it outright rather than just 429ing
        // the same client indefinitely.
        limiter.block_ip(&ip.0);
        return Err(ApiError::new(rocket::http::Status::TooManyRequests, rate_err.message));
    }

    match auth_lib::login(db, &body.username, &body.password) {
        Ok(user) => {
            let token = tokens.issue(&user)?;
            events.emit(
                "auth.login",
                Some(user.id),
                "user",
                &user.id.to_string(),
                json!({ "ip": ip.0 }),
                "info",
            );
            Ok(Json(LoginResponse {
                token,
                user: json!({ "id": user.id, "username": user.username, "role": user.role }),
            }))
        }
        Err(e) => {
            events.emit(
                "auth.login_failed",
                None,
                "user",
                &body.username,
                json!({ "ip": ip.0 }),
                "warning",
            );
            Err(e.into())
        }
    }
}

#[get("/api/v1/auth/me")]
pub fn me(db: &State<Db>, user: AuthUser) -> ApiResult<Json<Value>> {
    let full = db.get_user(user.0.user_id)?;
    Ok(Json(json!({
        "id": full.id,
        "username": full.username,
        "role": full.role,
        "permissions": user.0.permissions,
    })))
}

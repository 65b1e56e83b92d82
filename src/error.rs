use rocket::http::Status;
use rocket::serde::json::Json;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("key not found")]
    NotFound,
    #[error("a key with this name already exists")]
    DuplicateName,
    #[error("could not parse key material: {0}")]
    InvalidKey(String),
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("not found")]
    NotFound,
    #[error("constraint violation: {0}")]
    Constraint(String),
}

#[derive(Debug, Error)]
pub enum SshError {
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("authentication timed out")]
    AuthTimeout,
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("no authentication method available")]
    NoAuthMethod,
    #[error("ssh protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("host not found")]
    HostNotFound,
    #[error("command rejected by policy: {0}")]
    PolicyRejected(String),
    #[error("queue is full")]
    QueueFull,
    #[error("ssh error: {0}")]
    Ssh(#[from] SshError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account disabled")]
    AccountDisabled,
    #[error("token expired")]
    TokenExpired,
    #[error("token invalid: {0}")]
    TokenInvalid(String),
    #[error("permission denied")]
    Forbidden,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("target url resolves to a disallowed address")]
    UnsafeTarget,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Shared HTTP-boundary error type all route handlers return: an HTTP
/// status paired with a JSON error body.
#[derive(Debug)]
pub struct ApiError(pub Status, pub Value);

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        ApiError(status, json!({ "error": message.into() }))
    }
}

impl<'r> rocket::response::Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        Json(self.1).respond_to(request).map(|mut resp| {
            resp.set_status(self.0);
            resp
        })
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::new(Status::NotFound, "not found"),
            StoreError::Constraint(msg) => ApiError::new(Status::Conflict, msg),
            StoreError::Sqlite(err) => {
                ApiError::new(Status::InternalServerError, format!("database error: {err}"))
            }
        }
    }
}

impl From<VaultError> for ApiError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::NotFound => ApiError::new(Status::NotFound, "key not found"),
            VaultError::DuplicateName => {
                ApiError::new(Status::Conflict, "a key with this name already exists")
            }
            VaultError::InvalidKey(msg) => ApiError::new(Status::BadRequest, msg),
            VaultError::DecryptionFailed => {
                ApiError::new(Status::InternalServerError, "decryption failed")
            }
            VaultError::Store(inner) => inner.into(),
        }
    }
}

impl From<TaskError> for ApiError {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::HostNotFound => ApiError::new(Status::NotFound, "host not found"),
            TaskError::PolicyRejected(msg) => ApiError::new(Status::Forbidden, msg),
            TaskError::QueueFull => {
                ApiError::new(Status::ServiceUnavailable, "task queue is full")
            }
            TaskError::Ssh(inner) => {
                ApiError::new(Status::BadGateway, format!("ssh error: {inner}"))
            }
            TaskError::Store(inner) => inner.into(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials => {
                ApiError::new(Status::Unauthorized, "invalid credentials")
            }
            AuthError::AccountDisabled => ApiError::new(Status::Forbidden, "account disabled"),
            AuthError::TokenExpired => ApiError::new(Status::Unauthorized, "token expired"),
            AuthError::TokenInvalid(msg) => ApiError::new(Status::Unauthorized, msg),
            AuthError::Forbidden => ApiError::new(Status::Forbidden, "permission denied"),
            AuthError::Store(inner) => inner.into(),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::UnsafeTarget => ApiError::new(
                Status::BadRequest,
                "target url resolves to a disallowed address",
            ),
            WebhookError::InvalidUrl(msg) => ApiError::new(Status::BadRequest, msg),
            WebhookError::DeliveryFailed(msg) => ApiError::new(Status::BadGateway, msg),
            WebhookError::Store(inner) => inner.into(),
        }
    }
}

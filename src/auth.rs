use argon2::password_hash::{rand_core::OsRng as ArgonOsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use jwt_simple::prelude::*;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::Db;
use crate::error::AuthError;
use crate::models::{Role, User};

const LEGACY_PREFIX_SEP: char = '$';

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaimsData {
    pub user_id: i64,
    pub username: String,
    pub role: String,
    pub permissions: Vec<String>,
}

/// Issues and verifies HS256 JWTs carrying `user_id`/`username`/`role`/
/// `permissions`/`exp`/`iat`, via `jwt-simple` instead of hand-rolled HMAC.
pub struct TokenIssuer {
    key: HS256Key,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl: std::time::Duration) -> Self {
        TokenIssuer {
            key: HS256Key::from_bytes(secret.as_bytes()),
            ttl: Duration::from_secs(ttl.as_secs()),
        }
    }

    pub fn issue(&self, user: &User) -> Result<String, AuthError> {
        let role = Role::from_str(&user.role).unwrap_or(Role::Viewer);
        let claims_data = JwtClaimsData {
            user_id: user.id,
            username: user.username.clone(),
            role: user.role.clone(),
            permissions: role.permissions().into_iter().map(String::from).collect(),
        };
        let claims = Claims::with_custom_claims(claims_data, self.ttl);
        self.key
            .authenticate(claims)
            .map_err(|e| AuthError::TokenInvalid(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<JwtClaimsData, AuthError> {
        let options = VerificationOptions {
            accept_future: false,
            ..Default::default()
        };
        let claims = self
            .key
            .verify_token::<JwtClaimsData>(token, Some(options))
            .map_err(|e| {
                if e.to_string().to_lowercase().contains("expired") {
                    AuthError::TokenExpired
                } else {
                    AuthError::TokenInvalid(e.to_string())
                }
            })?;
        Ok(claims.custom)
    }
}

/// Hashes a new password with Argon2id, the upgrade path over the legacy
/// salted-SHA-256 scheme below.
pub fn hash_password(password: &str) -> String {
    let salt = SaltString::generate(&mut ArgonOsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .expect("argon2 hashing failed")
        .to_string()
}

/// Legacy scheme: 16 random hex bytes of salt, `sha256(salt + password)`,
/// stored as `salt$hexdigest`. New passwords never use this; it is
/// retained only so accounts created before the argon2 migration still
/// authenticate.
pub fn hash_password_legacy(password: &str) -> String {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = hex::encode(salt_bytes);
    let digest = Sha256::digest(format!("{salt}{password}").as_bytes());
    format!("{salt}{LEGACY_PREFIX_SEP}{}", hex::encode(digest))
}

fn verify_legacy(password: &str, stored: &str) -> bool {
    let Some((salt, digest_hex)) = stored.split_once(LEGACY_PREFIX_SEP) else {
        return false;
    };
    let expected = Sha256::digest(format!("{salt}{password}").as_bytes());
    hex::encode(expected) == digest_hex
}

/// Dispatches to argon2 verification for hashes in PHC string format
/// (`$argon2id$...`), falling back to the legacy `salt$hex` scheme
/// otherwise, so both account generations keep working.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    if stored_hash.starts_with("$argon2") {
        match PasswordHash::new(stored_hash) {
            Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
            Err(_) => false,
        }
    } else {
        verify_legacy(password, stored_hash)
    }
}

pub fn login(db: &Db, username: &str, password: &str) -> Result<User, AuthError> {
    let user = db
        .get_user_by_username(username)?
        .ok_or(AuthError::InvalidCredentials)?;
    if !user.is_active {
        return Err(AuthError::AccountDisabled);
    }
    if !verify_password(password, &user.password_hash) {
        return Err(AuthError::InvalidCredentials);
    }
    db.touch_last_login(user.id)?;
    Ok(user)
}

/// Role/permission check matching `Role::permissions` -- `"*"` grants
/// everything (admin).
pub fn has_permission(role: &str, permission: &str) -> bool {
    let Some(role) = Role::from_str(role) else {
        return false;
    };
    let perms = role.permissions();
    perms.contains(&"*") || perms.contains(&permission)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argon2_hash_roundtrip() {
        let hash = hash_password("correct horse battery staple");
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn legacy_hash_roundtrip() {
        let hash = hash_password_legacy("admin123");
        assert!(verify_password("admin123", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn legacy_and_modern_hashes_are_distinguishable() {
        let modern = hash_password("x");
        let legacy = hash_password_legacy("x");
        assert!(modern.starts_with("$argon2"));
        assert!(!legacy.starts_with("$argon2"));
    }

    #[test]
    fn jwt_roundtrip_carries_role_permissions() {
        let issuer = TokenIssuer::new("test-secret-at-least-this-long", std::time::Duration::from_secs(3600));
        let user = User {
            id: 7,
            username: "alice".into(),
            email: "a@example.com".into(),
            password_hash: String::new(),
            role: "operator".into(),
            is_active: true,
            last_login: None,
        };
        let token = issuer.issue(&user).unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.role, "operator");
        assert!(claims.permissions.contains(&"terminal:use".to_string()));
    }

    #[test]
    fn admin_wildcard_grants_any_permission() {
        assert!(has_permission("admin", "anything:at-all"));
        assert!(!has_permission("viewer", "task:create"));
    }
}

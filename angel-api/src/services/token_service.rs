use jsonwebtoken::{encode, EncodingKey, Header};
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use angel_shared::errors::AppError;
use angel_shared::types::auth::{Claims, UserRole};

pub fn create_access_token(user_id: Uuid, role: UserRole, secret: &str, ttl_secs: i64) -> Result<String, AppError> {
    let claims = Claims::new(user_id, role, ttl_secs);
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| AppError::internal(format!("JWT encoding failed: {e}")))
}

/// Random single-use token handed to the user; only its hash is stored.
pub fn create_reset_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

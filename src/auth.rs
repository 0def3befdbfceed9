use anyhow::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::path::Path;
use time::{Duration, OffsetDateTime};

/// Claims stored within issued session tokens. `sub` is the user's id.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Issue a session token for a user id, valid for the provided duration.
/// Identity itself is established by the external provider; this only binds
/// an already-provisioned user to a bearer token.
pub fn issue_token(secret: &[u8], sub: &str, valid_for: Duration) -> Result<String> {
    let exp = (OffsetDateTime::now_utc() + valid_for).unix_timestamp() as usize;
    let claims = Claims {
        sub: sub.into(),
        exp,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )?;
    Ok(token)
}

/// Verify a session token and return its claims if valid.
pub fn verify_token(secret: &[u8], token: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(data.claims)
}

/// Load the signing secret from the data directory, creating it on first run
/// so sessions survive restarts.
pub async fn load_or_create_secret(path: &Path) -> Result<Vec<u8>> {
    if let Ok(bytes) = tokio::fs::read(path).await {
        let encoded = String::from_utf8_lossy(&bytes);
        let secret = STANDARD.decode(encoded.trim())?;
        if !secret.is_empty() {
            return Ok(secret);
        }
    }
    use rand::RngCore;
    let mut secret = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, STANDARD.encode(&secret)).await?;
    Ok(secret)
}

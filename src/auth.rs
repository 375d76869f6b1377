//! Session authentication: password hashing, session tokens and the
//! login rate limiter.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Session tokens live this long.
pub const SESSION_TTL_DAYS: i64 = 7;

/// Claims carried by a session token. `version` must match the user's
/// current token version; bumping the version invalidates old tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub username: String,
    pub version: i64,
    pub exp: i64,
    pub iat: i64,
}

/// Hash a password for storage.
pub fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| format!("Failed to hash password: {}", e))
}

/// Check a password against a stored hash.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Issue a session token for the given user.
pub fn issue_session_token(
    secret: &[u8],
    username: &str,
    token_version: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now();
    let claims = SessionClaims {
        username: username.to_string(),
        version: token_version,
        exp: (now + chrono::Duration::days(SESSION_TTL_DAYS)).timestamp(),
        iat: now.timestamp(),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

/// Decode and validate a session token (signature + expiry).
pub fn decode_session_token(
    secret: &[u8],
    token: &str,
) -> Result<SessionClaims, jsonwebtoken::errors::Error> {
    let data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

// ============ Login rate limiter ============

const LOGIN_WINDOW: Duration = Duration::from_secs(60);
const LOGIN_ATTEMPT_LIMIT: u32 = 5;

struct AttemptWindow {
    count: u32,
    started: Instant,
}

/// Fixed-window per-IP limiter for the login endpoint: 5 attempts/minute.
#[derive(Default)]
pub struct LoginLimiter {
    windows: Mutex<HashMap<String, AttemptWindow>>,
}

impl LoginLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attempt from `ip` and report whether it is allowed.
    pub fn allow(&self, ip: &str) -> bool {
        let mut windows = self.windows.lock();
        let window = windows.entry(ip.to_string()).or_insert(AttemptWindow {
            count: 0,
            started: Instant::now(),
        });

        if window.started.elapsed() > LOGIN_WINDOW {
            window.count = 0;
            window.started = Instant::now();
        }

        window.count += 1;
        window.count <= LOGIN_ATTEMPT_LIMIT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "not-a-hash"));
    }

    #[test]
    fn test_session_token_round_trip() {
        let secret = [3u8; 32];
        let token = issue_session_token(&secret, "admin", 2).unwrap();
        let claims = decode_session_token(&secret, &token).unwrap();
        assert_eq!(claims.username, "admin");
        assert_eq!(claims.version, 2);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_session_token_wrong_secret() {
        let token = issue_session_token(&[1u8; 32], "admin", 1).unwrap();
        assert!(decode_session_token(&[2u8; 32], &token).is_err());
    }

    #[test]
    fn test_login_limiter_window() {
        let limiter = LoginLimiter::new();
        for _ in 0..LOGIN_ATTEMPT_LIMIT {
            assert!(limiter.allow("10.0.0.1"));
        }
        assert!(!limiter.allow("10.0.0.1"));
        // Another address has its own window.
        assert!(limiter.allow("10.0.0.2"));
    }
}

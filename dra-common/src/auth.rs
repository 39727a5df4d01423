//! Password hashing and bearer token validation
//!
//! # Architecture
//!
//! - Passwords are stored as Argon2id over the password with a per-user
//!   random salt (hex encoded)
//! - Bearer tokens have the form `username.expiry_ms.signature`, where the
//!   signature is SHA-256 over `username`, `expiry_ms` and a shared secret
//! - The shared secret comes from the environment (`DRA_SECRET_KEY`) or is
//!   generated once and stored in the `settings` table
//!
//! Request handlers only see the [`TokenValidator`] capability; the token is
//! opaque to everything else.

use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

#[cfg(feature = "sqlx")]
use sqlx::SqlitePool;

/// Environment variable carrying an operator-supplied shared secret
pub const SECRET_ENV_VAR: &str = "DRA_SECRET_KEY";

/// Settings key holding the generated shared secret
pub const SECRET_SETTING_KEY: &str = "api_shared_secret";

// ========================================
// Error Types
// ========================================

/// Authentication error types
#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Authorization header absent or not a bearer token
    MissingToken,

    /// Token does not have the `user.expiry.signature` shape
    MalformedToken,

    /// Signature does not match
    InvalidSignature,

    /// Token expiry is in the past
    Expired { expired_at_ms: i64 },

    /// Username/password pair rejected
    InvalidCredentials,

    /// Database error loading the shared secret
    DatabaseError(String),

    /// Key derivation rejected its input (e.g. salt too short)
    Hashing(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "Token is missing"),
            AuthError::MalformedToken => write!(f, "Token is malformed"),
            AuthError::InvalidSignature => write!(f, "Token is invalid"),
            AuthError::Expired { expired_at_ms } => {
                write!(f, "Token expired at {}", expired_at_ms)
            }
            AuthError::InvalidCredentials => write!(f, "Invalid credentials"),
            AuthError::DatabaseError(err) => write!(f, "Database error: {}", err),
            AuthError::Hashing(err) => write!(f, "Password hashing failed: {}", err),
        }
    }
}

impl std::error::Error for AuthError {}

// ========================================
// Password Hashing
// ========================================

/// Generate a random 128-bit salt (32 hex characters)
pub fn generate_salt() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Hash a password with its salt (64 hex characters, Argon2id defaults)
///
/// The salt must be at least 8 bytes.
pub fn hash_password(password: &str, salt: &str) -> Result<String, AuthError> {
    let mut output = [0u8; PASSWORD_HASH_LEN];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt.as_bytes(), &mut output)
        .map_err(|e| AuthError::Hashing(e.to_string()))?;
    Ok(output.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Check a password against a stored salt/hash pair
pub fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
    hash_password(password, salt)
        .map(|hash| constant_time_eq(&hash, expected_hash))
        .unwrap_or(false)
}

const PASSWORD_HASH_LEN: usize = 32;

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

// ========================================
// Tokens
// ========================================

/// Identity carried by a validated token
#[derive(Debug, Clone, PartialEq)]
pub struct TokenClaims {
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

/// Capability to validate an opaque bearer credential
pub trait TokenValidator: Send + Sync {
    /// Validate a bearer token (without the `Bearer ` prefix)
    fn validate(&self, token: &str) -> Result<TokenClaims, AuthError>;
}

/// Issues and validates tokens signed with a shared secret
#[derive(Clone)]
pub struct SharedSecretTokens {
    secret: String,
    ttl: Duration,
}

impl SharedSecretTokens {
    pub fn new(secret: impl Into<String>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    /// Issue a token for `username` valid from `now` for the configured TTL
    pub fn issue(&self, username: &str, now: DateTime<Utc>) -> String {
        let expiry_ms = (now + self.ttl).timestamp_millis();
        let signature = self.sign(username, expiry_ms);
        format!("{}.{}.{}", username, expiry_ms, signature)
    }

    /// Validate against an explicit clock
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, AuthError> {
        // Usernames may contain dots; expiry and signature never do
        let mut parts = token.rsplitn(3, '.');
        let signature = parts.next().ok_or(AuthError::MalformedToken)?;
        let expiry = parts.next().ok_or(AuthError::MalformedToken)?;
        let username = parts.next().ok_or(AuthError::MalformedToken)?;

        if username.is_empty() || signature.is_empty() {
            return Err(AuthError::MalformedToken);
        }

        let expiry_ms: i64 = expiry.parse().map_err(|_| AuthError::MalformedToken)?;

        if !constant_time_eq(&self.sign(username, expiry_ms), signature) {
            return Err(AuthError::InvalidSignature);
        }

        if expiry_ms <= now.timestamp_millis() {
            return Err(AuthError::Expired {
                expired_at_ms: expiry_ms,
            });
        }

        let expires_at =
            DateTime::<Utc>::from_timestamp_millis(expiry_ms).ok_or(AuthError::MalformedToken)?;

        Ok(TokenClaims {
            username: username.to_string(),
            expires_at,
        })
    }

    fn sign(&self, username: &str, expiry_ms: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(username.as_bytes());
        hasher.update(b"|");
        hasher.update(expiry_ms.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.secret.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl TokenValidator for SharedSecretTokens {
    fn validate(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.validate_at(token, Utc::now())
    }
}

/// Extract the token from an `Authorization` header value
pub fn bearer_token(header_value: &str) -> Result<&str, AuthError> {
    let token = header_value
        .strip_prefix("Bearer ")
        .unwrap_or(header_value)
        .trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

// ========================================
// Shared Secret Management
// ========================================

/// Load the shared secret: environment first, then the settings table
///
/// When neither is present a random non-zero secret is generated and stored
/// so that issued tokens survive restarts.
#[cfg(feature = "sqlx")]
pub async fn load_shared_secret(db: &SqlitePool) -> Result<String, AuthError> {
    if let Ok(secret) = std::env::var(SECRET_ENV_VAR) {
        if !secret.trim().is_empty() {
            return Ok(secret);
        }
    }

    let stored = crate::db::get_setting(db, SECRET_SETTING_KEY)
        .await
        .map_err(|e| AuthError::DatabaseError(e.to_string()))?;

    match stored {
        Some(secret) => Ok(secret),
        None => initialize_shared_secret(db).await,
    }
}

/// Generate and persist a crypto-random non-zero secret
#[cfg(feature = "sqlx")]
pub async fn initialize_shared_secret(db: &SqlitePool) -> Result<String, AuthError> {
    let mut rng = rand::thread_rng();
    let secret: i64 = loop {
        let val = rng.gen::<i64>();
        if val != 0 {
            break val;
        }
    };

    crate::db::set_setting(db, SECRET_SETTING_KEY, secret)
        .await
        .map_err(|e| AuthError::DatabaseError(e.to_string()))?;

    Ok(secret.to_string())
}

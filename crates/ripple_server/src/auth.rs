//! Connection authentication.
//!
//! Token-based credential checks using HMAC-SHA256. Tokens bind a user
//! id to an issue timestamp for expiration checking.
//!
//! ## Token Format
//!
//! - 16 bytes: user_id
//! - 8 bytes: issued-at (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature
//!
//! Total: 56 bytes.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60), // 24 hours
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Token issuer and validator for incoming connections.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates an auth token for a user.
    pub fn issue(&self, user: Uuid, now_ms: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(24);
        data.extend_from_slice(user.as_bytes());
        data.extend_from_slice(&now_ms.to_be_bytes());

        let signature = self.sign(&data);

        let mut token = data;
        token.extend_from_slice(&signature);
        token
    }

    /// Validates a token and returns the user it was issued to.
    pub fn verify(&self, token: &[u8], now_ms: u64) -> ServerResult<Uuid> {
        if token.len() != 56 {
            return Err(ServerError::NotAuthorized("Invalid token length".into()));
        }

        let user_bytes: [u8; 16] = token[0..16].try_into().unwrap();
        let issued_bytes: [u8; 8] = token[16..24].try_into().unwrap();
        let signature: [u8; 32] = token[24..56].try_into().unwrap();

        let expected_signature = self.sign(&token[0..24]);
        if signature != expected_signature {
            return Err(ServerError::NotAuthorized("Invalid signature".into()));
        }

        let issued_at = u64::from_be_bytes(issued_bytes);
        let expiry_millis = self.config.token_expiry.as_millis() as u64;
        if now_ms > issued_at + expiry_millis {
            return Err(ServerError::NotAuthorized("Token expired".into()));
        }

        Ok(Uuid::from_bytes(user_bytes))
    }

    /// Signs data with HMAC-SHA256.
    fn sign(&self, data: &[u8]) -> [u8; 32] {
        let mut mac =
            HmacSha256::new_from_slice(&self.config.secret).expect("HMAC can take key of any size");
        mac.update(data);
        let result = mac.finalize();
        result.into_bytes().into()
    }
}

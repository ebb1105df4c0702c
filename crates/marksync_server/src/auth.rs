//! Device tokens for the shared sync log.
//!
//! ## Token Format
//!
//! - 16 bytes: device_id
//! - 16 bytes: user_id
//! - 8 bytes: issue timestamp (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature over the first 40 bytes
//!
//! Total: 72 bytes.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use marksync_protocol::{AccessToken, DeviceId, UserId};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_LEN: usize = 72;
const SIGNED_LEN: usize = 40;

/// Issues and validates device tokens.
#[derive(Clone)]
pub struct TokenValidator {
    secret: Vec<u8>,
    expiry: Duration,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(secret: Vec<u8>, expiry: Duration) -> Self {
        Self { secret, expiry }
    }

    /// Issues a token binding `device_id` to `user_id`.
    pub fn create_token(&self, device_id: DeviceId, user_id: UserId) -> ServerResult<AccessToken> {
        let mut data = Vec::with_capacity(TOKEN_LEN);
        data.extend_from_slice(device_id.as_uuid().as_bytes());
        data.extend_from_slice(user_id.as_uuid().as_bytes());
        data.extend_from_slice(&now_millis().to_be_bytes());

        let signature = self.sign(&data)?;
        data.extend_from_slice(&signature);
        Ok(AccessToken::new(data))
    }

    /// Validates a token for the given device and account and returns its
    /// issue time in Unix millis.
    pub fn validate_token(
        &self,
        token: &AccessToken,
        expected_device: DeviceId,
        expected_user: UserId,
    ) -> ServerResult<u64> {
        let token = token.as_bytes();
        if token.len() != TOKEN_LEN {
            return Err(ServerError::NotAuthorized("invalid token length".into()));
        }

        if &token[0..16] != expected_device.as_uuid().as_bytes() {
            return Err(ServerError::NotAuthorized("device id mismatch".into()));
        }
        if &token[16..32] != expected_user.as_uuid().as_bytes() {
            return Err(ServerError::NotAuthorized("account id mismatch".into()));
        }

        let mut mac = self.mac()?;
        mac.update(&token[..SIGNED_LEN]);
        mac.verify_slice(&token[SIGNED_LEN..])
            .map_err(|_| ServerError::NotAuthorized("invalid signature".into()))?;

        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&token[32..SIGNED_LEN]);
        let issued_at = u64::from_be_bytes(timestamp);
        let expiry_millis = self.expiry.as_millis() as u64;
        if now_millis() > issued_at.saturating_add(expiry_millis) {
            return Err(ServerError::NotAuthorized("token expired".into()));
        }

        Ok(issued_at)
    }

    fn mac(&self) -> ServerResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ServerError::Internal(format!("invalid token secret: {}", e)))
    }

    fn sign(&self, data: &[u8]) -> ServerResult<[u8; 32]> {
        let mut mac = self.mac()?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().into())
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

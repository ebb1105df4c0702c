//! Server configuration.

use rand::RngCore;
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of entries returned by one pull.
    pub max_pull_batch: u32,
    /// Maximum number of entries accepted in one push.
    pub max_push_batch: u32,
    /// Maximum number of entries stored per account (`None` = unlimited).
    pub max_entries_per_account: Option<usize>,
    /// Secret key for device tokens.
    pub token_secret: Vec<u8>,
    /// Device token lifetime.
    pub token_expiry: Duration,
}

impl ServerConfig {
    /// Creates a configuration with the given token secret.
    pub fn new(token_secret: Vec<u8>) -> Self {
        Self {
            max_pull_batch: 500,
            max_push_batch: 500,
            max_entries_per_account: None,
            token_secret,
            token_expiry: Duration::from_secs(365 * 24 * 60 * 60),
        }
    }

    /// Sets the maximum pull batch size.
    pub fn with_max_pull_batch(mut self, size: u32) -> Self {
        self.max_pull_batch = size;
        self
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: u32) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Limits the number of entries stored per account.
    pub fn with_quota(mut self, max_entries: usize) -> Self {
        self.max_entries_per_account = Some(max_entries);
        self
    }

    /// Sets the device token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl Default for ServerConfig {
    /// Uses a freshly generated random token secret.
    fn default() -> Self {
        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::new(secret)
    }
}

//! Per-account shared sync log and device registry.

use crate::auth::now_millis;
use crate::error::{ServerError, ServerResult};
use marksync_protocol::{ClientSyncLogEntry, Device, DeviceId, EntryKey, SharedSyncLogEntry, UserId};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

/// A page of entries read from the shared log.
#[derive(Debug, Clone, PartialEq)]
pub struct EntriesPage {
    /// Entries in ascending `seq` order.
    pub entries: Vec<SharedSyncLogEntry>,
    /// Whether entries exist after `scanned_to`.
    pub has_more: bool,
    /// Highest seq examined, including excluded entries.
    pub scanned_to: u64,
}

#[derive(Debug, Clone)]
struct DeviceRecord {
    device: Device,
    revoked: bool,
    /// Tokens issued before this instant (Unix millis) are not accepted.
    active_since: u64,
}

/// One account's log.
///
/// Invariant: `entries[i].seq == i + 1`, so seqs are dense, strictly
/// increasing, and a seq maps directly to a slot.
#[derive(Debug, Default)]
struct AccountLog {
    entries: Vec<SharedSyncLogEntry>,
    by_key: HashMap<EntryKey, u64>,
    devices: Vec<DeviceRecord>,
}

impl AccountLog {
    fn latest_seq(&self) -> u64 {
        self.entries.len() as u64
    }

    fn device(&self, device_id: DeviceId) -> Option<&DeviceRecord> {
        self.devices.iter().find(|r| r.device.id == device_id)
    }
}

/// The shared sync log for all accounts.
pub struct SharedSyncLog {
    accounts: RwLock<HashMap<UserId, AccountLog>>,
    max_entries_per_account: Option<usize>,
}

impl SharedSyncLog {
    /// Creates an empty log with no quota.
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            max_entries_per_account: None,
        }
    }

    /// Creates an empty log that stores at most `limit` entries per account.
    pub fn with_quota(limit: usize) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            max_entries_per_account: Some(limit),
        }
    }

    /// Creates a new account whose first registered device is `device`.
    pub fn create_account(&self, device: Device) -> UserId {
        let user_id = UserId::new_random();
        let account = AccountLog {
            devices: vec![DeviceRecord {
                device: device.clone(),
                revoked: false,
                active_since: 0,
            }],
            ..AccountLog::default()
        };
        self.accounts.write().insert(user_id, account);
        info!(%user_id, device_id = %device.id, "account created");
        user_id
    }

    /// Registers a device against an account.
    ///
    /// Registering an already active device is a no-op. A removed device is
    /// reinstated; tokens it held before the removal stay invalid.
    pub fn register_device(&self, user_id: UserId, device: Device) -> ServerResult<()> {
        let mut accounts = self.accounts.write();
        let account = accounts
            .get_mut(&user_id)
            .ok_or(ServerError::UnknownAccount(user_id))?;

        match account.devices.iter_mut().find(|r| r.device.id == device.id) {
            Some(record) if record.revoked => {
                info!(%user_id, device_id = %device.id, name = %device.name, "device reinstated");
                record.device = device;
                record.revoked = false;
                record.active_since = now_millis();
                Ok(())
            }
            Some(_) => Ok(()),
            None => {
                info!(%user_id, device_id = %device.id, name = %device.name, "device registered");
                account.devices.push(DeviceRecord {
                    device,
                    revoked: false,
                    active_since: 0,
                });
                Ok(())
            }
        }
    }

    /// Revokes a device. Returns false if it was already revoked.
    ///
    /// Entries previously written by the device stay in the log.
    pub fn remove_device(&self, user_id: UserId, device_id: DeviceId) -> ServerResult<bool> {
        let mut accounts = self.accounts.write();
        let account = accounts
            .get_mut(&user_id)
            .ok_or(ServerError::UnknownAccount(user_id))?;

        let record = account
            .devices
            .iter_mut()
            .find(|r| r.device.id == device_id)
            .ok_or_else(|| ServerError::InvalidRequest(format!("unknown device {}", device_id)))?;

        if record.revoked {
            return Ok(false);
        }
        record.revoked = true;
        info!(%user_id, %device_id, "device removed");
        Ok(true)
    }

    /// Returns true if the device is registered and not revoked.
    pub fn is_active_device(&self, user_id: UserId, device_id: DeviceId) -> ServerResult<bool> {
        Ok(self.active_since(user_id, device_id)?.is_some())
    }

    /// Returns the earliest token issue time accepted for an active device,
    /// or `None` if the device is unknown or revoked.
    pub fn active_since(&self, user_id: UserId, device_id: DeviceId) -> ServerResult<Option<u64>> {
        let accounts = self.accounts.read();
        let account = accounts
            .get(&user_id)
            .ok_or(ServerError::UnknownAccount(user_id))?;
        Ok(account
            .device(device_id)
            .filter(|r| !r.revoked)
            .map(|r| r.active_since))
    }

    /// Returns the account's active devices in registration order.
    pub fn devices(&self, user_id: UserId) -> ServerResult<Vec<Device>> {
        let accounts = self.accounts.read();
        let account = accounts
            .get(&user_id)
            .ok_or(ServerError::UnknownAccount(user_id))?;
        Ok(account
            .devices
            .iter()
            .filter(|r| !r.revoked)
            .map(|r| r.device.clone())
            .collect())
    }

    /// Appends entries written by `device_id`, returning one seq per entry.
    ///
    /// Entries already present (same `(device_id, created_on)`) keep their
    /// original seq, so a retried push creates no duplicate history. The
    /// quota is checked before anything is written: a batch is either
    /// stored completely or not at all.
    pub fn write_entries(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        entries: &[ClientSyncLogEntry],
    ) -> ServerResult<Vec<u64>> {
        for entry in entries {
            if entry.device_id != device_id {
                return Err(ServerError::InvalidRequest(format!(
                    "entry {} does not belong to writing device {}",
                    entry.key(),
                    device_id
                )));
            }
            entry
                .mutation()
                .validate()
                .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;
        }

        let mut accounts = self.accounts.write();
        let account = accounts
            .get_mut(&user_id)
            .ok_or(ServerError::UnknownAccount(user_id))?;

        if let Some(limit) = self.max_entries_per_account {
            let mut fresh: Vec<EntryKey> = entries
                .iter()
                .map(|e| e.key())
                .filter(|key| !account.by_key.contains_key(key))
                .collect();
            fresh.sort_unstable();
            fresh.dedup();
            let stored = account.entries.len();
            if stored + fresh.len() > limit {
                return Err(ServerError::QuotaExceeded { stored, limit });
            }
        }

        let mut seqs = Vec::with_capacity(entries.len());
        let mut appended = 0usize;
        for entry in entries {
            let key = entry.key();
            if let Some(&seq) = account.by_key.get(&key) {
                seqs.push(seq);
                continue;
            }
            let seq = account.latest_seq() + 1;
            account
                .entries
                .push(SharedSyncLogEntry::from_client(user_id, seq, entry));
            account.by_key.insert(key, seq);
            seqs.push(seq);
            appended += 1;
        }

        debug!(
            %user_id,
            %device_id,
            received = entries.len(),
            appended,
            latest_seq = account.latest_seq(),
            "entries written"
        );
        Ok(seqs)
    }

    /// Returns up to `limit` entries with `seq > after_seq`.
    pub fn entries_since(
        &self,
        user_id: UserId,
        after_seq: u64,
        exclude_device: Option<DeviceId>,
        limit: u32,
    ) -> ServerResult<EntriesPage> {
        let accounts = self.accounts.read();
        let account = accounts
            .get(&user_id)
            .ok_or(ServerError::UnknownAccount(user_id))?;

        let latest = account.latest_seq();
        let start = after_seq.min(latest) as usize;
        let mut entries = Vec::new();
        let mut scanned_to = after_seq.max(start as u64);

        for entry in &account.entries[start..] {
            if entries.len() >= limit as usize {
                break;
            }
            scanned_to = entry.seq;
            if Some(entry.device_id) == exclude_device {
                continue;
            }
            entries.push(entry.clone());
        }

        Ok(EntriesPage {
            entries,
            has_more: scanned_to < latest,
            scanned_to,
        })
    }

    /// Returns the highest seq of an account.
    pub fn latest_seq(&self, user_id: UserId) -> ServerResult<u64> {
        let accounts = self.accounts.read();
        accounts
            .get(&user_id)
            .map(AccountLog::latest_seq)
            .ok_or(ServerError::UnknownAccount(user_id))
    }

    /// Returns the total number of entries across all accounts.
    pub fn len(&self) -> usize {
        self.accounts.read().values().map(|a| a.entries.len()).sum()
    }

    /// Returns true if no account holds any entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SharedSyncLog {
    fn default() -> Self {
        Self::new()
    }
}

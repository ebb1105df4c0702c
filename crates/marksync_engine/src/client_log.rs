//! The client sync log: every mutation this device produced or received.
//!
//! Own entries are appended with a monotonic `created_on` and wait to be
//! pushed. Remote entries are received from the shared log and wait to be
//! integrated. Entries are never removed; only the `shared_on`/`seq` and
//! `needs_integration` markers change, each exactly once.
//!
//! The log also tracks, per `(collection, pk)`, the highest shared seq it
//! has seen settled (own pushes and integrated remote entries). Integration
//! uses it to discard stale snapshots. Seqs and versions are only
//! meaningful within one account; attaching the log to a different account
//! drops them along with received entries still awaiting integration.

use crate::clock::LocalClock;
use crate::error::{SyncError, SyncResult};
use crate::journal::{Journal, JournalRecord};
use marksync_protocol::{ClientSyncLogEntry, DeviceId, EntryKey, Mutation, UserId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

type ObjectKey = (String, String);

fn object_key(entry: &ClientSyncLogEntry) -> ObjectKey {
    (entry.collection.clone(), entry.pk.clone())
}

#[derive(Default)]
struct LogState {
    entries: Vec<ClientSyncLogEntry>,
    index: HashMap<EntryKey, usize>,
    versions: HashMap<ObjectKey, u64>,
    unshared: HashMap<ObjectKey, usize>,
    attempts: HashMap<EntryKey, u32>,
    account: Option<UserId>,
    journal: Option<Journal>,
}

impl LogState {
    fn commit(&mut self, records: Vec<JournalRecord>) -> SyncResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(journal) = &mut self.journal {
            journal.append(&records)?;
        }
        for record in records {
            self.apply(record);
        }
        Ok(())
    }

    fn apply(&mut self, record: JournalRecord) {
        match record {
            JournalRecord::Appended(entry) => {
                if self.insert(entry.clone()) {
                    *self.unshared.entry(object_key(&entry)).or_insert(0) += 1;
                }
            }
            JournalRecord::Received(entry) => {
                self.insert(entry);
            }
            JournalRecord::Shared { entries, at } => {
                for (key, seq) in entries {
                    let Some(&position) = self.index.get(&key) else {
                        continue;
                    };
                    let entry = &mut self.entries[position];
                    if entry.shared_on.is_some() {
                        continue;
                    }
                    entry.shared_on = Some(at);
                    entry.seq = Some(seq);
                    let object = object_key(entry);
                    if let Some(count) = self.unshared.get_mut(&object) {
                        *count -= 1;
                        if *count == 0 {
                            self.unshared.remove(&object);
                        }
                    }
                    self.bump_version(object, seq);
                }
            }
            JournalRecord::Integrated(keys) => {
                for key in keys {
                    let Some(&position) = self.index.get(&key) else {
                        continue;
                    };
                    let entry = &mut self.entries[position];
                    entry.needs_integration = false;
                    let seq = entry.seq;
                    let object = object_key(entry);
                    if let Some(seq) = seq {
                        self.bump_version(object, seq);
                    }
                    self.attempts.remove(&key);
                }
            }
            JournalRecord::Attempted(key) => {
                *self.attempts.entry(key).or_insert(0) += 1;
            }
            JournalRecord::Attached(user_id) => {
                if self.account.is_some_and(|account| account != user_id) {
                    self.forget_account();
                }
                self.account = Some(user_id);
            }
        }
    }

    fn forget_account(&mut self) {
        self.entries.retain(|e| !e.needs_integration);
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.key(), i))
            .collect();
        self.versions.clear();
        self.attempts.clear();
    }

    fn insert(&mut self, entry: ClientSyncLogEntry) -> bool {
        let key = entry.key();
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key, self.entries.len());
        self.entries.push(entry);
        true
    }

    fn bump_version(&mut self, object: ObjectKey, seq: u64) {
        let version = self.versions.entry(object).or_insert(0);
        if seq > *version {
            *version = seq;
        }
    }
}

/// A device's client sync log.
///
/// All methods take `&self`; the log is internally synchronized and can be
/// shared between the sync cycle and local writers.
pub struct ClientSyncLog {
    device_id: DeviceId,
    clock: LocalClock,
    state: Mutex<LogState>,
}

impl ClientSyncLog {
    /// Creates an empty, memory-only log.
    pub fn in_memory(device_id: DeviceId) -> Self {
        Self::with_clock(device_id, LocalClock::new(0))
    }

    /// Creates an empty, memory-only log with a custom clock.
    pub fn with_clock(device_id: DeviceId, clock: LocalClock) -> Self {
        Self {
            device_id,
            clock,
            state: Mutex::new(LogState::default()),
        }
    }

    /// Opens a journal-backed log, replaying its contents.
    ///
    /// The clock resumes after the newest own entry, so timestamps stay
    /// strictly increasing across restarts even if the wall clock moved
    /// backwards in between.
    pub fn open(device_id: DeviceId, path: &Path) -> SyncResult<Self> {
        let (journal, records) = Journal::open(path)?;
        let clock = LocalClock::new(0);
        let mut state = LogState::default();
        let replayed = records.len();
        for record in records {
            if let JournalRecord::Appended(entry) = &record {
                clock.observe(entry.created_on);
            }
            state.apply(record);
        }

        info!(
            path = %journal.path().display(),
            records = replayed,
            entries = state.entries.len(),
            "opened client sync log"
        );
        state.journal = Some(journal);

        Ok(Self {
            device_id,
            clock,
            state: Mutex::new(state),
        })
    }

    /// Returns the owning device.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Appends a local mutation and returns the stored entry.
    ///
    /// # Errors
    ///
    /// Fails if the mutation is malformed, the clock overflows, or the
    /// journal cannot be written. Nothing is stored in that case.
    pub fn append(&self, mutation: Mutation) -> SyncResult<ClientSyncLogEntry> {
        mutation.validate()?;
        let mut state = self.state.lock();
        let created_on = self.clock.next()?;
        let entry = ClientSyncLogEntry::local(self.device_id, mutation, created_on);
        state.commit(vec![JournalRecord::Appended(entry.clone())])?;
        debug!(key = %entry.key(), collection = %entry.collection, op = %entry.operation, "appended local entry");
        Ok(entry)
    }

    /// Returns own entries not yet written to the shared log, oldest first.
    pub fn read_unshared(&self) -> Vec<ClientSyncLogEntry> {
        let state = self.state.lock();
        let mut unshared: Vec<_> = state
            .entries
            .iter()
            .filter(|e| e.device_id == self.device_id && e.shared_on.is_none())
            .cloned()
            .collect();
        unshared.sort_by_key(|e| e.created_on);
        unshared
    }

    /// Marks own entries as written to the shared log under the given seqs.
    ///
    /// Entries already marked are left alone.
    pub fn mark_shared(&self, shared: &[(EntryKey, u64)], timestamp: i64) -> SyncResult<()> {
        let mut state = self.state.lock();
        let entries: Vec<_> = shared
            .iter()
            .filter(|(key, _)| {
                key.device_id == self.device_id
                    && state
                        .index
                        .get(key)
                        .is_some_and(|&i| state.entries[i].shared_on.is_none())
            })
            .copied()
            .collect();
        if entries.is_empty() {
            return Ok(());
        }
        state.commit(vec![JournalRecord::Shared {
            entries,
            at: timestamp,
        }])
    }

    /// Stores entries pulled from the shared log.
    ///
    /// Entries whose `(device_id, created_on)` is already present are
    /// dropped. Returns the number of newly stored entries.
    pub fn receive_remote(&self, entries: Vec<ClientSyncLogEntry>) -> SyncResult<usize> {
        let mut state = self.state.lock();
        let mut seen = HashSet::new();
        let mut records = Vec::new();

        for mut entry in entries {
            if entry.seq.is_none() {
                return Err(SyncError::Protocol(format!(
                    "received entry {} has no seq",
                    entry.key()
                )));
            }
            let key = entry.key();
            if state.index.contains_key(&key) || !seen.insert(key) {
                continue;
            }
            entry.needs_integration = true;
            records.push(JournalRecord::Received(entry));
        }

        let received = records.len();
        state.commit(records)?;
        Ok(received)
    }

    /// Returns received entries awaiting integration, by ascending seq.
    pub fn pending_integration(&self) -> Vec<ClientSyncLogEntry> {
        let state = self.state.lock();
        let mut pending: Vec<_> = state
            .entries
            .iter()
            .filter(|e| e.needs_integration)
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.seq);
        pending
    }

    /// Clears the integration marker of the given entries.
    pub fn mark_integrated(&self, keys: &[EntryKey]) -> SyncResult<()> {
        let mut state = self.state.lock();
        let keys: Vec<_> = keys
            .iter()
            .filter(|key| {
                state
                    .index
                    .get(key)
                    .is_some_and(|&i| state.entries[i].needs_integration)
            })
            .copied()
            .collect();
        if keys.is_empty() {
            return Ok(());
        }
        state.commit(vec![JournalRecord::Integrated(keys)])
    }

    /// Returns true if the entry is stored and needs no further integration.
    pub fn is_applied(&self, key: &EntryKey) -> bool {
        let state = self.state.lock();
        state
            .index
            .get(key)
            .is_some_and(|&i| !state.entries[i].needs_integration)
    }

    /// Counts a failed integration attempt and returns the new total.
    ///
    /// Counters survive restarts; they are cleared once the entry settles.
    pub fn record_attempt(&self, key: &EntryKey) -> SyncResult<u32> {
        let mut state = self.state.lock();
        state.commit(vec![JournalRecord::Attempted(*key)])?;
        Ok(state.attempts.get(key).copied().unwrap_or(0))
    }

    /// Binds the log to an account.
    ///
    /// Switching to a different account forgets every seq-derived version
    /// and drops received entries that were never integrated. Attaching to
    /// the current account does nothing.
    pub fn attach(&self, user_id: UserId) -> SyncResult<()> {
        let mut state = self.state.lock();
        if state.account == Some(user_id) {
            return Ok(());
        }
        if let Some(previous) = state.account {
            info!(%previous, account = %user_id, "client log moved to another account");
        }
        state.commit(vec![JournalRecord::Attached(user_id)])
    }

    /// Returns the account the log follows, if any.
    pub fn account(&self) -> Option<UserId> {
        self.state.lock().account
    }

    /// Returns true if this device has an unpushed change to the object.
    pub fn has_unshared_for(&self, collection: &str, pk: &str) -> bool {
        let state = self.state.lock();
        state
            .unshared
            .contains_key(&(collection.to_string(), pk.to_string()))
    }

    /// Returns the highest settled seq for the object, if any.
    pub fn version_of(&self, collection: &str, pk: &str) -> Option<u64> {
        let state = self.state.lock();
        state
            .versions
            .get(&(collection.to_string(), pk.to_string()))
            .copied()
    }

    /// Returns a stored entry.
    pub fn get(&self, key: &EntryKey) -> Option<ClientSyncLogEntry> {
        let state = self.state.lock();
        state.index.get(key).map(|&i| state.entries[i].clone())
    }

    /// Returns a copy of every entry, in insertion order.
    pub fn entries(&self) -> Vec<ClientSyncLogEntry> {
        self.state.lock().entries.clone()
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if the log holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of own entries waiting to be pushed.
    pub fn unshared_count(&self) -> usize {
        self.state.lock().unshared.values().sum()
    }

    /// Returns the number of received entries waiting for integration.
    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|e| e.needs_integration)
            .count()
    }

    /// Returns the last timestamp handed out by the log's clock.
    pub fn last_created_on(&self) -> i64 {
        self.clock.last()
    }
}

impl std::fmt::Debug for ClientSyncLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSyncLog")
            .field("device_id", &self.device_id)
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marksync_protocol::{Operation, SharedSyncLogEntry, UserId};
    use serde_json::json;
    use tempfile::tempdir;

    fn device(n: u128) -> DeviceId {
        DeviceId::from_u128(n)
    }

    fn remote(device_id: DeviceId, seq: u64, pk: &str) -> ClientSyncLogEntry {
        let entry = ClientSyncLogEntry::local(
            device_id,
            Mutation::create("bookmarks", pk, json!({"title": pk})),
            seq as i64 * 10,
        );
        SharedSyncLogEntry::from_client(UserId::from_u128(1), seq, &entry).into_received()
    }

    #[test]
    fn append_assigns_increasing_timestamps() {
        let log = ClientSyncLog::with_clock(device(1), LocalClock::with_source(0, || 1_000));
        let a = log.append(Mutation::create("bookmarks", "a", json!({}))).unwrap();
        let b = log.append(Mutation::delete("bookmarks", "a")).unwrap();

        assert_eq!(a.created_on, 1_000);
        assert_eq!(b.created_on, 1_001);
        assert_eq!(b.operation, Operation::Delete);
        assert!(!a.is_shared());
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn append_rejects_malformed_mutation() {
        let log = ClientSyncLog::in_memory(device(1));
        let result = log.append(Mutation::create("bookmarks", "", json!({})));
        assert!(matches!(result, Err(SyncError::Codec(_))));
        assert!(log.is_empty());
    }

    #[test]
    fn unshared_until_marked() {
        let log = ClientSyncLog::in_memory(device(1));
        let a = log.append(Mutation::create("bookmarks", "a", json!({}))).unwrap();
        let b = log.append(Mutation::create("bookmarks", "b", json!({}))).unwrap();

        assert_eq!(log.read_unshared().len(), 2);
        assert!(log.has_unshared_for("bookmarks", "a"));

        log.mark_shared(&[(a.key(), 7)], 5_000).unwrap();
        let unshared = log.read_unshared();
        assert_eq!(unshared.len(), 1);
        assert_eq!(unshared[0].key(), b.key());
        assert!(!log.has_unshared_for("bookmarks", "a"));
        assert_eq!(log.version_of("bookmarks", "a"), Some(7));

        let stored = log.get(&a.key()).unwrap();
        assert_eq!(stored.shared_on, Some(5_000));
        assert_eq!(stored.seq, Some(7));

        // Marking twice keeps the first acknowledgement.
        log.mark_shared(&[(a.key(), 9)], 6_000).unwrap();
        assert_eq!(log.get(&a.key()).unwrap().seq, Some(7));
    }

    #[test]
    fn receive_dedups_by_key() {
        let log = ClientSyncLog::in_memory(device(1));
        let entry = remote(device(2), 1, "a");

        assert_eq!(log.receive_remote(vec![entry.clone(), entry.clone()]).unwrap(), 1);
        assert_eq!(log.receive_remote(vec![entry.clone()]).unwrap(), 0);
        assert_eq!(log.pending_count(), 1);
        assert!(!log.is_applied(&entry.key()));
    }

    #[test]
    fn receive_requires_seq() {
        let log = ClientSyncLog::in_memory(device(1));
        let mut entry = remote(device(2), 1, "a");
        entry.seq = None;
        assert!(matches!(
            log.receive_remote(vec![entry]),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn pending_is_ordered_by_seq() {
        let log = ClientSyncLog::in_memory(device(1));
        log.receive_remote(vec![remote(device(2), 3, "c"), remote(device(3), 1, "a")])
            .unwrap();
        log.receive_remote(vec![remote(device(2), 2, "b")]).unwrap();

        let seqs: Vec<_> = log.pending_integration().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn integration_marks_and_versions() {
        let log = ClientSyncLog::in_memory(device(1));
        let entry = remote(device(2), 4, "a");
        log.receive_remote(vec![entry.clone()]).unwrap();

        assert_eq!(log.record_attempt(&entry.key()).unwrap(), 1);
        assert_eq!(log.record_attempt(&entry.key()).unwrap(), 2);

        log.mark_integrated(&[entry.key()]).unwrap();
        assert!(log.is_applied(&entry.key()));
        assert_eq!(log.pending_count(), 0);
        assert_eq!(log.version_of("bookmarks", "a"), Some(4));
        assert_eq!(log.record_attempt(&entry.key()).unwrap(), 1);
    }

    #[test]
    fn journal_replay_restores_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client.journal");

        let (a_key, received_key) = {
            let log = ClientSyncLog::open(device(1), &path).unwrap();
            let a = log.append(Mutation::create("bookmarks", "a", json!({"v": 1}))).unwrap();
            log.append(Mutation::create("bookmarks", "b", json!({"v": 1}))).unwrap();
            log.mark_shared(&[(a.key(), 1)], 10).unwrap();
            let received = remote(device(2), 2, "c");
            log.receive_remote(vec![received.clone()]).unwrap();
            log.mark_integrated(&[received.key()]).unwrap();
            (a.key(), received.key())
        };

        let log = ClientSyncLog::open(device(1), &path).unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log.read_unshared().len(), 1);
        assert_eq!(log.get(&a_key).unwrap().seq, Some(1));
        assert!(log.is_applied(&received_key));
        assert_eq!(log.version_of("bookmarks", "c"), Some(2));
        assert!(log.has_unshared_for("bookmarks", "b"));
    }

    #[test]
    fn attempts_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client.journal");
        let entry = remote(device(2), 1, "a");

        {
            let log = ClientSyncLog::open(device(1), &path).unwrap();
            log.receive_remote(vec![entry.clone()]).unwrap();
            log.record_attempt(&entry.key()).unwrap();
            log.record_attempt(&entry.key()).unwrap();
        }

        let log = ClientSyncLog::open(device(1), &path).unwrap();
        assert_eq!(log.record_attempt(&entry.key()).unwrap(), 3);
    }

    #[test]
    fn switching_account_forgets_versions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client.journal");
        let first = UserId::from_u128(10);
        let second = UserId::from_u128(20);

        {
            let log = ClientSyncLog::open(device(1), &path).unwrap();
            log.attach(first).unwrap();
            let integrated = remote(device(2), 5, "a");
            log.receive_remote(vec![integrated.clone(), remote(device(2), 6, "b")])
                .unwrap();
            log.mark_integrated(&[integrated.key()]).unwrap();
            let own = log.append(Mutation::create("bookmarks", "c", json!({}))).unwrap();

            // Same account again: nothing changes.
            log.attach(first).unwrap();
            assert_eq!(log.version_of("bookmarks", "a"), Some(5));
            assert_eq!(log.pending_count(), 1);

            log.attach(second).unwrap();
            assert_eq!(log.account(), Some(second));
            assert_eq!(log.version_of("bookmarks", "a"), None);
            assert_eq!(log.pending_count(), 0);
            assert_eq!(log.len(), 2);
            assert!(log.get(&own.key()).is_some());
            assert_eq!(log.read_unshared().len(), 1);
        }

        let log = ClientSyncLog::open(device(1), &path).unwrap();
        assert_eq!(log.account(), Some(second));
        assert_eq!(log.version_of("bookmarks", "a"), None);
        assert_eq!(log.pending_count(), 0);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn reopened_clock_never_goes_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client.journal");

        let last = {
            let log = ClientSyncLog::open(device(1), &path).unwrap();
            log.append(Mutation::create("bookmarks", "a", json!({}))).unwrap();
            log.append(Mutation::create("bookmarks", "b", json!({}))).unwrap().created_on
        };

        let log = ClientSyncLog::open(device(1), &path).unwrap();
        let next = log.append(Mutation::create("bookmarks", "c", json!({}))).unwrap();
        assert!(next.created_on > last);
    }
}

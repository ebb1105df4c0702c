//! Integration of received entries into the domain store.
//!
//! Entries carry whole-object snapshots, so the state of an object is the
//! snapshot with the highest shared seq. A pass walks pending entries by
//! ascending seq inside one domain transaction and applies each one unless
//! it is older than what the object already reflects:
//!
//! - an entry whose seq is at or below the object's settled version is
//!   stale and skipped (this is also how deletes beat older updates);
//! - while this device still has an unpushed change to the object, the
//!   remote snapshot is not written but its version is recorded, so the
//!   local change (which will get a higher seq) stays in place;
//! - an update for an object never seen locally is deferred to a later
//!   pass and skipped with a warning after too many attempts.

use crate::client_log::ClientSyncLog;
use crate::effects::AppliedMutation;
use crate::error::{SyncError, SyncResult};
use crate::store::{put, DomainStore};
use marksync_protocol::{EntryKey, Operation};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Outcome of an integration pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrationReport {
    /// Mutations written to the domain store, in seq order.
    pub applied: Vec<AppliedMutation>,
    /// Entries older than the object's current version.
    pub stale: usize,
    /// Remote entries held back by an unpushed local change.
    pub superseded: usize,
    /// Entries left pending for a later pass.
    pub deferred: usize,
    /// Entries given up on after repeated conflicts.
    pub skipped: Vec<EntryKey>,
    /// Human-readable warnings.
    pub warnings: Vec<String>,
}

impl IntegrationReport {
    /// Returns the number of entries that no longer need integration.
    pub fn settled(&self) -> usize {
        self.applied.len() + self.stale + self.superseded + self.skipped.len()
    }
}

enum Decision {
    Apply,
    Stale,
    Superseded,
    Conflict,
}

/// Integrates every pending entry of `log` into `store`.
///
/// The domain writes of one pass commit atomically. Entries are marked
/// integrated only after the commit, so a crash in between re-applies the
/// same snapshots in the same order on the next pass.
pub fn integrate_pending<D: DomainStore>(
    log: &ClientSyncLog,
    store: &D,
    max_attempts: u32,
) -> SyncResult<IntegrationReport> {
    let pending = log.pending_integration();
    if pending.is_empty() {
        return Ok(IntegrationReport::default());
    }

    let mut report = IntegrationReport::default();
    let mut settled = Vec::with_capacity(pending.len());
    let mut conflicts = Vec::new();

    store.transaction(|txn| {
        let mut staged: HashMap<(String, String), u64> = HashMap::new();

        for entry in &pending {
            let key = entry.key();
            let Some(seq) = entry.seq else {
                return Err(SyncError::Protocol(format!("pending entry {} has no seq", key)));
            };
            let object = (entry.collection.clone(), entry.pk.clone());
            let version = staged
                .get(&object)
                .copied()
                .or_else(|| log.version_of(&entry.collection, &entry.pk));

            let decision = if version.is_some_and(|v| seq <= v) {
                Decision::Stale
            } else if log.has_unshared_for(&entry.collection, &entry.pk) {
                Decision::Superseded
            } else if entry.operation == Operation::Update
                && version.is_none()
                && txn.find(&entry.collection, &entry.pk)?.is_none()
            {
                Decision::Conflict
            } else {
                Decision::Apply
            };

            match decision {
                Decision::Stale => {
                    debug!(%key, seq, "skipping stale entry");
                    report.stale += 1;
                }
                Decision::Superseded => {
                    debug!(%key, seq, "remote entry superseded by local change");
                    staged.insert(object, seq);
                    report.superseded += 1;
                }
                Decision::Conflict => {
                    conflicts.push(entry.clone());
                    continue;
                }
                Decision::Apply => {
                    match entry.operation {
                        Operation::Create | Operation::Update => {
                            put(txn, &entry.collection, &entry.pk, entry.value.clone())?
                        }
                        Operation::Delete => {
                            txn.delete(&entry.collection, &entry.pk)?;
                        }
                    }
                    staged.insert(object, seq);
                    report.applied.push(AppliedMutation {
                        collection: entry.collection.clone(),
                        operation: entry.operation,
                        pk: entry.pk.clone(),
                        value: entry.value.clone(),
                        seq,
                        device_id: entry.device_id,
                    });
                }
            }
            settled.push(key);
        }
        Ok(())
    })?;

    for entry in conflicts {
        let key = entry.key();
        let attempts = log.record_attempt(&key)?;
        let conflict = SyncError::IntegrationConflict {
            collection: entry.collection.clone(),
            pk: entry.pk.clone(),
            operation: entry.operation,
            key,
        };
        if attempts >= max_attempts {
            warn!(%key, attempts, error = %conflict, "giving up on entry");
            report.warnings.push(conflict.to_string());
            report.skipped.push(key);
            settled.push(key);
        } else {
            debug!(%key, attempts, "deferring entry");
            report.deferred += 1;
        }
    }

    log.mark_integrated(&settled)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use marksync_protocol::{
        ClientSyncLogEntry, DeviceId, Mutation, SharedSyncLogEntry, UserId,
    };
    use serde_json::json;

    fn remote(seq: u64, mutation: Mutation) -> ClientSyncLogEntry {
        let entry = ClientSyncLogEntry::local(DeviceId::from_u128(2), mutation, seq as i64);
        SharedSyncLogEntry::from_client(UserId::from_u128(1), seq, &entry).into_received()
    }

    fn setup() -> (ClientSyncLog, MemoryStore) {
        (ClientSyncLog::in_memory(DeviceId::from_u128(1)), MemoryStore::new())
    }

    #[test]
    fn applies_in_seq_order() {
        let (log, store) = setup();
        log.receive_remote(vec![
            remote(2, Mutation::update("bookmarks", "a", json!({"title": "A2"}))),
            remote(1, Mutation::create("bookmarks", "a", json!({"title": "A1"}))),
        ])
        .unwrap();

        let report = integrate_pending(&log, &store, 3).unwrap();
        assert_eq!(report.applied.len(), 2);
        assert_eq!(report.applied[0].seq, 1);
        assert_eq!(store.find("bookmarks", "a").unwrap(), Some(json!({"title": "A2"})));
        assert_eq!(log.pending_count(), 0);
    }

    #[test]
    fn stale_entries_are_skipped() {
        let (log, store) = setup();
        log.receive_remote(vec![
            remote(1, Mutation::create("bookmarks", "a", json!({}))),
            remote(3, Mutation::delete("bookmarks", "a")),
        ])
        .unwrap();
        integrate_pending(&log, &store, 3).unwrap();

        // An older update arriving late must not resurrect the object.
        log.receive_remote(vec![remote(2, Mutation::update("bookmarks", "a", json!({"late": true})))])
            .unwrap();
        let report = integrate_pending(&log, &store, 3).unwrap();
        assert_eq!(report.stale, 1);
        assert!(store.find("bookmarks", "a").unwrap().is_none());
    }

    #[test]
    fn unpushed_local_change_wins() {
        let (log, store) = setup();
        log.append(Mutation::update("bookmarks", "a", json!({"title": "mine"})))
            .unwrap();
        store
            .transaction(|txn| txn.create("bookmarks", "a", json!({"title": "mine"})))
            .unwrap();

        log.receive_remote(vec![remote(5, Mutation::update("bookmarks", "a", json!({"title": "theirs"})))])
            .unwrap();
        let report = integrate_pending(&log, &store, 3).unwrap();

        assert_eq!(report.superseded, 1);
        assert_eq!(log.version_of("bookmarks", "a"), Some(5));
        assert_eq!(store.find("bookmarks", "a").unwrap(), Some(json!({"title": "mine"})));
    }

    #[test]
    fn update_of_unknown_object_is_deferred_then_skipped() {
        let (log, store) = setup();
        let entry = remote(1, Mutation::update("bookmarks", "ghost", json!({})));
        log.receive_remote(vec![entry.clone()]).unwrap();

        let report = integrate_pending(&log, &store, 2).unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(log.pending_count(), 1);

        let report = integrate_pending(&log, &store, 2).unwrap();
        assert_eq!(report.skipped, vec![entry.key()]);
        assert_eq!(report.warnings.len(), 1);
        assert!(log.is_applied(&entry.key()));
        assert!(store.find("bookmarks", "ghost").unwrap().is_none());
    }

    #[test]
    fn deferred_entry_applies_once_object_exists() {
        let (log, store) = setup();
        log.receive_remote(vec![remote(4, Mutation::update("bookmarks", "a", json!({"v": 2})))])
            .unwrap();
        assert_eq!(integrate_pending(&log, &store, 3).unwrap().deferred, 1);

        store
            .transaction(|txn| txn.create("bookmarks", "a", json!({"v": 1})))
            .unwrap();
        let report = integrate_pending(&log, &store, 3).unwrap();
        assert_eq!(report.applied.len(), 1);
        assert_eq!(store.find("bookmarks", "a").unwrap(), Some(json!({"v": 2})));
    }

    #[test]
    fn update_after_delete_recreates() {
        let (log, store) = setup();
        log.receive_remote(vec![
            remote(1, Mutation::create("bookmarks", "a", json!({"v": 1}))),
            remote(2, Mutation::delete("bookmarks", "a")),
            remote(3, Mutation::update("bookmarks", "a", json!({"v": 3}))),
        ])
        .unwrap();

        let report = integrate_pending(&log, &store, 3).unwrap();
        assert_eq!(report.applied.len(), 3);
        assert_eq!(store.find("bookmarks", "a").unwrap(), Some(json!({"v": 3})));
    }

    #[test]
    fn reintegration_is_idempotent() {
        let (log, store) = setup();
        let entries = vec![
            remote(1, Mutation::create("tags", "rust", json!({"n": 1}))),
            remote(2, Mutation::create("tags", "sync", json!({"n": 2}))),
        ];
        log.receive_remote(entries.clone()).unwrap();
        integrate_pending(&log, &store, 3).unwrap();
        let before = store.snapshot();

        assert_eq!(log.receive_remote(entries).unwrap(), 0);
        let report = integrate_pending(&log, &store, 3).unwrap();
        assert_eq!(report.settled(), 0);
        assert_eq!(store.snapshot(), before);
    }
}

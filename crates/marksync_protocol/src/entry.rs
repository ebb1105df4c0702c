//! Replication records: client-side and shared log entries.

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{DeviceId, EntryKey, Operation, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A domain mutation before it has been assigned a place in any log.
///
/// Mutations carry full-object snapshots: `value` is the complete object
/// after the change for `Create`/`Update`, and `Null` for `Delete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Collection name ("bookmarks", "tags", ...).
    pub collection: String,
    /// Kind of mutation.
    pub operation: Operation,
    /// Primary key of the object within the collection.
    pub pk: String,
    /// Full object snapshot (or `Null` for deletes).
    pub value: Value,
}

impl Mutation {
    /// Creates a `Create` mutation.
    pub fn create(collection: impl Into<String>, pk: impl Into<String>, value: Value) -> Self {
        Self {
            collection: collection.into(),
            operation: Operation::Create,
            pk: pk.into(),
            value,
        }
    }

    /// Creates an `Update` mutation.
    pub fn update(collection: impl Into<String>, pk: impl Into<String>, value: Value) -> Self {
        Self {
            collection: collection.into(),
            operation: Operation::Update,
            pk: pk.into(),
            value,
        }
    }

    /// Creates a `Delete` mutation.
    pub fn delete(collection: impl Into<String>, pk: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            operation: Operation::Delete,
            pk: pk.into(),
            value: Value::Null,
        }
    }

    /// Checks the structural rules every mutation must satisfy.
    pub fn validate(&self) -> ProtocolResult<()> {
        validate_parts(&self.collection, self.operation, &self.pk, &self.value)
    }
}

fn validate_parts(collection: &str, operation: Operation, pk: &str, value: &Value) -> ProtocolResult<()> {
    if collection.is_empty() {
        return Err(ProtocolError::invalid_structure("collection must not be empty"));
    }
    if pk.is_empty() {
        return Err(ProtocolError::invalid_structure("pk must not be empty"));
    }
    match (operation.carries_snapshot(), value.is_null()) {
        (true, true) => Err(ProtocolError::invalid_structure(format!(
            "{} of {}/{} has no snapshot",
            operation, collection, pk
        ))),
        (false, false) => Err(ProtocolError::invalid_structure(format!(
            "delete of {}/{} must not carry a value",
            collection, pk
        ))),
        _ => Ok(()),
    }
}

/// An entry in a device's client sync log.
///
/// Own entries are appended locally and pushed; remote entries are received
/// from the shared log and wait for integration. Apart from the
/// `shared_on`, `seq` and `needs_integration` markers, entries never change
/// after they are appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSyncLogEntry {
    /// Device that produced the mutation.
    pub device_id: DeviceId,
    /// Collection name.
    pub collection: String,
    /// Kind of mutation.
    pub operation: Operation,
    /// Primary key.
    pub pk: String,
    /// Full object snapshot (or `Null` for deletes).
    pub value: Value,
    /// Device-local monotonic timestamp (Unix millis, skew-corrected).
    pub created_on: i64,
    /// When the entry was durably written to the shared log.
    pub shared_on: Option<i64>,
    /// Global sequence number, once known.
    pub seq: Option<u64>,
    /// Whether a received entry still has to be applied locally.
    pub needs_integration: bool,
}

impl ClientSyncLogEntry {
    /// Creates a fresh, unshared local entry.
    pub fn local(device_id: DeviceId, mutation: Mutation, created_on: i64) -> Self {
        Self {
            device_id,
            collection: mutation.collection,
            operation: mutation.operation,
            pk: mutation.pk,
            value: mutation.value,
            created_on,
            shared_on: None,
            seq: None,
            needs_integration: false,
        }
    }

    /// Returns the dedup key of this entry.
    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.device_id, self.created_on)
    }

    /// Returns true once the entry has been written to the shared log.
    pub fn is_shared(&self) -> bool {
        self.shared_on.is_some()
    }

    /// Returns the mutation carried by this entry.
    pub fn mutation(&self) -> Mutation {
        Mutation {
            collection: self.collection.clone(),
            operation: self.operation,
            pk: self.pk.clone(),
            value: self.value.clone(),
        }
    }
}

/// The shared log's copy of an entry, with its global sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedSyncLogEntry {
    /// Account owning the log.
    pub user_id: UserId,
    /// Global, strictly increasing sequence number within the account.
    pub seq: u64,
    /// Device that produced the mutation.
    pub device_id: DeviceId,
    /// Collection name.
    pub collection: String,
    /// Kind of mutation.
    pub operation: Operation,
    /// Primary key.
    pub pk: String,
    /// Full object snapshot (or `Null` for deletes).
    pub value: Value,
    /// Producer's monotonic timestamp, only used for dedup.
    pub created_on: i64,
}

impl SharedSyncLogEntry {
    /// Builds the shared copy of a client entry.
    pub fn from_client(user_id: UserId, seq: u64, entry: &ClientSyncLogEntry) -> Self {
        Self {
            user_id,
            seq,
            device_id: entry.device_id,
            collection: entry.collection.clone(),
            operation: entry.operation,
            pk: entry.pk.clone(),
            value: entry.value.clone(),
            created_on: entry.created_on,
        }
    }

    /// Converts a pulled entry into a client log entry awaiting integration.
    pub fn into_received(self) -> ClientSyncLogEntry {
        ClientSyncLogEntry {
            device_id: self.device_id,
            collection: self.collection,
            operation: self.operation,
            pk: self.pk,
            value: self.value,
            created_on: self.created_on,
            shared_on: None,
            seq: Some(self.seq),
            needs_integration: true,
        }
    }

    /// Returns the dedup key of this entry.
    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.device_id, self.created_on)
    }

    /// Checks the structural rules of the carried mutation.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.seq == 0 {
            return Err(ProtocolError::invalid_structure("seq must be positive"));
        }
        validate_parts(&self.collection, self.operation, &self.pk, &self.value)
    }
}

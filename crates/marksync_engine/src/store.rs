//! Domain storage seam.
//!
//! The engine never owns domain data. It writes through a [`DomainStore`]
//! whose transactions apply a whole batch of mutations or none of them.

use crate::error::{SyncError, SyncResult};
use marksync_protocol::{Mutation, Operation};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Operations available inside a domain transaction.
pub trait StoreTxn {
    /// Inserts a new object. Fails if the object already exists.
    fn create(&mut self, collection: &str, pk: &str, value: Value) -> SyncResult<()>;

    /// Reads an object, including changes made earlier in this transaction.
    fn find(&self, collection: &str, pk: &str) -> SyncResult<Option<Value>>;

    /// Replaces an object. Returns false if it does not exist.
    fn update(&mut self, collection: &str, pk: &str, value: Value) -> SyncResult<bool>;

    /// Removes an object. Returns false if it did not exist.
    fn delete(&mut self, collection: &str, pk: &str) -> SyncResult<bool>;
}

/// Transactional domain storage.
pub trait DomainStore: Send + Sync {
    /// Runs `f` in a transaction.
    ///
    /// Changes are committed if `f` returns `Ok` and discarded otherwise.
    fn transaction<R, F>(&self, f: F) -> SyncResult<R>
    where
        F: FnOnce(&mut dyn StoreTxn) -> SyncResult<R>;

    /// Reads an object outside of any transaction.
    fn find(&self, collection: &str, pk: &str) -> SyncResult<Option<Value>> {
        self.transaction(|txn| txn.find(collection, pk))
    }
}

/// Writes a full snapshot, creating the object if needed.
pub(crate) fn put(txn: &mut dyn StoreTxn, collection: &str, pk: &str, value: Value) -> SyncResult<()> {
    if !txn.update(collection, pk, value.clone())? {
        txn.create(collection, pk, value)?;
    }
    Ok(())
}

/// Applies a mutation as the local device's own change.
pub(crate) fn apply_local(txn: &mut dyn StoreTxn, mutation: &Mutation) -> SyncResult<()> {
    match mutation.operation {
        Operation::Create | Operation::Update => {
            put(txn, &mutation.collection, &mutation.pk, mutation.value.clone())
        }
        Operation::Delete => txn.delete(&mutation.collection, &mutation.pk).map(|_| ()),
    }
}

/// Objects by collection name, then primary key.
pub type Collections = BTreeMap<String, BTreeMap<String, Value>>;

/// In-memory domain store.
///
/// Transactions hold the write lock for their whole duration and stage
/// changes in an overlay, so readers never observe a partial batch.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every collection.
    pub fn snapshot(&self) -> Collections {
        self.collections.read().clone()
    }

    /// Returns the objects of one collection.
    pub fn collection(&self, name: &str) -> BTreeMap<String, Value> {
        self.collections.read().get(name).cloned().unwrap_or_default()
    }

    /// Returns the number of objects in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }
}

struct MemoryTxn<'a> {
    base: &'a Collections,
    overlay: HashMap<(String, String), Option<Value>>,
}

impl MemoryTxn<'_> {
    fn current(&self, collection: &str, pk: &str) -> Option<Value> {
        match self.overlay.get(&(collection.to_string(), pk.to_string())) {
            Some(staged) => staged.clone(),
            None => self.base.get(collection).and_then(|c| c.get(pk)).cloned(),
        }
    }

    fn stage(&mut self, collection: &str, pk: &str, value: Option<Value>) {
        self.overlay
            .insert((collection.to_string(), pk.to_string()), value);
    }
}

impl StoreTxn for MemoryTxn<'_> {
    fn create(&mut self, collection: &str, pk: &str, value: Value) -> SyncResult<()> {
        if self.current(collection, pk).is_some() {
            return Err(SyncError::Storage(format!(
                "{}/{} already exists",
                collection, pk
            )));
        }
        self.stage(collection, pk, Some(value));
        Ok(())
    }

    fn find(&self, collection: &str, pk: &str) -> SyncResult<Option<Value>> {
        Ok(self.current(collection, pk))
    }

    fn update(&mut self, collection: &str, pk: &str, value: Value) -> SyncResult<bool> {
        if self.current(collection, pk).is_none() {
            return Ok(false);
        }
        self.stage(collection, pk, Some(value));
        Ok(true)
    }

    fn delete(&mut self, collection: &str, pk: &str) -> SyncResult<bool> {
        if self.current(collection, pk).is_none() {
            return Ok(false);
        }
        self.stage(collection, pk, None);
        Ok(true)
    }
}

impl DomainStore for MemoryStore {
    fn transaction<R, F>(&self, f: F) -> SyncResult<R>
    where
        F: FnOnce(&mut dyn StoreTxn) -> SyncResult<R>,
    {
        let mut collections = self.collections.write();
        let (result, overlay) = {
            let mut txn = MemoryTxn {
                base: &collections,
                overlay: HashMap::new(),
            };
            let result = f(&mut txn)?;
            (result, txn.overlay)
        };

        for ((collection, pk), value) in overlay {
            match value {
                Some(value) => {
                    collections.entry(collection).or_default().insert(pk, value);
                }
                None => {
                    if let Some(objects) = collections.get_mut(&collection) {
                        objects.remove(&pk);
                        if objects.is_empty() {
                            collections.remove(&collection);
                        }
                    }
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commit_on_ok() {
        let store = MemoryStore::new();
        store
            .transaction(|txn| {
                txn.create("bookmarks", "a", json!({"title": "A"}))?;
                assert_eq!(txn.find("bookmarks", "a")?, Some(json!({"title": "A"})));
                assert!(txn.update("bookmarks", "a", json!({"title": "A2"}))?);
                Ok(())
            })
            .unwrap();

        assert_eq!(store.find("bookmarks", "a").unwrap(), Some(json!({"title": "A2"})));
        assert_eq!(store.count("bookmarks"), 1);
    }

    #[test]
    fn rollback_on_error() {
        let store = MemoryStore::new();
        store
            .transaction(|txn| txn.create("bookmarks", "a", json!({})))
            .unwrap();

        let result: SyncResult<()> = store.transaction(|txn| {
            txn.delete("bookmarks", "a")?;
            txn.create("bookmarks", "b", json!({}))?;
            Err(SyncError::Storage("boom".into()))
        });
        assert!(result.is_err());
        assert!(store.find("bookmarks", "a").unwrap().is_some());
        assert!(store.find("bookmarks", "b").unwrap().is_none());
    }

    #[test]
    fn create_existing_fails() {
        let store = MemoryStore::new();
        let result = store.transaction(|txn| {
            txn.create("tags", "rust", json!({}))?;
            txn.create("tags", "rust", json!({}))
        });
        assert!(matches!(result, Err(SyncError::Storage(_))));
        assert_eq!(store.count("tags"), 0);
    }

    #[test]
    fn update_and_delete_missing() {
        let store = MemoryStore::new();
        store
            .transaction(|txn| {
                assert!(!txn.update("tags", "x", json!({}))?);
                assert!(!txn.delete("tags", "x")?);
                Ok(())
            })
            .unwrap();
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn apply_local_upserts_and_deletes() {
        let store = MemoryStore::new();
        store
            .transaction(|txn| {
                apply_local(txn, &Mutation::update("bookmarks", "a", json!({"v": 1})))?;
                apply_local(txn, &Mutation::create("bookmarks", "a", json!({"v": 2})))
            })
            .unwrap();
        assert_eq!(store.find("bookmarks", "a").unwrap(), Some(json!({"v": 2})));

        store
            .transaction(|txn| apply_local(txn, &Mutation::delete("bookmarks", "a")))
            .unwrap();
        assert_eq!(store.count("bookmarks"), 0);
    }
}

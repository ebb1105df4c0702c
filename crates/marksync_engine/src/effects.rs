//! Side effects run after remote mutations are integrated.
//!
//! Effects are keyed by `(collection, operation)`. They run after the
//! integration transaction commits and must only derive data from the
//! current domain state, so running one twice is harmless.

use crate::error::SyncResult;
use marksync_protocol::{DeviceId, Operation};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// A remote mutation that was applied to the domain store.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMutation {
    /// Collection name.
    pub collection: String,
    /// Kind of mutation.
    pub operation: Operation,
    /// Primary key.
    pub pk: String,
    /// Snapshot that was written (`Null` for deletes).
    pub value: Value,
    /// Shared log seq of the entry.
    pub seq: u64,
    /// Device that produced the mutation.
    pub device_id: DeviceId,
}

/// Handler invoked for an applied mutation.
pub type SideEffect = Arc<dyn Fn(&AppliedMutation) -> SyncResult<()> + Send + Sync>;

/// Outcome of running side effects for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectReport {
    /// Handlers that completed.
    pub completed: usize,
    /// Descriptions of handlers that kept failing.
    pub failures: Vec<String>,
}

/// Dispatch table of side effects.
pub struct SideEffectRunner {
    handlers: RwLock<HashMap<(String, Operation), Vec<SideEffect>>>,
    attempts: u32,
}

impl SideEffectRunner {
    /// Creates an empty table; each handler is attempted up to `attempts`
    /// times per mutation.
    pub fn new(attempts: u32) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            attempts: attempts.max(1),
        }
    }

    /// Registers a handler.
    pub fn register<F>(&self, collection: impl Into<String>, operation: Operation, handler: F)
    where
        F: Fn(&AppliedMutation) -> SyncResult<()> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry((collection.into(), operation))
            .or_default()
            .push(Arc::new(handler));
    }

    /// Returns the number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }

    /// Returns true if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the handlers of every mutation, in order.
    ///
    /// A failing handler never stops the others.
    pub fn run(&self, applied: &[AppliedMutation]) -> EffectReport {
        let mut report = EffectReport::default();
        for mutation in applied {
            let handlers = self
                .handlers
                .read()
                .get(&(mutation.collection.clone(), mutation.operation))
                .cloned()
                .unwrap_or_default();

            for handler in handlers {
                match self.run_one(&handler, mutation) {
                    Ok(()) => report.completed += 1,
                    Err(e) => {
                        warn!(
                            collection = %mutation.collection,
                            pk = %mutation.pk,
                            op = %mutation.operation,
                            error = %e,
                            "side effect failed"
                        );
                        report.failures.push(format!(
                            "{} effect for {}/{} failed: {}",
                            mutation.operation, mutation.collection, mutation.pk, e
                        ));
                    }
                }
            }
        }
        report
    }

    fn run_one(&self, handler: &SideEffect, mutation: &AppliedMutation) -> SyncResult<()> {
        let mut attempt = 1;
        loop {
            match handler(mutation) {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.attempts => return Err(e),
                Err(_) => attempt += 1,
            }
        }
    }
}

//! # Marksync Sync Engine
//!
//! Offline-first sync for bookmark collections shared by a user's devices.
//!
//! This crate provides:
//! - `ClientSyncLog`, the per-device ledger of local mutations and received
//!   remote entries, optionally backed by a crash-safe journal
//! - A monotonic local clock used to stamp local mutations
//! - `SyncEngine`, the orchestrator state machine
//!   (idle → pairing → initial sync → listening → error)
//! - Integration of remote entries into a `DomainStore`, one transaction
//!   per batch, with whole-object last-write-wins by shared log `seq`
//! - Device pairing over a `SignallingChannel`
//! - `SyncService`, a tokio task that drives the engine
//!
//! ## Architecture
//!
//! Every cycle is a whole push, pull and integrate pass:
//! 1. Push unshared local entries; the shared log assigns their `seq`
//! 2. Pull entries from other devices after the cursor, page by page
//! 3. Integrate each page in `seq` order, then advance the cursor
//!
//! ## Key Invariants
//!
//! - Local timestamps never go backwards
//! - `(device_id, created_on)` identifies an entry everywhere
//! - The cursor only moves after the page it covers was integrated
//! - A delete wins over any create or update with a lower `seq`
//! - Re-applying an already integrated entry changes nothing

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client_log;
mod clock;
mod config;
mod effects;
mod engine;
mod error;
mod http;
mod integrate;
mod journal;
mod pairing;
mod service;
mod settings;
mod signal;
mod status;
mod store;
mod transport;

pub use client_log::ClientSyncLog;
pub use clock::{now_millis, LocalClock};
pub use config::{RetryConfig, SyncConfig};
pub use effects::{AppliedMutation, EffectReport, SideEffect, SideEffectRunner};
pub use engine::{EngineState, SyncCycleResult, SyncEngine, SyncOutcome, SyncStats};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpResponse, HttpTransport, LoopbackClient, LoopbackServer};
pub use integrate::{integrate_pending, IntegrationReport};
pub use journal::{read_journal, JournalContents, JournalRecord};
pub use pairing::{join_pairing, start_pairing, PairingSession};
pub use service::SyncService;
pub use settings::{
    load_or_create_identity, DeviceIdentity, FileSettings, MemorySettings, PairingState,
    SettingsStore, SyncCursor,
};
pub use signal::{MemorySignalling, PairingCode, Peer, RoomInfo, SignallingChannel, CODE_LENGTH};
pub use status::{StatusBus, SyncStatus};
pub use store::{Collections, DomainStore, MemoryStore, StoreTxn};
pub use transport::{MockFailure, MockTransport, SyncTransport};

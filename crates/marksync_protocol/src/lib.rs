//! # Marksync Protocol
//!
//! Wire types and CBOR codecs shared by the Marksync sync engine and the
//! shared sync log server.
//!
//! This crate provides:
//! - `ClientSyncLogEntry` / `SharedSyncLogEntry` replication records
//! - Device and account identifiers
//! - Request/response messages for the shared log endpoints
//! - Pairing signals exchanged over the signalling channel
//! - CBOR encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod entry;
mod error;
mod messages;
mod signal;
mod types;

pub use codec::{from_cbor, to_cbor, WireMessage};
pub use entry::{ClientSyncLogEntry, Mutation, SharedSyncLogEntry};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    endpoints, CreateAccountRequest, CreateAccountResponse, ErrorKind, ErrorResponse,
    GetEntriesRequest, GetEntriesResponse, ListDevicesRequest, ListDevicesResponse,
    RegisterDeviceRequest, RegisterDeviceResponse, RemoveDeviceRequest, RemoveDeviceResponse,
    WriteEntriesRequest, WriteEntriesResponse, PROTOCOL_VERSION,
};
pub use signal::PairingSignal;
pub use types::{AccessToken, Device, DeviceId, EntryKey, Operation, UserId};

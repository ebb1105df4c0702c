//! # Marksync Server
//!
//! The shared sync log: a per-account, append-only store that assigns a
//! global sequence number to every entry written by any of the account's
//! devices.
//!
//! This crate provides:
//! - `SharedSyncLog`, the per-account log with `(device_id, created_on)`
//!   write deduplication and a device registry
//! - Access tokens (HMAC-SHA256) binding a device to an account
//! - Request handlers and a CBOR-over-HTTP style dispatcher
//!
//! # Ordering
//!
//! Every account has a single total order (`seq`). All devices observe
//! entries from all other devices in that order, which is what makes
//! integration deterministic. Device clocks are never used for ordering.
//!
//! # Protocol
//!
//! 1. The first device creates the account and receives a token
//! 2. Paired devices are registered by an already registered device
//! 3. Devices push with `write_entries` and pull with `get_entries_since`
//! 4. Removed devices lose access; their past entries stay in the log

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod server;
mod shared_log;

pub use auth::TokenValidator;
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use server::{PostReply, SyncServer};
pub use shared_log::{EntriesPage, SharedSyncLog};

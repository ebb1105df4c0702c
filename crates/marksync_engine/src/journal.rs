//! Append-only journal backing a durable client sync log.
//!
//! Record framing:
//!
//! ```text
//! | magic (4) | payload length (4, LE) | CBOR payload | checksum (4) |
//! ```
//!
//! The checksum is the first four bytes of the SHA-256 of the payload. A
//! short or damaged tail (power loss mid-append) is cut off on open.

use crate::error::{SyncError, SyncResult};
use marksync_protocol::{from_cbor, to_cbor, ClientSyncLogEntry, EntryKey, UserId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

const MAGIC: [u8; 4] = *b"MSLJ";
const HEADER_SIZE: usize = 8;
const CHECKSUM_SIZE: usize = 4;

/// One durable state change of the client log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalRecord {
    /// A local mutation was appended.
    Appended(ClientSyncLogEntry),
    /// A remote entry was received.
    Received(ClientSyncLogEntry),
    /// Own entries reached the shared log.
    Shared {
        /// Entry keys with the seqs assigned to them.
        entries: Vec<(EntryKey, u64)>,
        /// Time of the acknowledgement.
        at: i64,
    },
    /// Received entries were integrated (or skipped for good).
    Integrated(Vec<EntryKey>),
    /// A received entry failed an integration attempt.
    Attempted(EntryKey),
    /// The log now follows this account's shared log.
    Attached(UserId),
}

/// File-backed journal.
pub(crate) struct Journal {
    path: PathBuf,
    file: File,
}

impl Journal {
    /// Opens (or creates) the journal and returns every intact record.
    pub(crate) fn open(path: &Path) -> SyncResult<(Self, Vec<JournalRecord>)> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let (records, valid_len) = decode_all(&data);
        if valid_len < data.len() {
            warn!(
                path = %path.display(),
                kept = valid_len,
                dropped = data.len() - valid_len,
                "truncating damaged journal tail"
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::End(0))?;

        Ok((
            Self {
                path: path.to_path_buf(),
                file,
            },
            records,
        ))
    }

    /// Appends records and syncs them to disk.
    pub(crate) fn append(&mut self, records: &[JournalRecord]) -> SyncResult<()> {
        let mut buffer = Vec::new();
        for record in records {
            encode_frame(record, &mut buffer)?;
        }
        self.file.write_all(&buffer)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Returns the journal path.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

/// Intact records of a journal file plus the size of any damaged tail.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalContents {
    /// Records in append order.
    pub records: Vec<JournalRecord>,
    /// Bytes after the last intact record.
    pub damaged_tail: usize,
}

/// Reads a journal without modifying it.
pub fn read_journal(path: &Path) -> SyncResult<JournalContents> {
    let data = std::fs::read(path)?;
    let (records, valid_len) = decode_all(&data);
    Ok(JournalContents {
        records,
        damaged_tail: data.len() - valid_len,
    })
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let digest = Sha256::digest(payload);
    [digest[0], digest[1], digest[2], digest[3]]
}

fn encode_frame(record: &JournalRecord, out: &mut Vec<u8>) -> SyncResult<()> {
    let payload = to_cbor(record)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| SyncError::Storage(format!("journal record too large: {} bytes", payload.len())))?;
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&checksum(&payload));
    Ok(())
}

/// Decodes frames until the first incomplete or damaged one.
///
/// Returns the records and the length of the intact prefix.
fn decode_all(data: &[u8]) -> (Vec<JournalRecord>, usize) {
    let mut records = Vec::new();
    let mut offset = 0;

    while data.len() - offset >= HEADER_SIZE {
        let header = &data[offset..offset + HEADER_SIZE];
        if header[0..4] != MAGIC {
            break;
        }
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let end = offset + HEADER_SIZE + len + CHECKSUM_SIZE;
        if end > data.len() {
            break;
        }

        let payload = &data[offset + HEADER_SIZE..offset + HEADER_SIZE + len];
        if data[end - CHECKSUM_SIZE..end] != checksum(payload) {
            break;
        }
        match from_cbor(payload) {
            Ok(record) => records.push(record),
            Err(_) => break,
        }
        offset = end;
    }

    (records, offset)
}

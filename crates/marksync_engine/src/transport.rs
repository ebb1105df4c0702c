//! Transport layer abstraction for the shared sync log.

use crate::error::{SyncError, SyncResult};
use marksync_protocol::{
    AccessToken, CreateAccountRequest, CreateAccountResponse, Device, EntryKey, GetEntriesRequest,
    GetEntriesResponse, ListDevicesRequest, ListDevicesResponse, RegisterDeviceRequest,
    RegisterDeviceResponse, RemoveDeviceRequest, RemoveDeviceResponse, SharedSyncLogEntry,
    UserId, WriteEntriesRequest, WriteEntriesResponse,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

/// A sync transport talks to the shared sync log.
///
/// Calls are blocking. Implementations map network failures to retryable
/// [`SyncError::Network`] errors and server rejections to the matching
/// [`SyncError`] variant.
pub trait SyncTransport: Send + Sync {
    /// Creates an account whose first device is the caller.
    fn create_account(&self, request: &CreateAccountRequest) -> SyncResult<CreateAccountResponse>;

    /// Appends entries; returns one seq per entry.
    fn write_entries(&self, request: &WriteEntriesRequest) -> SyncResult<WriteEntriesResponse>;

    /// Reads a page of entries after a seq.
    fn get_entries_since(&self, request: &GetEntriesRequest) -> SyncResult<GetEntriesResponse>;

    /// Registers a newly paired device.
    fn register_device(&self, request: &RegisterDeviceRequest) -> SyncResult<RegisterDeviceResponse>;

    /// Revokes a device.
    fn remove_device(&self, request: &RemoveDeviceRequest) -> SyncResult<RemoveDeviceResponse>;

    /// Lists active devices.
    fn list_devices(&self, request: &ListDevicesRequest) -> SyncResult<ListDevicesResponse>;

    /// Checks if the transport can currently reach the server.
    fn is_connected(&self) -> bool {
        true
    }
}

impl<T: SyncTransport + ?Sized> SyncTransport for std::sync::Arc<T> {
    fn create_account(&self, request: &CreateAccountRequest) -> SyncResult<CreateAccountResponse> {
        (**self).create_account(request)
    }

    fn write_entries(&self, request: &WriteEntriesRequest) -> SyncResult<WriteEntriesResponse> {
        (**self).write_entries(request)
    }

    fn get_entries_since(&self, request: &GetEntriesRequest) -> SyncResult<GetEntriesResponse> {
        (**self).get_entries_since(request)
    }

    fn register_device(&self, request: &RegisterDeviceRequest) -> SyncResult<RegisterDeviceResponse> {
        (**self).register_device(request)
    }

    fn remove_device(&self, request: &RemoveDeviceRequest) -> SyncResult<RemoveDeviceResponse> {
        (**self).remove_device(request)
    }

    fn list_devices(&self, request: &ListDevicesRequest) -> SyncResult<ListDevicesResponse> {
        (**self).list_devices(request)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}

/// Failure a [`MockTransport`] can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Retryable network error.
    Network,
    /// Credentials rejected.
    Auth,
    /// Account quota exhausted.
    Quota,
    /// Retryable server error.
    Server,
}

impl MockFailure {
    fn into_error(self) -> SyncError {
        match self {
            MockFailure::Network => SyncError::network_retryable("mock network failure"),
            MockFailure::Auth => SyncError::Auth("mock credentials rejected".into()),
            MockFailure::Quota => SyncError::QuotaExceeded("mock quota exhausted".into()),
            MockFailure::Server => SyncError::Server("mock server failure".into()),
        }
    }
}

#[derive(Default)]
struct MockLog {
    entries: Vec<SharedSyncLogEntry>,
    by_key: HashMap<EntryKey, u64>,
    devices: Vec<Device>,
}

/// A single-account, in-memory transport for testing.
///
/// Writes are assigned dense seqs and deduplicated like the real shared
/// log. Failures can be queued per operation.
pub struct MockTransport {
    user_id: UserId,
    connected: AtomicBool,
    log: Mutex<MockLog>,
    write_failures: Mutex<VecDeque<MockFailure>>,
    read_failures: Mutex<VecDeque<MockFailure>>,
    writes: Mutex<Vec<WriteEntriesRequest>>,
    reads: Mutex<Vec<GetEntriesRequest>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            user_id: UserId::from_u128(0x5eed),
            connected: AtomicBool::new(true),
            log: Mutex::new(MockLog::default()),
            write_failures: Mutex::new(VecDeque::new()),
            read_failures: Mutex::new(VecDeque::new()),
            writes: Mutex::new(Vec::new()),
            reads: Mutex::new(Vec::new()),
        }
    }

    /// Returns the account every request is served from.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Sets the connected state. A disconnected transport fails every call
    /// with a retryable network error.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes the next write fail.
    pub fn fail_next_write(&self, failure: MockFailure) {
        self.write_failures.lock().push_back(failure);
    }

    /// Makes the next read fail.
    pub fn fail_next_read(&self, failure: MockFailure) {
        self.read_failures.lock().push_back(failure);
    }

    /// Appends an entry as if another device had written it.
    pub fn inject(&self, entry: marksync_protocol::ClientSyncLogEntry) -> u64 {
        let mut log = self.log.lock();
        let seq = log.entries.len() as u64 + 1;
        log.by_key.insert(entry.key(), seq);
        log.entries
            .push(SharedSyncLogEntry::from_client(self.user_id, seq, &entry));
        seq
    }

    /// Returns the shared entries written so far.
    pub fn entries(&self) -> Vec<SharedSyncLogEntry> {
        self.log.lock().entries.clone()
    }

    /// Returns the write requests received so far.
    pub fn writes(&self) -> Vec<WriteEntriesRequest> {
        self.writes.lock().clone()
    }

    /// Returns the read requests received so far.
    pub fn reads(&self) -> Vec<GetEntriesRequest> {
        self.reads.lock().clone()
    }

    fn check(&self, failures: &Mutex<VecDeque<MockFailure>>) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::network_retryable("not connected"));
        }
        match failures.lock().pop_front() {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTransport for MockTransport {
    fn create_account(&self, request: &CreateAccountRequest) -> SyncResult<CreateAccountResponse> {
        self.check(&self.write_failures)?;
        self.log.lock().devices.push(request.device.clone());
        Ok(CreateAccountResponse {
            user_id: self.user_id,
            token: AccessToken::new(vec![0xAA; 8]),
        })
    }

    fn write_entries(&self, request: &WriteEntriesRequest) -> SyncResult<WriteEntriesResponse> {
        self.writes.lock().push(request.clone());
        self.check(&self.write_failures)?;

        let mut log = self.log.lock();
        let mut seqs = Vec::with_capacity(request.entries.len());
        for entry in &request.entries {
            let key = entry.key();
            if let Some(&seq) = log.by_key.get(&key) {
                seqs.push(seq);
                continue;
            }
            let seq = log.entries.len() as u64 + 1;
            log.by_key.insert(key, seq);
            log.entries
                .push(SharedSyncLogEntry::from_client(self.user_id, seq, entry));
            seqs.push(seq);
        }
        Ok(WriteEntriesResponse {
            seqs,
            latest_seq: log.entries.len() as u64,
        })
    }

    fn get_entries_since(&self, request: &GetEntriesRequest) -> SyncResult<GetEntriesResponse> {
        self.reads.lock().push(request.clone());
        self.check(&self.read_failures)?;

        let log = self.log.lock();
        let limit = request.limit.max(1) as usize;
        let start = (request.after_seq as usize).min(log.entries.len());
        let mut entries = Vec::new();
        let mut scanned_to = request.after_seq;
        for entry in &log.entries[start..] {
            if entries.len() == limit {
                break;
            }
            scanned_to = entry.seq;
            if Some(entry.device_id) != request.exclude_device_id {
                entries.push(entry.clone());
            }
        }
        Ok(GetEntriesResponse {
            entries,
            has_more: scanned_to < log.entries.len() as u64,
            scanned_to,
        })
    }

    fn register_device(&self, request: &RegisterDeviceRequest) -> SyncResult<RegisterDeviceResponse> {
        self.check(&self.write_failures)?;
        self.log.lock().devices.push(request.device.clone());
        Ok(RegisterDeviceResponse {
            token: AccessToken::new(vec![0xBB; 8]),
        })
    }

    fn remove_device(&self, request: &RemoveDeviceRequest) -> SyncResult<RemoveDeviceResponse> {
        self.check(&self.write_failures)?;
        let mut log = self.log.lock();
        let before = log.devices.len();
        log.devices.retain(|d| d.id != request.target);
        Ok(RemoveDeviceResponse {
            removed: log.devices.len() < before,
        })
    }

    fn list_devices(&self, _request: &ListDevicesRequest) -> SyncResult<ListDevicesResponse> {
        self.check(&self.read_failures)?;
        Ok(ListDevicesResponse {
            devices: self.log.lock().devices.clone(),
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

//! Request and response messages for the shared sync log endpoints.

use crate::codec::WireMessage;
use crate::entry::{ClientSyncLogEntry, SharedSyncLogEntry};
use crate::types::{AccessToken, Device, DeviceId, UserId};
use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Endpoint paths served by the shared sync log.
pub mod endpoints {
    /// Append entries for a device.
    pub const WRITE_ENTRIES: &str = "/sync/write";
    /// Read entries after a sequence number.
    pub const GET_ENTRIES: &str = "/sync/entries";
    /// Create an account with its first device.
    pub const CREATE_ACCOUNT: &str = "/sync/account";
    /// Register a newly paired device.
    pub const REGISTER_DEVICE: &str = "/sync/devices/register";
    /// Revoke a device.
    pub const REMOVE_DEVICE: &str = "/sync/devices/remove";
    /// List the account's devices.
    pub const LIST_DEVICES: &str = "/sync/devices/list";
}

/// Appends a device's entries to the shared log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteEntriesRequest {
    /// Account ID.
    pub user_id: UserId,
    /// Writing device.
    pub device_id: DeviceId,
    /// Device credential.
    pub token: AccessToken,
    /// Entries in `created_on` order.
    pub entries: Vec<ClientSyncLogEntry>,
}

/// Sequence numbers assigned to a write, one per request entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteEntriesResponse {
    /// Assigned (or previously assigned, for retried entries) seqs.
    pub seqs: Vec<u64>,
    /// Highest seq in the account after the write.
    pub latest_seq: u64,
}

/// Reads entries with `seq > after_seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetEntriesRequest {
    /// Account ID.
    pub user_id: UserId,
    /// Reading device.
    pub device_id: DeviceId,
    /// Device credential.
    pub token: AccessToken,
    /// Exclusive lower bound.
    pub after_seq: u64,
    /// Skip entries written by this device.
    pub exclude_device_id: Option<DeviceId>,
    /// Maximum number of entries to return.
    pub limit: u32,
}

/// A page of shared log entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetEntriesResponse {
    /// Entries in ascending `seq` order.
    pub entries: Vec<SharedSyncLogEntry>,
    /// Whether more entries exist after this page.
    pub has_more: bool,
    /// Highest seq scanned for this page; the next page starts after it.
    pub scanned_to: u64,
}

/// Creates an account whose first device is `device`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    /// Protocol version of the client.
    pub protocol_version: u16,
    /// The founding device.
    pub device: Device,
}

/// Credentials for the founding device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAccountResponse {
    /// New account ID.
    pub user_id: UserId,
    /// Token for the founding device.
    pub token: AccessToken,
}

/// Registers a paired device, on behalf of an already registered one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDeviceRequest {
    /// Account ID.
    pub user_id: UserId,
    /// Registering (already authorized) device.
    pub device_id: DeviceId,
    /// Credential of the registering device.
    pub token: AccessToken,
    /// Device being registered.
    pub device: Device,
}

/// Credential issued to a newly registered device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDeviceResponse {
    /// Token for the new device.
    pub token: AccessToken,
}

/// Revokes a device's access to the shared log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveDeviceRequest {
    /// Account ID.
    pub user_id: UserId,
    /// Requesting device.
    pub device_id: DeviceId,
    /// Credential of the requesting device.
    pub token: AccessToken,
    /// Device to revoke.
    pub target: DeviceId,
}

/// Outcome of a device removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveDeviceResponse {
    /// False if the device was already revoked.
    pub removed: bool,
}

/// Lists the account's active devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListDevicesRequest {
    /// Account ID.
    pub user_id: UserId,
    /// Requesting device.
    pub device_id: DeviceId,
    /// Credential of the requesting device.
    pub token: AccessToken,
}

/// Active devices of an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListDevicesResponse {
    /// Devices, in pairing order.
    pub devices: Vec<Device>,
}

/// Classification of a failed request, carried in error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed or over-sized request.
    InvalidRequest,
    /// Missing, invalid or revoked credentials.
    NotAuthorized,
    /// Account does not exist.
    UnknownAccount,
    /// Account storage quota exhausted.
    QuotaExceeded,
    /// Unexpected server failure.
    Internal,
}

/// Body returned with a non-success status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl ErrorResponse {
    /// Creates an error response.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl WireMessage for WriteEntriesRequest {}
impl WireMessage for WriteEntriesResponse {}
impl WireMessage for GetEntriesRequest {}
impl WireMessage for GetEntriesResponse {}
impl WireMessage for CreateAccountRequest {}
impl WireMessage for CreateAccountResponse {}
impl WireMessage for RegisterDeviceRequest {}
impl WireMessage for RegisterDeviceResponse {}
impl WireMessage for RemoveDeviceRequest {}
impl WireMessage for RemoveDeviceResponse {}
impl WireMessage for ListDevicesRequest {}
impl WireMessage for ListDevicesResponse {}
impl WireMessage for ErrorResponse {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Mutation;
    use serde_json::json;

    #[test]
    fn write_request_roundtrip() {
        let device_id = DeviceId::from_u128(2);
        let request = WriteEntriesRequest {
            user_id: UserId::from_u128(1),
            device_id,
            token: AccessToken::new(vec![1, 2, 3]),
            entries: vec![ClientSyncLogEntry::local(
                device_id,
                Mutation::create("bookmarks", "https://a.com", json!({"title": "A"})),
                100,
            )],
        };

        let decoded = WriteEntriesRequest::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn error_response_roundtrip() {
        let response = ErrorResponse::new(ErrorKind::QuotaExceeded, "account is full");
        let decoded = ErrorResponse::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded.kind, ErrorKind::QuotaExceeded);
        assert_eq!(decoded.message, "account is full");
    }

    #[test]
    fn decoding_wrong_message_type_fails() {
        let response = RemoveDeviceResponse { removed: true };
        assert!(GetEntriesResponse::decode(&response.encode().unwrap()).is_err());
    }
}

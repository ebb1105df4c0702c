//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via a trait so any blocking client
//! (or an in-process loopback) can carry the CBOR bodies.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use marksync_protocol::{
    endpoints, CreateAccountRequest, CreateAccountResponse, ErrorResponse, GetEntriesRequest,
    GetEntriesResponse, ListDevicesRequest, ListDevicesResponse, RegisterDeviceRequest,
    RegisterDeviceResponse, RemoveDeviceRequest, RemoveDeviceResponse, WireMessage,
    WriteEntriesRequest, WriteEntriesResponse,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// `post` returns `Err` only when no response was received at all
/// (connection refused, timeout, ...). Error statuses are responses.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// HTTP-based sync transport with CBOR bodies.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the HTTP client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn post_cbor<Req, Res>(&self, endpoint: &str, request: &Req) -> SyncResult<Res>
    where
        Req: WireMessage,
        Res: WireMessage,
    {
        let body = request.encode()?;
        let url = format!("{}{}", self.base_url, endpoint);

        let response = match self.client.post(&url, body) {
            Ok(response) => response,
            Err(e) => {
                debug!(%url, error = %e, "request failed");
                *self.last_error.write() = Some(e.clone());
                self.connected.store(false, Ordering::SeqCst);
                return Err(SyncError::network_retryable(e));
            }
        };
        self.connected.store(true, Ordering::SeqCst);

        if response.is_success() {
            *self.last_error.write() = None;
            return Ok(Res::decode(&response.body)?);
        }

        let error = match ErrorResponse::decode(&response.body) {
            Ok(body) => SyncError::from(body),
            Err(_) if response.status >= 500 => {
                SyncError::Server(format!("status {}", response.status))
            }
            Err(_) => SyncError::Protocol(format!("unexpected status {}", response.status)),
        };
        warn!(%url, status = response.status, error = %error, "server rejected request");
        *self.last_error.write() = Some(error.to_string());
        Err(error)
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn create_account(&self, request: &CreateAccountRequest) -> SyncResult<CreateAccountResponse> {
        self.post_cbor(endpoints::CREATE_ACCOUNT, request)
    }

    fn write_entries(&self, request: &WriteEntriesRequest) -> SyncResult<WriteEntriesResponse> {
        self.post_cbor(endpoints::WRITE_ENTRIES, request)
    }

    fn get_entries_since(&self, request: &GetEntriesRequest) -> SyncResult<GetEntriesResponse> {
        self.post_cbor(endpoints::GET_ENTRIES, request)
    }

    fn register_device(&self, request: &RegisterDeviceRequest) -> SyncResult<RegisterDeviceResponse> {
        self.post_cbor(endpoints::REGISTER_DEVICE, request)
    }

    fn remove_device(&self, request: &RemoveDeviceRequest) -> SyncResult<RemoveDeviceResponse> {
        self.post_cbor(endpoints::REMOVE_DEVICE, request)
    }

    fn list_devices(&self, request: &ListDevicesRequest) -> SyncResult<ListDevicesResponse> {
        self.post_cbor(endpoints::LIST_DEVICES, request)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request for `path`.
    fn handle_post(&self, path: &str, body: &[u8]) -> HttpResponse;
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for tests and simulations without network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    online: AtomicBool,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            online: AtomicBool::new(true),
        }
    }

    /// Simulates losing (or regaining) connectivity.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Returns false while connectivity is simulated as lost.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String> {
        if !self.online.load(Ordering::SeqCst) {
            return Err("network unreachable".to_string());
        }
        let path = url.find("/sync/").map(|i| &url[i..]).unwrap_or(url);
        Ok(self.server.handle_post(path, &body))
    }

    fn is_healthy(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::shared_log::SharedSyncLog;
use marksync_protocol::{
    endpoints, CreateAccountRequest, CreateAccountResponse, GetEntriesRequest,
    GetEntriesResponse, ListDevicesRequest, ListDevicesResponse, RegisterDeviceRequest,
    RegisterDeviceResponse, RemoveDeviceRequest, RemoveDeviceResponse, WireMessage,
    WriteEntriesRequest, WriteEntriesResponse,
};
use std::sync::Arc;
use tracing::error;

/// Status and body produced by [`SyncServer::handle_post`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostReply {
    /// HTTP status code.
    pub status: u16,
    /// CBOR body: the response message, or an `ErrorResponse`.
    pub body: Vec<u8>,
}

/// The sync server.
///
/// Handles shared log requests for any number of accounts. Transport
/// adapters (an HTTP framework, or an in-process loopback in tests) call
/// [`SyncServer::handle_post`] with the request path and CBOR body.
///
/// # Example
///
/// ```
/// use marksync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// assert_eq!(server.entry_count(), 0);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig) -> Self {
        let log = match config.max_entries_per_account {
            Some(limit) => SharedSyncLog::with_quota(limit),
            None => SharedSyncLog::new(),
        };
        Self::with_log(config, Arc::new(log))
    }

    /// Creates a sync server over an existing log.
    pub fn with_log(config: ServerConfig, log: Arc<SharedSyncLog>) -> Self {
        let context = Arc::new(HandlerContext::new(config, log));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// Handles an account creation request.
    pub fn create_account(&self, request: CreateAccountRequest) -> ServerResult<CreateAccountResponse> {
        self.handler.handle_create_account(request)
    }

    /// Handles a write request.
    pub fn write_entries(&self, request: WriteEntriesRequest) -> ServerResult<WriteEntriesResponse> {
        self.handler.handle_write(request)
    }

    /// Handles a read request.
    pub fn get_entries_since(&self, request: GetEntriesRequest) -> ServerResult<GetEntriesResponse> {
        self.handler.handle_get_entries(request)
    }

    /// Handles a device registration.
    pub fn register_device(
        &self,
        request: RegisterDeviceRequest,
    ) -> ServerResult<RegisterDeviceResponse> {
        self.handler.handle_register_device(request)
    }

    /// Handles a device removal.
    pub fn remove_device(&self, request: RemoveDeviceRequest) -> ServerResult<RemoveDeviceResponse> {
        self.handler.handle_remove_device(request)
    }

    /// Handles a device listing.
    pub fn list_devices(&self, request: ListDevicesRequest) -> ServerResult<ListDevicesResponse> {
        self.handler.handle_list_devices(request)
    }

    /// Dispatches a CBOR request body by path.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> PostReply {
        let result = match path {
            endpoints::WRITE_ENTRIES => dispatch(body, |r| self.write_entries(r)),
            endpoints::GET_ENTRIES => dispatch(body, |r| self.get_entries_since(r)),
            endpoints::CREATE_ACCOUNT => dispatch(body, |r| self.create_account(r)),
            endpoints::REGISTER_DEVICE => dispatch(body, |r| self.register_device(r)),
            endpoints::REMOVE_DEVICE => dispatch(body, |r| self.remove_device(r)),
            endpoints::LIST_DEVICES => dispatch(body, |r| self.list_devices(r)),
            other => Err(ServerError::InvalidRequest(format!("unknown endpoint {}", other))),
        };

        match result {
            Ok(body) => PostReply { status: 200, body },
            Err(e) => {
                if e.is_server_error() {
                    error!(path, error = %e, "request failed");
                }
                // An ErrorResponse is two plain fields; encoding it cannot fail.
                let body = e.to_response().encode().unwrap_or_default();
                PostReply {
                    status: e.status_code(),
                    body,
                }
            }
        }
    }

    /// Returns the shared log.
    pub fn log(&self) -> &Arc<SharedSyncLog> {
        &self.context.log
    }

    /// Returns the number of entries stored across all accounts.
    pub fn entry_count(&self) -> usize {
        self.context.log.len()
    }
}

fn dispatch<Req, Res>(body: &[u8], handle: impl FnOnce(Req) -> ServerResult<Res>) -> ServerResult<Vec<u8>>
where
    Req: WireMessage,
    Res: WireMessage,
{
    let request = Req::decode(body)?;
    let response = handle(request)?;
    Ok(response.encode()?)
}

//! Request handlers for the shared log endpoints.

use crate::auth::TokenValidator;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::shared_log::SharedSyncLog;
use marksync_protocol::{
    AccessToken, CreateAccountRequest, CreateAccountResponse, DeviceId, GetEntriesRequest,
    GetEntriesResponse, ListDevicesRequest, ListDevicesResponse, RegisterDeviceRequest,
    RegisterDeviceResponse, RemoveDeviceRequest, RemoveDeviceResponse, UserId,
    WriteEntriesRequest, WriteEntriesResponse, PROTOCOL_VERSION,
};
use std::sync::Arc;
use tracing::warn;

/// Context shared by all handlers.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// The shared log (shared across all handlers).
    pub log: Arc<SharedSyncLog>,
    tokens: TokenValidator,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, log: Arc<SharedSyncLog>) -> Self {
        let tokens = TokenValidator::new(config.token_secret.clone(), config.token_expiry);
        Self {
            config,
            log,
            tokens,
        }
    }

    /// Checks that the caller is an active device of the account holding a
    /// valid token.
    fn authorize(&self, user_id: UserId, device_id: DeviceId, token: &AccessToken) -> ServerResult<()> {
        let result = self
            .tokens
            .validate_token(token, device_id, user_id)
            .and_then(|issued_at| match self.log.active_since(user_id, device_id)? {
                Some(since) if issued_at >= since => Ok(()),
                Some(_) => Err(ServerError::NotAuthorized(
                    "token was issued before the device was reinstated".into(),
                )),
                None => Err(ServerError::NotAuthorized(format!(
                    "device {} is not registered for this account",
                    device_id
                ))),
            });
        if let Err(e) = &result {
            warn!(%user_id, %device_id, error = %e, "request rejected");
        }
        result
    }
}

/// Handler for shared log requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles an account creation request.
    pub fn handle_create_account(
        &self,
        request: CreateAccountRequest,
    ) -> ServerResult<CreateAccountResponse> {
        if request.protocol_version != PROTOCOL_VERSION {
            return Err(ServerError::InvalidRequest(format!(
                "unsupported protocol version: {}",
                request.protocol_version
            )));
        }
        let device_id = request.device.id;
        let user_id = self.context.log.create_account(request.device);
        let token = self.context.tokens.create_token(device_id, user_id)?;
        Ok(CreateAccountResponse { user_id, token })
    }

    /// Handles a write request.
    pub fn handle_write(&self, request: WriteEntriesRequest) -> ServerResult<WriteEntriesResponse> {
        self.context
            .authorize(request.user_id, request.device_id, &request.token)?;

        if request.entries.len() > self.context.config.max_push_batch as usize {
            return Err(ServerError::InvalidRequest(format!(
                "too many entries: {} > {}",
                request.entries.len(),
                self.context.config.max_push_batch
            )));
        }

        let seqs = self
            .context
            .log
            .write_entries(request.user_id, request.device_id, &request.entries)?;
        let latest_seq = self.context.log.latest_seq(request.user_id)?;
        Ok(WriteEntriesResponse { seqs, latest_seq })
    }

    /// Handles a read request.
    pub fn handle_get_entries(&self, request: GetEntriesRequest) -> ServerResult<GetEntriesResponse> {
        self.context
            .authorize(request.user_id, request.device_id, &request.token)?;

        let limit = request.limit.clamp(1, self.context.config.max_pull_batch.max(1));
        let page = self.context.log.entries_since(
            request.user_id,
            request.after_seq,
            request.exclude_device_id,
            limit,
        )?;

        Ok(GetEntriesResponse {
            entries: page.entries,
            has_more: page.has_more,
            scanned_to: page.scanned_to,
        })
    }

    /// Handles a device registration made by an already paired device.
    pub fn handle_register_device(
        &self,
        request: RegisterDeviceRequest,
    ) -> ServerResult<RegisterDeviceResponse> {
        self.context
            .authorize(request.user_id, request.device_id, &request.token)?;

        let new_device = request.device.id;
        self.context
            .log
            .register_device(request.user_id, request.device)?;
        let token = self.context.tokens.create_token(new_device, request.user_id)?;
        Ok(RegisterDeviceResponse { token })
    }

    /// Handles a device removal.
    pub fn handle_remove_device(
        &self,
        request: RemoveDeviceRequest,
    ) -> ServerResult<RemoveDeviceResponse> {
        self.context
            .authorize(request.user_id, request.device_id, &request.token)?;

        let removed = self
            .context
            .log
            .remove_device(request.user_id, request.target)?;
        Ok(RemoveDeviceResponse { removed })
    }

    /// Handles a device listing.
    pub fn handle_list_devices(
        &self,
        request: ListDevicesRequest,
    ) -> ServerResult<ListDevicesResponse> {
        self.context
            .authorize(request.user_id, request.device_id, &request.token)?;

        let devices = self.context.log.devices(request.user_id)?;
        Ok(ListDevicesResponse { devices })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marksync_protocol::{ClientSyncLogEntry, Device, Mutation};
    use serde_json::json;

    fn create_handler(config: ServerConfig) -> RequestHandler {
        let log = Arc::new(SharedSyncLog::new());
        let context = Arc::new(HandlerContext::new(config, log));
        RequestHandler::new(context)
    }

    fn founder(handler: &RequestHandler) -> (UserId, DeviceId, AccessToken) {
        let device_id = DeviceId::from_u128(1);
        let response = handler
            .handle_create_account(CreateAccountRequest {
                protocol_version: PROTOCOL_VERSION,
                device: Device::new(device_id, "Laptop", 0),
            })
            .unwrap();
        (response.user_id, device_id, response.token)
    }

    fn write_request(
        user_id: UserId,
        device_id: DeviceId,
        token: &AccessToken,
        count: usize,
    ) -> WriteEntriesRequest {
        WriteEntriesRequest {
            user_id,
            device_id,
            token: token.clone(),
            entries: (0..count)
                .map(|i| {
                    ClientSyncLogEntry::local(
                        device_id,
                        Mutation::create("bookmarks", format!("https://{}.com", i), json!({})),
                        i as i64 + 1,
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn create_account_bad_version() {
        let handler = create_handler(ServerConfig::default());
        let result = handler.handle_create_account(CreateAccountRequest {
            protocol_version: 99,
            device: Device::new(DeviceId::from_u128(1), "Laptop", 0),
        });
        assert!(matches!(result, Err(ServerError::InvalidRequest(_))));
    }

    #[test]
    fn write_and_read() {
        let handler = create_handler(ServerConfig::default());
        let (user_id, device_id, token) = founder(&handler);

        let response = handler
            .handle_write(write_request(user_id, device_id, &token, 2))
            .unwrap();
        assert_eq!(response.seqs, vec![1, 2]);
        assert_eq!(response.latest_seq, 2);

        let page = handler
            .handle_get_entries(GetEntriesRequest {
                user_id,
                device_id,
                token,
                after_seq: 0,
                exclude_device_id: None,
                limit: 10,
            })
            .unwrap();
        assert_eq!(page.entries.len(), 2);
    }

    #[test]
    fn write_with_bad_token() {
        let handler = create_handler(ServerConfig::default());
        let (user_id, device_id, _) = founder(&handler);

        let result = handler.handle_write(write_request(
            user_id,
            device_id,
            &AccessToken::new(vec![0u8; 72]),
            1,
        ));
        assert!(matches!(result, Err(ServerError::NotAuthorized(_))));
    }

    #[test]
    fn push_batch_limit() {
        let handler = create_handler(ServerConfig::default().with_max_push_batch(2));
        let (user_id, device_id, token) = founder(&handler);

        let result = handler.handle_write(write_request(user_id, device_id, &token, 3));
        assert!(matches!(result, Err(ServerError::InvalidRequest(_))));
    }

    #[test]
    fn pull_limit_is_clamped() {
        let handler = create_handler(ServerConfig::default().with_max_pull_batch(2));
        let (user_id, device_id, token) = founder(&handler);
        handler
            .handle_write(write_request(user_id, device_id, &token, 5))
            .unwrap();

        let page = handler
            .handle_get_entries(GetEntriesRequest {
                user_id,
                device_id,
                token,
                after_seq: 0,
                exclude_device_id: None,
                limit: 100,
            })
            .unwrap();
        assert_eq!(page.entries.len(), 2);
        assert!(page.has_more);
    }

    #[test]
    fn registered_device_gets_working_token() {
        let handler = create_handler(ServerConfig::default());
        let (user_id, device_id, token) = founder(&handler);

        let phone = DeviceId::from_u128(2);
        let response = handler
            .handle_register_device(RegisterDeviceRequest {
                user_id,
                device_id,
                token: token.clone(),
                device: Device::new(phone, "Phone", 0),
            })
            .unwrap();

        handler
            .handle_write(write_request(user_id, phone, &response.token, 1))
            .unwrap();

        let devices = handler
            .handle_list_devices(ListDevicesRequest {
                user_id,
                device_id,
                token,
            })
            .unwrap();
        assert_eq!(devices.devices.len(), 2);
    }

    #[test]
    fn removed_device_loses_access() {
        let handler = create_handler(ServerConfig::default());
        let (user_id, device_id, token) = founder(&handler);

        let phone = DeviceId::from_u128(2);
        let phone_token = handler
            .handle_register_device(RegisterDeviceRequest {
                user_id,
                device_id,
                token: token.clone(),
                device: Device::new(phone, "Phone", 0),
            })
            .unwrap()
            .token;

        let removed = handler
            .handle_remove_device(RemoveDeviceRequest {
                user_id,
                device_id,
                token,
                target: phone,
            })
            .unwrap();
        assert!(removed.removed);

        let result = handler.handle_write(write_request(user_id, phone, &phone_token, 1));
        assert!(matches!(result, Err(ServerError::NotAuthorized(_))));
    }

    #[test]
    fn reinstated_device_needs_fresh_token() {
        let handler = create_handler(ServerConfig::default());
        let (user_id, device_id, token) = founder(&handler);

        let phone = DeviceId::from_u128(2);
        let register = || {
            handler
                .handle_register_device(RegisterDeviceRequest {
                    user_id,
                    device_id,
                    token: token.clone(),
                    device: Device::new(phone, "Phone", 0),
                })
                .unwrap()
                .token
        };
        let old_token = register();
        handler
            .handle_remove_device(RemoveDeviceRequest {
                user_id,
                device_id,
                token: token.clone(),
                target: phone,
            })
            .unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        let new_token = register();

        handler
            .handle_write(write_request(user_id, phone, &new_token, 1))
            .unwrap();
        let result = handler.handle_write(write_request(user_id, phone, &old_token, 1));
        assert!(matches!(result, Err(ServerError::NotAuthorized(_))));
    }
}

//! Device pairing handshake.
//!
//! ```text
//!  initiator (paired)                      joiner (unpaired)
//!  create_room ──── code shown to user ───► join_room(code)
//!              ◄──── Hello { device, nonce }
//!  register_device on the shared log
//!              ──── Accept { user_id, token, nonce } ───►
//!  close_room                               store credentials, close_room
//!                                           InitialSync
//! ```
//!
//! Both sides keep the engine in [`EngineState::Pairing`] for the duration
//! of the handshake.

use crate::engine::{EngineState, PairingGuard, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::signal::{PairingCode, Peer, RoomInfo, SignallingChannel};
use crate::store::DomainStore;
use crate::transport::SyncTransport;
use marksync_protocol::{Device, PairingSignal, UserId, WireMessage};
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// An open pairing room on the initiating device.
pub struct PairingSession<T: SyncTransport, D: DomainStore> {
    engine: Arc<SyncEngine<T, D>>,
    signalling: Arc<dyn SignallingChannel>,
    room: RoomInfo,
    inbox: mpsc::Receiver<Vec<u8>>,
    deadline: Instant,
    ttl: Duration,
    _guard: PairingGuard,
}

/// Opens a pairing room on a paired device.
///
/// Show [`PairingSession::code`] to the user, then await
/// [`PairingSession::wait`].
pub fn start_pairing<T, D>(
    engine: &Arc<SyncEngine<T, D>>,
    signalling: Arc<dyn SignallingChannel>,
) -> SyncResult<PairingSession<T, D>>
where
    T: SyncTransport,
    D: DomainStore,
{
    if !engine.is_paired()? {
        return Err(SyncError::NotPaired);
    }
    let guard = engine.begin_pairing()?;
    let ttl = engine.config().pairing_timeout;
    let room = signalling.create_room(ttl)?;
    let inbox = match signalling.subscribe(room.session_id, Peer::Initiator) {
        Ok(inbox) => inbox,
        Err(e) => {
            signalling.close_room(room.session_id);
            return Err(e);
        }
    };
    info!(session_id = %room.session_id, "pairing session opened");

    Ok(PairingSession {
        engine: Arc::clone(engine),
        signalling,
        room,
        inbox,
        deadline: Instant::now() + ttl,
        ttl,
        _guard: guard,
    })
}

impl<T, D> PairingSession<T, D>
where
    T: SyncTransport + 'static,
    D: DomainStore + 'static,
{
    /// Returns the code the joining device must enter.
    pub fn code(&self) -> &PairingCode {
        &self.room.code
    }

    /// Returns the session ID.
    pub fn session_id(&self) -> Uuid {
        self.room.session_id
    }

    /// Waits for a joiner, registers it and hands over its credentials.
    ///
    /// Fails with [`SyncError::PairingTimeout`] if nobody joins in time. The
    /// room is closed in every case.
    pub async fn wait(mut self) -> SyncResult<Device> {
        let result = self.handshake().await;
        self.signalling.close_room(self.room.session_id);
        match &result {
            Ok(device) => info!(device_id = %device.id, name = %device.name, "device paired"),
            Err(e) => warn!(session_id = %self.room.session_id, error = %e, "pairing failed"),
        }
        result
    }

    async fn handshake(&mut self) -> SyncResult<Device> {
        let signal = timeout_at(self.deadline, next_signal(&mut self.inbox))
            .await
            .map_err(|_| SyncError::PairingTimeout(self.ttl))??;

        let (device, nonce) = match signal {
            PairingSignal::Hello { device, nonce } => (device, nonce),
            PairingSignal::Reject { reason } => return Err(SyncError::PairingRejected(reason)),
            other => {
                return Err(SyncError::Protocol(format!(
                    "unexpected {} signal from joiner",
                    other.kind()
                )))
            }
        };

        let user_id = self.engine.user_id()?.ok_or(SyncError::NotPaired)?;
        let engine = Arc::clone(&self.engine);
        let joiner = device.clone();
        let registered = tokio::task::spawn_blocking(move || engine.register_device(joiner))
            .await
            .map_err(|e| SyncError::Task(e.to_string()))
            .and_then(|result| result);

        let token = match registered {
            Ok(token) => token,
            Err(e) => {
                let reject = PairingSignal::Reject {
                    reason: e.to_string(),
                };
                if let Ok(payload) = reject.encode() {
                    let _ = self
                        .signalling
                        .send_signal(self.room.session_id, Peer::Initiator, payload);
                }
                return Err(e);
            }
        };

        let accept = PairingSignal::Accept {
            user_id,
            token,
            nonce,
        };
        self.signalling
            .send_signal(self.room.session_id, Peer::Initiator, accept.encode()?)?;
        Ok(device)
    }
}

/// Joins the account of the device showing `code`.
///
/// On success the credentials are stored and the engine is left in
/// [`EngineState::InitialSync`]; the caller triggers the initial sync.
pub async fn join_pairing<T, D>(
    engine: &Arc<SyncEngine<T, D>>,
    signalling: Arc<dyn SignallingChannel>,
    code: &str,
) -> SyncResult<UserId>
where
    T: SyncTransport,
    D: DomainStore,
{
    let code = PairingCode::parse(code)?;
    if engine.is_paired()? {
        return Err(SyncError::InvalidStateTransition {
            from: engine.state().to_string(),
            to: EngineState::Pairing.to_string(),
        });
    }
    let guard = engine.begin_pairing()?;
    let ttl = engine.config().pairing_timeout;

    let session_id = signalling.join_room(&code)?;
    let result = joiner_handshake(engine, signalling.as_ref(), session_id, ttl).await;
    signalling.close_room(session_id);

    match result {
        Ok(user_id) => {
            guard.finish(EngineState::InitialSync);
            info!(%user_id, "joined account");
            Ok(user_id)
        }
        Err(e) => {
            warn!(%session_id, error = %e, "joining failed");
            Err(e)
        }
    }
}

async fn joiner_handshake<T, D>(
    engine: &SyncEngine<T, D>,
    signalling: &dyn SignallingChannel,
    session_id: Uuid,
    ttl: Duration,
) -> SyncResult<UserId>
where
    T: SyncTransport,
    D: DomainStore,
{
    let deadline = Instant::now() + ttl;
    let mut inbox = signalling.subscribe(session_id, Peer::Joiner)?;

    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    let hello = PairingSignal::Hello {
        device: engine.device().clone(),
        nonce,
    };
    signalling.send_signal(session_id, Peer::Joiner, hello.encode()?)?;

    let signal = timeout_at(deadline, next_signal(&mut inbox))
        .await
        .map_err(|_| SyncError::PairingTimeout(ttl))??;

    match signal {
        PairingSignal::Accept {
            user_id,
            token,
            nonce: echoed,
        } => {
            if echoed != nonce {
                return Err(SyncError::PairingRejected("nonce mismatch".into()));
            }
            engine.store_credentials(user_id, token)?;
            Ok(user_id)
        }
        PairingSignal::Reject { reason } => Err(SyncError::PairingRejected(reason)),
        other => Err(SyncError::Protocol(format!(
            "unexpected {} signal from initiator",
            other.kind()
        ))),
    }
}

async fn next_signal(inbox: &mut mpsc::Receiver<Vec<u8>>) -> SyncResult<PairingSignal> {
    let payload = inbox.recv().await.ok_or(SyncError::Cancelled)?;
    Ok(PairingSignal::decode(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::signal::MemorySignalling;
    use crate::store::MemoryStore;
    use crate::transport::MockTransport;

    type Engine = SyncEngine<Arc<MockTransport>, MemoryStore>;

    fn engine(name: &str, transport: &Arc<MockTransport>, timeout: Duration) -> Arc<Engine> {
        let config = SyncConfig::new(name).with_pairing_timeout(timeout);
        Arc::new(SyncEngine::in_memory(config, Arc::clone(transport)).unwrap())
    }

    #[tokio::test]
    async fn initiator_and_joiner_pair() {
        let transport = Arc::new(MockTransport::new());
        let hub: Arc<dyn SignallingChannel> = Arc::new(MemorySignalling::new());
        let laptop = engine("Laptop", &transport, Duration::from_secs(5));
        let phone = engine("Phone", &transport, Duration::from_secs(5));
        laptop.create_account().unwrap();

        let session = start_pairing(&laptop, Arc::clone(&hub)).unwrap();
        assert_eq!(laptop.state(), EngineState::Pairing);
        let code = session.code().to_string();

        let (paired, joined) = tokio::join!(session.wait(), join_pairing(&phone, hub, &code));
        assert_eq!(paired.unwrap().id, phone.device_id());
        assert_eq!(joined.unwrap(), transport.user_id());

        assert_eq!(laptop.state(), EngineState::InitialSync);
        assert_eq!(phone.state(), EngineState::InitialSync);
        assert!(phone.is_paired().unwrap());
    }

    #[tokio::test]
    async fn nobody_joins() {
        let transport = Arc::new(MockTransport::new());
        let hub = MemorySignalling::new();
        let laptop = engine("Laptop", &transport, Duration::from_millis(20));
        laptop.create_account().unwrap();
        laptop.sync_now().unwrap();

        let session = start_pairing(&laptop, Arc::new(hub.clone())).unwrap();
        let result = session.wait().await;

        assert!(matches!(result, Err(SyncError::PairingTimeout(_))));
        assert_eq!(laptop.state(), EngineState::Listening);
        assert_eq!(hub.room_count(), 0);
    }

    #[tokio::test]
    async fn unpaired_device_cannot_start() {
        let transport = Arc::new(MockTransport::new());
        let phone = engine("Phone", &transport, Duration::from_secs(1));
        let result = start_pairing(&phone, Arc::new(MemorySignalling::new()));
        assert!(matches!(result, Err(SyncError::NotPaired)));
        assert_eq!(phone.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn wrong_code_leaves_joiner_idle() {
        let transport = Arc::new(MockTransport::new());
        let phone = engine("Phone", &transport, Duration::from_secs(1));
        let hub: Arc<dyn SignallingChannel> = Arc::new(MemorySignalling::new());

        let result = join_pairing(&phone, Arc::clone(&hub), "ABCDEF").await;
        assert!(matches!(result, Err(SyncError::PairingCodeInvalid(_))));
        let result = join_pairing(&phone, hub, "nope").await;
        assert!(matches!(result, Err(SyncError::PairingCodeInvalid(_))));
        assert_eq!(phone.state(), EngineState::Idle);
        assert!(!phone.is_paired().unwrap());
    }

    #[tokio::test]
    async fn bad_nonce_is_rejected() {
        let transport = Arc::new(MockTransport::new());
        let hub = MemorySignalling::new();
        let phone = engine("Phone", &transport, Duration::from_secs(5));
        let room = hub.create_room(Duration::from_secs(5)).unwrap();

        let accept = PairingSignal::Accept {
            user_id: UserId::from_u128(1),
            token: marksync_protocol::AccessToken::new(vec![1]),
            nonce: [0u8; 16],
        };
        hub.send_signal(room.session_id, Peer::Initiator, accept.encode().unwrap())
            .unwrap();

        let result = join_pairing(&phone, Arc::new(hub.clone()), room.code.as_str()).await;
        assert!(matches!(result, Err(SyncError::PairingRejected(_))));
        assert!(!phone.is_paired().unwrap());
        assert_eq!(phone.state(), EngineState::Idle);
    }
}

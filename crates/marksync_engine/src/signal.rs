//! Signalling channel used while pairing devices.
//!
//! A pairing session is a short-lived room identified by a random session
//! ID and addressed by a short human-typeable code. The two peers exchange
//! opaque CBOR payloads through the room; nothing else ever flows here.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Characters used in pairing codes; no 0/O, 1/I/L look-alikes.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
/// Length of a pairing code.
pub const CODE_LENGTH: usize = 6;
const ROOM_QUEUE: usize = 16;

/// A short code the user types on the joining device.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PairingCode(String);

impl PairingCode {
    /// Generates a random code.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code = (0..CODE_LENGTH)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Parses user input. Case, spaces and dashes are ignored.
    pub fn parse(input: &str) -> SyncResult<Self> {
        let code: String = input
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        if code.len() != CODE_LENGTH {
            return Err(SyncError::PairingCodeInvalid(format!(
                "expected {} characters, got {}",
                CODE_LENGTH,
                code.len()
            )));
        }
        if let Some(bad) = code.bytes().find(|b| !CODE_ALPHABET.contains(b)) {
            return Err(SyncError::PairingCodeInvalid(format!(
                "unexpected character {:?}",
                bad as char
            )));
        }
        Ok(Self(code))
    }

    /// Returns the code as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PairingCode(******)")
    }
}

/// A freshly created pairing room.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    /// Session ID.
    pub session_id: Uuid,
    /// Code to show to the user.
    pub code: PairingCode,
}

/// Side of a pairing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Peer {
    /// The already paired device that opened the room.
    Initiator,
    /// The device joining the account.
    Joiner,
}

impl Peer {
    /// Returns the other side.
    pub fn other(self) -> Peer {
        match self {
            Peer::Initiator => Peer::Joiner,
            Peer::Joiner => Peer::Initiator,
        }
    }
}

/// Rendezvous service for pairing.
pub trait SignallingChannel: Send + Sync {
    /// Opens a room that accepts a joiner for `ttl`.
    fn create_room(&self, ttl: Duration) -> SyncResult<RoomInfo>;

    /// Joins the room addressed by `code`. A room accepts one joiner.
    fn join_room(&self, code: &PairingCode) -> SyncResult<Uuid>;

    /// Sends a payload to the other peer of the room.
    fn send_signal(&self, session_id: Uuid, from: Peer, payload: Vec<u8>) -> SyncResult<()>;

    /// Returns the stream of payloads addressed to `peer`.
    ///
    /// Payloads sent before the subscription are delivered first. The
    /// stream ends when the room is closed.
    fn subscribe(&self, session_id: Uuid, peer: Peer) -> SyncResult<mpsc::Receiver<Vec<u8>>>;

    /// Closes the room. Unknown sessions are ignored.
    fn close_room(&self, session_id: Uuid);
}

struct Room {
    code: PairingCode,
    expires_at: Instant,
    joined: bool,
    subscribers: HashMap<Peer, mpsc::Sender<Vec<u8>>>,
    backlog: HashMap<Peer, Vec<Vec<u8>>>,
}

/// In-process signalling hub, shared by cloning.
#[derive(Clone, Default)]
pub struct MemorySignalling {
    rooms: Arc<Mutex<HashMap<Uuid, Room>>>,
}

impl MemorySignalling {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of open rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }
}

impl SignallingChannel for MemorySignalling {
    fn create_room(&self, ttl: Duration) -> SyncResult<RoomInfo> {
        let mut rooms = self.rooms.lock();
        let now = Instant::now();
        rooms.retain(|_, room| room.joined || room.expires_at > now);

        let code = loop {
            let candidate = PairingCode::generate();
            if !rooms.values().any(|room| room.code == candidate) {
                break candidate;
            }
        };
        let session_id = Uuid::new_v4();
        rooms.insert(
            session_id,
            Room {
                code: code.clone(),
                expires_at: now + ttl,
                joined: false,
                subscribers: HashMap::new(),
                backlog: HashMap::new(),
            },
        );
        Ok(RoomInfo { session_id, code })
    }

    fn join_room(&self, code: &PairingCode) -> SyncResult<Uuid> {
        let mut rooms = self.rooms.lock();
        let (session_id, room) = rooms
            .iter_mut()
            .find(|(_, room)| room.code == *code)
            .ok_or_else(|| SyncError::PairingCodeInvalid("unknown code".into()))?;
        if room.joined {
            return Err(SyncError::PairingCodeInvalid("code already used".into()));
        }
        if room.expires_at <= Instant::now() {
            return Err(SyncError::PairingCodeInvalid("code expired".into()));
        }
        room.joined = true;
        Ok(*session_id)
    }

    fn send_signal(&self, session_id: Uuid, from: Peer, payload: Vec<u8>) -> SyncResult<()> {
        let mut rooms = self.rooms.lock();
        let room = rooms
            .get_mut(&session_id)
            .ok_or_else(|| SyncError::PairingCodeInvalid("pairing session closed".into()))?;
        let to = from.other();
        match room.subscribers.get(&to) {
            Some(sender) => sender
                .try_send(payload)
                .map_err(|e| SyncError::Protocol(format!("signal not delivered: {e}"))),
            None => {
                room.backlog.entry(to).or_default().push(payload);
                Ok(())
            }
        }
    }

    fn subscribe(&self, session_id: Uuid, peer: Peer) -> SyncResult<mpsc::Receiver<Vec<u8>>> {
        let mut rooms = self.rooms.lock();
        let room = rooms
            .get_mut(&session_id)
            .ok_or_else(|| SyncError::PairingCodeInvalid("pairing session closed".into()))?;
        let (sender, receiver) = mpsc::channel(ROOM_QUEUE);
        for payload in room.backlog.remove(&peer).unwrap_or_default() {
            sender
                .try_send(payload)
                .map_err(|e| SyncError::Protocol(format!("signal not delivered: {e}")))?;
        }
        room.subscribers.insert(peer, sender);
        Ok(receiver)
    }

    fn close_room(&self, session_id: Uuid) {
        self.rooms.lock().remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_well_formed() {
        for _ in 0..100 {
            let code = PairingCode::generate();
            assert_eq!(code.as_str().len(), CODE_LENGTH);
            assert_eq!(PairingCode::parse(code.as_str()).unwrap(), code);
        }
    }

    #[test]
    fn parse_normalizes_input() {
        let code = PairingCode::parse(" abc-def ").unwrap();
        assert_eq!(code.as_str(), "ABCDEF");
        assert!(matches!(
            PairingCode::parse("ABCDE"),
            Err(SyncError::PairingCodeInvalid(_))
        ));
        assert!(matches!(
            PairingCode::parse("ABCDE0"),
            Err(SyncError::PairingCodeInvalid(_))
        ));
    }

    #[test]
    fn debug_hides_code() {
        let code = PairingCode::parse("ABCDEF").unwrap();
        assert!(!format!("{:?}", code).contains("ABCDEF"));
    }

    #[tokio::test]
    async fn signals_reach_the_other_peer() {
        let hub = MemorySignalling::new();
        let room = hub.create_room(Duration::from_secs(60)).unwrap();
        let mut initiator = hub.subscribe(room.session_id, Peer::Initiator).unwrap();

        let session_id = hub.join_room(&room.code).unwrap();
        assert_eq!(session_id, room.session_id);

        // Sent before the joiner subscribes: kept in the backlog.
        hub.send_signal(session_id, Peer::Initiator, b"early".to_vec())
            .unwrap();
        hub.send_signal(session_id, Peer::Joiner, b"hello".to_vec())
            .unwrap();
        assert_eq!(initiator.recv().await.unwrap(), b"hello".to_vec());

        let mut joiner = hub.subscribe(session_id, Peer::Joiner).unwrap();
        assert_eq!(joiner.recv().await.unwrap(), b"early".to_vec());

        hub.close_room(session_id);
        assert!(joiner.recv().await.is_none());
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn room_accepts_one_joiner() {
        let hub = MemorySignalling::new();
        let room = hub.create_room(Duration::from_secs(60)).unwrap();
        hub.join_room(&room.code).unwrap();
        assert!(matches!(
            hub.join_room(&room.code),
            Err(SyncError::PairingCodeInvalid(_))
        ));
    }

    #[test]
    fn expired_and_unknown_codes() {
        let hub = MemorySignalling::new();
        let room = hub.create_room(Duration::ZERO).unwrap();
        assert!(matches!(
            hub.join_room(&room.code),
            Err(SyncError::PairingCodeInvalid(_))
        ));

        let other = PairingCode::parse("ZZZZZZ").unwrap();
        assert!(matches!(
            hub.join_room(&other),
            Err(SyncError::PairingCodeInvalid(_))
        ));
    }
}

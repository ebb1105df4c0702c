//! Messages exchanged over the pairing signalling channel.
//!
//! Only authentication material crosses the signalling channel. Sync
//! payloads always travel through the shared log.

use crate::codec::WireMessage;
use crate::types::{AccessToken, Device, UserId};
use serde::{Deserialize, Serialize};

/// A pairing signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PairingSignal {
    /// Joiner → initiator: the device asking to be paired.
    Hello {
        /// Identity of the joining device.
        device: Device,
        /// Random challenge the initiator must echo back.
        nonce: [u8; 16],
    },
    /// Initiator → joiner: the device was registered.
    Accept {
        /// Account the joiner now belongs to.
        user_id: UserId,
        /// Credential issued to the joiner.
        token: AccessToken,
        /// Echo of the joiner's challenge.
        nonce: [u8; 16],
    },
    /// Either side: pairing was refused.
    Reject {
        /// Why pairing failed.
        reason: String,
    },
}

impl PairingSignal {
    /// Returns a short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            PairingSignal::Hello { .. } => "hello",
            PairingSignal::Accept { .. } => "accept",
            PairingSignal::Reject { .. } => "reject",
        }
    }
}

impl WireMessage for PairingSignal {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceId;

    #[test]
    fn hello_roundtrip() {
        let signal = PairingSignal::Hello {
            device: Device::new(DeviceId::from_u128(9), "Phone", 0),
            nonce: [4u8; 16],
        };
        let decoded = PairingSignal::decode(&signal.encode().unwrap()).unwrap();
        assert_eq!(decoded, signal);
        assert_eq!(decoded.kind(), "hello");
    }
}

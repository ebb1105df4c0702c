//! Identifiers and small value types shared by every Marksync component.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of mutation carried by a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Object was created.
    Create,
    /// Object was replaced by a new snapshot.
    Update,
    /// Object was deleted.
    Delete,
}

impl Operation {
    /// Converts to a numeric code for compact encodings.
    pub fn to_code(&self) -> u8 {
        match self {
            Operation::Create => 1,
            Operation::Update => 2,
            Operation::Delete => 3,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Operation::Create),
            2 => Some(Operation::Update),
            3 => Some(Operation::Delete),
            _ => None,
        }
    }

    /// Returns the lowercase name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Returns true if the operation carries an object snapshot.
    pub fn carries_snapshot(&self) -> bool {
        !matches!(self, Operation::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new random identifier.
            pub fn new_random() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from a raw 128-bit value.
            pub const fn from_u128(value: u128) -> Self {
                Self(Uuid::from_u128(value))
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id! {
    /// Identifier of a single device (browser profile) participating in sync.
    DeviceId
}

uuid_id! {
    /// Identifier of the user account that owns a shared sync log.
    UserId
}

/// Identity of a log entry across all devices: `(device_id, created_on)`.
///
/// `created_on` is strictly increasing per device, so this pair never
/// collides and doubles as the dedup key on both ends of the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryKey {
    /// Device that produced the entry.
    pub device_id: DeviceId,
    /// Device-local monotonic timestamp.
    pub created_on: i64,
}

impl EntryKey {
    /// Creates a new entry key.
    pub fn new(device_id: DeviceId, created_on: i64) -> Self {
        Self {
            device_id,
            created_on,
        }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.device_id, self.created_on)
    }
}

/// A device registered against an account's shared sync log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device ID.
    pub id: DeviceId,
    /// Human-readable name ("Work laptop").
    pub name: String,
    /// When the device was paired (Unix millis).
    pub paired_at: i64,
}

impl Device {
    /// Creates a new device record.
    pub fn new(id: DeviceId, name: impl Into<String>, paired_at: i64) -> Self {
        Self {
            id,
            name: name.into(),
            paired_at,
        }
    }
}

/// Opaque credential a device presents to the shared sync log.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(Vec<u8>);

impl AccessToken {
    /// Wraps raw token bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw token bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(<{} bytes>)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_codes() {
        for op in [Operation::Create, Operation::Update, Operation::Delete] {
            assert_eq!(Operation::from_code(op.to_code()), Some(op));
        }
        assert_eq!(Operation::from_code(0), None);
        assert!(Operation::Update.carries_snapshot());
        assert!(!Operation::Delete.carries_snapshot());
    }

    #[test]
    fn device_id_parse_and_display() {
        let id = DeviceId::from_u128(0x1234);
        let parsed: DeviceId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn entry_key_orders_by_device_then_time() {
        let a = EntryKey::new(DeviceId::from_u128(1), 200);
        let b = EntryKey::new(DeviceId::from_u128(2), 100);
        assert!(a < b);
        assert!(EntryKey::new(DeviceId::from_u128(1), 100) < a);
    }

    #[test]
    fn token_debug_is_redacted() {
        let token = AccessToken::new(vec![7u8; 72]);
        assert_eq!(format!("{:?}", token), "AccessToken(<72 bytes>)");
    }
}

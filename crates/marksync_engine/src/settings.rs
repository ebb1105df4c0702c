//! Persistent per-device sync settings: identity, pairing and cursors.

use crate::error::{SyncError, SyncResult};
use marksync_protocol::{AccessToken, DeviceId, UserId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Pull position and sync switch of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Device the cursor belongs to.
    pub device_id: DeviceId,
    /// Highest shared seq that has been pulled and integrated.
    pub last_pulled_seq: u64,
    /// Whether timer-driven sync is allowed.
    pub continuous_sync_enabled: bool,
}

impl SyncCursor {
    /// Creates a cursor at the beginning of the shared log.
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            last_pulled_seq: 0,
            continuous_sync_enabled: true,
        }
    }

    /// Moves the cursor forward. Returns false if `seq` is not ahead.
    pub fn advance(&mut self, seq: u64) -> bool {
        if seq > self.last_pulled_seq {
            self.last_pulled_seq = seq;
            true
        } else {
            false
        }
    }
}

/// Whether this device belongs to an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairingState {
    /// No account yet.
    #[default]
    Unpaired,
    /// Credentials for the shared log.
    Paired {
        /// Account ID.
        user_id: UserId,
        /// Device credential.
        token: AccessToken,
    },
}

impl PairingState {
    /// Returns true if the device has credentials.
    pub fn is_paired(&self) -> bool {
        matches!(self, PairingState::Paired { .. })
    }
}

/// Stable identity of this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Device ID, generated once.
    pub id: DeviceId,
    /// Display name.
    pub name: String,
}

/// Storage for sync settings.
///
/// Writes must be durable when the call returns: the engine relies on the
/// cursor and pairing state surviving a crash right after they are set.
pub trait SettingsStore: Send + Sync {
    /// Returns the cursor of a device, or a fresh one if none was stored.
    fn get_cursor(&self, device_id: DeviceId) -> SyncResult<SyncCursor>;

    /// Stores a cursor.
    fn set_cursor(&self, cursor: &SyncCursor) -> SyncResult<()>;

    /// Returns the stored device identity.
    fn device_identity(&self) -> SyncResult<Option<DeviceIdentity>>;

    /// Stores the device identity.
    fn set_device_identity(&self, identity: &DeviceIdentity) -> SyncResult<()>;

    /// Returns the pairing state.
    fn pairing_state(&self) -> SyncResult<PairingState>;

    /// Stores the pairing state.
    fn set_pairing_state(&self, state: &PairingState) -> SyncResult<()>;
}

/// Returns the stored identity, creating and storing a new one if needed.
pub fn load_or_create_identity(
    settings: &dyn SettingsStore,
    name: &str,
) -> SyncResult<DeviceIdentity> {
    if let Some(identity) = settings.device_identity()? {
        return Ok(identity);
    }
    let identity = DeviceIdentity {
        id: DeviceId::new_random(),
        name: name.to_string(),
    };
    settings.set_device_identity(&identity)?;
    info!(device_id = %identity.id, name, "created device identity");
    Ok(identity)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SettingsData {
    identity: Option<DeviceIdentity>,
    #[serde(default)]
    pairing: PairingState,
    #[serde(default)]
    cursors: HashMap<DeviceId, SyncCursor>,
}

impl SettingsData {
    fn cursor(&self, device_id: DeviceId) -> SyncCursor {
        self.cursors
            .get(&device_id)
            .cloned()
            .unwrap_or_else(|| SyncCursor::new(device_id))
    }
}

/// In-memory settings, lost when dropped.
#[derive(Debug, Default)]
pub struct MemorySettings {
    data: RwLock<SettingsData>,
}

impl MemorySettings {
    /// Creates empty settings.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get_cursor(&self, device_id: DeviceId) -> SyncResult<SyncCursor> {
        Ok(self.data.read().cursor(device_id))
    }

    fn set_cursor(&self, cursor: &SyncCursor) -> SyncResult<()> {
        self.data
            .write()
            .cursors
            .insert(cursor.device_id, cursor.clone());
        Ok(())
    }

    fn device_identity(&self) -> SyncResult<Option<DeviceIdentity>> {
        Ok(self.data.read().identity.clone())
    }

    fn set_device_identity(&self, identity: &DeviceIdentity) -> SyncResult<()> {
        self.data.write().identity = Some(identity.clone());
        Ok(())
    }

    fn pairing_state(&self) -> SyncResult<PairingState> {
        Ok(self.data.read().pairing.clone())
    }

    fn set_pairing_state(&self, state: &PairingState) -> SyncResult<()> {
        self.data.write().pairing = state.clone();
        Ok(())
    }
}

/// Settings stored as a JSON file, rewritten atomically on every change.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    data: RwLock<SettingsData>,
}

impl FileSettings {
    /// Opens the settings file, or starts empty if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> SyncResult<Self> {
        let path = path.into();
        let data = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                SyncError::Settings(format!("failed to parse {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SettingsData::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Returns the settings file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, change: impl FnOnce(&mut SettingsData)) -> SyncResult<()> {
        let mut data = self.data.write();
        let mut next = data.clone();
        change(&mut next);
        let contents = serde_json::to_vec_pretty(&next)
            .map_err(|e| SyncError::Settings(format!("failed to serialize settings: {e}")))?;
        atomic_write(&self.path, &contents)?;
        *data = next;
        Ok(())
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> SyncResult<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        SyncError::Settings(format!(
            "failed to create temp file in {}: {e}",
            dir.display()
        ))
    })?;
    fs::write(temp.path(), data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| {
        SyncError::Settings(format!(
            "failed to persist settings to {}: {e}",
            path.display()
        ))
    })?;
    Ok(())
}

impl SettingsStore for FileSettings {
    fn get_cursor(&self, device_id: DeviceId) -> SyncResult<SyncCursor> {
        Ok(self.data.read().cursor(device_id))
    }

    fn set_cursor(&self, cursor: &SyncCursor) -> SyncResult<()> {
        self.update(|data| {
            data.cursors.insert(cursor.device_id, cursor.clone());
        })
    }

    fn device_identity(&self) -> SyncResult<Option<DeviceIdentity>> {
        Ok(self.data.read().identity.clone())
    }

    fn set_device_identity(&self, identity: &DeviceIdentity) -> SyncResult<()> {
        self.update(|data| data.identity = Some(identity.clone()))
    }

    fn pairing_state(&self) -> SyncResult<PairingState> {
        Ok(self.data.read().pairing.clone())
    }

    fn set_pairing_state(&self, state: &PairingState) -> SyncResult<()> {
        self.update(|data| data.pairing = state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cursor_defaults_and_advance() {
        let settings = MemorySettings::new();
        let device_id = DeviceId::from_u128(1);

        let mut cursor = settings.get_cursor(device_id).unwrap();
        assert_eq!(cursor.last_pulled_seq, 0);
        assert!(cursor.continuous_sync_enabled);

        assert!(cursor.advance(5));
        assert!(!cursor.advance(3));
        assert_eq!(cursor.last_pulled_seq, 5);

        settings.set_cursor(&cursor).unwrap();
        assert_eq!(settings.get_cursor(device_id).unwrap().last_pulled_seq, 5);
    }

    #[test]
    fn identity_is_created_once() {
        let settings = MemorySettings::new();
        let first = load_or_create_identity(&settings, "Laptop").unwrap();
        let second = load_or_create_identity(&settings, "Other").unwrap();
        assert_eq!(first, second);
        assert_eq!(second.name, "Laptop");
    }

    #[test]
    fn file_settings_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let device_id = DeviceId::from_u128(7);

        {
            let settings = FileSettings::open(&path).unwrap();
            assert_eq!(settings.pairing_state().unwrap(), PairingState::Unpaired);

            settings
                .set_pairing_state(&PairingState::Paired {
                    user_id: UserId::from_u128(3),
                    token: AccessToken::new(vec![1, 2, 3]),
                })
                .unwrap();
            let mut cursor = SyncCursor::new(device_id);
            cursor.advance(42);
            cursor.continuous_sync_enabled = false;
            settings.set_cursor(&cursor).unwrap();
        }

        let settings = FileSettings::open(&path).unwrap();
        assert!(settings.pairing_state().unwrap().is_paired());
        let cursor = settings.get_cursor(device_id).unwrap();
        assert_eq!(cursor.last_pulled_seq, 42);
        assert!(!cursor.continuous_sync_enabled);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(FileSettings::open(&path), Err(SyncError::Settings(_))));
    }
}

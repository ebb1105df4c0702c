//! Sync orchestrator state machine.
//!
//! ```text
//!            create_account / join          cycle ok
//!   Idle ───────────────────────► InitialSync ───────► Listening
//!     ▲                                 │                 │  ▲
//!     │ remove self                     │ failure         │  │ trigger
//!     │                                 ▼                 ▼  │
//!     └───────────────────────────── Error ◄──────────── cycle
//!
//!   Pairing suspends cycles and returns to the previous state.
//! ```
//!
//! A cycle pushes unshared local entries, pulls pages of remote entries,
//! integrates each page in one domain transaction and then advances the
//! cursor. Only one cycle runs at a time; triggers arriving meanwhile are
//! folded into a single re-run.

use crate::client_log::ClientSyncLog;
use crate::clock::now_millis;
use crate::config::SyncConfig;
use crate::effects::{AppliedMutation, SideEffectRunner};
use crate::error::{SyncError, SyncResult};
use crate::integrate::integrate_pending;
use crate::settings::{load_or_create_identity, MemorySettings, PairingState, SettingsStore};
use crate::status::{StatusBus, SyncStatus};
use crate::store::{apply_local, DomainStore, MemoryStore};
use crate::transport::SyncTransport;
use marksync_protocol::{
    AccessToken, ClientSyncLogEntry, CreateAccountRequest, Device, DeviceId, EntryKey,
    GetEntriesRequest, GetEntriesResponse, ListDevicesRequest, Mutation, Operation,
    RegisterDeviceRequest, RemoveDeviceRequest, SharedSyncLogEntry, UserId, WriteEntriesRequest,
    PROTOCOL_VERSION,
};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No account: nothing to sync with.
    Idle,
    /// A pairing session is open; cycles are suspended.
    Pairing,
    /// Replaying the shared log after joining an account.
    InitialSync,
    /// Paired and syncing on triggers.
    Listening,
    /// The last cycle failed; the next trigger retries.
    Error,
}

impl EngineState {
    /// Returns true if cycles may run in this state.
    pub fn can_sync(&self) -> bool {
        matches!(
            self,
            EngineState::InitialSync | EngineState::Listening | EngineState::Error
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Pairing => "pairing",
            EngineState::InitialSync => "initial-sync",
            EngineState::Listening => "listening",
            EngineState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Total number of cycles that failed after retries.
    pub cycles_failed: u64,
    /// Total number of entries pushed.
    pub entries_pushed: u64,
    /// Total number of entries pulled.
    pub entries_pulled: u64,
    /// Total number of remote mutations applied.
    pub entries_applied: u64,
    /// Total number of entries skipped after repeated conflicts.
    pub conflicts_skipped: u64,
    /// Total number of retries.
    pub retries: u64,
    /// Last successful sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a sync cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncCycleResult {
    /// Whether this cycle was the initial replay of the shared log.
    pub initial: bool,
    /// Entries written to the shared log.
    pub pushed: usize,
    /// New entries received from the shared log.
    pub pulled: usize,
    /// Remote mutations written to the domain store.
    pub applied: usize,
    /// Entries older than the state they would replace.
    pub stale: usize,
    /// Entries left for a later pass.
    pub deferred: usize,
    /// Entries given up on after repeated conflicts.
    pub skipped: Vec<EntryKey>,
    /// Integration and side effect warnings.
    pub warnings: Vec<String>,
    /// Duration of the cycle.
    pub duration: Duration,
}

/// What a trigger led to.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// A cycle (and any re-run it absorbed) ran to completion.
    Completed(SyncCycleResult),
    /// Another cycle was running; it will run once more when done.
    Coalesced,
    /// Pairing is in progress; the trigger is remembered.
    Suspended,
    /// The cycle failed; the failure was also published as a status event.
    Failed(String),
}

#[derive(Debug, Clone)]
struct Credentials {
    user_id: UserId,
    token: AccessToken,
}

/// Holds the engine in [`EngineState::Pairing`] while alive.
///
/// Dropping the guard restores the state it replaced, unless
/// [`PairingGuard::finish`] chose another one.
pub(crate) struct PairingGuard {
    state: Arc<RwLock<EngineState>>,
    previous: EngineState,
    next: Option<EngineState>,
}

impl PairingGuard {
    /// Leaves pairing for `state` instead of the previous state.
    pub(crate) fn finish(mut self, state: EngineState) {
        self.next = Some(state);
    }
}

impl Drop for PairingGuard {
    fn drop(&mut self) {
        let next = self.next.unwrap_or(self.previous);
        let mut state = self.state.write();
        if *state == EngineState::Pairing {
            info!(from = %*state, to = %next, "sync state changed");
            *state = next;
        }
    }
}

/// The sync engine: one device's view of an account's shared log.
///
/// All operations are blocking; [`crate::SyncService`] drives them from a
/// tokio runtime.
pub struct SyncEngine<T: SyncTransport, D: DomainStore> {
    config: SyncConfig,
    device: Device,
    transport: T,
    store: Arc<D>,
    settings: Arc<dyn SettingsStore>,
    log: ClientSyncLog,
    effects: SideEffectRunner,
    state: Arc<RwLock<EngineState>>,
    stats: RwLock<SyncStats>,
    status: StatusBus,
    cycle_lock: Mutex<()>,
    rerun: AtomicBool,
    initial_pending: AtomicBool,
    cancelled: AtomicBool,
}

impl<T: SyncTransport, D: DomainStore> SyncEngine<T, D> {
    /// Creates a sync engine.
    ///
    /// `log` must belong to the device identity stored in `settings`
    /// (see [`load_or_create_identity`]).
    pub fn new(
        config: SyncConfig,
        transport: T,
        store: Arc<D>,
        settings: Arc<dyn SettingsStore>,
        log: ClientSyncLog,
    ) -> SyncResult<Self> {
        let identity = load_or_create_identity(settings.as_ref(), &config.device_name)?;
        if identity.id != log.device_id() {
            return Err(SyncError::Settings(format!(
                "client log belongs to {}, settings to {}",
                log.device_id(),
                identity.id
            )));
        }

        let state = if settings.pairing_state()?.is_paired() {
            EngineState::Listening
        } else {
            EngineState::Idle
        };
        info!(device_id = %identity.id, name = %identity.name, %state, "sync engine ready");

        Ok(Self {
            device: Device::new(identity.id, identity.name, 0),
            effects: SideEffectRunner::new(config.effect_attempts),
            status: StatusBus::new(config.status_capacity),
            config,
            transport,
            store,
            settings,
            log,
            state: Arc::new(RwLock::new(state)),
            stats: RwLock::new(SyncStats::default()),
            cycle_lock: Mutex::new(()),
            rerun: AtomicBool::new(false),
            initial_pending: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        })
    }

    /// Returns this device.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Returns this device's ID.
    pub fn device_id(&self) -> DeviceId {
        self.device.id
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the client sync log.
    pub fn log(&self) -> &ClientSyncLog {
        &self.log
    }

    /// Returns the domain store.
    pub fn store(&self) -> &Arc<D> {
        &self.store
    }

    /// Returns the settings store.
    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Gets the current state.
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the latest status event.
    pub fn status(&self) -> Option<SyncStatus> {
        self.status.last()
    }

    /// Subscribes to status events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Returns the account this device is paired with.
    pub fn user_id(&self) -> SyncResult<Option<UserId>> {
        Ok(match self.settings.pairing_state()? {
            PairingState::Paired { user_id, .. } => Some(user_id),
            PairingState::Unpaired => None,
        })
    }

    /// Returns true if the device has credentials.
    pub fn is_paired(&self) -> SyncResult<bool> {
        Ok(self.settings.pairing_state()?.is_paired())
    }

    /// Returns true if timer-driven sync is allowed.
    pub fn continuous_sync_enabled(&self) -> bool {
        self.settings
            .get_cursor(self.device.id)
            .map(|c| c.continuous_sync_enabled)
            .unwrap_or(false)
    }

    /// Re-enables timer-driven sync after it was paused by a fatal error.
    pub fn resume_continuous_sync(&self) -> SyncResult<()> {
        let mut cursor = self.settings.get_cursor(self.device.id)?;
        if !cursor.continuous_sync_enabled {
            cursor.continuous_sync_enabled = true;
            self.settings.set_cursor(&cursor)?;
            info!("continuous sync resumed");
        }
        Ok(())
    }

    /// Registers a side effect for integrated remote mutations.
    pub fn register_effect<F>(&self, collection: impl Into<String>, operation: Operation, handler: F)
    where
        F: Fn(&AppliedMutation) -> SyncResult<()> + Send + Sync + 'static,
    {
        self.effects.register(collection, operation, handler);
    }

    /// Cancels any ongoing cycle at the next checkpoint.
    ///
    /// A domain transaction that already started still commits.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if the engine was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sets the state, leaving an open pairing session untouched.
    fn set_state(&self, next: EngineState) {
        let mut state = self.state.write();
        if *state != next && *state != EngineState::Pairing {
            info!(from = %*state, to = %next, "sync state changed");
            *state = next;
        }
    }

    fn credentials(&self) -> SyncResult<Credentials> {
        match self.settings.pairing_state()? {
            PairingState::Paired { user_id, token } => Ok(Credentials { user_id, token }),
            PairingState::Unpaired => Err(SyncError::NotPaired),
        }
    }

    /// Records a local mutation: applies it to the domain store and appends
    /// it to the client log in one transaction.
    pub fn record_local(&self, mutation: Mutation) -> SyncResult<ClientSyncLogEntry> {
        mutation.validate()?;
        self.store.transaction(|txn| {
            apply_local(txn, &mutation)?;
            self.log.append(mutation.clone())
        })
    }

    /// Creates a new account with this device as its first member.
    ///
    /// The engine moves to [`EngineState::InitialSync`]; the next trigger
    /// runs the initial sync.
    pub fn create_account(&self) -> SyncResult<UserId> {
        if self.is_paired()? {
            return Err(SyncError::InvalidStateTransition {
                from: self.state().to_string(),
                to: EngineState::InitialSync.to_string(),
            });
        }
        let response = self.transport.create_account(&CreateAccountRequest {
            protocol_version: PROTOCOL_VERSION,
            device: self.device.clone(),
        })?;
        self.store_credentials(response.user_id, response.token)?;
        self.set_state(EngineState::InitialSync);
        info!(user_id = %response.user_id, "created account");
        Ok(response.user_id)
    }

    /// Persists credentials received when joining or creating an account.
    pub(crate) fn store_credentials(&self, user_id: UserId, token: AccessToken) -> SyncResult<()> {
        let mut cursor = self.settings.get_cursor(self.device.id)?;
        cursor.last_pulled_seq = 0;
        cursor.continuous_sync_enabled = true;
        self.settings.set_cursor(&cursor)?;
        self.log.attach(user_id)?;
        self.settings
            .set_pairing_state(&PairingState::Paired { user_id, token })?;
        self.initial_pending.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Enters the pairing state.
    pub(crate) fn begin_pairing(&self) -> SyncResult<PairingGuard> {
        let mut state = self.state.write();
        if *state == EngineState::Pairing {
            return Err(SyncError::InvalidStateTransition {
                from: state.to_string(),
                to: EngineState::Pairing.to_string(),
            });
        }
        let previous = *state;
        info!(from = %previous, to = %EngineState::Pairing, "sync state changed");
        *state = EngineState::Pairing;
        Ok(PairingGuard {
            state: Arc::clone(&self.state),
            previous,
            next: None,
        })
    }

    /// Registers a newly paired device and returns its credential.
    pub fn register_device(&self, device: Device) -> SyncResult<AccessToken> {
        let credentials = self.credentials()?;
        let device_id = device.id;
        let response = self.transport.register_device(&RegisterDeviceRequest {
            user_id: credentials.user_id,
            device_id: self.device.id,
            token: credentials.token,
            device,
        })?;
        info!(%device_id, "registered device");
        Ok(response.token)
    }

    /// Revokes a device. Removing this device unpairs it; it can later join
    /// the same account again or create a new one.
    pub fn remove_device(&self, target: DeviceId) -> SyncResult<bool> {
        let credentials = self.credentials()?;
        let response = self.transport.remove_device(&RemoveDeviceRequest {
            user_id: credentials.user_id,
            device_id: self.device.id,
            token: credentials.token,
            target,
        })?;
        info!(device_id = %target, removed = response.removed, "removed device");

        if target == self.device.id {
            self.settings.set_pairing_state(&PairingState::Unpaired)?;
            self.set_state(EngineState::Idle);
        }
        Ok(response.removed)
    }

    /// Lists the account's active devices.
    pub fn list_devices(&self) -> SyncResult<Vec<Device>> {
        let credentials = self.credentials()?;
        let response = self.transport.list_devices(&ListDevicesRequest {
            user_id: credentials.user_id,
            device_id: self.device.id,
            token: credentials.token,
        })?;
        Ok(response.devices)
    }

    /// Runs a sync on behalf of the user. Never returns an error: failures
    /// are reported as [`SyncOutcome::Failed`] and as a status event.
    ///
    /// An explicit trigger also resumes continuous sync if a quota or
    /// authentication failure paused it.
    pub fn trigger_sync(&self) -> SyncOutcome {
        if let Err(e) = self.resume_continuous_sync() {
            warn!(error = %e, "could not resume continuous sync");
        }
        match self.sync_now() {
            Ok(outcome) => outcome,
            Err(e) => SyncOutcome::Failed(e.to_string()),
        }
    }

    /// Runs a sync cycle (with retries) unless one is already running.
    ///
    /// A trigger that finds a cycle running leaves a re-run request; the
    /// owner of the cycle checks for it after releasing the cycle lock, so
    /// no request is left behind.
    pub fn sync_now(&self) -> SyncResult<SyncOutcome> {
        let mut last = None;
        loop {
            let result = {
                let Some(_guard) = self.cycle_lock.try_lock() else {
                    if let Some(result) = last {
                        // Another caller took over and will see the request.
                        return Ok(SyncOutcome::Completed(result));
                    }
                    self.rerun.store(true, Ordering::SeqCst);
                    debug!("sync already running, coalescing trigger");
                    return Ok(SyncOutcome::Coalesced);
                };
                self.rerun.store(false, Ordering::SeqCst);

                let state = self.state();
                match state {
                    EngineState::Idle => return Err(self.fail_cycle(SyncError::NotPaired)),
                    EngineState::Pairing => {
                        self.rerun.store(true, Ordering::SeqCst);
                        return Ok(SyncOutcome::Suspended);
                    }
                    _ => {}
                }

                let initial = state == EngineState::InitialSync
                    || self.initial_pending.load(Ordering::SeqCst);
                self.run_with_retry(initial)?
            };

            if !self.rerun.load(Ordering::SeqCst) || self.cancelled.load(Ordering::SeqCst) {
                return Ok(SyncOutcome::Completed(result));
            }
            debug!("re-running sync for coalesced triggers");
            last = Some(result);
        }
    }

    fn run_with_retry(&self, initial: bool) -> SyncResult<SyncCycleResult> {
        self.status.publish(SyncStatus::Syncing);
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                let delay = retry.delay_for_attempt(attempt);
                debug!(attempt, ?delay, "retrying sync");
                std::thread::sleep(delay);
                self.stats.write().retries += 1;
            }

            match self.run_cycle(initial) {
                Ok(result) => {
                    self.finish_cycle(&result);
                    return Ok(result);
                }
                Err(e)
                    if e.is_retryable()
                        && attempt + 1 < retry.max_attempts
                        && !self.cancelled.load(Ordering::SeqCst) =>
                {
                    warn!(attempt, error = %e, "sync attempt failed");
                    attempt += 1;
                }
                Err(e) => return Err(self.fail_cycle(e)),
            }
        }
    }

    fn run_cycle(&self, initial: bool) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        self.check_cancelled()?;
        let credentials = self.credentials()?;
        self.set_state(if initial {
            EngineState::InitialSync
        } else {
            EngineState::Listening
        });

        let mut result = SyncCycleResult {
            initial,
            ..SyncCycleResult::default()
        };
        result.pushed = self.push_all(&credentials)?;
        self.pull_all(&credentials, &mut result)?;
        result.duration = start.elapsed();
        Ok(result)
    }

    fn finish_cycle(&self, result: &SyncCycleResult) {
        self.initial_pending.store(false, Ordering::SeqCst);
        self.set_state(EngineState::Listening);
        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.entries_pushed += result.pushed as u64;
            stats.entries_pulled += result.pulled as u64;
            stats.entries_applied += result.applied as u64;
            stats.conflicts_skipped += result.skipped.len() as u64;
            stats.last_sync_time = Some(Instant::now());
            stats.last_error = None;
        }
        info!(
            initial = result.initial,
            pushed = result.pushed,
            pulled = result.pulled,
            applied = result.applied,
            warnings = result.warnings.len(),
            duration_ms = result.duration.as_millis() as u64,
            "sync cycle completed"
        );
        self.status.publish(SyncStatus::Success {
            pushed: result.pushed,
            pulled: result.pulled,
            warnings: result.warnings.len(),
        });
    }

    fn fail_cycle(&self, e: SyncError) -> SyncError {
        {
            let mut stats = self.stats.write();
            stats.cycles_failed += 1;
            stats.last_error = Some(e.to_string());
        }

        match &e {
            SyncError::Cancelled => info!("sync cancelled"),
            SyncError::NotPaired => warn!("sync requested on an unpaired device"),
            _ => {
                error!(error = %e, "sync cycle failed");
                self.set_state(EngineState::Error);
            }
        }

        if e.pauses_continuous_sync() {
            let paused = self.settings.get_cursor(self.device.id).and_then(|mut cursor| {
                cursor.continuous_sync_enabled = false;
                self.settings.set_cursor(&cursor)
            });
            match paused {
                Ok(()) => warn!("continuous sync paused until the next explicit trigger"),
                Err(pe) => error!(error = %pe, "could not pause continuous sync"),
            }
        }

        self.status.publish(SyncStatus::Fail {
            reason: e.to_string(),
            retryable: e.is_retryable(),
        });
        e
    }

    /// Pushes all unshared local entries, oldest first.
    fn push_all(&self, credentials: &Credentials) -> SyncResult<usize> {
        let mut pushed = 0;
        loop {
            self.check_cancelled()?;

            let batch: Vec<_> = self
                .log
                .read_unshared()
                .into_iter()
                .take(self.config.push_batch_size as usize)
                .collect();
            if batch.is_empty() {
                break;
            }

            let keys: Vec<_> = batch.iter().map(ClientSyncLogEntry::key).collect();
            let response = self.transport.write_entries(&WriteEntriesRequest {
                user_id: credentials.user_id,
                device_id: self.device.id,
                token: credentials.token.clone(),
                entries: batch,
            })?;
            if response.seqs.len() != keys.len() {
                return Err(SyncError::Protocol(format!(
                    "{} seqs for {} entries",
                    response.seqs.len(),
                    keys.len()
                )));
            }

            let shared: Vec<_> = keys.into_iter().zip(response.seqs).collect();
            self.log.mark_shared(&shared, now_millis())?;
            pushed += shared.len();
            debug!(count = shared.len(), latest_seq = response.latest_seq, "pushed entries");
        }
        Ok(pushed)
    }

    /// Pulls, integrates and advances the cursor page by page.
    fn pull_all(&self, credentials: &Credentials, result: &mut SyncCycleResult) -> SyncResult<()> {
        let mut cursor = self.settings.get_cursor(self.device.id)?;

        // Entries received by an earlier, interrupted cycle.
        self.integrate(result)?;

        loop {
            self.check_cancelled()?;

            let after = cursor.last_pulled_seq;
            let page = self.transport.get_entries_since(&GetEntriesRequest {
                user_id: credentials.user_id,
                device_id: self.device.id,
                token: credentials.token.clone(),
                after_seq: after,
                exclude_device_id: Some(self.device.id),
                limit: self.config.pull_batch_size,
            })?;
            validate_page(&page, after)?;

            let has_more = page.has_more;
            let scanned_to = page.scanned_to;
            let received = page
                .entries
                .into_iter()
                .map(SharedSyncLogEntry::into_received)
                .collect();
            result.pulled += self.log.receive_remote(received)?;
            self.integrate(result)?;

            if cursor.advance(scanned_to) {
                self.settings.set_cursor(&cursor)?;
            }
            if !has_more {
                break;
            }
            if scanned_to <= after {
                return Err(SyncError::Protocol(format!(
                    "shared log made no progress after seq {}",
                    after
                )));
            }
        }
        Ok(())
    }

    fn integrate(&self, result: &mut SyncCycleResult) -> SyncResult<()> {
        let report = integrate_pending(
            &self.log,
            self.store.as_ref(),
            self.config.max_integration_attempts,
        )?;
        if report.applied.is_empty() && report.deferred == 0 && report.settled() == 0 {
            return Ok(());
        }

        let effects = self.effects.run(&report.applied);
        result.applied += report.applied.len();
        result.stale += report.stale;
        result.deferred = report.deferred;
        result.skipped.extend(report.skipped);
        result.warnings.extend(report.warnings);
        result.warnings.extend(effects.failures);
        Ok(())
    }
}

impl<T: SyncTransport> SyncEngine<T, MemoryStore> {
    /// Creates an engine with in-memory storage, settings and log.
    pub fn in_memory(config: SyncConfig, transport: T) -> SyncResult<Self> {
        let settings: Arc<dyn SettingsStore> = Arc::new(MemorySettings::new());
        let identity = load_or_create_identity(settings.as_ref(), &config.device_name)?;
        let log = ClientSyncLog::in_memory(identity.id);
        Self::new(config, transport, Arc::new(MemoryStore::new()), settings, log)
    }
}

/// Checks the ordering guarantees of a pulled page.
fn validate_page(page: &GetEntriesResponse, after: u64) -> SyncResult<()> {
    let mut previous = after;
    for entry in &page.entries {
        if entry.seq <= previous {
            return Err(SyncError::Protocol(format!(
                "entry seq {} out of order after {}",
                entry.seq, previous
            )));
        }
        previous = entry.seq;
    }
    if page.scanned_to < previous {
        return Err(SyncError::Protocol(format!(
            "page scanned to {} but holds seq {}",
            page.scanned_to, previous
        )));
    }
    Ok(())
}

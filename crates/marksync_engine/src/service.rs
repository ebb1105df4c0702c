//! Background sync service.
//!
//! Owns a [`SyncEngine`] on a tokio runtime. Timer ticks, local mutations
//! and explicit triggers all wake the same task; cycles run on the
//! blocking pool, one at a time.

use crate::engine::{EngineState, SyncEngine, SyncOutcome};
use crate::error::{SyncError, SyncResult};
use crate::pairing::{join_pairing, start_pairing};
use crate::signal::{PairingCode, SignallingChannel};
use crate::status::SyncStatus;
use crate::store::DomainStore;
use crate::transport::SyncTransport;
use marksync_protocol::{ClientSyncLogEntry, Device, DeviceId, Mutation, UserId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Handle to a running sync service.
pub struct SyncService<T: SyncTransport, D: DomainStore> {
    engine: Arc<SyncEngine<T, D>>,
    signalling: Arc<dyn SignallingChannel>,
    wake: Arc<Notify>,
    explicit: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T, D> SyncService<T, D>
where
    T: SyncTransport + 'static,
    D: DomainStore + 'static,
{
    /// Spawns the service loop. Must be called from within a tokio runtime.
    pub fn start(engine: Arc<SyncEngine<T, D>>, signalling: Arc<dyn SignallingChannel>) -> Self {
        let wake = Arc::new(Notify::new());
        let explicit = Arc::new(AtomicBool::new(false));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_loop(
            Arc::clone(&engine),
            Arc::clone(&wake),
            Arc::clone(&explicit),
            shutdown_rx,
        ));
        info!(device_id = %engine.device_id(), "sync service started");

        Self {
            engine,
            signalling,
            wake,
            explicit,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Returns the engine.
    pub fn engine(&self) -> &Arc<SyncEngine<T, D>> {
        &self.engine
    }

    /// Requests a sync cycle and returns immediately.
    ///
    /// Also resumes continuous sync paused by a quota or auth failure.
    pub fn trigger_sync(&self) {
        self.explicit.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Records a local mutation and schedules a sync.
    pub fn record_local(&self, mutation: Mutation) -> SyncResult<ClientSyncLogEntry> {
        let entry = self.engine.record_local(mutation)?;
        self.wake.notify_one();
        Ok(entry)
    }

    /// Returns the latest status event.
    pub fn status(&self) -> Option<SyncStatus> {
        self.engine.status()
    }

    /// Subscribes to status events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncStatus> {
        self.engine.subscribe()
    }

    /// Creates an account for this device and starts the initial sync.
    pub async fn create_account(&self) -> SyncResult<UserId> {
        let user_id = self.blocking(|engine| engine.create_account()).await?;
        self.trigger_sync();
        Ok(user_id)
    }

    /// Pairs a new device with this device's account.
    ///
    /// `show_code` receives the code to display; the call completes once
    /// the other device joined, or fails after the pairing timeout.
    pub async fn pair_new_device<F>(&self, show_code: F) -> SyncResult<Device>
    where
        F: FnOnce(&PairingCode),
    {
        let session = start_pairing(&self.engine, Arc::clone(&self.signalling))?;
        show_code(session.code());
        let result = session.wait().await;
        // Triggers that arrived while pairing were held back.
        self.wake.notify_one();
        result
    }

    /// Joins the account of the device showing `code`, then runs the
    /// initial sync in the background.
    pub async fn join_pairing_session(&self, code: &str) -> SyncResult<UserId> {
        let user_id = join_pairing(&self.engine, Arc::clone(&self.signalling), code).await?;
        self.trigger_sync();
        Ok(user_id)
    }

    /// Revokes a device of the account.
    pub async fn remove_device(&self, target: DeviceId) -> SyncResult<bool> {
        self.blocking(move |engine| engine.remove_device(target)).await
    }

    /// Lists the account's devices.
    pub async fn list_devices(&self) -> SyncResult<Vec<Device>> {
        self.blocking(|engine| engine.list_devices()).await
    }

    /// Stops the service after the current cycle's transaction.
    pub async fn shutdown(&self) {
        self.engine.cancel();
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "sync service task failed");
            }
        }
        info!("sync service stopped");
    }

    async fn blocking<R, F>(&self, f: F) -> SyncResult<R>
    where
        F: FnOnce(&SyncEngine<T, D>) -> SyncResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || f(&engine))
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?
    }
}

async fn run_loop<T, D>(
    engine: Arc<SyncEngine<T, D>>,
    wake: Arc<Notify>,
    explicit: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) where
    T: SyncTransport + 'static,
    D: DomainStore + 'static,
{
    let mut ticker = engine.config().sync_interval.map(|period| {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        let timed = tokio::select! {
            _ = shutdown.changed() => break,
            _ = wake.notified() => false,
            _ = tick(&mut ticker) => true,
        };

        let explicit = explicit.swap(false, Ordering::SeqCst);
        if !explicit {
            if engine.state() == EngineState::Idle {
                continue;
            }
            if timed && !engine.continuous_sync_enabled() {
                debug!("continuous sync paused, skipping tick");
                continue;
            }
        }

        let cycle_engine = Arc::clone(&engine);
        let outcome = tokio::task::spawn_blocking(move || {
            if explicit {
                cycle_engine.trigger_sync()
            } else {
                cycle_engine
                    .sync_now()
                    .unwrap_or_else(|e| SyncOutcome::Failed(e.to_string()))
            }
        })
        .await;

        match outcome {
            Ok(SyncOutcome::Failed(reason)) => debug!(%reason, "sync cycle failed"),
            Ok(outcome) => debug!(?outcome, "sync cycle finished"),
            Err(e) => warn!(error = %e, "sync task failed"),
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::signal::MemorySignalling;
    use crate::store::MemoryStore;
    use crate::transport::MockTransport;
    use serde_json::json;
    use std::time::Duration;

    type Service = SyncService<Arc<MockTransport>, MemoryStore>;

    fn service(transport: &Arc<MockTransport>, hub: &MemorySignalling, name: &str) -> Service {
        let config = SyncConfig::new(name).without_sync_interval();
        let engine = Arc::new(SyncEngine::in_memory(config, Arc::clone(transport)).unwrap());
        SyncService::start(engine, Arc::new(hub.clone()))
    }

    async fn next_result(rx: &mut broadcast::Receiver<SyncStatus>) -> SyncStatus {
        loop {
            let status = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("no status event")
                .expect("status channel closed");
            if status != SyncStatus::Syncing {
                return status;
            }
        }
    }

    #[tokio::test]
    async fn local_change_is_pushed() {
        let transport = Arc::new(MockTransport::new());
        let hub = MemorySignalling::new();
        let service = service(&transport, &hub, "Laptop");
        let mut rx = service.subscribe();

        service.create_account().await.unwrap();
        assert!(matches!(next_result(&mut rx).await, SyncStatus::Success { .. }));

        service
            .record_local(Mutation::create("bookmarks", "https://a.com", json!({})))
            .unwrap();
        assert_eq!(
            next_result(&mut rx).await,
            SyncStatus::Success {
                pushed: 1,
                pulled: 0,
                warnings: 0
            }
        );
        assert_eq!(transport.entries().len(), 1);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn pairing_then_sync() {
        let transport = Arc::new(MockTransport::new());
        let hub = MemorySignalling::new();
        let laptop = service(&transport, &hub, "Laptop");
        let phone = service(&transport, &hub, "Phone");

        laptop.create_account().await.unwrap();
        laptop
            .record_local(Mutation::create("bookmarks", "https://a.com", json!({"t": 1})))
            .unwrap();

        let (code_tx, code_rx) = tokio::sync::oneshot::channel();
        let pairing = laptop.pair_new_device(move |code| {
            let _ = code_tx.send(code.to_string());
        });
        let joining = async {
            let code = code_rx.await.unwrap();
            phone.join_pairing_session(&code).await
        };
        let (paired, joined) = tokio::join!(pairing, joining);
        assert_eq!(paired.unwrap().id, phone.engine().device_id());
        joined.unwrap();

        // The laptop's entry reaches the phone through the initial sync.
        let mut rx = phone.subscribe();
        laptop.trigger_sync();
        phone.trigger_sync();
        for _ in 0..50 {
            if phone.engine().store().count("bookmarks") == 1 {
                break;
            }
            let _ = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
            phone.trigger_sync();
        }
        assert_eq!(
            phone.engine().store().find("bookmarks", "https://a.com").unwrap(),
            Some(json!({"t": 1}))
        );
        assert_eq!(laptop.list_devices().await.unwrap().len(), 2);

        laptop.shutdown().await;
        phone.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let transport = Arc::new(MockTransport::new());
        let hub = MemorySignalling::new();
        let service = service(&transport, &hub, "Laptop");
        service.shutdown().await;

        assert!(service.engine().is_cancelled());
        service.trigger_sync();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(transport.reads().is_empty());
    }
}

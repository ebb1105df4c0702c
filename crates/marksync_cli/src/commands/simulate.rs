//! Simulate command implementation.
//!
//! Runs a handful of devices in-process against a real shared log server.
//! Devices edit bookmarks and tags at random, drop offline and come back,
//! and sync in random order. At the end every device syncs twice and the
//! domain stores are compared.

use marksync_engine::{
    join_pairing, start_pairing, HttpResponse, HttpTransport, LoopbackClient, LoopbackServer,
    DomainStore, MemorySignalling, MemoryStore, RetryConfig, SyncConfig, SyncEngine, SyncOutcome,
};
use marksync_protocol::Mutation;
use marksync_server::{ServerConfig, SyncServer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const COLLECTIONS: [&str; 2] = ["bookmarks", "tags"];
const KEYS_PER_COLLECTION: usize = 8;

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct Options {
    /// Number of devices.
    pub devices: usize,
    /// Number of random edits.
    pub edits: usize,
    /// Random seed.
    pub seed: u64,
}

/// Per-device outcome.
#[derive(Debug, Serialize)]
pub struct DeviceReport {
    /// Device name.
    pub name: String,
    /// Objects in the domain store at the end.
    pub objects: usize,
    /// Entries pushed over the whole run.
    pub pushed: u64,
    /// Entries pulled over the whole run.
    pub pulled: u64,
    /// Cycles that failed (offline, usually).
    pub failed_cycles: u64,
}

/// Simulation outcome.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Seed used.
    pub seed: u64,
    /// Edits made.
    pub edits: usize,
    /// Entries in the shared log.
    pub shared_entries: usize,
    /// Whether every device ended with the same data.
    pub converged: bool,
    /// Per-device details.
    pub devices: Vec<DeviceReport>,
    /// Wall time in milliseconds.
    pub elapsed_ms: u64,
}

struct ServerLoopback(Arc<SyncServer>);

impl LoopbackServer for ServerLoopback {
    fn handle_post(&self, path: &str, body: &[u8]) -> HttpResponse {
        let reply = self.0.handle_post(path, body);
        HttpResponse {
            status: reply.status,
            body: reply.body,
        }
    }
}

type Device = SyncEngine<HttpTransport<LoopbackClient<ServerLoopback>>, MemoryStore>;

/// Runs the simulate command.
pub fn run(options: &Options, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = simulate(options)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    if report.converged {
        Ok(())
    } else {
        Err(format!("devices diverged (seed {})", report.seed).into())
    }
}

/// Runs a simulation and returns its report.
pub fn simulate(options: &Options) -> Result<SimulationReport, Box<dyn std::error::Error>> {
    if options.devices == 0 {
        return Err("at least one device is required".into());
    }
    let start = Instant::now();
    let mut rng = StdRng::seed_from_u64(options.seed);
    info!(seed = options.seed, devices = options.devices, "starting simulation");

    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let devices = (0..options.devices)
        .map(|i| new_device(&server, &format!("device-{}", i + 1)))
        .collect::<Result<Vec<_>, _>>()?;

    devices[0].create_account()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let hub = MemorySignalling::new();
    for joiner in &devices[1..] {
        runtime.block_on(pair(&devices[0], joiner, &hub))?;
    }

    for edit in 0..options.edits {
        let device = &devices[rng.gen_range(0..devices.len())];

        if rng.gen_bool(0.1) {
            let online = !device.transport().client().is_online();
            debug!(device = %device.device().name, online, "toggling connectivity");
            device.transport().client().set_online(online);
        }

        let collection = COLLECTIONS[rng.gen_range(0..COLLECTIONS.len())];
        let pk = format!("{}-{}", collection, rng.gen_range(0..KEYS_PER_COLLECTION));
        let exists = device.store().find(collection, &pk)?.is_some();
        let mutation = if !exists {
            Mutation::create(collection, pk, json!({"rev": edit, "by": device.device().name}))
        } else if rng.gen_bool(0.25) {
            Mutation::delete(collection, pk)
        } else {
            Mutation::update(collection, pk, json!({"rev": edit, "by": device.device().name}))
        };
        device.record_local(mutation)?;

        if rng.gen_bool(0.3) {
            let device = &devices[rng.gen_range(0..devices.len())];
            if let SyncOutcome::Failed(reason) = device.trigger_sync() {
                debug!(device = %device.device().name, %reason, "sync failed");
            }
        }
    }

    for device in &devices {
        device.transport().client().set_online(true);
    }
    for _ in 0..2 {
        for device in &devices {
            if let SyncOutcome::Failed(reason) = device.trigger_sync() {
                return Err(format!("{} failed to sync: {}", device.device().name, reason).into());
            }
        }
    }

    let reference = devices[0].store().snapshot();
    let converged = devices.iter().all(|d| d.store().snapshot() == reference);
    let reports = devices
        .iter()
        .map(|device| {
            let stats = device.stats();
            DeviceReport {
                name: device.device().name.clone(),
                objects: device.store().snapshot().values().map(|c| c.len()).sum(),
                pushed: stats.entries_pushed,
                pulled: stats.entries_pulled,
                failed_cycles: stats.cycles_failed,
            }
        })
        .collect();

    info!(converged, "simulation finished");
    Ok(SimulationReport {
        seed: options.seed,
        edits: options.edits,
        shared_entries: server.entry_count(),
        converged,
        devices: reports,
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}

fn new_device(server: &Arc<SyncServer>, name: &str) -> Result<Arc<Device>, Box<dyn std::error::Error>> {
    let client = LoopbackClient::new(ServerLoopback(Arc::clone(server)));
    let transport = HttpTransport::new("http://marksync.local", client);
    let config = SyncConfig::new(name)
        .with_retry(RetryConfig::new(2).with_initial_delay(Duration::from_millis(1)))
        .without_sync_interval();
    Ok(Arc::new(SyncEngine::in_memory(config, transport)?))
}

async fn pair(
    initiator: &Arc<Device>,
    joiner: &Arc<Device>,
    hub: &MemorySignalling,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = start_pairing(initiator, Arc::new(hub.clone()))?;
    let code = session.code().to_string();
    let (paired, joined) = tokio::join!(
        session.wait(),
        join_pairing(joiner, Arc::new(hub.clone()), &code)
    );
    paired?;
    joined?;
    Ok(())
}

fn print_text_output(report: &SimulationReport) {
    println!("Simulation (seed {})", report.seed);
    println!("================");
    println!();
    println!("Edits:          {}", report.edits);
    println!("Shared entries: {}", report.shared_entries);
    println!("Elapsed:        {} ms", report.elapsed_ms);
    println!();

    for device in &report.devices {
        println!(
            "{:12} objects={:<4} pushed={:<5} pulled={:<5} failed_cycles={}",
            device.name, device.objects, device.pushed, device.pulled, device.failed_cycles
        );
    }

    println!();
    if report.converged {
        println!("All devices converged.");
    } else {
        println!("DIVERGED: devices hold different data.");
    }
}

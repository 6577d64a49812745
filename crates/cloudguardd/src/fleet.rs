//! Simulated fleet backing the daemon when no cloud account is wired in.
//!
//! Resources come from `[simulation]`. Every sample tick writes one
//! synthetic value per metric into the in-memory fleet. Values follow a
//! slow sine load curve with a per-resource phase, so runs are
//! reproducible and the scaling loops see sustained highs and lows.

use std::f64::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use cloudguard_core::config::SimulationConfig;
use cloudguard_core::memory::MemoryFleet;
use cloudguard_core::ticker::run_periodic;
use cloudguard_core::types::{ResourceId, metric};

/// Ticks per full load cycle.
const CYCLE_TICKS: f64 = 120.0;

/// Stable phase in `[0, 1)` derived from the resource id.
fn phase(resource_id: &str) -> f64 {
    let hash = resource_id
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
        });
    (hash % 1000) as f64 / 1000.0
}

/// Synthetic metric values for one resource at one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    pub network: f64,
    pub error_rate: f64,
}

/// Deterministic sample for `resource_id` running `instances` at `tick`.
///
/// Load is spread across instances, so scaling out lowers per-instance cpu.
pub fn sample(resource_id: &str, instances: u32, tick: u64) -> Sample {
    let angle = TAU * (tick as f64 / CYCLE_TICKS + phase(resource_id));
    let demand = 2.0 + 1.5 * angle.sin();
    let per_instance = demand / f64::from(instances.max(1));

    let cpu = (per_instance * 60.0).clamp(2.0, 100.0);
    let memory = (35.0 + cpu * 0.45).clamp(0.0, 100.0);
    let disk = (40.0 + (tick % 600) as f64 * 0.05).min(100.0);
    let network = demand * 120.0;
    let error_rate = if cpu > 90.0 { (cpu - 90.0) / 100.0 } else { 0.001 };

    Sample {
        cpu,
        memory,
        disk,
        network,
        error_rate,
    }
}

pub struct SimulatedFleet {
    fleet: Arc<MemoryFleet>,
    resources: Vec<ResourceId>,
    tick: AtomicU64,
}

impl SimulatedFleet {
    /// Seed the in-memory fleet with the configured resources.
    pub fn new(config: &SimulationConfig) -> Self {
        let fleet = Arc::new(MemoryFleet::new());
        let resources = config.resources.iter().map(|r| r.id.clone()).collect();
        for resource in &config.resources {
            fleet.put_resource(resource.clone());
        }
        info!(resources = config.resources.len(), "simulated fleet seeded");
        Self {
            fleet,
            resources,
            tick: AtomicU64::new(0),
        }
    }

    pub fn fleet(&self) -> &Arc<MemoryFleet> {
        &self.fleet
    }

    /// Write one sample per metric per resource.
    pub fn step(&self) {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        for id in &self.resources {
            let Some(resource) = self.fleet.resource(id) else {
                continue;
            };
            let s = sample(id, resource.instances, tick);
            self.fleet.record_sample(id, metric::CPU, s.cpu);
            self.fleet.record_sample(id, metric::MEMORY, s.memory);
            self.fleet.record_sample(id, metric::DISK, s.disk);
            self.fleet.record_sample(id, metric::NETWORK, s.network);
            self.fleet.record_sample(id, metric::ERROR_RATE, s.error_rate);
            debug!(
                resource = %id,
                tick,
                cpu = s.cpu,
                instances = resource.instances,
                "sample written"
            );
        }
    }

    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: watch::Receiver<bool>) {
        run_periodic("fleet-sampler", interval, shutdown, || {
            self.step();
            async {}
        })
        .await;
    }
}

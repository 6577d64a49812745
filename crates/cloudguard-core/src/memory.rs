//! In-memory fleet implementing every collaborator contract.
//!
//! Backs the daemon's simulated fleet and the engine tests. Controller calls
//! are recorded in order; failures and slow responses can be injected per
//! resource. Metric samples are stamped with the fleet's clock, and
//! `history` only returns those inside the requested window.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::clock::{SharedClock, SystemClock};
use crate::collaborator::{
    HealthProbe, MetricSource, ResourceController, ResourceInventory, ScaleRequest,
};
use crate::types::{ResourceId, ResourceSnapshot};

/// Samples kept per (resource, metric) series.
const MAX_SERIES_LEN: usize = 720;

/// A controller call as seen by the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCall {
    Scale {
        resource: ResourceId,
        request: ScaleRequest,
    },
    Restart {
        resource: ResourceId,
    },
    Migrate {
        resource: ResourceId,
        instance_type: String,
    },
    OpenCircuit {
        resource: ResourceId,
    },
    Cleanup {
        resource: ResourceId,
    },
}

impl ControllerCall {
    pub fn resource_id(&self) -> &str {
        match self {
            ControllerCall::Scale { resource, .. }
            | ControllerCall::Restart { resource }
            | ControllerCall::Migrate { resource, .. }
            | ControllerCall::OpenCircuit { resource }
            | ControllerCall::Cleanup { resource } => resource,
        }
    }
}

#[derive(Default)]
struct FleetState {
    resources: BTreeMap<ResourceId, ResourceSnapshot>,
    current: HashMap<(ResourceId, String), f64>,
    history: HashMap<(ResourceId, String), Vec<(DateTime<Utc>, f64)>>,
    unhealthy: HashSet<ResourceId>,
    failing: HashSet<ResourceId>,
    delays: HashMap<ResourceId, Duration>,
    calls: Vec<ControllerCall>,
}

/// In-memory stand-in for a cloud account.
pub struct MemoryFleet {
    state: Mutex<FleetState>,
    clock: SharedClock,
}

impl Default for MemoryFleet {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFleet {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// A fleet whose samples are stamped by `clock`.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(FleetState::default()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a resource.
    pub fn put_resource(&self, snapshot: ResourceSnapshot) {
        self.lock().resources.insert(snapshot.id.clone(), snapshot);
    }

    pub fn remove_resource(&self, resource_id: &str) {
        self.lock().resources.remove(resource_id);
    }

    pub fn resource(&self, resource_id: &str) -> Option<ResourceSnapshot> {
        self.lock().resources.get(resource_id).cloned()
    }

    /// Set the current value of a metric.
    pub fn set_current(&self, resource_id: &str, metric: &str, value: f64) {
        self.lock()
            .current
            .insert((resource_id.to_string(), metric.to_string()), value);
    }

    /// Replace the history of a metric (oldest first). Samples are stamped
    /// one second apart, the last one at the current time.
    pub fn set_history(&self, resource_id: &str, metric: &str, samples: &[f64]) {
        let now = self.clock.now();
        let last = samples.len().saturating_sub(1);
        let series = samples
            .iter()
            .enumerate()
            .map(|(i, &value)| (now - chrono::Duration::seconds((last - i) as i64), value))
            .collect();
        self.lock()
            .history
            .insert((resource_id.to_string(), metric.to_string()), series);
    }

    /// Append a sample: becomes the current value and joins the history.
    /// Also mirrored into the resource's observations.
    pub fn record_sample(&self, resource_id: &str, metric: &str, value: f64) {
        let now = self.clock.now();
        let mut state = self.lock();
        let key = (resource_id.to_string(), metric.to_string());
        state.current.insert(key.clone(), value);
        let series = state.history.entry(key).or_default();
        series.push((now, value));
        if series.len() > MAX_SERIES_LEN {
            let excess = series.len() - MAX_SERIES_LEN;
            series.drain(..excess);
        }
        if let Some(resource) = state.resources.get_mut(resource_id) {
            resource
                .observations
                .insert(metric.to_string(), value.into());
        }
    }

    pub fn set_healthy(&self, resource_id: &str, healthy: bool) {
        let mut state = self.lock();
        if healthy {
            state.unhealthy.remove(resource_id);
        } else {
            state.unhealthy.insert(resource_id.to_string());
        }
    }

    /// Make every controller call against this resource fail.
    pub fn fail_actions(&self, resource_id: &str, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing.insert(resource_id.to_string());
        } else {
            state.failing.remove(resource_id);
        }
    }

    /// Delay every call touching this resource.
    pub fn set_delay(&self, resource_id: &str, delay: Duration) {
        self.lock().delays.insert(resource_id.to_string(), delay);
    }

    /// Controller calls received so far, in order.
    pub fn calls(&self) -> Vec<ControllerCall> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, resource_id: &str) -> Vec<ControllerCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.resource_id() == resource_id)
            .cloned()
            .collect()
    }

    async fn stall(&self, resource_id: &str) {
        let delay = self.lock().delays.get(resource_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Record a controller call and apply its effect unless the resource is
    /// marked failing.
    fn apply(&self, call: ControllerCall) -> anyhow::Result<()> {
        let mut state = self.lock();
        let resource_id = call.resource_id().to_string();
        state.calls.push(call.clone());

        if state.failing.contains(&resource_id) {
            anyhow::bail!("controller rejected {call:?}");
        }
        let Some(resource) = state.resources.get_mut(&resource_id) else {
            anyhow::bail!("unknown resource {resource_id}");
        };

        match call {
            ControllerCall::Scale { request, .. } => {
                if let Some(n) = request.desired_instances {
                    resource.instances = n;
                }
                if let Some(t) = request.instance_type {
                    resource.instance_type = Some(t);
                }
            }
            ControllerCall::Migrate { instance_type, .. } => {
                resource.instance_type = Some(instance_type);
            }
            ControllerCall::Restart { .. }
            | ControllerCall::OpenCircuit { .. }
            | ControllerCall::Cleanup { .. } => {}
        }
        Ok(())
    }
}

#[async_trait]
impl MetricSource for MemoryFleet {
    async fn current(&self, resource_id: &str, metric: &str) -> anyhow::Result<Option<f64>> {
        self.stall(resource_id).await;
        let state = self.lock();
        let explicit = state
            .current
            .get(&(resource_id.to_string(), metric.to_string()))
            .copied();
        Ok(explicit.or_else(|| {
            state
                .resources
                .get(resource_id)
                .and_then(|r| r.metric(metric))
        }))
    }

    async fn history(
        &self,
        resource_id: &str,
        metric: &str,
        window: Duration,
    ) -> anyhow::Result<Vec<f64>> {
        self.stall(resource_id).await;
        let since = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| self.clock.now().checked_sub_signed(w));
        let state = self.lock();
        let Some(series) = state
            .history
            .get(&(resource_id.to_string(), metric.to_string()))
        else {
            return Ok(Vec::new());
        };
        Ok(series
            .iter()
            .filter(|(at, _)| since.is_none_or(|since| *at >= since))
            .map(|&(_, value)| value)
            .collect())
    }
}

#[async_trait]
impl ResourceController for MemoryFleet {
    async fn scale(&self, resource_id: &str, request: &ScaleRequest) -> anyhow::Result<()> {
        self.stall(resource_id).await;
        self.apply(ControllerCall::Scale {
            resource: resource_id.to_string(),
            request: request.clone(),
        })
    }

    async fn restart(&self, resource_id: &str) -> anyhow::Result<()> {
        self.stall(resource_id).await;
        self.apply(ControllerCall::Restart {
            resource: resource_id.to_string(),
        })
    }

    async fn migrate(&self, resource_id: &str, instance_type: &str) -> anyhow::Result<()> {
        self.stall(resource_id).await;
        self.apply(ControllerCall::Migrate {
            resource: resource_id.to_string(),
            instance_type: instance_type.to_string(),
        })
    }

    async fn open_circuit(&self, resource_id: &str) -> anyhow::Result<()> {
        self.stall(resource_id).await;
        self.apply(ControllerCall::OpenCircuit {
            resource: resource_id.to_string(),
        })
    }

    async fn cleanup(&self, resource_id: &str) -> anyhow::Result<()> {
        self.stall(resource_id).await;
        self.apply(ControllerCall::Cleanup {
            resource: resource_id.to_string(),
        })
    }
}

#[async_trait]
impl ResourceInventory for MemoryFleet {
    async fn list(&self) -> anyhow::Result<Vec<ResourceSnapshot>> {
        Ok(self.lock().resources.values().cloned().collect())
    }

    async fn describe(&self, resource_id: &str) -> anyhow::Result<Option<ResourceSnapshot>> {
        self.stall(resource_id).await;
        Ok(self.lock().resources.get(resource_id).cloned())
    }
}

#[async_trait]
impl HealthProbe for MemoryFleet {
    async fn check(&self, resource_id: &str) -> anyhow::Result<bool> {
        self.stall(resource_id).await;
        Ok(!self.lock().unhealthy.contains(resource_id))
    }
}

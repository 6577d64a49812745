//! Twin sync loop: keeps every twin in step with its real resource.
//!
//! Each tick lists the inventory, creates twins for newly seen resources and
//! syncs twins whose observed state changed or whose predictions fell due.
//! Twins whose resource no longer appears are described individually and
//! retired once the inventory confirms the resource is gone.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use cloudguard_core::collaborator::{ResourceInventory, call};
use cloudguard_core::config::EngineSettings;
use cloudguard_core::ticker::run_periodic;
use cloudguard_core::types::{DigitalTwin, ResourceSnapshot, TwinType};

use crate::registry::TwinRegistry;

/// Counts from one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: usize,
    pub synced: usize,
    pub unchanged: usize,
    pub retired: usize,
    pub errors: usize,
}

pub struct TwinSyncer {
    registry: Arc<TwinRegistry>,
    inventory: Arc<dyn ResourceInventory>,
    settings: EngineSettings,
    twin_type: TwinType,
    tick_lock: Mutex<()>,
}

impl TwinSyncer {
    pub fn new(
        registry: Arc<TwinRegistry>,
        inventory: Arc<dyn ResourceInventory>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            inventory,
            settings,
            twin_type: TwinType::Infrastructure,
            tick_lock: Mutex::new(()),
        }
    }

    /// Twin type assigned to newly discovered resources.
    pub fn with_twin_type(mut self, twin_type: TwinType) -> Self {
        self.twin_type = twin_type;
        self
    }

    pub fn registry(&self) -> &Arc<TwinRegistry> {
        &self.registry
    }

    /// One full pass over the inventory.
    pub async fn sync_all(&self) -> SyncSummary {
        let _tick = self.tick_lock.lock().await;
        let mut summary = SyncSummary::default();

        let resources = match call(
            "inventory.list",
            "*",
            self.settings.collaborator_timeout,
            self.inventory.list(),
        )
        .await
        {
            Ok(resources) => resources,
            Err(e) => {
                warn!(error = %e, "inventory listing failed, skipping twin sync");
                summary.errors += 1;
                return summary;
            }
        };

        let mut seen = HashSet::new();
        for resource in &resources {
            seen.insert(resource.id.clone());
            self.reconcile(resource, &mut summary).await;
        }

        let missing: Vec<DigitalTwin> = self
            .registry
            .active_twins()
            .await
            .into_iter()
            .filter(|twin| !seen.contains(&twin.resource_id))
            .collect();
        if !missing.is_empty() {
            self.confirm_missing(missing, &mut summary).await;
        }

        debug!(
            created = summary.created,
            synced = summary.synced,
            unchanged = summary.unchanged,
            retired = summary.retired,
            errors = summary.errors,
            "twin sync pass finished"
        );
        summary
    }

    /// Create a twin for a new resource or sync an existing one.
    async fn reconcile(&self, resource: &ResourceSnapshot, summary: &mut SyncSummary) {
        let Some(twin) = self.registry.twin_for_resource(&resource.id).await else {
            self.registry.create_twin(resource, self.twin_type).await;
            summary.created += 1;
            return;
        };

        let changed = twin.state != resource.to_twin_state();
        let due = self
            .registry
            .has_due_predictions(&twin.id)
            .await
            .unwrap_or(false);
        if !changed && !due {
            summary.unchanged += 1;
            return;
        }

        match self.registry.sync_twin_state(&twin.id, resource).await {
            Ok(_) => summary.synced += 1,
            Err(e) => {
                warn!(twin = %twin.id, resource = %resource.id, error = %e, "twin sync failed");
                summary.errors += 1;
            }
        }
    }

    /// Describe resources missing from the listing; retire their twins when
    /// the inventory confirms they are gone.
    async fn confirm_missing(&self, twins: Vec<DigitalTwin>, summary: &mut SyncSummary) {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency));
        let mut join_set = JoinSet::new();

        for twin in twins {
            let semaphore = semaphore.clone();
            let inventory = self.inventory.clone();
            let limit = self.settings.collaborator_timeout;
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let described = call(
                    "inventory.describe",
                    &twin.resource_id,
                    limit,
                    inventory.describe(&twin.resource_id),
                )
                .await;
                (twin, described)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let Ok((twin, described)) = joined else {
                summary.errors += 1;
                continue;
            };
            match described {
                Ok(None) => match self.registry.retire_twin(&twin.id).await {
                    Ok(_) => {
                        info!(
                            twin = %twin.id,
                            resource = %twin.resource_id,
                            "resource gone, twin retired"
                        );
                        summary.retired += 1;
                    }
                    Err(e) => {
                        warn!(twin = %twin.id, error = %e, "retire failed");
                        summary.errors += 1;
                    }
                },
                Ok(Some(resource)) => self.reconcile(&resource, summary).await,
                Err(e) => {
                    warn!(
                        twin = %twin.id,
                        resource = %twin.resource_id,
                        error = %e,
                        "describe failed, keeping twin"
                    );
                    summary.errors += 1;
                }
            }
        }
    }

    /// Sync every `interval` until shutdown.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: watch::Receiver<bool>) {
        run_periodic("twin-sync", interval, shutdown, || {
            let syncer = self.clone();
            async move {
                syncer.sync_all().await;
            }
        })
        .await;
    }
}

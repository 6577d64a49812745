//! Twin registry: owns every digital twin, its predictions and its
//! simulation history.
//!
//! All state lives behind one `RwLock` so a sync (replace state, validate due
//! predictions, generate fresh ones) is atomic per twin. Twins are never
//! deleted; retiring one flips `is_active` and expires its pending
//! predictions.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use cloudguard_core::clock::SharedClock;
use cloudguard_core::config::TwinsConfig;
use cloudguard_core::error::{CoreError, CoreResult};
use cloudguard_core::types::{
    DigitalTwin, JsonObject, Observation, Prediction, PredictionStatus,
    PredictionType, ResourceId, ResourceSnapshot, Simulation, TwinId, TwinState, TwinType,
};

use crate::prediction::{BASELINE_ACCURACY, PredictionEngine, Validation};
use crate::simulation::SimulationRunner;

/// Retention bounds per twin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryLimits {
    /// Pending predictions kept per type. Past the cap the newest of the
    /// older rounds expire, so the oldest can still come due and the latest
    /// round stays current.
    pub max_pending_per_type: usize,
    /// Resolved predictions and simulations kept.
    pub history_limit: usize,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self::from(&TwinsConfig::default())
    }
}

impl From<&TwinsConfig> for RegistryLimits {
    fn from(config: &TwinsConfig) -> Self {
        Self {
            max_pending_per_type: config.max_pending_per_type.max(2),
            history_limit: config.history_limit,
        }
    }
}

/// What one sync did to a twin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    pub validated: usize,
    pub failed: usize,
    pub generated: usize,
    pub expired: usize,
    pub accuracy: u8,
}

struct TwinEntry {
    twin: DigitalTwin,
    /// Creation order, oldest first.
    predictions: Vec<Prediction>,
    simulations: VecDeque<Simulation>,
}

#[derive(Default)]
struct Inner {
    twins: HashMap<TwinId, TwinEntry>,
    /// Latest twin linked to each resource, active or not.
    by_resource: HashMap<ResourceId, TwinId>,
}

impl Inner {
    fn entry(&self, twin_id: &str) -> CoreResult<&TwinEntry> {
        self.twins
            .get(twin_id)
            .ok_or_else(|| CoreError::not_found("twin", twin_id))
    }

    fn entry_mut(&mut self, twin_id: &str) -> CoreResult<&mut TwinEntry> {
        self.twins
            .get_mut(twin_id)
            .ok_or_else(|| CoreError::not_found("twin", twin_id))
    }
}

pub struct TwinRegistry {
    inner: RwLock<Inner>,
    engine: PredictionEngine,
    simulator: SimulationRunner,
    clock: SharedClock,
    limits: RegistryLimits,
}

impl TwinRegistry {
    pub fn new(clock: SharedClock, limits: RegistryLimits) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            engine: PredictionEngine::new(),
            simulator: SimulationRunner::new(),
            clock,
            limits,
        }
    }

    /// Replace the prediction engine (e.g. to plug in another scorer).
    pub fn with_engine(mut self, engine: PredictionEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Create a twin for a resource and generate its first predictions.
    ///
    /// Returns the existing twin if the resource already has an active one.
    pub async fn create_twin(
        &self,
        resource: &ResourceSnapshot,
        twin_type: TwinType,
    ) -> DigitalTwin {
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner
            .by_resource
            .get(&resource.id)
            .and_then(|id| inner.twins.get(id))
            .filter(|entry| entry.twin.is_active)
        {
            return existing.twin.clone();
        }

        let now = self.clock.now();
        let mut twin = DigitalTwin {
            id: Uuid::new_v4().to_string(),
            organization_id: resource.organization_id.clone(),
            resource_id: resource.id.clone(),
            name: resource.name.clone(),
            twin_type,
            state: resource.to_twin_state(),
            predicted_state: None,
            accuracy: BASELINE_ACCURACY,
            last_simulation: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let predictions = self.engine.generate(&twin, None, now);
        twin.predicted_state = Some(predicted_state(&predictions));

        info!(
            twin = %twin.id,
            resource = %twin.resource_id,
            organization = %twin.organization_id,
            "twin created"
        );

        inner
            .by_resource
            .insert(resource.id.clone(), twin.id.clone());
        inner.twins.insert(
            twin.id.clone(),
            TwinEntry {
                twin: twin.clone(),
                predictions,
                simulations: VecDeque::new(),
            },
        );
        twin
    }

    pub async fn get_twin(&self, twin_id: &str) -> CoreResult<DigitalTwin> {
        Ok(self.inner.read().await.entry(twin_id)?.twin.clone())
    }

    /// The active twin linked to a resource.
    pub async fn twin_for_resource(&self, resource_id: &str) -> Option<DigitalTwin> {
        let inner = self.inner.read().await;
        inner
            .by_resource
            .get(resource_id)
            .and_then(|id| inner.twins.get(id))
            .filter(|entry| entry.twin.is_active)
            .map(|entry| entry.twin.clone())
    }

    /// Every twin of an organization, retired ones included, oldest first.
    pub async fn list_by_organization(&self, organization_id: &str) -> Vec<DigitalTwin> {
        let inner = self.inner.read().await;
        let mut twins: Vec<DigitalTwin> = inner
            .twins
            .values()
            .filter(|entry| entry.twin.organization_id == organization_id)
            .map(|entry| entry.twin.clone())
            .collect();
        twins.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        twins
    }

    pub async fn active_twins(&self) -> Vec<DigitalTwin> {
        let inner = self.inner.read().await;
        let mut twins: Vec<DigitalTwin> = inner
            .twins
            .values()
            .filter(|entry| entry.twin.is_active)
            .map(|entry| entry.twin.clone())
            .collect();
        twins.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        twins
    }

    /// Replace the twin's state with a fresh observation, validate every due
    /// prediction against it, then generate the next round of predictions.
    pub async fn sync_twin_state(
        &self,
        twin_id: &str,
        observed: &ResourceSnapshot,
    ) -> CoreResult<SyncReport> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        let entry = inner.entry_mut(twin_id)?;
        let TwinEntry {
            twin, predictions, ..
        } = entry;

        let state = observed.to_twin_state();
        let previous = std::mem::replace(&mut twin.state, state.clone());
        twin.updated_at = now;

        let mut report = SyncReport::default();
        for prediction in predictions.iter_mut() {
            match self.engine.validate(twin, prediction, &state, now) {
                Validation::NotDue => {}
                Validation::Validated { .. } => report.validated += 1,
                Validation::Failed => report.failed += 1,
            }
        }

        let fresh = self.engine.generate(twin, Some(&previous), now);
        report.generated = fresh.len();
        twin.predicted_state = Some(predicted_state(&fresh));
        predictions.extend(fresh);

        report.expired = self.enforce_retention(predictions, now);
        report.accuracy = twin.accuracy;

        debug!(
            twin = %twin.id,
            resource = %twin.resource_id,
            validated = report.validated,
            failed = report.failed,
            expired = report.expired,
            accuracy = report.accuracy,
            "twin synced"
        );
        Ok(report)
    }

    /// Soft-retire a twin; its pending predictions expire.
    pub async fn retire_twin(&self, twin_id: &str) -> CoreResult<DigitalTwin> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        let entry = inner.entry_mut(twin_id)?;

        entry.twin.is_active = false;
        entry.twin.updated_at = now;
        let mut expired = 0;
        for prediction in entry.predictions.iter_mut().filter(|p| p.is_pending()) {
            expire(prediction, now);
            expired += 1;
        }

        info!(
            twin = %entry.twin.id,
            resource = %entry.twin.resource_id,
            expired,
            "twin retired"
        );
        Ok(entry.twin.clone())
    }

    /// Pending predictions only, oldest first.
    pub async fn get_predictions(&self, twin_id: &str) -> CoreResult<Vec<Prediction>> {
        let inner = self.inner.read().await;
        Ok(inner
            .entry(twin_id)?
            .predictions
            .iter()
            .filter(|p| p.is_pending())
            .cloned()
            .collect())
    }

    /// Every retained prediction, resolved ones included.
    pub async fn prediction_history(&self, twin_id: &str) -> CoreResult<Vec<Prediction>> {
        Ok(self.inner.read().await.entry(twin_id)?.predictions.clone())
    }

    /// Newest pending prediction of one type.
    pub async fn newest_pending(
        &self,
        twin_id: &str,
        prediction_type: PredictionType,
    ) -> CoreResult<Option<Prediction>> {
        let inner = self.inner.read().await;
        Ok(inner
            .entry(twin_id)?
            .predictions
            .iter()
            .rev()
            .find(|p| p.is_pending() && p.prediction_type == prediction_type)
            .cloned())
    }

    /// Whether any pending prediction has reached its timeframe.
    pub async fn has_due_predictions(&self, twin_id: &str) -> CoreResult<bool> {
        let now = self.clock.now();
        let inner = self.inner.read().await;
        Ok(inner
            .entry(twin_id)?
            .predictions
            .iter()
            .any(|p| p.is_pending() && p.is_due(now)))
    }

    pub async fn get_simulations(&self, twin_id: &str) -> CoreResult<Vec<Simulation>> {
        let inner = self.inner.read().await;
        Ok(inner.entry(twin_id)?.simulations.iter().cloned().collect())
    }

    /// Run a named scenario against the twin's current state.
    ///
    /// Only an unknown twin is an error; scenario problems come back as a
    /// failed [`Simulation`].
    pub async fn run_simulation(
        &self,
        twin_id: &str,
        scenario: &str,
        parameters: JsonObject,
    ) -> CoreResult<Simulation> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        let entry = inner.entry_mut(twin_id)?;

        let simulation = self.simulator.run(&entry.twin, scenario, parameters, now);
        entry.twin.last_simulation = Some(now);
        entry.simulations.push_back(simulation.clone());
        while entry.simulations.len() > self.limits.history_limit {
            entry.simulations.pop_front();
        }

        info!(
            twin = %twin_id,
            scenario,
            simulation = %simulation.id,
            status = ?simulation.status,
            "simulation recorded"
        );
        Ok(simulation)
    }

    /// Expire pending predictions beyond the per-type cap, then drop the
    /// oldest resolved ones beyond the history limit. Returns how many
    /// pending predictions expired.
    ///
    /// The newest prediction of each type is never expired here, and among
    /// the older ones the most recent go first: a prediction that survives
    /// the cap keeps its place until it comes due.
    fn enforce_retention(&self, predictions: &mut Vec<Prediction>, now: DateTime<Utc>) -> usize {
        let mut expired = 0;
        for prediction_type in PredictionType::ALL {
            let pending: Vec<usize> = predictions
                .iter()
                .enumerate()
                .filter(|(_, p)| p.is_pending() && p.prediction_type == prediction_type)
                .map(|(i, _)| i)
                .collect();
            let excess = pending.len().saturating_sub(self.limits.max_pending_per_type);
            let Some((_, older)) = pending.split_last() else {
                continue;
            };
            for &i in older.iter().rev().take(excess) {
                expire(&mut predictions[i], now);
                expired += 1;
            }
        }

        let resolved = predictions.iter().filter(|p| !p.is_pending()).count();
        let mut drop = resolved.saturating_sub(self.limits.history_limit);
        if drop > 0 {
            predictions.retain(|p| {
                if drop > 0 && !p.is_pending() {
                    drop -= 1;
                    false
                } else {
                    true
                }
            });
        }
        expired
    }
}

fn expire(prediction: &mut Prediction, now: DateTime<Utc>) {
    prediction.status = PredictionStatus::Expired;
    prediction.resolved_at = Some(now);
}

/// Union of the numeric expectations of a prediction round.
fn predicted_state(predictions: &[Prediction]) -> TwinState {
    predictions
        .iter()
        .flat_map(|p| p.prediction.expectations())
        .map(|(name, value)| (name, Observation::Number(value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::prediction::AccuracyScorer;
    use cloudguard_core::clock::{Clock, ManualClock};
    use cloudguard_core::types::{ResourceKind, SimulationStatus};

    struct FixedScorer(f64);

    impl AccuracyScorer for FixedScorer {
        fn score(&self, _: &Prediction, _: &TwinState) -> Option<f64> {
            Some(self.0)
        }
    }

    fn vm(id: &str, cpu: f64) -> ResourceSnapshot {
        ResourceSnapshot::new(id, "org-1", ResourceKind::Compute, 2)
            .with_observation("cpu", cpu)
            .with_observation("memory", 40.0)
            .with_instance_type("m5.large")
    }

    fn registry(clock: Arc<ManualClock>) -> TwinRegistry {
        TwinRegistry::new(clock, RegistryLimits::default())
    }

    fn params(value: serde_json::Value) -> JsonObject {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn create_seeds_state_and_predictions() {
        let clock = Arc::new(ManualClock::starting_now());
        let registry = registry(clock);

        let twin = registry
            .create_twin(&vm("vm-1", 50.0), TwinType::Infrastructure)
            .await;
        assert_eq!(twin.accuracy, BASELINE_ACCURACY);
        assert!(twin.is_active);
        assert_eq!(
            twin.state.get("instances"),
            Some(&Observation::Number(2.0))
        );
        assert_eq!(
            twin.state.get("instance_type"),
            Some(&Observation::Text("m5.large".to_string()))
        );
        assert!(twin.predicted_state.is_some());

        let pending = registry.get_predictions(&twin.id).await.unwrap();
        assert_eq!(pending.len(), PredictionType::ALL.len());
    }

    #[tokio::test]
    async fn create_returns_existing_active_twin() {
        let registry = registry(Arc::new(ManualClock::starting_now()));
        let first = registry
            .create_twin(&vm("vm-1", 50.0), TwinType::Infrastructure)
            .await;
        let second = registry
            .create_twin(&vm("vm-1", 70.0), TwinType::Performance)
            .await;
        assert_eq!(first.id, second.id);

        registry.retire_twin(&first.id).await.unwrap();
        let third = registry
            .create_twin(&vm("vm-1", 70.0), TwinType::Infrastructure)
            .await;
        assert_ne!(third.id, first.id);
        assert_eq!(
            registry.twin_for_resource("vm-1").await.map(|t| t.id),
            Some(third.id)
        );
        assert_eq!(registry.list_by_organization("org-1").await.len(), 2);
    }

    #[tokio::test]
    async fn accuracy_moves_by_ema_after_due_sync() {
        let clock = Arc::new(ManualClock::starting_now());
        let registry = TwinRegistry::new(clock.clone(), RegistryLimits::default())
            .with_engine(PredictionEngine::with_scorer(Arc::new(FixedScorer(95.0))));

        let twin = registry
            .create_twin(&vm("vm-1", 50.0), TwinType::Infrastructure)
            .await;

        // Scaling predictions are due after 12h; nothing else is.
        clock.advance(Duration::from_secs(12 * 3600));
        let report = registry
            .sync_twin_state(&twin.id, &vm("vm-1", 55.0))
            .await
            .unwrap();

        assert_eq!(report.validated, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.generated, 5);
        assert_eq!(report.accuracy, 86);
        assert_eq!(registry.get_twin(&twin.id).await.unwrap().accuracy, 86);
    }

    #[tokio::test]
    async fn get_predictions_returns_only_pending() {
        let clock = Arc::new(ManualClock::starting_now());
        let registry = registry(clock.clone());
        let twin = registry
            .create_twin(&vm("vm-1", 50.0), TwinType::Infrastructure)
            .await;

        clock.advance(Duration::from_secs(12 * 3600));
        registry
            .sync_twin_state(&twin.id, &vm("vm-1", 50.0))
            .await
            .unwrap();

        let pending = registry.get_predictions(&twin.id).await.unwrap();
        assert_eq!(pending.len(), 9);
        assert!(pending.iter().all(|p| p.status == PredictionStatus::Pending));

        let history = registry.prediction_history(&twin.id).await.unwrap();
        assert_eq!(history.len(), 10);
        assert_eq!(
            history
                .iter()
                .filter(|p| p.status == PredictionStatus::Validated)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn sync_replaces_state() {
        let registry = registry(Arc::new(ManualClock::starting_now()));
        let twin = registry
            .create_twin(&vm("vm-1", 50.0), TwinType::Infrastructure)
            .await;

        registry
            .sync_twin_state(&twin.id, &vm("vm-1", 91.0))
            .await
            .unwrap();
        let twin = registry.get_twin(&twin.id).await.unwrap();
        assert_eq!(twin.state.get("cpu"), Some(&Observation::Number(91.0)));
        assert!(!registry.has_due_predictions(&twin.id).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_twin_is_not_found() {
        let registry = registry(Arc::new(ManualClock::starting_now()));

        assert!(matches!(
            registry.get_twin("nope").await,
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            registry.sync_twin_state("nope", &vm("vm-1", 1.0)).await,
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            registry.retire_twin("nope").await,
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            registry.get_predictions("nope").await,
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            registry.get_simulations("nope").await,
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            registry
                .run_simulation("nope", "load_test", JsonObject::new())
                .await,
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn retire_expires_pending_predictions() {
        let registry = registry(Arc::new(ManualClock::starting_now()));
        let twin = registry
            .create_twin(&vm("vm-1", 50.0), TwinType::Infrastructure)
            .await;

        let retired = registry.retire_twin(&twin.id).await.unwrap();
        assert!(!retired.is_active);
        assert!(registry.get_predictions(&twin.id).await.unwrap().is_empty());
        assert!(registry.active_twins().await.is_empty());
        assert!(registry.twin_for_resource("vm-1").await.is_none());
        // Retired twins stay readable.
        assert!(registry.get_twin(&twin.id).await.is_ok());
    }

    #[tokio::test]
    async fn pending_predictions_are_capped_per_type() {
        let clock = Arc::new(ManualClock::starting_now());
        let registry = TwinRegistry::new(
            clock.clone(),
            RegistryLimits {
                max_pending_per_type: 2,
                history_limit: 3,
            },
        );
        let twin = registry
            .create_twin(&vm("vm-1", 50.0), TwinType::Infrastructure)
            .await;

        let mut expired = 0;
        for cpu in [51.0, 52.0, 53.0] {
            clock.advance(Duration::from_secs(60));
            expired += registry
                .sync_twin_state(&twin.id, &vm("vm-1", cpu))
                .await
                .unwrap()
                .expired;
        }

        let pending = registry.get_predictions(&twin.id).await.unwrap();
        for kind in PredictionType::ALL {
            let created: Vec<_> = pending
                .iter()
                .filter(|p| p.prediction_type == kind)
                .map(|p| p.created_at)
                .collect();
            // The seed round and the latest round survive.
            assert_eq!(created, vec![twin.created_at, clock.now()]);
        }
        assert_eq!(expired, 10);
        let history = registry.prediction_history(&twin.id).await.unwrap();
        assert_eq!(history.iter().filter(|p| !p.is_pending()).count(), 3);
    }

    #[tokio::test]
    async fn minute_syncs_still_validate_after_twelve_hours() {
        let clock = Arc::new(ManualClock::starting_now());
        let registry = registry(clock.clone());
        let twin = registry
            .create_twin(&vm("vm-1", 50.0), TwinType::Infrastructure)
            .await;

        let mut validated = 0;
        let mut expired = 0;
        let mut first_validation = None;
        for minute in 1..=780u64 {
            clock.advance(Duration::from_secs(60));
            let cpu = 40.0 + (minute % 30) as f64;
            let report = registry
                .sync_twin_state(&twin.id, &vm("vm-1", cpu))
                .await
                .unwrap();
            if report.validated > 0 && first_validation.is_none() {
                first_validation = Some(minute);
            }
            validated += report.validated;
            expired += report.expired;
        }

        assert!(validated > 0);
        assert!(expired > 0);
        assert_eq!(first_validation, Some(12 * 60));

        let pending = registry.get_predictions(&twin.id).await.unwrap();
        let limit = RegistryLimits::default().max_pending_per_type;
        for kind in PredictionType::ALL {
            assert!(pending.iter().filter(|p| p.prediction_type == kind).count() <= limit);
        }
    }

    #[tokio::test]
    async fn simulations_are_recorded_and_stamped() {
        let clock = Arc::new(ManualClock::starting_now());
        let registry = registry(clock.clone());
        let twin = registry
            .create_twin(&vm("vm-1", 50.0), TwinType::Infrastructure)
            .await;

        let ok = registry
            .run_simulation(&twin.id, "load_test", params(json!({"load_multiplier": 1.5})))
            .await
            .unwrap();
        assert_eq!(ok.status, SimulationStatus::Completed);

        let failed = registry
            .run_simulation(&twin.id, "teleport", JsonObject::new())
            .await
            .unwrap();
        assert_eq!(failed.status, SimulationStatus::Failed);
        assert!(failed.results.contains_key("error"));

        let sims = registry.get_simulations(&twin.id).await.unwrap();
        assert_eq!(sims.len(), 2);
        assert_eq!(
            registry.get_twin(&twin.id).await.unwrap().last_simulation,
            Some(clock.now())
        );
    }

    #[tokio::test]
    async fn newest_pending_picks_latest_round() {
        let clock = Arc::new(ManualClock::starting_now());
        let registry = registry(clock.clone());
        let twin = registry
            .create_twin(&vm("vm-1", 50.0), TwinType::Infrastructure)
            .await;
        clock.advance(Duration::from_secs(60));
        registry
            .sync_twin_state(&twin.id, &vm("vm-1", 95.0))
            .await
            .unwrap();

        let newest = registry
            .newest_pending(&twin.id, PredictionType::Scaling)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(newest.created_at, clock.now());
    }
}

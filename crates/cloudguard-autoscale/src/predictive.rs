//! Predictive scaling: pre-emptive scale-ups from twin forecasts.
//!
//! On a slower cadence than the policy engine, each active twin's newest
//! pending `scaling` prediction is consulted. A `scale_up` recommendation is
//! acted on conservatively:
//!
//! ```text
//! cap    = floor(current * 1.25)
//! target = min(recommended, cap)
//! issue only if target > current and the predictive cooldown has elapsed
//! ```
//!
//! The cap means a single predictive action never grows a resource by more
//! than 25%. Small fleets (1–3 instances) therefore never scale
//! predictively; the reactive policies cover them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use cloudguard_core::clock::SharedClock;
use cloudguard_core::collaborator::{Collaborators, ScaleRequest, act, call};
use cloudguard_core::config::EngineSettings;
use cloudguard_core::cooldown::{CooldownKey, CooldownTracker};
use cloudguard_core::history::EventLog;
use cloudguard_core::ticker::run_periodic;
use cloudguard_core::types::{
    ActionOutcome, DigitalTwin, PredictionPayload, PredictionType, ResourceId,
    ScalingActionType, ScalingEvent, ScalingRecommendation,
};
use cloudguard_twin::TwinRegistry;

/// Cooldown owner and history policy id for predictive actions.
pub const PREDICTIVE_OWNER: &str = "predictive";

/// Largest growth a single predictive action may apply.
const MAX_GROWTH: f64 = 1.25;

/// Target for a recommended scale-up, or `None` when the capped target does
/// not exceed the current count.
///
/// The cap is `floor(current × 1.25)`, not `ceil`, so no single step grows a
/// fleet by more than 25%. The cost is that fleets of 1 to 3 instances are
/// never scaled predictively: `floor(3 × 1.25)` is still 3.
pub fn capped_target(current: u32, recommended: u32) -> Option<u32> {
    let cap = (f64::from(current) * MAX_GROWTH).floor() as u32;
    let target = recommended.min(cap);
    (target > current).then_some(target)
}

/// Result of considering one twin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictiveOutcome {
    /// No pending scale-up recommendation.
    NoRecommendation,
    /// The capped target does not exceed the current count.
    WithinCap { current: u32, recommended: u32 },
    CoolingDown,
    ResourceMissing,
    Unreachable { reason: String },
    Scaled { from: u32, to: u32 },
    Failed { reason: String },
}

pub struct PredictiveScaler {
    registry: Arc<TwinRegistry>,
    collaborators: Collaborators,
    cooldowns: Arc<CooldownTracker>,
    history: Arc<EventLog<ScalingEvent>>,
    clock: SharedClock,
    cooldown: Duration,
    settings: EngineSettings,
    tick_lock: Mutex<()>,
}

impl PredictiveScaler {
    pub fn new(
        registry: Arc<TwinRegistry>,
        collaborators: Collaborators,
        cooldowns: Arc<CooldownTracker>,
        clock: SharedClock,
        cooldown: Duration,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            collaborators,
            cooldowns,
            history: Arc::new(EventLog::new(settings.history_limit)),
            clock,
            cooldown,
            settings,
            tick_lock: Mutex::new(()),
        }
    }

    /// Record actions into a shared history.
    pub fn with_history(mut self, history: Arc<EventLog<ScalingEvent>>) -> Self {
        self.history = history;
        self
    }

    pub async fn history(&self) -> Vec<ScalingEvent> {
        self.history.snapshot().await
    }

    /// Consider every active twin once.
    pub async fn evaluate_all(self: &Arc<Self>) -> Vec<(ResourceId, PredictiveOutcome)> {
        let _tick = self.tick_lock.lock().await;

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency));
        let mut join_set = JoinSet::new();
        for twin in self.registry.active_twins().await {
            let scaler = self.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = scaler.evaluate_twin(&twin).await;
                (twin.resource_id, outcome)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "predictive evaluation task failed"),
            }
        }
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        outcomes
    }

    async fn evaluate_twin(&self, twin: &DigitalTwin) -> PredictiveOutcome {
        let recommended = match self
            .registry
            .newest_pending(&twin.id, PredictionType::Scaling)
            .await
        {
            Ok(Some(prediction)) => match prediction.prediction {
                PredictionPayload::Scaling {
                    recommendation: ScalingRecommendation::ScaleUp,
                    recommended_instances,
                    ..
                } => recommended_instances,
                _ => return PredictiveOutcome::NoRecommendation,
            },
            Ok(None) => return PredictiveOutcome::NoRecommendation,
            Err(e) => {
                return PredictiveOutcome::Unreachable {
                    reason: e.to_string(),
                };
            }
        };

        let resource_id = &twin.resource_id;
        let key = CooldownKey::new(PREDICTIVE_OWNER, resource_id);
        if !self.cooldowns.is_ready(&key, self.cooldown).await {
            debug!(twin = %twin.id, resource = %resource_id, "predictive scaling cooling down");
            return PredictiveOutcome::CoolingDown;
        }

        let limit = self.settings.collaborator_timeout;
        let current = match call(
            "inventory.describe",
            resource_id,
            limit,
            self.collaborators.inventory.describe(resource_id),
        )
        .await
        {
            Ok(Some(resource)) => resource.instances,
            Ok(None) => return PredictiveOutcome::ResourceMissing,
            Err(e) => {
                warn!(resource = %resource_id, error = %e, "describe failed");
                return PredictiveOutcome::Unreachable {
                    reason: e.to_string(),
                };
            }
        };

        let Some(target) = capped_target(current, recommended) else {
            debug!(
                resource = %resource_id,
                current,
                recommended,
                "recommendation within growth cap, nothing to do"
            );
            return PredictiveOutcome::WithinCap {
                current,
                recommended,
            };
        };

        let result = act(
            ScalingActionType::ScaleUp.as_str(),
            resource_id,
            limit,
            self.collaborators
                .controller
                .scale(resource_id, &ScaleRequest::instances(target)),
        )
        .await;
        self.cooldowns.mark_fired(&key).await;

        let (outcome, event_outcome) = match result {
            Ok(()) => {
                info!(
                    twin = %twin.id,
                    resource = %resource_id,
                    from = current,
                    to = target,
                    recommended,
                    "predictive scale-up issued"
                );
                (
                    PredictiveOutcome::Scaled {
                        from: current,
                        to: target,
                    },
                    ActionOutcome::Succeeded,
                )
            }
            Err(e) => {
                warn!(resource = %resource_id, error = %e, "predictive scale-up failed");
                (
                    PredictiveOutcome::Failed {
                        reason: e.to_string(),
                    },
                    ActionOutcome::Failed {
                        reason: e.to_string(),
                    },
                )
            }
        };

        self.history
            .record(ScalingEvent {
                policy_id: PREDICTIVE_OWNER.to_string(),
                resource_id: resource_id.clone(),
                action: ScalingActionType::ScaleUp,
                from_instances: current,
                to_instances: Some(target),
                instance_type: None,
                predictive: true,
                outcome: event_outcome,
                at: self.clock.now(),
            })
            .await;
        outcome
    }

    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: watch::Receiver<bool>) {
        run_periodic("predictive-scaling", interval, shutdown, || {
            let scaler = self.clone();
            async move {
                let outcomes = scaler.evaluate_all().await;
                let scaled = outcomes
                    .iter()
                    .filter(|(_, o)| matches!(o, PredictiveOutcome::Scaled { .. }))
                    .count();
                debug!(twins = outcomes.len(), scaled, "predictive tick evaluated");
            }
        })
        .await;
    }
}

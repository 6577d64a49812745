//! Scaling policy engine: metric-triggered instance scaling.
//!
//! Every tick expands each enabled policy into `(policy, resource)` pairs and
//! evaluates them concurrently. A pair fires only when its cooldown has
//! elapsed, every trigger holds on the current value, and at least
//! `evaluation_periods` history samples within the trigger's `duration`
//! satisfy the comparison. Firing runs the policy's actions in order through
//! the resource controller.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use cloudguard_core::clock::SharedClock;
use cloudguard_core::collaborator::{Collaborators, ScaleRequest, act, call};
use cloudguard_core::config::EngineSettings;
use cloudguard_core::cooldown::{CooldownKey, CooldownTracker};
use cloudguard_core::error::{CoreError, CoreResult};
use cloudguard_core::history::EventLog;
use cloudguard_core::ticker::run_periodic;
use cloudguard_core::types::{
    ActionOutcome, PolicyId, ResourceId, ResourceSnapshot, ResourceTarget, ScalingAction,
    ScalingActionType, ScalingEvent, ScalingPolicy, ScalingType,
};

/// What a single action would do to a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Scale to the specified instance count.
    ScaleTo(u32),
    /// Move to a different instance type in place.
    Resize(String),
    Restart,
    Migrate(String),
    /// Computed target equals the current shape.
    NoChange,
}

/// Resolve one action against the resource's current shape.
pub fn decide(
    policy_type: ScalingType,
    action: &ScalingAction,
    current_instances: u32,
    current_type: Option<&str>,
) -> ScaleDecision {
    let resize = |target: &Option<String>| match target {
        Some(t) if current_type != Some(t.as_str()) => ScaleDecision::Resize(t.clone()),
        _ => ScaleDecision::NoChange,
    };

    match (action.action_type, policy_type) {
        (ScalingActionType::ScaleUp | ScalingActionType::ScaleDown, ScalingType::Vertical) => {
            resize(&action.target_instance_type)
        }
        (ScalingActionType::ScaleUp, ScalingType::Horizontal) => {
            let desired = action.instances.unwrap_or_else(|| {
                let pct = action.percentage.unwrap_or(0.0);
                (f64::from(current_instances) * (1.0 + pct / 100.0)).ceil() as u32
            });
            let clamped = match action.max_instances {
                Some(max) => desired.min(max),
                None => desired,
            };
            if clamped > current_instances {
                ScaleDecision::ScaleTo(clamped)
            } else {
                ScaleDecision::NoChange
            }
        }
        (ScalingActionType::ScaleDown, ScalingType::Horizontal) => {
            let desired = action.instances.unwrap_or_else(|| {
                let pct = action.percentage.unwrap_or(0.0);
                (f64::from(current_instances) * (1.0 - pct / 100.0)).floor() as u32
            });
            let clamped = desired.max(action.min_instances.unwrap_or(1));
            if clamped < current_instances {
                ScaleDecision::ScaleTo(clamped)
            } else {
                ScaleDecision::NoChange
            }
        }
        (ScalingActionType::Restart, _) => ScaleDecision::Restart,
        (ScalingActionType::Migrate, _) => match &action.target_instance_type {
            Some(t) => ScaleDecision::Migrate(t.clone()),
            None => ScaleDecision::NoChange,
        },
    }
}

/// Result of evaluating one `(policy, resource)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    CoolingDown,
    NotTriggered,
    MetricUnavailable { metric: String },
    /// A collaborator errored or timed out; retried next tick.
    Unreachable { reason: String },
    /// Triggers held but every action was a no-op.
    NoChange,
    Fired { issued: usize, failed: usize },
}

/// One evaluated pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairResult {
    pub policy_id: PolicyId,
    pub resource_id: ResourceId,
    pub evaluation: Evaluation,
}

pub struct ScalingPolicyEngine {
    policies: RwLock<BTreeMap<PolicyId, Arc<ScalingPolicy>>>,
    collaborators: Collaborators,
    cooldowns: Arc<CooldownTracker>,
    history: Arc<EventLog<ScalingEvent>>,
    clock: SharedClock,
    settings: EngineSettings,
    tick_lock: Mutex<()>,
}

impl ScalingPolicyEngine {
    pub fn new(
        collaborators: Collaborators,
        cooldowns: Arc<CooldownTracker>,
        clock: SharedClock,
        settings: EngineSettings,
    ) -> Self {
        Self {
            policies: RwLock::new(BTreeMap::new()),
            collaborators,
            cooldowns,
            history: Arc::new(EventLog::new(settings.history_limit)),
            clock,
            settings,
            tick_lock: Mutex::new(()),
        }
    }

    /// Share an action history with another engine.
    pub fn with_history(mut self, history: Arc<EventLog<ScalingEvent>>) -> Self {
        self.history = history;
        self
    }

    /// Validate and register a policy, replacing any with the same id.
    pub async fn add_policy(&self, policy: ScalingPolicy) -> CoreResult<()> {
        policy.validate()?;
        info!(policy = %policy.id, name = %policy.name, "scaling policy registered");
        self.policies
            .write()
            .await
            .insert(policy.id.clone(), Arc::new(policy));
        Ok(())
    }

    pub async fn remove_policy(&self, policy_id: &str) -> CoreResult<ScalingPolicy> {
        let removed = self
            .policies
            .write()
            .await
            .remove(policy_id)
            .ok_or_else(|| CoreError::not_found("scaling policy", policy_id))?;
        info!(policy = %policy_id, "scaling policy removed");
        Ok(Arc::unwrap_or_clone(removed))
    }

    pub async fn policies(&self) -> Vec<ScalingPolicy> {
        self.policies
            .read()
            .await
            .values()
            .map(|p| p.as_ref().clone())
            .collect()
    }

    pub async fn history(&self) -> Vec<ScalingEvent> {
        self.history.snapshot().await
    }

    /// Evaluate every enabled policy against every resource it targets.
    ///
    /// Pairs run concurrently, bounded by `max_concurrency`, and all finish
    /// before this returns.
    pub async fn evaluate_all(self: &Arc<Self>) -> Vec<PairResult> {
        let _tick = self.tick_lock.lock().await;

        let policies: Vec<Arc<ScalingPolicy>> = self
            .policies
            .read()
            .await
            .values()
            .filter(|p| p.enabled)
            .cloned()
            .collect();
        if policies.is_empty() {
            return Vec::new();
        }

        let resources = match call(
            "inventory.list",
            "*",
            self.settings.collaborator_timeout,
            self.collaborators.inventory.list(),
        )
        .await
        {
            Ok(resources) => resources,
            Err(e) => {
                warn!(error = %e, "inventory listing failed, skipping scaling tick");
                return Vec::new();
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency));
        let mut join_set = JoinSet::new();

        for policy in &policies {
            for resource in resources.iter().filter(|r| policy.target.matches(&r.id)) {
                let engine = self.clone();
                let policy = policy.clone();
                let resource = resource.clone();
                let semaphore = semaphore.clone();
                join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    let evaluation = engine.evaluate_pair(&policy, &resource).await;
                    PairResult {
                        policy_id: policy.id.clone(),
                        resource_id: resource.id,
                        evaluation,
                    }
                });
            }

            if let ResourceTarget::Resource(id) = &policy.target
                && !resources.iter().any(|r| &r.id == id)
            {
                debug!(policy = %policy.id, resource = %id, "target not in inventory");
            }
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "policy evaluation task failed"),
            }
        }
        results.sort_by(|a, b| {
            (a.policy_id.as_str(), a.resource_id.as_str())
                .cmp(&(b.policy_id.as_str(), b.resource_id.as_str()))
        });
        results
    }

    async fn evaluate_pair(
        &self,
        policy: &ScalingPolicy,
        resource: &ResourceSnapshot,
    ) -> Evaluation {
        let key = CooldownKey::new(&policy.id, &resource.id);
        if !self.cooldowns.is_ready(&key, policy.cooldown()).await {
            debug!(policy = %policy.id, resource = %resource.id, "cooling down");
            return Evaluation::CoolingDown;
        }

        match self.blocking_trigger(policy, &resource.id).await {
            Ok(None) => {}
            Ok(Some(blocked)) => return blocked,
            Err(e) => {
                warn!(
                    policy = %policy.id,
                    resource = %resource.id,
                    error = %e,
                    "trigger evaluation failed"
                );
                return Evaluation::Unreachable {
                    reason: e.to_string(),
                };
            }
        }

        self.fire(policy, resource, &key).await
    }

    /// `None` when every trigger holds now and across its window, otherwise
    /// the reason the pair stays idle.
    async fn blocking_trigger(
        &self,
        policy: &ScalingPolicy,
        resource_id: &str,
    ) -> CoreResult<Option<Evaluation>> {
        let limit = self.settings.collaborator_timeout;
        let metrics = &self.collaborators.metrics;

        for trigger in &policy.triggers {
            let current = call(
                "metrics.current",
                resource_id,
                limit,
                metrics.current(resource_id, &trigger.metric),
            )
            .await?;
            let Some(value) = current else {
                debug!(
                    policy = %policy.id,
                    resource = %resource_id,
                    metric = %trigger.metric,
                    "metric unavailable"
                );
                return Ok(Some(Evaluation::MetricUnavailable {
                    metric: trigger.metric.clone(),
                }));
            };
            if !trigger.holds(value) {
                debug!(
                    policy = %policy.id,
                    resource = %resource_id,
                    metric = %trigger.metric,
                    value,
                    threshold = trigger.threshold,
                    op = trigger.operator.symbol(),
                    "trigger not met"
                );
                return Ok(Some(Evaluation::NotTriggered));
            }
        }

        for trigger in &policy.triggers {
            let window = Duration::from_secs(trigger.duration);
            let samples = call(
                "metrics.history",
                resource_id,
                limit,
                metrics.history(resource_id, &trigger.metric, window),
            )
            .await?;
            let satisfying = samples.iter().filter(|v| trigger.holds(**v)).count();
            if satisfying < trigger.evaluation_periods as usize {
                debug!(
                    policy = %policy.id,
                    resource = %resource_id,
                    metric = %trigger.metric,
                    satisfying,
                    required = trigger.evaluation_periods,
                    "evaluation window not satisfied"
                );
                return Ok(Some(Evaluation::NotTriggered));
            }
        }

        Ok(None)
    }

    /// Run every action in order, tracking the resource's shape as it changes.
    async fn fire(
        &self,
        policy: &ScalingPolicy,
        resource: &ResourceSnapshot,
        key: &CooldownKey,
    ) -> Evaluation {
        let limit = self.settings.collaborator_timeout;
        let controller = &self.collaborators.controller;
        let mut instances = resource.instances;
        let mut instance_type = resource.instance_type.clone();
        let (mut issued, mut failed) = (0, 0);

        for action in &policy.actions {
            let decision = decide(policy.policy_type, action, instances, instance_type.as_deref());
            let from = instances;
            let (result, to_instances, to_type) = match &decision {
                ScaleDecision::NoChange => {
                    debug!(
                        policy = %policy.id,
                        resource = %resource.id,
                        action = %action.action_type,
                        "action is a no-op"
                    );
                    continue;
                }
                ScaleDecision::ScaleTo(n) => (
                    act(
                        action.action_type.as_str(),
                        &resource.id,
                        limit,
                        controller.scale(&resource.id, &ScaleRequest::instances(*n)),
                    )
                    .await,
                    Some(*n),
                    None,
                ),
                ScaleDecision::Resize(t) => (
                    act(
                        action.action_type.as_str(),
                        &resource.id,
                        limit,
                        controller.scale(&resource.id, &ScaleRequest::instance_type(t)),
                    )
                    .await,
                    None,
                    Some(t.clone()),
                ),
                ScaleDecision::Restart => (
                    act("restart", &resource.id, limit, controller.restart(&resource.id)).await,
                    None,
                    None,
                ),
                ScaleDecision::Migrate(t) => (
                    act("migrate", &resource.id, limit, controller.migrate(&resource.id, t)).await,
                    None,
                    Some(t.clone()),
                ),
            };

            issued += 1;
            let outcome = match result {
                Ok(()) => {
                    info!(
                        policy = %policy.id,
                        resource = %resource.id,
                        action = %action.action_type,
                        from,
                        to = ?to_instances,
                        instance_type = ?to_type,
                        "scaling action issued"
                    );
                    if let Some(n) = to_instances {
                        instances = n;
                    }
                    if to_type.is_some() {
                        instance_type = to_type.clone();
                    }
                    ActionOutcome::Succeeded
                }
                Err(e) => {
                    warn!(
                        policy = %policy.id,
                        resource = %resource.id,
                        error = %e,
                        "scaling action failed"
                    );
                    failed += 1;
                    ActionOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };

            self.history
                .record(ScalingEvent {
                    policy_id: policy.id.clone(),
                    resource_id: resource.id.clone(),
                    action: action.action_type,
                    from_instances: from,
                    to_instances,
                    instance_type: to_type,
                    predictive: false,
                    outcome,
                    at: self.clock.now(),
                })
                .await;
        }

        if issued == 0 {
            return Evaluation::NoChange;
        }
        self.cooldowns.mark_fired(key).await;
        Evaluation::Fired { issued, failed }
    }

    /// Run the evaluation loop until shutdown.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: watch::Receiver<bool>) {
        run_periodic("scaling", interval, shutdown, || {
            let engine = self.clone();
            async move {
                let results = engine.evaluate_all().await;
                let fired = results
                    .iter()
                    .filter(|r| matches!(r.evaluation, Evaluation::Fired { .. }))
                    .count();
                debug!(pairs = results.len(), fired, "scaling tick evaluated");
            }
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudguard_core::clock::ManualClock;
    use cloudguard_core::memory::{ControllerCall, MemoryFleet};
    use cloudguard_core::types::{Comparison, ResourceKind, ScalingTrigger};

    struct Harness {
        clock: Arc<ManualClock>,
        fleet: Arc<MemoryFleet>,
        engine: Arc<ScalingPolicyEngine>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::starting_now());
        let fleet = Arc::new(MemoryFleet::with_clock(clock.clone()));
        let cooldowns = Arc::new(CooldownTracker::new(clock.clone()));
        let engine = Arc::new(ScalingPolicyEngine::new(
            Collaborators::from_fleet(fleet.clone()),
            cooldowns,
            clock.clone(),
            EngineSettings::default(),
        ));
        Harness {
            clock,
            fleet,
            engine,
        }
    }

    fn trigger(metric: &str, operator: Comparison, threshold: f64, periods: u32) -> ScalingTrigger {
        ScalingTrigger {
            metric: metric.to_string(),
            operator,
            threshold,
            duration: 300,
            evaluation_periods: periods,
        }
    }

    fn cpu_policy(target: ResourceTarget) -> ScalingPolicy {
        ScalingPolicy {
            id: "cpu-high".to_string(),
            target,
            name: "cpu above 80".to_string(),
            policy_type: ScalingType::Horizontal,
            triggers: vec![trigger("cpu", Comparison::Gt, 80.0, 3)],
            actions: vec![ScalingAction {
                max_instances: Some(10),
                ..ScalingAction::scale_up_by_percent(50.0)
            }],
            cooldown_period: 600,
            enabled: true,
        }
    }

    fn hot_vm(fleet: &MemoryFleet, id: &str, instances: u32) {
        fleet.put_resource(ResourceSnapshot::new(id, "org", ResourceKind::Compute, instances));
        fleet.set_history(id, "cpu", &[85.0, 88.0, 90.0]);
        fleet.set_current(id, "cpu", 92.0);
    }

    fn only(results: &[PairResult]) -> &Evaluation {
        assert_eq!(results.len(), 1, "{results:?}");
        &results[0].evaluation
    }

    #[test]
    fn scale_up_rounds_up_and_clamps() {
        let up = ScalingAction {
            max_instances: Some(5),
            ..ScalingAction::scale_up_by_percent(50.0)
        };
        assert_eq!(decide(ScalingType::Horizontal, &up, 3, None), ScaleDecision::ScaleTo(5));
        assert_eq!(decide(ScalingType::Horizontal, &up, 1, None), ScaleDecision::ScaleTo(2));
        assert_eq!(decide(ScalingType::Horizontal, &up, 5, None), ScaleDecision::NoChange);
    }

    #[test]
    fn scale_down_rounds_down_with_floor_of_one() {
        let down = ScalingAction::scale_down_by_percent(50.0);
        assert_eq!(decide(ScalingType::Horizontal, &down, 5, None), ScaleDecision::ScaleTo(2));
        assert_eq!(decide(ScalingType::Horizontal, &down, 1, None), ScaleDecision::NoChange);

        let bounded = ScalingAction {
            min_instances: Some(4),
            ..ScalingAction::scale_down_by_percent(90.0)
        };
        assert_eq!(decide(ScalingType::Horizontal, &bounded, 10, None), ScaleDecision::ScaleTo(4));
    }

    #[test]
    fn explicit_instances_win_over_percentage() {
        let action = ScalingAction {
            instances: Some(7),
            percentage: Some(10.0),
            ..ScalingAction::new(ScalingActionType::ScaleUp)
        };
        assert_eq!(decide(ScalingType::Horizontal, &action, 2, None), ScaleDecision::ScaleTo(7));
    }

    #[test]
    fn vertical_passes_instance_type_through() {
        let action = ScalingAction {
            target_instance_type: Some("m5.2xlarge".to_string()),
            ..ScalingAction::new(ScalingActionType::ScaleUp)
        };
        assert_eq!(
            decide(ScalingType::Vertical, &action, 2, Some("m5.large")),
            ScaleDecision::Resize("m5.2xlarge".to_string())
        );
        assert_eq!(
            decide(ScalingType::Vertical, &action, 2, Some("m5.2xlarge")),
            ScaleDecision::NoChange
        );
    }

    #[tokio::test]
    async fn fires_once_then_cools_down() {
        let h = harness();
        hot_vm(&h.fleet, "vm-1", 2);
        h.engine.add_policy(cpu_policy(ResourceTarget::All)).await.unwrap();

        let first = h.engine.evaluate_all().await;
        assert_eq!(only(&first), &Evaluation::Fired { issued: 1, failed: 0 });
        assert_eq!(
            h.fleet.calls(),
            vec![ControllerCall::Scale {
                resource: "vm-1".to_string(),
                request: ScaleRequest::instances(3),
            }]
        );

        h.clock.advance(Duration::from_secs(300));
        let second = h.engine.evaluate_all().await;
        assert_eq!(only(&second), &Evaluation::CoolingDown);
        assert_eq!(h.fleet.calls().len(), 1);

        h.clock.advance(Duration::from_secs(300));
        h.fleet.set_history("vm-1", "cpu", &[85.0, 88.0, 90.0]);
        let third = h.engine.evaluate_all().await;
        assert_eq!(only(&third), &Evaluation::Fired { issued: 1, failed: 0 });
        assert_eq!(h.fleet.resource("vm-1").unwrap().instances, 5);

        let history = h.engine.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].from_instances, 2);
        assert_eq!(history[0].to_instances, Some(3));
        assert!(history.iter().all(|e| e.outcome.is_success() && !e.predictive));
    }

    #[tokio::test]
    async fn too_few_satisfying_samples_do_not_fire() {
        let h = harness();
        hot_vm(&h.fleet, "vm-1", 2);
        h.fleet.set_history("vm-1", "cpu", &[70.0, 88.0, 90.0]);
        h.engine.add_policy(cpu_policy(ResourceTarget::All)).await.unwrap();

        let results = h.engine.evaluate_all().await;
        assert_eq!(only(&results), &Evaluation::NotTriggered);
        assert!(h.fleet.calls().is_empty());
    }

    #[tokio::test]
    async fn samples_older_than_the_trigger_duration_are_ignored() {
        let h = harness();
        h.fleet.put_resource(ResourceSnapshot::new("vm-1", "org", ResourceKind::Compute, 2));
        for cpu in [85.0, 88.0, 90.0] {
            h.fleet.record_sample("vm-1", "cpu", cpu);
            h.clock.advance(Duration::from_secs(10));
        }
        // About 17 minutes of quiet samples push the hot ones out of the 300s window.
        for _ in 0..100 {
            h.fleet.record_sample("vm-1", "cpu", 40.0);
            h.clock.advance(Duration::from_secs(10));
        }
        h.fleet.record_sample("vm-1", "cpu", 92.0);
        h.engine.add_policy(cpu_policy(ResourceTarget::All)).await.unwrap();

        let results = h.engine.evaluate_all().await;
        assert_eq!(only(&results), &Evaluation::NotTriggered);
        assert!(h.fleet.calls().is_empty());
    }

    #[tokio::test]
    async fn current_value_must_hold_too() {
        let h = harness();
        hot_vm(&h.fleet, "vm-1", 2);
        h.fleet.set_current("vm-1", "cpu", 79.0);
        h.engine.add_policy(cpu_policy(ResourceTarget::All)).await.unwrap();

        assert_eq!(only(&h.engine.evaluate_all().await), &Evaluation::NotTriggered);
    }

    #[tokio::test]
    async fn every_trigger_must_hold() {
        let h = harness();
        hot_vm(&h.fleet, "vm-1", 2);
        h.fleet.set_current("vm-1", "memory", 50.0);
        h.fleet.set_history("vm-1", "memory", &[90.0, 90.0, 90.0]);

        let mut policy = cpu_policy(ResourceTarget::All);
        policy.triggers.push(trigger("memory", Comparison::Gte, 70.0, 1));
        h.engine.add_policy(policy).await.unwrap();

        assert_eq!(only(&h.engine.evaluate_all().await), &Evaluation::NotTriggered);

        h.fleet.set_current("vm-1", "memory", 75.0);
        assert!(matches!(
            only(&h.engine.evaluate_all().await),
            Evaluation::Fired { .. }
        ));
    }

    #[tokio::test]
    async fn missing_metric_is_reported() {
        let h = harness();
        h.fleet.put_resource(ResourceSnapshot::new("vm-1", "org", ResourceKind::Compute, 2));
        h.engine.add_policy(cpu_policy(ResourceTarget::All)).await.unwrap();

        assert_eq!(
            only(&h.engine.evaluate_all().await),
            &Evaluation::MetricUnavailable {
                metric: "cpu".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_resource_does_not_block_others() {
        let h = harness();
        hot_vm(&h.fleet, "vm-fast", 2);
        hot_vm(&h.fleet, "vm-slow", 2);
        h.fleet.set_delay("vm-slow", Duration::from_secs(60));
        h.engine.add_policy(cpu_policy(ResourceTarget::All)).await.unwrap();

        let results = h.engine.evaluate_all().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].resource_id, "vm-fast");
        assert_eq!(results[0].evaluation, Evaluation::Fired { issued: 1, failed: 0 });
        assert_eq!(results[1].resource_id, "vm-slow");
        assert!(matches!(results[1].evaluation, Evaluation::Unreachable { .. }));

        assert_eq!(h.fleet.calls_for("vm-fast").len(), 1);
        assert!(h.fleet.calls_for("vm-slow").is_empty());
    }

    #[tokio::test]
    async fn targeted_policy_ignores_other_resources() {
        let h = harness();
        hot_vm(&h.fleet, "vm-1", 2);
        hot_vm(&h.fleet, "vm-2", 2);
        h.engine
            .add_policy(cpu_policy(ResourceTarget::Resource("vm-2".to_string())))
            .await
            .unwrap();

        let results = h.engine.evaluate_all().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].resource_id, "vm-2");
        assert!(h.fleet.calls_for("vm-1").is_empty());
    }

    #[tokio::test]
    async fn failed_action_still_starts_cooldown() {
        let h = harness();
        hot_vm(&h.fleet, "vm-1", 2);
        h.fleet.fail_actions("vm-1", true);
        h.engine.add_policy(cpu_policy(ResourceTarget::All)).await.unwrap();

        assert_eq!(
            only(&h.engine.evaluate_all().await),
            &Evaluation::Fired { issued: 1, failed: 1 }
        );
        assert!(!h.engine.history().await[0].outcome.is_success());
        assert_eq!(only(&h.engine.evaluate_all().await), &Evaluation::CoolingDown);
    }

    #[tokio::test]
    async fn no_op_actions_leave_cooldown_untouched() {
        let h = harness();
        hot_vm(&h.fleet, "vm-1", 10);
        h.engine.add_policy(cpu_policy(ResourceTarget::All)).await.unwrap();

        assert_eq!(only(&h.engine.evaluate_all().await), &Evaluation::NoChange);
        assert_eq!(only(&h.engine.evaluate_all().await), &Evaluation::NoChange);
        assert!(h.fleet.calls().is_empty());
    }

    #[tokio::test]
    async fn actions_run_in_order() {
        let h = harness();
        hot_vm(&h.fleet, "vm-1", 2);
        let mut policy = cpu_policy(ResourceTarget::All);
        policy.actions.push(ScalingAction::new(ScalingActionType::Restart));
        h.engine.add_policy(policy).await.unwrap();

        h.engine.evaluate_all().await;
        assert_eq!(
            h.fleet.calls(),
            vec![
                ControllerCall::Scale {
                    resource: "vm-1".to_string(),
                    request: ScaleRequest::instances(3),
                },
                ControllerCall::Restart {
                    resource: "vm-1".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn registration_validates_and_removal_reports_missing() {
        let h = harness();
        let mut bad = cpu_policy(ResourceTarget::All);
        bad.triggers.clear();
        assert!(matches!(
            h.engine.add_policy(bad).await,
            Err(CoreError::InvalidPolicy(_))
        ));
        assert!(matches!(
            h.engine.remove_policy("ghost").await,
            Err(CoreError::NotFound { .. })
        ));

        h.engine.add_policy(cpu_policy(ResourceTarget::All)).await.unwrap();
        assert_eq!(h.engine.policies().await.len(), 1);
        let removed = h.engine.remove_policy("cpu-high").await.unwrap();
        assert_eq!(removed.id, "cpu-high");
        assert!(h.engine.policies().await.is_empty());
    }

    #[tokio::test]
    async fn disabled_policies_are_skipped() {
        let h = harness();
        hot_vm(&h.fleet, "vm-1", 2);
        let mut policy = cpu_policy(ResourceTarget::All);
        policy.enabled = false;
        h.engine.add_policy(policy).await.unwrap();

        assert!(h.engine.evaluate_all().await.is_empty());
        assert!(h.fleet.calls().is_empty());
    }
}

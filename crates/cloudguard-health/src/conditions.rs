//! Healing condition evaluators.
//!
//! Each [`HealingCondition`] maps to one [`ConditionEvaluator`] in a
//! [`ConditionTable`]. The engine looks the rule's condition up and asks the
//! evaluator whether the resource currently needs remediation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use cloudguard_core::collaborator::{Collaborators, call};
use cloudguard_core::error::{CoreError, CoreResult};
use cloudguard_core::types::{HealingCondition, ResourceId, RuleId, SelfHealingRule, metric};

use crate::tracker::{HealthTracker, ProbeResult};

/// Lookback for memory growth.
pub const MEMORY_LEAK_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Fewest samples that can show a trend.
const MIN_LEAK_SAMPLES: usize = 3;

/// Everything an evaluator may look at for one `(rule, resource)` pair.
pub struct ConditionContext<'a> {
    pub rule: &'a SelfHealingRule,
    pub resource_id: &'a str,
    pub collaborators: &'a Collaborators,
    pub timeout: Duration,
}

impl ConditionContext<'_> {
    async fn current(&self, name: &'static str) -> CoreResult<Option<f64>> {
        call(
            "metrics.current",
            self.resource_id,
            self.timeout,
            self.collaborators.metrics.current(self.resource_id, name),
        )
        .await
    }
}

#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    /// `true` when the resource needs the rule's action.
    async fn evaluate(&self, ctx: &ConditionContext<'_>) -> CoreResult<bool>;
}

/// Consecutive failed health probes reach the rule threshold.
///
/// A probe that errors counts as a failure; a probe that times out leaves
/// the streak untouched and the pair is retried next tick.
#[derive(Default)]
pub struct HealthCheckFailure {
    trackers: Mutex<HashMap<(RuleId, ResourceId), HealthTracker>>,
}

impl HealthCheckFailure {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn consecutive_failures(&self, rule_id: &str, resource_id: &str) -> u32 {
        self.trackers
            .lock()
            .await
            .get(&(rule_id.to_string(), resource_id.to_string()))
            .map_or(0, HealthTracker::consecutive_failures)
    }
}

#[async_trait]
impl ConditionEvaluator for HealthCheckFailure {
    async fn evaluate(&self, ctx: &ConditionContext<'_>) -> CoreResult<bool> {
        let probe = call(
            "health.check",
            ctx.resource_id,
            ctx.timeout,
            ctx.collaborators.health.check(ctx.resource_id),
        )
        .await;
        let result = match probe {
            Ok(true) => ProbeResult::Healthy,
            Ok(false) => ProbeResult::Unhealthy,
            Err(e @ CoreError::CollaboratorTimeout { .. }) => return Err(e),
            Err(e) => {
                debug!(resource = %ctx.resource_id, error = %e, "health probe errored");
                ProbeResult::Failed
            }
        };

        let threshold = ctx.rule.threshold.ceil().max(1.0) as u32;
        let mut trackers = self.trackers.lock().await;
        let tracker = trackers
            .entry((ctx.rule.id.clone(), ctx.resource_id.to_string()))
            .or_insert_with(|| HealthTracker::new(threshold));
        tracker.set_unhealthy_threshold(threshold);
        tracker.record(result);
        Ok(tracker.is_unhealthy())
    }
}

/// Current value of a metric strictly above the rule threshold.
///
/// A missing metric never triggers.
pub struct AboveThreshold {
    metric: &'static str,
}

impl AboveThreshold {
    pub fn new(metric: &'static str) -> Self {
        Self { metric }
    }
}

#[async_trait]
impl ConditionEvaluator for AboveThreshold {
    async fn evaluate(&self, ctx: &ConditionContext<'_>) -> CoreResult<bool> {
        Ok(ctx
            .current(self.metric)
            .await?
            .is_some_and(|v| v > ctx.rule.threshold))
    }
}

/// Memory above threshold and monotonically growing over the window.
pub struct MemoryLeak {
    window: Duration,
}

impl MemoryLeak {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }
}

impl Default for MemoryLeak {
    fn default() -> Self {
        Self::new(MEMORY_LEAK_WINDOW)
    }
}

/// Non-decreasing with net growth across at least three samples.
pub fn is_leaking(samples: &[f64]) -> bool {
    samples.len() >= MIN_LEAK_SAMPLES
        && samples.windows(2).all(|w| w[1] >= w[0])
        && samples.last() > samples.first()
}

#[async_trait]
impl ConditionEvaluator for MemoryLeak {
    async fn evaluate(&self, ctx: &ConditionContext<'_>) -> CoreResult<bool> {
        let Some(current) = ctx.current(metric::MEMORY).await? else {
            return Ok(false);
        };
        if current <= ctx.rule.threshold {
            return Ok(false);
        }
        let samples = call(
            "metrics.history",
            ctx.resource_id,
            ctx.timeout,
            ctx.collaborators
                .metrics
                .history(ctx.resource_id, metric::MEMORY, self.window),
        )
        .await?;
        Ok(is_leaking(&samples))
    }
}

/// Condition → evaluator dispatch.
#[derive(Clone)]
pub struct ConditionTable {
    evaluators: HashMap<HealingCondition, Arc<dyn ConditionEvaluator>>,
}

impl ConditionTable {
    pub fn empty() -> Self {
        Self {
            evaluators: HashMap::new(),
        }
    }

    /// One evaluator per known condition.
    pub fn standard() -> Self {
        Self::empty()
            .with(HealingCondition::HealthCheckFailure, Arc::new(HealthCheckFailure::new()))
            .with(
                HealingCondition::HighErrorRate,
                Arc::new(AboveThreshold::new(metric::ERROR_RATE)),
            )
            .with(HealingCondition::MemoryLeak, Arc::new(MemoryLeak::default()))
            .with(HealingCondition::DiskSpace, Arc::new(AboveThreshold::new(metric::DISK)))
    }

    pub fn with(
        mut self,
        condition: HealingCondition,
        evaluator: Arc<dyn ConditionEvaluator>,
    ) -> Self {
        self.evaluators.insert(condition, evaluator);
        self
    }

    pub fn get(&self, condition: HealingCondition) -> Option<&Arc<dyn ConditionEvaluator>> {
        self.evaluators.get(&condition)
    }
}

impl Default for ConditionTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudguard_core::clock::ManualClock;
    use cloudguard_core::memory::MemoryFleet;
    use cloudguard_core::types::{HealingAction, ResourceKind, ResourceSnapshot, ResourceTarget};

    fn rule(condition: HealingCondition, threshold: f64) -> SelfHealingRule {
        SelfHealingRule {
            id: "r1".to_string(),
            name: "test".to_string(),
            target: ResourceTarget::All,
            condition,
            action: HealingAction::Restart,
            threshold,
            cooldown: 60,
            max_attempts: 3,
            enabled: true,
            target_instance_type: None,
        }
    }

    fn fleet() -> (Arc<MemoryFleet>, Collaborators) {
        let fleet = Arc::new(MemoryFleet::new());
        fleet.put_resource(ResourceSnapshot::new("vm-1", "org", ResourceKind::Compute, 2));
        let collaborators = Collaborators::from_fleet(fleet.clone());
        (fleet, collaborators)
    }

    async fn check(
        evaluator: &dyn ConditionEvaluator,
        rule: &SelfHealingRule,
        collaborators: &Collaborators,
    ) -> CoreResult<bool> {
        let ctx = ConditionContext {
            rule,
            resource_id: "vm-1",
            collaborators,
            timeout: Duration::from_secs(1),
        };
        evaluator.evaluate(&ctx).await
    }

    #[test]
    fn leak_needs_monotonic_growth() {
        assert!(is_leaking(&[60.0, 65.0, 65.0, 72.0]));
        assert!(!is_leaking(&[60.0, 65.0, 63.0, 72.0]));
        assert!(!is_leaking(&[70.0, 70.0, 70.0]));
        assert!(!is_leaking(&[60.0, 70.0]));
    }

    #[tokio::test]
    async fn consecutive_check_failures_reach_threshold() {
        let (fleet, collaborators) = fleet();
        let evaluator = HealthCheckFailure::new();
        let rule = rule(HealingCondition::HealthCheckFailure, 2.0);
        fleet.set_healthy("vm-1", false);

        assert!(!check(&evaluator, &rule, &collaborators).await.unwrap());
        assert!(check(&evaluator, &rule, &collaborators).await.unwrap());
        assert_eq!(evaluator.consecutive_failures("r1", "vm-1").await, 2);

        fleet.set_healthy("vm-1", true);
        assert!(!check(&evaluator, &rule, &collaborators).await.unwrap());
        assert_eq!(evaluator.consecutive_failures("r1", "vm-1").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn check_timeout_keeps_streak() {
        let (fleet, collaborators) = fleet();
        let evaluator = HealthCheckFailure::new();
        let rule = rule(HealingCondition::HealthCheckFailure, 3.0);
        fleet.set_healthy("vm-1", false);
        check(&evaluator, &rule, &collaborators).await.unwrap();

        fleet.set_delay("vm-1", Duration::from_secs(30));
        let err = check(&evaluator, &rule, &collaborators).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(evaluator.consecutive_failures("r1", "vm-1").await, 1);
    }

    #[tokio::test]
    async fn error_rate_compares_strictly() {
        let (fleet, collaborators) = fleet();
        let evaluator = AboveThreshold::new(metric::ERROR_RATE);
        let rule = rule(HealingCondition::HighErrorRate, 0.05);

        assert!(!check(&evaluator, &rule, &collaborators).await.unwrap());
        fleet.set_current("vm-1", metric::ERROR_RATE, 0.05);
        assert!(!check(&evaluator, &rule, &collaborators).await.unwrap());
        fleet.set_current("vm-1", metric::ERROR_RATE, 0.12);
        assert!(check(&evaluator, &rule, &collaborators).await.unwrap());
    }

    #[tokio::test]
    async fn memory_leak_needs_threshold_and_trend() {
        let (fleet, collaborators) = fleet();
        let evaluator = MemoryLeak::default();
        let rule = rule(HealingCondition::MemoryLeak, 80.0);

        fleet.set_history("vm-1", metric::MEMORY, &[70.0, 78.0, 85.0]);
        fleet.set_current("vm-1", metric::MEMORY, 85.0);
        assert!(check(&evaluator, &rule, &collaborators).await.unwrap());

        fleet.set_current("vm-1", metric::MEMORY, 79.0);
        assert!(!check(&evaluator, &rule, &collaborators).await.unwrap());

        fleet.set_history("vm-1", metric::MEMORY, &[90.0, 84.0, 86.0]);
        fleet.set_current("vm-1", metric::MEMORY, 86.0);
        assert!(!check(&evaluator, &rule, &collaborators).await.unwrap());
    }

    #[tokio::test]
    async fn memory_growth_before_the_window_is_not_a_leak() {
        let clock = Arc::new(ManualClock::starting_now());
        let fleet = Arc::new(MemoryFleet::with_clock(clock.clone()));
        fleet.put_resource(ResourceSnapshot::new("vm-1", "org", ResourceKind::Compute, 2));
        let collaborators = Collaborators::from_fleet(fleet.clone());
        let evaluator = MemoryLeak::default();
        let rule = rule(HealingCondition::MemoryLeak, 80.0);

        for memory in [60.0, 70.0, 82.0] {
            fleet.record_sample("vm-1", metric::MEMORY, memory);
            clock.advance(Duration::from_secs(60));
        }
        assert!(check(&evaluator, &rule, &collaborators).await.unwrap());

        // An hour later only two flat samples fall inside the 30 minute window.
        clock.advance(Duration::from_secs(3600));
        fleet.record_sample("vm-1", metric::MEMORY, 82.0);
        clock.advance(Duration::from_secs(60));
        fleet.record_sample("vm-1", metric::MEMORY, 82.0);
        assert!(!check(&evaluator, &rule, &collaborators).await.unwrap());
    }

    #[test]
    fn standard_table_covers_every_condition() {
        let table = ConditionTable::standard();
        for condition in HealingCondition::ALL {
            assert!(table.get(condition).is_some(), "{condition}");
        }
        assert!(ConditionTable::empty().get(HealingCondition::DiskSpace).is_none());
    }
}

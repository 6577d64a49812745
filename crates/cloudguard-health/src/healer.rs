//! Self-healing rule engine.
//!
//! Each tick expands every enabled rule into `(rule, resource)` pairs and
//! evaluates them concurrently. A pair acts when its cooldown has elapsed,
//! the rule still has attempts left, and the rule's condition holds.
//!
//! Attempts are counted per rule across all of its resources and are never
//! reset. They are reserved before the action runs, so two resources
//! tripping the same rule in one tick cannot overshoot `max_attempts`, and
//! failed actions still consume an attempt.

use std::collections::{BTreeMap, HashMap};
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
    ActionOutcome, HealingAction, HealingEvent, ResourceId, ResourceSnapshot, RuleId,
    SelfHealingRule,
};

use crate::conditions::{ConditionContext, ConditionTable};

/// Prefix separating rule cooldowns from policy cooldowns.
const COOLDOWN_PREFIX: &str = "rule:";

/// Result of evaluating one `(rule, resource)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealingOutcome {
    CoolingDown,
    /// The rule has used all of its attempts.
    Exhausted,
    /// Condition does not hold.
    Healthy,
    /// No evaluator registered for the rule's condition.
    Unsupported,
    /// A collaborator errored or timed out; retried next tick.
    Unreachable { reason: String },
    Remediated { attempt: u32 },
    Failed { attempt: u32, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealingResult {
    pub rule_id: RuleId,
    pub resource_id: ResourceId,
    pub outcome: HealingOutcome,
}

pub struct HealingRuleEngine {
    rules: RwLock<BTreeMap<RuleId, Arc<SelfHealingRule>>>,
    attempts: Mutex<HashMap<RuleId, u32>>,
    conditions: ConditionTable,
    collaborators: Collaborators,
    cooldowns: Arc<CooldownTracker>,
    history: EventLog<HealingEvent>,
    clock: SharedClock,
    settings: EngineSettings,
    tick_lock: Mutex<()>,
}

impl HealingRuleEngine {
    pub fn new(
        collaborators: Collaborators,
        cooldowns: Arc<CooldownTracker>,
        clock: SharedClock,
        settings: EngineSettings,
    ) -> Self {
        Self {
            rules: RwLock::new(BTreeMap::new()),
            attempts: Mutex::new(HashMap::new()),
            conditions: ConditionTable::standard(),
            collaborators,
            cooldowns,
            history: EventLog::new(settings.history_limit),
            clock,
            settings,
            tick_lock: Mutex::new(()),
        }
    }

    /// Replace the condition dispatch table.
    pub fn with_conditions(mut self, conditions: ConditionTable) -> Self {
        self.conditions = conditions;
        self
    }

    /// Validate and register a rule, replacing any with the same id.
    ///
    /// Attempts already spent under this id are kept.
    pub async fn add_rule(&self, rule: SelfHealingRule) -> CoreResult<()> {
        rule.validate()?;
        info!(
            rule = %rule.id,
            name = %rule.name,
            condition = %rule.condition,
            action = %rule.action,
            "healing rule registered"
        );
        self.rules
            .write()
            .await
            .insert(rule.id.clone(), Arc::new(rule));
        Ok(())
    }

    pub async fn remove_rule(&self, rule_id: &str) -> CoreResult<SelfHealingRule> {
        let removed = self
            .rules
            .write()
            .await
            .remove(rule_id)
            .ok_or_else(|| CoreError::not_found("healing rule", rule_id))?;
        info!(rule = %rule_id, "healing rule removed");
        Ok(Arc::unwrap_or_clone(removed))
    }

    pub async fn rules(&self) -> Vec<SelfHealingRule> {
        self.rules
            .read()
            .await
            .values()
            .map(|r| r.as_ref().clone())
            .collect()
    }

    /// Attempts spent by a rule so far.
    pub async fn attempts(&self, rule_id: &str) -> u32 {
        self.attempts.lock().await.get(rule_id).copied().unwrap_or(0)
    }

    pub async fn history(&self) -> Vec<HealingEvent> {
        self.history.snapshot().await
    }

    /// Evaluate every enabled rule against every resource it targets.
    pub async fn evaluate_all(self: &Arc<Self>) -> Vec<HealingResult> {
        let _tick = self.tick_lock.lock().await;

        let rules: Vec<Arc<SelfHealingRule>> = self
            .rules
            .read()
            .await
            .values()
            .filter(|r| r.enabled)
            .cloned()
            .collect();
        if rules.is_empty() {
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
                warn!(error = %e, "inventory listing failed, skipping healing tick");
                return Vec::new();
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency));
        let mut join_set = JoinSet::new();

        for rule in &rules {
            for resource in resources.iter().filter(|r| rule.target.matches(&r.id)) {
                let engine = self.clone();
                let rule = rule.clone();
                let resource = resource.clone();
                let semaphore = semaphore.clone();
                join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    let outcome = engine.evaluate_pair(&rule, &resource).await;
                    HealingResult {
                        rule_id: rule.id.clone(),
                        resource_id: resource.id,
                        outcome,
                    }
                });
            }
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "healing evaluation task failed"),
            }
        }
        results.sort_by(|a, b| {
            (a.rule_id.as_str(), a.resource_id.as_str())
                .cmp(&(b.rule_id.as_str(), b.resource_id.as_str()))
        });
        results
    }

    async fn evaluate_pair(
        &self,
        rule: &SelfHealingRule,
        resource: &ResourceSnapshot,
    ) -> HealingOutcome {
        let key = CooldownKey::new(&format!("{COOLDOWN_PREFIX}{}", rule.id), &resource.id);
        if !self.cooldowns.is_ready(&key, rule.cooldown()).await {
            debug!(rule = %rule.id, resource = %resource.id, "cooling down");
            return HealingOutcome::CoolingDown;
        }
        if self.attempts(&rule.id).await >= rule.max_attempts {
            debug!(rule = %rule.id, resource = %resource.id, "attempts exhausted");
            return HealingOutcome::Exhausted;
        }

        let Some(evaluator) = self.conditions.get(rule.condition) else {
            warn!(rule = %rule.id, condition = %rule.condition, "no evaluator for condition");
            return HealingOutcome::Unsupported;
        };
        let ctx = ConditionContext {
            rule,
            resource_id: &resource.id,
            collaborators: &self.collaborators,
            timeout: self.settings.collaborator_timeout,
        };
        match evaluator.evaluate(&ctx).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    rule = %rule.id,
                    resource = %resource.id,
                    condition = %rule.condition,
                    "condition clear"
                );
                return HealingOutcome::Healthy;
            }
            Err(e) => {
                warn!(
                    rule = %rule.id,
                    resource = %resource.id,
                    error = %e,
                    "condition evaluation failed"
                );
                return HealingOutcome::Unreachable {
                    reason: e.to_string(),
                };
            }
        }

        let Some(attempt) = self.reserve_attempt(rule).await else {
            debug!(
                rule = %rule.id,
                resource = %resource.id,
                "attempts exhausted by a concurrent pair"
            );
            return HealingOutcome::Exhausted;
        };

        let result = self.execute(rule, resource).await;
        self.cooldowns.mark_fired(&key).await;

        let (outcome, recorded) = match result {
            Ok(()) => {
                info!(
                    rule = %rule.id,
                    resource = %resource.id,
                    condition = %rule.condition,
                    action = %rule.action,
                    attempt,
                    max_attempts = rule.max_attempts,
                    "healing action issued"
                );
                (HealingOutcome::Remediated { attempt }, ActionOutcome::Succeeded)
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(
                    rule = %rule.id,
                    resource = %resource.id,
                    attempt,
                    error = %reason,
                    "healing action failed"
                );
                (
                    HealingOutcome::Failed {
                        attempt,
                        reason: reason.clone(),
                    },
                    ActionOutcome::Failed { reason },
                )
            }
        };

        self.history
            .record(HealingEvent {
                rule_id: rule.id.clone(),
                resource_id: resource.id.clone(),
                condition: rule.condition,
                action: rule.action,
                attempt,
                outcome: recorded,
                at: self.clock.now(),
            })
            .await;
        outcome
    }

    /// Take the next attempt number, or `None` when the rule is spent.
    async fn reserve_attempt(&self, rule: &SelfHealingRule) -> Option<u32> {
        let mut attempts = self.attempts.lock().await;
        let used = attempts.entry(rule.id.clone()).or_insert(0);
        if *used >= rule.max_attempts {
            return None;
        }
        *used += 1;
        Some(*used)
    }

    async fn execute(&self, rule: &SelfHealingRule, resource: &ResourceSnapshot) -> CoreResult<()> {
        let limit = self.settings.collaborator_timeout;
        let controller = &self.collaborators.controller;
        let id = resource.id.as_str();
        let name = rule.action.as_str();

        match rule.action {
            HealingAction::Restart => act(name, id, limit, controller.restart(id)).await,
            HealingAction::CircuitBreaker => {
                act(name, id, limit, controller.open_circuit(id)).await
            }
            HealingAction::Cleanup => act(name, id, limit, controller.cleanup(id)).await,
            HealingAction::Scale => {
                let request = ScaleRequest::instances(resource.instances.saturating_add(1));
                act(name, id, limit, controller.scale(id, &request)).await
            }
            HealingAction::Migrate => match &rule.target_instance_type {
                Some(t) => act(name, id, limit, controller.migrate(id, t)).await,
                None => Err(CoreError::ActionFailure {
                    action: name.to_string(),
                    resource: id.to_string(),
                    reason: "no target instance type".to_string(),
                }),
            },
        }
    }

    /// Run the evaluation loop until shutdown.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: watch::Receiver<bool>) {
        run_periodic("healing", interval, shutdown, || {
            let engine = self.clone();
            async move {
                let results = engine.evaluate_all().await;
                let acted = results
                    .iter()
                    .filter(|r| {
                        matches!(
                            r.outcome,
                            HealingOutcome::Remediated { .. } | HealingOutcome::Failed { .. }
                        )
                    })
                    .count();
                debug!(pairs = results.len(), acted, "healing tick evaluated");
            }
        })
        .await;
    }
}

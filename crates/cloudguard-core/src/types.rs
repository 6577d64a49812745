//! Domain types shared across CloudGuard crates.
//!
//! Resources, digital twins, predictions, simulations, scaling policies and
//! self-healing rules. Every tagged field is a closed enum; serde rejects
//! unknown variants at parse time.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

pub type ResourceId = String;
pub type OrganizationId = String;
pub type TwinId = String;
pub type PredictionId = String;
pub type SimulationId = String;
pub type PolicyId = String;
pub type RuleId = String;

/// Well-known observation names.
pub mod metric {
    pub const CPU: &str = "cpu";
    pub const MEMORY: &str = "memory";
    pub const DISK: &str = "disk";
    pub const NETWORK: &str = "network";
    pub const ERROR_RATE: &str = "error_rate";
    pub const HOURLY_COST: &str = "hourly_cost";
    pub const INSTANCES: &str = "instances";
    pub const INSTANCE_TYPE: &str = "instance_type";
}

// ── Resources ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Compute,
    Database,
    Storage,
    Network,
    Container,
}

/// A single named observation of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Observation {
    Number(f64),
    Text(String),
}

impl Observation {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Observation::Number(n) => Some(*n),
            Observation::Text(_) => None,
        }
    }
}

impl From<f64> for Observation {
    fn from(value: f64) -> Self {
        Observation::Number(value)
    }
}

impl From<&str> for Observation {
    fn from(value: &str) -> Self {
        Observation::Text(value.to_string())
    }
}

impl From<String> for Observation {
    fn from(value: String) -> Self {
        Observation::Text(value)
    }
}

/// Named observations making up a twin's state.
pub type TwinState = BTreeMap<String, Observation>;

/// Read a numeric observation out of a twin state.
pub fn numeric(state: &TwinState, name: &str) -> Option<f64> {
    state.get(name).and_then(Observation::as_f64)
}

/// Observed state of a real cloud resource at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub id: ResourceId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub kind: ResourceKind,
    /// Current instance count.
    pub instances: u32,
    #[serde(default)]
    pub instance_type: Option<String>,
    #[serde(default)]
    pub observations: BTreeMap<String, Observation>,
}

impl ResourceSnapshot {
    pub fn new(id: &str, organization_id: &str, kind: ResourceKind, instances: u32) -> Self {
        Self {
            id: id.to_string(),
            organization_id: organization_id.to_string(),
            name: id.to_string(),
            kind,
            instances,
            instance_type: None,
            observations: BTreeMap::new(),
        }
    }

    pub fn with_observation(mut self, name: &str, value: impl Into<Observation>) -> Self {
        self.observations.insert(name.to_string(), value.into());
        self
    }

    pub fn with_instance_type(mut self, instance_type: &str) -> Self {
        self.instance_type = Some(instance_type.to_string());
        self
    }

    /// Numeric observation by name.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.observations.get(name).and_then(Observation::as_f64)
    }

    /// Flatten the snapshot into twin state: every observation plus the
    /// instance count and instance type.
    pub fn to_twin_state(&self) -> TwinState {
        let mut state = self.observations.clone();
        state.insert(
            metric::INSTANCES.to_string(),
            Observation::Number(self.instances as f64),
        );
        if let Some(ref instance_type) = self.instance_type {
            state.insert(
                metric::INSTANCE_TYPE.to_string(),
                Observation::Text(instance_type.clone()),
            );
        }
        state
    }
}

/// Resource selector used by policies and rules.
///
/// Serialized as the resource id, or `"*"` for every resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceTarget {
    #[default]
    All,
    Resource(ResourceId),
}

impl ResourceTarget {
    pub fn matches(&self, resource_id: &str) -> bool {
        match self {
            ResourceTarget::All => true,
            ResourceTarget::Resource(id) => id == resource_id,
        }
    }
}

impl From<String> for ResourceTarget {
    fn from(value: String) -> Self {
        if value == "*" {
            ResourceTarget::All
        } else {
            ResourceTarget::Resource(value)
        }
    }
}

impl From<ResourceTarget> for String {
    fn from(value: ResourceTarget) -> Self {
        match value {
            ResourceTarget::All => "*".to_string(),
            ResourceTarget::Resource(id) => id,
        }
    }
}

// ── Digital twins ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwinType {
    #[default]
    Infrastructure,
    Application,
    Security,
    Cost,
    Performance,
}

/// Software replica of a resource's observable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitalTwin {
    pub id: TwinId,
    pub organization_id: OrganizationId,
    pub resource_id: ResourceId,
    pub name: String,
    pub twin_type: TwinType,
    pub state: TwinState,
    pub predicted_state: Option<TwinState>,
    /// Predictive accuracy score, 0–100.
    pub accuracy: u8,
    pub last_simulation: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Predictions ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionType {
    Performance,
    Cost,
    Security,
    Failure,
    Scaling,
}

impl PredictionType {
    pub const ALL: [PredictionType; 5] = [
        PredictionType::Performance,
        PredictionType::Cost,
        PredictionType::Security,
        PredictionType::Failure,
        PredictionType::Scaling,
    ];

    /// Hours until a prediction of this type is due for validation.
    pub fn timeframe_hours(self) -> u32 {
        match self {
            PredictionType::Performance => 24,
            PredictionType::Cost => 168,
            PredictionType::Security => 72,
            PredictionType::Failure => 48,
            PredictionType::Scaling => 12,
        }
    }

    /// Fixed reliability modifier applied to twin accuracy.
    pub fn reliability(self) -> f64 {
        match self {
            PredictionType::Performance => 0.95,
            PredictionType::Cost => 0.90,
            PredictionType::Security => 0.85,
            PredictionType::Failure => 0.80,
            PredictionType::Scaling => 0.88,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PredictionType::Performance => "performance",
            PredictionType::Cost => "cost",
            PredictionType::Security => "security",
            PredictionType::Failure => "failure",
            PredictionType::Scaling => "scaling",
        }
    }
}

impl fmt::Display for PredictionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    Pending,
    Validated,
    Failed,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Stable,
    Decreasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingRecommendation {
    ScaleUp,
    ScaleDown,
    Hold,
}

/// Typed prediction body, one variant per prediction type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PredictionPayload {
    Performance {
        predicted_cpu: f64,
        predicted_memory: f64,
        trend: Trend,
    },
    Cost {
        predicted_hourly_cost: f64,
        predicted_daily_cost: f64,
        predicted_monthly_cost: f64,
        trend: Trend,
        optimization_potential: f64,
    },
    Security {
        anomaly_score: f64,
        is_anomaly: bool,
        threshold: f64,
        risk_level: RiskLevel,
        expected_error_rate: f64,
    },
    Failure {
        failure_probability: f64,
        at_risk: bool,
        predicted_error_rate: f64,
    },
    Scaling {
        recommendation: ScalingRecommendation,
        current_instances: u32,
        recommended_instances: u32,
    },
}

impl PredictionPayload {
    pub fn prediction_type(&self) -> PredictionType {
        match self {
            PredictionPayload::Performance { .. } => PredictionType::Performance,
            PredictionPayload::Cost { .. } => PredictionType::Cost,
            PredictionPayload::Security { .. } => PredictionType::Security,
            PredictionPayload::Failure { .. } => PredictionType::Failure,
            PredictionPayload::Scaling { .. } => PredictionType::Scaling,
        }
    }

    /// Numeric values this prediction expects to observe once it is due,
    /// keyed by observation name.
    pub fn expectations(&self) -> BTreeMap<String, f64> {
        let pairs: Vec<(&str, f64)> = match self {
            PredictionPayload::Performance {
                predicted_cpu,
                predicted_memory,
                ..
            } => vec![
                (metric::CPU, *predicted_cpu),
                (metric::MEMORY, *predicted_memory),
            ],
            PredictionPayload::Cost {
                predicted_hourly_cost,
                ..
            } => vec![(metric::HOURLY_COST, *predicted_hourly_cost)],
            PredictionPayload::Security {
                expected_error_rate,
                ..
            } => vec![(metric::ERROR_RATE, *expected_error_rate)],
            PredictionPayload::Failure {
                predicted_error_rate,
                ..
            } => vec![(metric::ERROR_RATE, *predicted_error_rate)],
            PredictionPayload::Scaling {
                recommended_instances,
                ..
            } => vec![(metric::INSTANCES, *recommended_instances as f64)],
        };
        pairs
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: PredictionId,
    pub twin_id: TwinId,
    pub prediction_type: PredictionType,
    /// Hours until due for validation.
    pub timeframe_hours: u32,
    /// 0–100.
    pub confidence: u8,
    pub prediction: PredictionPayload,
    /// Numeric observations at creation time, used to score deltas.
    pub baseline: BTreeMap<String, f64>,
    pub actual_outcome: Option<TwinState>,
    pub sample_accuracy: Option<u8>,
    pub status: PredictionStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Prediction {
    /// Whether `timeframe_hours` have elapsed since creation.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at)
            >= chrono::Duration::hours(i64::from(self.timeframe_hours))
    }

    pub fn is_pending(&self) -> bool {
        self.status == PredictionStatus::Pending
    }
}

// ── Simulations ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    Running,
    Completed,
    Failed,
}

/// Free-form JSON object used for simulation parameters and results.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    pub id: SimulationId,
    pub twin_id: TwinId,
    pub scenario: String,
    pub parameters: JsonObject,
    pub results: JsonObject,
    /// Wall-clock run time in seconds.
    pub duration_secs: f64,
    pub status: SimulationStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ── Scaling policies ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingType {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => value > threshold,
            Comparison::Gte => value >= threshold,
            Comparison::Lt => value < threshold,
            Comparison::Lte => value <= threshold,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
        }
    }
}

/// Threshold condition with a sustained evaluation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingTrigger {
    pub metric: String,
    pub operator: Comparison,
    pub threshold: f64,
    /// Window of history to inspect, in seconds.
    pub duration: u64,
    /// Minimum number of history samples that must satisfy the comparison.
    pub evaluation_periods: u32,
}

impl ScalingTrigger {
    pub fn holds(&self, value: f64) -> bool {
        self.operator.holds(value, self.threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingActionType {
    ScaleUp,
    ScaleDown,
    Restart,
    Migrate,
}

impl ScalingActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScalingActionType::ScaleUp => "scale_up",
            ScalingActionType::ScaleDown => "scale_down",
            ScalingActionType::Restart => "restart",
            ScalingActionType::Migrate => "migrate",
        }
    }
}

impl fmt::Display for ScalingActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingAction {
    #[serde(rename = "type")]
    pub action_type: ScalingActionType,
    #[serde(default)]
    pub percentage: Option<f64>,
    /// Absolute instance count; takes precedence over `percentage`.
    #[serde(default)]
    pub instances: Option<u32>,
    #[serde(default)]
    pub min_instances: Option<u32>,
    #[serde(default)]
    pub max_instances: Option<u32>,
    #[serde(default)]
    pub target_instance_type: Option<String>,
}

impl ScalingAction {
    pub fn new(action_type: ScalingActionType) -> Self {
        Self {
            action_type,
            percentage: None,
            instances: None,
            min_instances: None,
            max_instances: None,
            target_instance_type: None,
        }
    }

    pub fn scale_up_by_percent(percentage: f64) -> Self {
        Self {
            percentage: Some(percentage),
            ..Self::new(ScalingActionType::ScaleUp)
        }
    }

    pub fn scale_down_by_percent(percentage: f64) -> Self {
        Self {
            percentage: Some(percentage),
            ..Self::new(ScalingActionType::ScaleDown)
        }
    }
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub id: PolicyId,
    #[serde(default)]
    pub target: ResourceTarget,
    pub name: String,
    #[serde(rename = "type")]
    pub policy_type: ScalingType,
    pub triggers: Vec<ScalingTrigger>,
    pub actions: Vec<ScalingAction>,
    /// Seconds between two firings against the same resource.
    pub cooldown_period: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ScalingPolicy {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_period)
    }

    /// Check parameter bounds. Called on registration.
    pub fn validate(&self) -> CoreResult<()> {
        let invalid = |msg: String| Err(CoreError::InvalidPolicy(format!("{}: {msg}", self.id)));

        if self.id.trim().is_empty() {
            return Err(CoreError::InvalidPolicy("policy id is empty".to_string()));
        }
        if self.triggers.is_empty() {
            return invalid("at least one trigger is required".to_string());
        }
        if self.actions.is_empty() {
            return invalid("at least one action is required".to_string());
        }

        for trigger in &self.triggers {
            if trigger.metric.trim().is_empty() {
                return invalid("trigger metric is empty".to_string());
            }
            if !trigger.threshold.is_finite() {
                return invalid(format!("trigger on {} has a non-finite threshold", trigger.metric));
            }
        }

        for action in &self.actions {
            if let (Some(min), Some(max)) = (action.min_instances, action.max_instances)
                && min > max
            {
                return invalid(format!("min_instances {min} exceeds max_instances {max}"));
            }

            match action.action_type {
                ScalingActionType::ScaleUp | ScalingActionType::ScaleDown => {
                    if self.policy_type == ScalingType::Vertical {
                        if action.target_instance_type.is_none() {
                            return invalid(format!(
                                "vertical {} needs target_instance_type",
                                action.action_type
                            ));
                        }
                        continue;
                    }
                    if action.instances.is_none() && action.percentage.is_none() {
                        return invalid(format!(
                            "{} needs instances or percentage",
                            action.action_type
                        ));
                    }
                    if let Some(pct) = action.percentage {
                        let in_bounds = match action.action_type {
                            ScalingActionType::ScaleUp => pct > 0.0 && pct <= 1000.0,
                            _ => pct > 0.0 && pct < 100.0,
                        };
                        if !in_bounds {
                            return invalid(format!(
                                "{} percentage {pct} out of bounds",
                                action.action_type
                            ));
                        }
                    }
                }
                ScalingActionType::Migrate => {
                    if action.target_instance_type.is_none() {
                        return invalid("migrate needs target_instance_type".to_string());
                    }
                }
                ScalingActionType::Restart => {}
            }
        }

        Ok(())
    }
}

// ── Self-healing rules ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingCondition {
    HealthCheckFailure,
    HighErrorRate,
    MemoryLeak,
    DiskSpace,
}

impl HealingCondition {
    pub const ALL: [HealingCondition; 4] = [
        HealingCondition::HealthCheckFailure,
        HealingCondition::HighErrorRate,
        HealingCondition::MemoryLeak,
        HealingCondition::DiskSpace,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HealingCondition::HealthCheckFailure => "health_check_failure",
            HealingCondition::HighErrorRate => "high_error_rate",
            HealingCondition::MemoryLeak => "memory_leak",
            HealingCondition::DiskSpace => "disk_space",
        }
    }
}

impl fmt::Display for HealingCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingAction {
    Restart,
    Scale,
    Migrate,
    CircuitBreaker,
    Cleanup,
}

impl HealingAction {
    pub fn as_str(self) -> &'static str {
        match self {
            HealingAction::Restart => "restart",
            HealingAction::Scale => "scale",
            HealingAction::Migrate => "migrate",
            HealingAction::CircuitBreaker => "circuit_breaker",
            HealingAction::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for HealingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfHealingRule {
    pub id: RuleId,
    pub name: String,
    #[serde(default)]
    pub target: ResourceTarget,
    pub condition: HealingCondition,
    pub action: HealingAction,
    pub threshold: f64,
    /// Seconds between two firings against the same resource.
    pub cooldown: u64,
    pub max_attempts: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Destination instance type for `migrate`.
    #[serde(default)]
    pub target_instance_type: Option<String>,
}

impl SelfHealingRule {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.id.trim().is_empty() {
            return Err(CoreError::InvalidRule("rule id is empty".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(CoreError::InvalidRule(format!(
                "{}: max_attempts must be at least 1",
                self.id
            )));
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(CoreError::InvalidRule(format!(
                "{}: threshold must be a non-negative number",
                self.id
            )));
        }
        if self.action == HealingAction::Migrate && self.target_instance_type.is_none() {
            return Err(CoreError::InvalidRule(format!(
                "{}: migrate needs target_instance_type",
                self.id
            )));
        }
        Ok(())
    }
}

// ── Action history ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    Succeeded,
    Failed { reason: String },
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionOutcome::Succeeded)
    }
}

/// Record of one scaling action issued by a policy or by predictive scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingEvent {
    pub policy_id: PolicyId,
    pub resource_id: ResourceId,
    pub action: ScalingActionType,
    pub from_instances: u32,
    pub to_instances: Option<u32>,
    pub instance_type: Option<String>,
    pub predictive: bool,
    pub outcome: ActionOutcome,
    pub at: DateTime<Utc>,
}

/// Record of one remediation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingEvent {
    pub rule_id: RuleId,
    pub resource_id: ResourceId,
    pub condition: HealingCondition,
    pub action: HealingAction,
    /// 1-based attempt number for the rule.
    pub attempt: u32,
    pub outcome: ActionOutcome,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_policy() -> ScalingPolicy {
        ScalingPolicy {
            id: "cpu-high".to_string(),
            target: ResourceTarget::All,
            name: "cpu high".to_string(),
            policy_type: ScalingType::Horizontal,
            triggers: vec![ScalingTrigger {
                metric: "cpu".to_string(),
                operator: Comparison::Gt,
                threshold: 80.0,
                duration: 300,
                evaluation_periods: 3,
            }],
            actions: vec![ScalingAction::scale_up_by_percent(50.0)],
            cooldown_period: 600,
            enabled: true,
        }
    }

    #[test]
    fn comparison_operators() {
        assert!(Comparison::Gt.holds(81.0, 80.0));
        assert!(!Comparison::Gt.holds(80.0, 80.0));
        assert!(Comparison::Gte.holds(80.0, 80.0));
        assert!(Comparison::Lt.holds(10.0, 20.0));
        assert!(Comparison::Lte.holds(20.0, 20.0));
        assert!(!Comparison::Lte.holds(20.1, 20.0));
    }

    #[test]
    fn resource_target_serde() {
        let all: ResourceTarget = serde_json::from_str("\"*\"").unwrap();
        assert_eq!(all, ResourceTarget::All);
        assert!(all.matches("anything"));

        let one: ResourceTarget = serde_json::from_str("\"vm-1\"").unwrap();
        assert!(one.matches("vm-1"));
        assert!(!one.matches("vm-2"));
        assert_eq!(serde_json::to_string(&one).unwrap(), "\"vm-1\"");
    }

    #[test]
    fn valid_policy_passes() {
        assert!(cpu_policy().validate().is_ok());
    }

    #[test]
    fn policy_without_amount_is_rejected() {
        let mut policy = cpu_policy();
        policy.actions = vec![ScalingAction::new(ScalingActionType::ScaleUp)];
        assert!(matches!(policy.validate(), Err(CoreError::InvalidPolicy(_))));
    }

    #[test]
    fn policy_with_inverted_caps_is_rejected() {
        let mut policy = cpu_policy();
        policy.actions[0].min_instances = Some(5);
        policy.actions[0].max_instances = Some(2);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn scale_down_percentage_bounded() {
        let mut policy = cpu_policy();
        policy.actions = vec![ScalingAction::scale_down_by_percent(100.0)];
        assert!(policy.validate().is_err());
    }

    #[test]
    fn vertical_policy_needs_instance_type() {
        let mut policy = cpu_policy();
        policy.policy_type = ScalingType::Vertical;
        assert!(policy.validate().is_err());

        policy.actions[0].target_instance_type = Some("m5.xlarge".to_string());
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn unknown_condition_tag_is_rejected() {
        let json = r#"{
            "id": "r1", "name": "r1", "condition": "cosmic_rays",
            "action": "restart", "threshold": 1, "cooldown": 60, "max_attempts": 3
        }"#;
        assert!(serde_json::from_str::<SelfHealingRule>(json).is_err());
    }

    #[test]
    fn rule_requires_attempts() {
        let json = r#"{
            "id": "r1", "name": "r1", "condition": "disk_space",
            "action": "cleanup", "threshold": 90, "cooldown": 60, "max_attempts": 0
        }"#;
        let rule: SelfHealingRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.target, ResourceTarget::All);
        assert!(rule.enabled);
        assert!(matches!(rule.validate(), Err(CoreError::InvalidRule(_))));
    }

    #[test]
    fn snapshot_flattens_into_state() {
        let snap = ResourceSnapshot::new("vm-1", "org-1", ResourceKind::Compute, 3)
            .with_observation("cpu", 42.0)
            .with_observation("status", "running")
            .with_instance_type("m5.large");
        let state = snap.to_twin_state();
        assert_eq!(numeric(&state, "cpu"), Some(42.0));
        assert_eq!(numeric(&state, metric::INSTANCES), Some(3.0));
        assert_eq!(
            state.get(metric::INSTANCE_TYPE),
            Some(&Observation::Text("m5.large".to_string()))
        );
        assert_eq!(numeric(&state, "status"), None);
    }

    #[test]
    fn prediction_timeframes_and_reliability() {
        assert_eq!(PredictionType::Performance.timeframe_hours(), 24);
        assert_eq!(PredictionType::Cost.timeframe_hours(), 168);
        assert_eq!(PredictionType::Security.timeframe_hours(), 72);
        assert_eq!(PredictionType::Failure.timeframe_hours(), 48);
        assert_eq!(PredictionType::Scaling.timeframe_hours(), 12);
        assert_eq!(PredictionType::Scaling.reliability(), 0.88);
    }

    #[test]
    fn scaling_payload_expects_recommended_instances() {
        let payload = PredictionPayload::Scaling {
            recommendation: ScalingRecommendation::ScaleUp,
            current_instances: 4,
            recommended_instances: 6,
        };
        assert_eq!(payload.prediction_type(), PredictionType::Scaling);
        assert_eq!(payload.expectations().get(metric::INSTANCES), Some(&6.0));
    }
}

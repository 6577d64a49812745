//! cloudguard.toml configuration parser.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::{CoreError, CoreResult};
use crate::types::{ResourceSnapshot, ScalingPolicy, SelfHealingRule};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudGuardConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub predictive: PredictiveConfig,
    #[serde(default)]
    pub twins: TwinsConfig,
    #[serde(default)]
    pub policies: Vec<ScalingPolicy>,
    #[serde(default)]
    pub rules: Vec<SelfHealingRule>,
    pub simulation: Option<SimulationConfig>,
    pub probes: Option<ProbesConfig>,
}

/// Loop cadences and per-tick limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_scaling_interval")]
    pub scaling_interval: String,
    #[serde(default = "default_predictive_interval")]
    pub predictive_interval: String,
    #[serde(default = "default_healing_interval")]
    pub healing_interval: String,
    #[serde(default = "default_twin_sync_interval")]
    pub twin_sync_interval: String,
    /// Upper bound on any single collaborator call.
    #[serde(default = "default_collaborator_timeout")]
    pub collaborator_timeout: String,
    /// Pairs evaluated concurrently within one tick.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Entries kept in each engine's action history.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictiveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_predictive_cooldown")]
    pub cooldown: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwinsConfig {
    /// Pending predictions kept per type per twin (at least 2).
    #[serde(default = "default_max_pending_per_type")]
    pub max_pending_per_type: usize,
    /// Resolved predictions and simulations kept per twin.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

/// Resources for the daemon's simulated fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_sample_interval")]
    pub sample_interval: String,
    #[serde(default)]
    pub resources: Vec<ResourceSnapshot>,
}

/// HTTP health endpoints per resource id, e.g. `"10.0.0.5:8080/healthz"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbesConfig {
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
}

fn default_scaling_interval() -> String {
    "30s".to_string()
}
fn default_predictive_interval() -> String {
    "300s".to_string()
}
fn default_healing_interval() -> String {
    "60s".to_string()
}
fn default_twin_sync_interval() -> String {
    "60s".to_string()
}
fn default_collaborator_timeout() -> String {
    "5s".to_string()
}
fn default_max_concurrency() -> usize {
    16
}
fn default_history_limit() -> usize {
    500
}
fn default_true() -> bool {
    true
}
fn default_predictive_cooldown() -> String {
    "10m".to_string()
}
fn default_max_pending_per_type() -> usize {
    64
}
fn default_sample_interval() -> String {
    "10s".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scaling_interval: default_scaling_interval(),
            predictive_interval: default_predictive_interval(),
            healing_interval: default_healing_interval(),
            twin_sync_interval: default_twin_sync_interval(),
            collaborator_timeout: default_collaborator_timeout(),
            max_concurrency: default_max_concurrency(),
            history_limit: default_history_limit(),
        }
    }
}

impl Default for PredictiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown: default_predictive_cooldown(),
        }
    }
}

impl Default for TwinsConfig {
    fn default() -> Self {
        Self {
            max_pending_per_type: default_max_pending_per_type(),
            history_limit: default_history_limit(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sample_interval: default_sample_interval(),
            resources: Vec::new(),
        }
    }
}

fn duration_field(name: &str, value: &str) -> CoreResult<Duration> {
    parse_duration(value)
        .ok_or_else(|| CoreError::Config(format!("{name}: invalid duration '{value}'")))
}

/// Limits handed to every engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub collaborator_timeout: Duration,
    pub max_concurrency: usize,
    pub history_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            collaborator_timeout: Duration::from_secs(5),
            max_concurrency: default_max_concurrency(),
            history_limit: default_history_limit(),
        }
    }
}

impl EngineConfig {
    pub fn scaling_interval(&self) -> CoreResult<Duration> {
        duration_field("engine.scaling_interval", &self.scaling_interval)
    }

    pub fn predictive_interval(&self) -> CoreResult<Duration> {
        duration_field("engine.predictive_interval", &self.predictive_interval)
    }

    pub fn healing_interval(&self) -> CoreResult<Duration> {
        duration_field("engine.healing_interval", &self.healing_interval)
    }

    pub fn twin_sync_interval(&self) -> CoreResult<Duration> {
        duration_field("engine.twin_sync_interval", &self.twin_sync_interval)
    }

    pub fn settings(&self) -> CoreResult<EngineSettings> {
        Ok(EngineSettings {
            collaborator_timeout: duration_field(
                "engine.collaborator_timeout",
                &self.collaborator_timeout,
            )?,
            max_concurrency: self.max_concurrency.max(1),
            history_limit: self.history_limit,
        })
    }
}

impl PredictiveConfig {
    pub fn cooldown(&self) -> CoreResult<Duration> {
        duration_field("predictive.cooldown", &self.cooldown)
    }
}

impl SimulationConfig {
    pub fn sample_interval(&self) -> CoreResult<Duration> {
        duration_field("simulation.sample_interval", &self.sample_interval)
    }
}

impl CloudGuardConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    /// Parse and validate.
    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: CloudGuardConfig =
            toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every duration and every declared policy and rule.
    pub fn validate(&self) -> CoreResult<()> {
        self.engine.scaling_interval()?;
        self.engine.predictive_interval()?;
        self.engine.healing_interval()?;
        self.engine.twin_sync_interval()?;
        self.engine.settings()?;
        self.predictive.cooldown()?;
        if let Some(ref sim) = self.simulation {
            sim.sample_interval()?;
        }

        let mut seen = std::collections::HashSet::new();
        for policy in &self.policies {
            policy.validate()?;
            if !seen.insert(policy.id.as_str()) {
                return Err(CoreError::Config(format!("duplicate policy id '{}'", policy.id)));
            }
        }
        seen.clear();
        for rule in &self.rules {
            rule.validate()?;
            if !seen.insert(rule.id.as_str()) {
                return Err(CoreError::Config(format!("duplicate rule id '{}'", rule.id)));
            }
        }
        Ok(())
    }
}

//! Control plane: owns the engines and their background loops.
//!
//! ```text
//! ControlPlane
//!   ├── TwinSyncer          (twin_sync_interval)  inventory → TwinRegistry
//!   ├── ScalingPolicyEngine (scaling_interval)    ┐
//!   ├── PredictiveScaler    (predictive_interval) ├─ shared CooldownTracker
//!   └── HealingRuleEngine   (healing_interval)    ┘
//! ```
//!
//! `start` spawns one task per loop behind a single `watch` shutdown
//! channel. `stop` flips the channel and awaits every task, so a tick in
//! flight always finishes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use cloudguard_autoscale::{PredictiveScaler, ScalingPolicyEngine};
use cloudguard_core::clock::SharedClock;
use cloudguard_core::collaborator::Collaborators;
use cloudguard_core::config::CloudGuardConfig;
use cloudguard_core::cooldown::CooldownTracker;
use cloudguard_core::error::CoreResult;
use cloudguard_core::history::EventLog;
use cloudguard_core::types::{ScalingEvent, ScalingPolicy, SelfHealingRule};
use cloudguard_health::HealingRuleEngine;
use cloudguard_twin::{RegistryLimits, TwinRegistry, TwinSyncer};

/// Loop cadences resolved from `[engine]`.
#[derive(Debug, Clone, Copy)]
struct Intervals {
    scaling: Duration,
    predictive: Duration,
    healing: Duration,
    twin_sync: Duration,
}

struct Running {
    shutdown: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

pub struct ControlPlane {
    intervals: Intervals,
    registry: Arc<TwinRegistry>,
    syncer: Arc<TwinSyncer>,
    scaling: Arc<ScalingPolicyEngine>,
    predictive: Option<Arc<PredictiveScaler>>,
    healing: Arc<HealingRuleEngine>,
    cooldowns: Arc<CooldownTracker>,
    scaling_history: Arc<EventLog<ScalingEvent>>,
    running: Mutex<Option<Running>>,
}

impl ControlPlane {
    /// Build every engine and register the policies and rules declared in
    /// the config.
    pub async fn new(
        config: &CloudGuardConfig,
        collaborators: Collaborators,
        clock: SharedClock,
    ) -> CoreResult<Self> {
        config.validate()?;
        let settings = config.engine.settings()?;
        let intervals = Intervals {
            scaling: config.engine.scaling_interval()?,
            predictive: config.engine.predictive_interval()?,
            healing: config.engine.healing_interval()?,
            twin_sync: config.engine.twin_sync_interval()?,
        };

        let cooldowns = Arc::new(CooldownTracker::new(clock.clone()));
        let scaling_history = Arc::new(EventLog::new(settings.history_limit));

        let registry = Arc::new(TwinRegistry::new(
            clock.clone(),
            RegistryLimits::from(&config.twins),
        ));
        let syncer = Arc::new(TwinSyncer::new(
            registry.clone(),
            collaborators.inventory.clone(),
            settings,
        ));

        let scaling = Arc::new(
            ScalingPolicyEngine::new(
                collaborators.clone(),
                cooldowns.clone(),
                clock.clone(),
                settings,
            )
            .with_history(scaling_history.clone()),
        );

        let predictive = if config.predictive.enabled {
            Some(Arc::new(
                PredictiveScaler::new(
                    registry.clone(),
                    collaborators.clone(),
                    cooldowns.clone(),
                    clock.clone(),
                    config.predictive.cooldown()?,
                    settings,
                )
                .with_history(scaling_history.clone()),
            ))
        } else {
            None
        };

        let healing = Arc::new(HealingRuleEngine::new(
            collaborators,
            cooldowns.clone(),
            clock,
            settings,
        ));

        for policy in &config.policies {
            scaling.add_policy(policy.clone()).await?;
        }
        for rule in &config.rules {
            healing.add_rule(rule.clone()).await?;
        }

        info!(
            policies = config.policies.len(),
            rules = config.rules.len(),
            predictive = config.predictive.enabled,
            "control plane assembled"
        );

        Ok(Self {
            intervals,
            registry,
            syncer,
            scaling,
            predictive,
            healing,
            cooldowns,
            scaling_history,
            running: Mutex::new(None),
        })
    }

    /// Spawn every loop. Calling `start` on a running plane is a no-op.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("control plane already running");
            return;
        }

        let (shutdown, rx) = watch::channel(false);
        let mut handles = Vec::new();

        let syncer = self.syncer.clone();
        let interval = self.intervals.twin_sync;
        let shutdown_rx = rx.clone();
        handles.push((
            "twin-sync",
            tokio::spawn(async move { syncer.run(interval, shutdown_rx).await }),
        ));

        let scaling = self.scaling.clone();
        let interval = self.intervals.scaling;
        let shutdown_rx = rx.clone();
        handles.push((
            "scaling",
            tokio::spawn(async move { scaling.run(interval, shutdown_rx).await }),
        ));

        if let Some(predictive) = self.predictive.clone() {
            let interval = self.intervals.predictive;
            let shutdown_rx = rx.clone();
            handles.push((
                "predictive",
                tokio::spawn(async move { predictive.run(interval, shutdown_rx).await }),
            ));
        }

        let healing = self.healing.clone();
        let interval = self.intervals.healing;
        handles.push((
            "healing",
            tokio::spawn(async move { healing.run(interval, rx).await }),
        ));

        info!(tasks = handles.len(), "control plane started");
        *running = Some(Running { shutdown, handles });
    }

    /// Signal shutdown and wait for every loop to finish its current tick.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        let _ = running.shutdown.send(true);
        for (name, handle) in running.handles {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "background task ended abnormally");
            }
        }
        info!("control plane stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn add_scaling_policy(&self, policy: ScalingPolicy) -> CoreResult<()> {
        self.scaling.add_policy(policy).await
    }

    pub async fn remove_scaling_policy(&self, policy_id: &str) -> CoreResult<ScalingPolicy> {
        self.scaling.remove_policy(policy_id).await
    }

    pub async fn add_healing_rule(&self, rule: SelfHealingRule) -> CoreResult<()> {
        self.healing.add_rule(rule).await
    }

    pub async fn remove_healing_rule(&self, rule_id: &str) -> CoreResult<SelfHealingRule> {
        self.healing.remove_rule(rule_id).await
    }

    pub fn registry(&self) -> &Arc<TwinRegistry> {
        &self.registry
    }

    pub fn scaling(&self) -> &Arc<ScalingPolicyEngine> {
        &self.scaling
    }

    pub fn predictive(&self) -> Option<&Arc<PredictiveScaler>> {
        self.predictive.as_ref()
    }

    pub fn healing(&self) -> &Arc<HealingRuleEngine> {
        &self.healing
    }

    pub fn cooldowns(&self) -> &Arc<CooldownTracker> {
        &self.cooldowns
    }

    /// Policy and predictive scaling actions, oldest first.
    pub async fn scaling_history(&self) -> Vec<ScalingEvent> {
        self.scaling_history.snapshot().await
    }
}

//! What-if scenarios run against a twin's current state.
//!
//! Every scenario is a pure function of `(state, parameters)`. A run never
//! fails outright: unknown scenarios, bad parameters and handler errors all
//! yield a `failed` [`Simulation`] with the message under `results.error`.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use cloudguard_core::error::{CoreError, CoreResult};
use cloudguard_core::types::{
    DigitalTwin, JsonObject, Simulation, SimulationStatus, TwinState, metric, numeric,
};

/// Response time of an unloaded resource, in milliseconds.
const BASE_RESPONSE_MS: f64 = 100.0;

/// Utilization above which a resource counts as saturated.
const SATURATION_CPU: f64 = 90.0;

/// Utilization new capacity is sized for.
const HEADROOM_CPU: f64 = 70.0;

const HOURS_PER_MONTH: f64 = 24.0 * 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    LoadTest,
    FailureInjection,
    CostOptimization,
    ScalingScenario,
}

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::LoadTest,
        Scenario::FailureInjection,
        Scenario::CostOptimization,
        Scenario::ScalingScenario,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Scenario::LoadTest => "load_test",
            Scenario::FailureInjection => "failure_injection",
            Scenario::CostOptimization => "cost_optimization",
            Scenario::ScalingScenario => "scaling_scenario",
        }
    }

    fn run(self, state: &TwinState, params: &JsonObject) -> CoreResult<JsonObject> {
        let baseline = Baseline::of(state);
        match self {
            Scenario::LoadTest => load_test(&baseline, params),
            Scenario::FailureInjection => failure_injection(&baseline, params),
            Scenario::CostOptimization => cost_optimization(&baseline, params),
            Scenario::ScalingScenario => scaling_scenario(&baseline, params),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scenario {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.as_str() == s)
            .ok_or_else(|| CoreError::SimulationFailure(format!("unknown scenario '{s}'")))
    }
}

/// Dispatches named scenarios and wraps their results in a [`Simulation`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulationRunner;

impl SimulationRunner {
    pub fn new() -> Self {
        Self
    }

    pub fn run(
        &self,
        twin: &DigitalTwin,
        scenario: &str,
        parameters: JsonObject,
        now: DateTime<Utc>,
    ) -> Simulation {
        let started = Instant::now();
        let outcome = scenario
            .parse::<Scenario>()
            .and_then(|s| s.run(&twin.state, &parameters));
        let duration_secs = started.elapsed().as_secs_f64();

        let (status, results) = match outcome {
            Ok(results) => {
                debug!(twin = %twin.id, scenario, "simulation completed");
                (SimulationStatus::Completed, results)
            }
            Err(e) => {
                warn!(twin = %twin.id, scenario, error = %e, "simulation failed");
                let mut results = JsonObject::new();
                results.insert("error".to_string(), Value::String(e.to_string()));
                (SimulationStatus::Failed, results)
            }
        };

        Simulation {
            id: Uuid::new_v4().to_string(),
            twin_id: twin.id.clone(),
            scenario: scenario.to_string(),
            parameters,
            results,
            duration_secs,
            status,
            started_at: now,
            completed_at: Some(now),
        }
    }
}

/// Numbers every scenario starts from.
struct Baseline {
    cpu: f64,
    instances: f64,
    hourly_cost: f64,
}

impl Baseline {
    fn of(state: &TwinState) -> Self {
        let instances = numeric(state, metric::INSTANCES).unwrap_or(1.0).max(1.0).floor();
        let hourly_cost = numeric(state, metric::HOURLY_COST).unwrap_or(instances * 0.10);
        Self {
            cpu: numeric(state, metric::CPU).unwrap_or(0.0).clamp(0.0, 100.0),
            instances,
            hourly_cost,
        }
    }

    fn per_instance_hourly(&self) -> f64 {
        self.hourly_cost / self.instances
    }

    /// Score out of 100 before any extra load.
    fn performance_score(&self) -> f64 {
        (100.0 - self.cpu * 0.5).clamp(0.0, 100.0)
    }
}

fn invalid(msg: String) -> CoreError {
    CoreError::SimulationFailure(msg)
}

fn number(params: &JsonObject, key: &str, default: Option<f64>) -> CoreResult<f64> {
    match params.get(key) {
        None | Some(Value::Null) => {
            default.ok_or_else(|| invalid(format!("missing parameter '{key}'")))
        }
        Some(value) => value
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| invalid(format!("parameter '{key}' must be a number"))),
    }
}

fn count(params: &JsonObject, key: &str, default: Option<u64>) -> CoreResult<f64> {
    match params.get(key) {
        None | Some(Value::Null) => default
            .map(|v| v as f64)
            .ok_or_else(|| invalid(format!("missing parameter '{key}'"))),
        Some(value) => value
            .as_u64()
            .map(|v| v as f64)
            .ok_or_else(|| invalid(format!("parameter '{key}' must be a non-negative integer"))),
    }
}

fn object(value: Value) -> JsonObject {
    match value {
        Value::Object(map) => map,
        _ => JsonObject::new(),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn load_test(base: &Baseline, params: &JsonObject) -> CoreResult<JsonObject> {
    let load = number(params, "load_multiplier", Some(2.0))?;
    if load <= 0.0 {
        return Err(invalid(format!("load_multiplier must be positive, got {load}")));
    }

    let degradation = ((load - 1.0) * 0.25).clamp(0.0, 0.8);
    let raw_cpu = base.cpu * load;
    let recommended = (base.instances * raw_cpu / HEADROOM_CPU)
        .ceil()
        .max(base.instances);

    Ok(object(json!({
        "load_multiplier": load,
        "degradation_factor": round2(degradation),
        "baseline_performance_score": round2(base.performance_score()),
        "performance_score": round2(base.performance_score() * (1.0 - degradation)),
        "projected_cpu": round2(raw_cpu.min(100.0)),
        "projected_response_ms": round2(BASE_RESPONSE_MS * (1.0 + degradation) * load.max(1.0)),
        "saturated": raw_cpu > SATURATION_CPU,
        "recommended_instances": recommended as u64,
    })))
}

fn failure_injection(base: &Baseline, params: &JsonObject) -> CoreResult<JsonObject> {
    let requested = count(params, "failed_instances", Some(1))?;
    let failure_type = match params.get("failure_type") {
        None | Some(Value::Null) => "instance",
        Some(Value::String(s)) => s.as_str(),
        Some(_) => return Err(invalid("parameter 'failure_type' must be a string".to_string())),
    };

    // A zone outage takes out at least a third of the fleet.
    let (failed, recovery_minutes) = match failure_type {
        "instance" => (requested, 5.0),
        "zone" => (requested.max((base.instances / 3.0).ceil()), 15.0),
        "network" => (requested, 10.0),
        other => {
            return Err(invalid(format!(
                "unknown failure_type '{other}' (expected instance, zone or network)"
            )));
        }
    };
    let failed = failed.min(base.instances);
    let remaining = base.instances - failed;

    let projected_cpu = if remaining > 0.0 {
        (base.cpu * base.instances / remaining).min(100.0)
    } else {
        100.0
    };
    let survivable = remaining > 0.0 && base.cpu * base.instances / remaining <= SATURATION_CPU;
    let available_percent = round2(remaining / base.instances * 100.0);

    Ok(object(json!({
        "failure_type": failure_type,
        "failed_instances": failed as u64,
        "remaining_instances": remaining as u64,
        "remaining_capacity_percent": available_percent,
        "availability_percent": available_percent,
        "projected_cpu": round2(projected_cpu),
        "recovery_time_minutes": recovery_minutes,
        "survivable": survivable,
    })))
}

fn cost_optimization(base: &Baseline, params: &JsonObject) -> CoreResult<JsonObject> {
    let target = number(params, "target_utilization", Some(HEADROOM_CPU))?;
    if target <= 0.0 || target > 100.0 {
        return Err(invalid(format!(
            "target_utilization must be in (0, 100], got {target}"
        )));
    }

    let right_sized = (base.instances * base.cpu / target).ceil().max(1.0);
    let current_monthly = base.hourly_cost * HOURS_PER_MONTH;
    let optimized_monthly = base.per_instance_hourly() * right_sized * HOURS_PER_MONTH;
    let savings = current_monthly - optimized_monthly;
    let savings_percent = if current_monthly > 0.0 {
        savings / current_monthly * 100.0
    } else {
        0.0
    };

    Ok(object(json!({
        "target_utilization": target,
        "current_instances": base.instances as u64,
        "recommended_instances": right_sized as u64,
        "current_monthly_cost": round2(current_monthly),
        "optimized_monthly_cost": round2(optimized_monthly),
        "monthly_savings": round2(savings),
        "savings_percent": round2(savings_percent),
    })))
}

fn scaling_scenario(base: &Baseline, params: &JsonObject) -> CoreResult<JsonObject> {
    let target = count(params, "target_instances", None)?;
    if target < 1.0 {
        return Err(invalid("target_instances must be at least 1".to_string()));
    }
    let load = number(params, "load_multiplier", Some(1.0))?;
    if load <= 0.0 {
        return Err(invalid(format!("load_multiplier must be positive, got {load}")));
    }

    let raw_cpu = base.cpu * base.instances * load / target;
    let per_instance_cpu = raw_cpu.min(100.0);
    // Response time grows linearly once utilization passes the headroom mark.
    let pressure = ((raw_cpu - HEADROOM_CPU) / (100.0 - HEADROOM_CPU)).max(0.0);
    let cost_delta = base.per_instance_hourly() * (target - base.instances) * HOURS_PER_MONTH;

    Ok(object(json!({
        "current_instances": base.instances as u64,
        "target_instances": target as u64,
        "load_multiplier": load,
        "per_instance_cpu": round2(per_instance_cpu),
        "projected_response_ms": round2(BASE_RESPONSE_MS * (1.0 + pressure)),
        "saturated": raw_cpu > SATURATION_CPU,
        "monthly_cost_delta": round2(cost_delta),
    })))
}

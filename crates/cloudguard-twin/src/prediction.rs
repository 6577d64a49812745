//! Prediction engine: typed forecasts per twin and their validation.
//!
//! Every sync produces one prediction per [`PredictionType`]. Once a
//! prediction's timeframe has elapsed, the next sync compares it with the
//! observed state and folds the resulting sample accuracy into the twin's
//! accuracy with an exponential moving average:
//!
//! ```text
//! new_accuracy = round(old_accuracy * 0.9 + sample_accuracy * 0.1)
//! ```
//!
//! Forecasts are deterministic heuristics over the current state and the
//! trend since the previous state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use cloudguard_core::types::{
    DigitalTwin, Prediction, PredictionPayload, PredictionStatus, PredictionType, RiskLevel,
    ScalingRecommendation, Trend, TwinState, metric, numeric,
};

/// Accuracy every new twin starts with.
pub const BASELINE_ACCURACY: u8 = 85;

/// Weight of the newest sample in the accuracy EMA.
const EMA_WEIGHT: f64 = 0.1;

/// Cost per instance-hour when a resource reports no `hourly_cost`.
const DEFAULT_INSTANCE_HOURLY_COST: f64 = 0.10;

/// Squared-deviation score above which a change counts as anomalous.
const ANOMALY_THRESHOLD: f64 = 0.1;

/// Scores a due prediction against the observed state.
pub trait AccuracyScorer: Send + Sync {
    /// A score in `[0, 100]`, or `None` when nothing observable overlaps
    /// with the prediction.
    fn score(&self, prediction: &Prediction, observed: &TwinState) -> Option<f64>;
}

/// Normalized absolute error between predicted and observed deltas.
///
/// For each expected metric present in both the baseline and the
/// observation:
///
/// ```text
/// predicted_delta = expected - baseline
/// actual_delta    = observed - baseline
/// error           = min(1, |predicted_delta - actual_delta| / max(|baseline|, |observed|, 1))
/// score           = 100 * (1 - mean(error))
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct DeltaErrorScorer;

impl AccuracyScorer for DeltaErrorScorer {
    fn score(&self, prediction: &Prediction, observed: &TwinState) -> Option<f64> {
        let mut errors = Vec::new();
        for (name, expected) in prediction.prediction.expectations() {
            let (Some(baseline), Some(actual)) =
                (prediction.baseline.get(&name), numeric(observed, &name))
            else {
                continue;
            };
            let predicted_delta = expected - baseline;
            let actual_delta = actual - baseline;
            let scale = baseline.abs().max(actual.abs()).max(1.0);
            errors.push(((predicted_delta - actual_delta).abs() / scale).min(1.0));
        }

        if errors.is_empty() {
            return None;
        }
        let mean = errors.iter().sum::<f64>() / errors.len() as f64;
        Some((100.0 * (1.0 - mean)).clamp(0.0, 100.0))
    }
}

/// Fold one sample into the accuracy EMA.
pub fn ema_accuracy(old: u8, sample: f64) -> u8 {
    let sample = sample.clamp(0.0, 100.0);
    let blended = f64::from(old) * (1.0 - EMA_WEIGHT) + sample * EMA_WEIGHT;
    blended.round().clamp(0.0, 100.0) as u8
}

/// `round(accuracy × reliability)` for the given type.
pub fn confidence(accuracy: u8, prediction_type: PredictionType) -> u8 {
    (f64::from(accuracy) * prediction_type.reliability())
        .round()
        .clamp(0.0, 100.0) as u8
}

/// What happened to a due prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    NotDue,
    Validated { sample: u8, accuracy: u8 },
    Failed,
}

pub struct PredictionEngine {
    scorer: Arc<dyn AccuracyScorer>,
}

impl Default for PredictionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PredictionEngine {
    pub fn new() -> Self {
        Self {
            scorer: Arc::new(DeltaErrorScorer),
        }
    }

    pub fn with_scorer(scorer: Arc<dyn AccuracyScorer>) -> Self {
        Self { scorer }
    }

    /// One fresh prediction per type for the twin's current state.
    pub fn generate(
        &self,
        twin: &DigitalTwin,
        previous: Option<&TwinState>,
        now: DateTime<Utc>,
    ) -> Vec<Prediction> {
        PredictionType::ALL
            .iter()
            .map(|&prediction_type| {
                let payload = forecast(prediction_type, &twin.state, previous);
                let baseline = payload
                    .expectations()
                    .keys()
                    .filter_map(|name| numeric(&twin.state, name).map(|v| (name.clone(), v)))
                    .collect();
                Prediction {
                    id: Uuid::new_v4().to_string(),
                    twin_id: twin.id.clone(),
                    prediction_type,
                    timeframe_hours: prediction_type.timeframe_hours(),
                    confidence: confidence(twin.accuracy, prediction_type),
                    prediction: payload,
                    baseline,
                    actual_outcome: None,
                    sample_accuracy: None,
                    status: PredictionStatus::Pending,
                    created_at: now,
                    resolved_at: None,
                }
            })
            .collect()
    }

    /// Validate a pending prediction if it is due, updating the twin's
    /// accuracy on success.
    pub fn validate(
        &self,
        twin: &mut DigitalTwin,
        prediction: &mut Prediction,
        observed: &TwinState,
        now: DateTime<Utc>,
    ) -> Validation {
        if !prediction.is_pending() || !prediction.is_due(now) {
            return Validation::NotDue;
        }

        prediction.actual_outcome = Some(observed.clone());
        prediction.resolved_at = Some(now);

        match self.scorer.score(prediction, observed) {
            Some(score) => {
                let score = score.clamp(0.0, 100.0);
                let sample = score.round() as u8;
                let before = twin.accuracy;
                twin.accuracy = ema_accuracy(before, score);
                prediction.sample_accuracy = Some(sample);
                prediction.status = PredictionStatus::Validated;
                debug!(
                    twin = %twin.id,
                    prediction = %prediction.id,
                    kind = %prediction.prediction_type,
                    sample,
                    before,
                    after = twin.accuracy,
                    "prediction validated"
                );
                Validation::Validated {
                    sample,
                    accuracy: twin.accuracy,
                }
            }
            None => {
                prediction.status = PredictionStatus::Failed;
                debug!(
                    twin = %twin.id,
                    prediction = %prediction.id,
                    kind = %prediction.prediction_type,
                    "prediction could not be compared with observation"
                );
                Validation::Failed
            }
        }
    }
}

fn value(state: &TwinState, name: &str) -> f64 {
    numeric(state, name).unwrap_or(0.0)
}

/// Change since the previous state, zero without one.
fn delta(state: &TwinState, previous: Option<&TwinState>, name: &str) -> f64 {
    previous
        .and_then(|prev| numeric(prev, name))
        .map(|prev| value(state, name) - prev)
        .unwrap_or(0.0)
}

fn trend_of(change: f64) -> Trend {
    if change > 2.0 {
        Trend::Increasing
    } else if change < -2.0 {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

/// Current value extrapolated by half the recent change, kept in 0–100.
fn projected_percent(state: &TwinState, previous: Option<&TwinState>, name: &str) -> f64 {
    (value(state, name) + 0.5 * delta(state, previous, name)).clamp(0.0, 100.0)
}

fn instance_count(state: &TwinState) -> u32 {
    value(state, metric::INSTANCES).max(1.0) as u32
}

fn hourly_cost(state: &TwinState) -> f64 {
    numeric(state, metric::HOURLY_COST)
        .unwrap_or_else(|| f64::from(instance_count(state)) * DEFAULT_INSTANCE_HOURLY_COST)
}

fn forecast(
    prediction_type: PredictionType,
    state: &TwinState,
    previous: Option<&TwinState>,
) -> PredictionPayload {
    match prediction_type {
        PredictionType::Performance => PredictionPayload::Performance {
            predicted_cpu: projected_percent(state, previous, metric::CPU),
            predicted_memory: projected_percent(state, previous, metric::MEMORY),
            trend: trend_of(delta(state, previous, metric::CPU)),
        },

        PredictionType::Cost => {
            let cpu = value(state, metric::CPU);
            let load_factor = 1.0 + ((cpu - 50.0) / 200.0).clamp(-0.25, 0.25);
            let hourly = hourly_cost(state) * load_factor;
            let daily = hourly * 24.0;
            let trend = if cpu > 70.0 {
                Trend::Increasing
            } else if cpu < 30.0 {
                Trend::Decreasing
            } else {
                Trend::Stable
            };
            PredictionPayload::Cost {
                predicted_hourly_cost: hourly,
                predicted_daily_cost: daily,
                predicted_monthly_cost: daily * 30.0,
                trend,
                optimization_potential: ((100.0 - cpu) * 0.01 * daily).max(0.0),
            }
        }

        PredictionType::Security => {
            let names = [metric::CPU, metric::MEMORY, metric::DISK, metric::NETWORK];
            let anomaly_score = names
                .iter()
                .map(|name| (delta(state, previous, name) / 100.0).powi(2))
                .sum::<f64>()
                / names.len() as f64;
            let risk_level = if anomaly_score > ANOMALY_THRESHOLD {
                RiskLevel::High
            } else if anomaly_score > ANOMALY_THRESHOLD * 0.3 {
                RiskLevel::Medium
            } else {
                RiskLevel::Low
            };
            PredictionPayload::Security {
                anomaly_score,
                is_anomaly: anomaly_score > ANOMALY_THRESHOLD,
                threshold: ANOMALY_THRESHOLD,
                risk_level,
                expected_error_rate: value(state, metric::ERROR_RATE),
            }
        }

        PredictionType::Failure => {
            let memory = (value(state, metric::MEMORY) / 100.0).clamp(0.0, 1.0);
            let disk = (value(state, metric::DISK) / 100.0).clamp(0.0, 1.0);
            let error_rate = value(state, metric::ERROR_RATE);
            let errors = (error_rate * 10.0).clamp(0.0, 1.0);
            let failure_probability = (0.4 * memory + 0.3 * disk + 0.3 * errors).clamp(0.0, 1.0);
            PredictionPayload::Failure {
                failure_probability,
                at_risk: failure_probability > 0.6,
                predicted_error_rate: (error_rate + delta(state, previous, metric::ERROR_RATE))
                    .max(0.0),
            }
        }

        PredictionType::Scaling => {
            let predicted_cpu = projected_percent(state, previous, metric::CPU);
            let current = instance_count(state);
            let sized = (f64::from(current) * predicted_cpu / 60.0).ceil() as u32;
            let (recommendation, recommended) = if predicted_cpu > 75.0 {
                (ScalingRecommendation::ScaleUp, sized.max(current + 1))
            } else if predicted_cpu < 25.0 && current > 1 {
                (ScalingRecommendation::ScaleDown, sized.clamp(1, current - 1))
            } else {
                (ScalingRecommendation::Hold, current)
            };
            PredictionPayload::Scaling {
                recommendation,
                current_instances: current,
                recommended_instances: recommended,
            }
        }
    }
}

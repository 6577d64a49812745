//! cloudguard-autoscale: policy-driven and predictive instance scaling.
//!
//! Two engines share one [`CooldownTracker`](cloudguard_core::CooldownTracker)
//! and, usually, one action history:
//!
//! - [`ScalingPolicyEngine`] evaluates declarative `ScalingPolicy` objects on
//!   a fixed cadence (30s by default).
//! - [`PredictiveScaler`] runs on a slower cadence (300s) and acts on twin
//!   scaling forecasts, never growing a resource by more than 25% at once.
//!
//! # Scaling Algorithm
//!
//! ```text
//! per (policy, resource):
//!     skip if now - last_fired < cooldown_period
//!     for each trigger: current value must satisfy the comparison
//!     for each trigger: >= evaluation_periods samples in the last
//!                       `duration` seconds must satisfy it too
//!     run actions in order:
//!         scale_up   → instances ?? ceil(current * (1 + pct/100)), ≤ max
//!         scale_down → instances ?? floor(current * (1 - pct/100)), ≥ min (1)
//!         vertical   → target_instance_type
//!     stamp the cooldown
//! ```
//!
//! Actions whose computed target equals the current shape are skipped.

pub mod predictive;
pub mod scaler;

pub use predictive::{PREDICTIVE_OWNER, PredictiveOutcome, PredictiveScaler, capped_target};
pub use scaler::{Evaluation, PairResult, ScaleDecision, ScalingPolicyEngine, decide};

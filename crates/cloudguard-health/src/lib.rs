//! cloudguard-health: self-healing rules and health probes.
//!
//! # Architecture
//!
//! ```text
//! HealingRuleEngine (60s tick)
//!   ├── per (rule, resource): cooldown → attempts → condition
//!   ├── ConditionTable
//!   │   ├── health_check_failure → HealthTracker over HealthProbe::check
//!   │   ├── high_error_rate      → error_rate > threshold
//!   │   ├── memory_leak          → memory > threshold, growing over 30m
//!   │   └── disk_space           → disk > threshold
//!   └── ResourceController: restart | open_circuit | cleanup | scale +1 | migrate
//! ```
//!
//! [`HttpHealthProbe`] implements `HealthProbe` over plain HTTP/1.1: a 2xx
//! answer is healthy, anything else (or no answer) is a failed probe.

pub mod conditions;
pub mod healer;
pub mod probe;
pub mod tracker;

pub use conditions::{ConditionContext, ConditionEvaluator, ConditionTable, MEMORY_LEAK_WINDOW};
pub use healer::{HealingOutcome, HealingResult, HealingRuleEngine};
pub use probe::{HttpHealthProbe, http_probe};
pub use tracker::{HealthStatus, HealthTracker, ProbeResult};

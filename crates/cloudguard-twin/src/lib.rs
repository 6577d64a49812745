//! cloudguard-twin: digital twins for CloudGuard.
//!
//! A digital twin mirrors the observable state of one managed resource and
//! carries a running accuracy score for the forecasts made about it.
//!
//! # Architecture
//!
//! ```text
//! TwinSyncer (periodic)
//!   ├── ResourceInventory::list / describe
//!   └── TwinRegistry
//!         ├── create_twin / sync_twin_state / retire_twin
//!         ├── PredictionEngine
//!         │     ├── generate()  one forecast per prediction type
//!         │     └── validate()  AccuracyScorer → accuracy EMA
//!         └── SimulationRunner  load_test | failure_injection |
//!                               cost_optimization | scaling_scenario
//! ```
//!
//! Twins are never deleted. A twin whose resource disappears is retired:
//! `is_active` flips to false and its pending predictions expire.

pub mod prediction;
pub mod registry;
pub mod simulation;
pub mod sync;

pub use prediction::{
    AccuracyScorer, BASELINE_ACCURACY, DeltaErrorScorer, PredictionEngine, Validation,
    ema_accuracy,
};
pub use registry::{RegistryLimits, SyncReport, TwinRegistry};
pub use simulation::{Scenario, SimulationRunner};
pub use sync::{SyncSummary, TwinSyncer};

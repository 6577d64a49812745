//! cloudguard-core: shared foundations of the CloudGuard control core.
//!
//! Domain types, the error taxonomy, `cloudguard.toml` parsing, collaborator
//! contracts (metric source, resource controller, inventory, health probe),
//! the cooldown tracker, and the periodic ticker every engine runs on.

pub mod clock;
pub mod collaborator;
pub mod config;
pub mod cooldown;
pub mod duration;
pub mod error;
pub mod history;
pub mod memory;
pub mod ticker;
pub mod types;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use collaborator::{
    Collaborators, HealthProbe, MetricSource, ResourceController, ResourceInventory, ScaleRequest,
};
pub use config::{CloudGuardConfig, EngineSettings};
pub use cooldown::{CooldownKey, CooldownTracker};
pub use error::{CoreError, CoreResult};
pub use history::EventLog;
pub use memory::{ControllerCall, MemoryFleet};
pub use types::*;

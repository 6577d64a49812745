//! cloudguardd: assembles the CloudGuard engines into one daemon.

pub mod control_plane;
pub mod fleet;

pub use control_plane::ControlPlane;
pub use fleet::SimulatedFleet;

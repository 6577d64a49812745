//! Control plane lifecycle tests.
//!
//! Every loop runs for real on tokio's paused clock; the engines' cooldown
//! clock is a `ManualClock` that never moves, so each pair fires at most once.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cloudguard_core::clock::ManualClock;
use cloudguard_core::collaborator::{Collaborators, ScaleRequest};
use cloudguard_core::config::CloudGuardConfig;
use cloudguard_core::memory::{ControllerCall, MemoryFleet};
use cloudguard_core::types::{HealingAction, ResourceKind, ResourceSnapshot};
use cloudguardd::ControlPlane;

const CONFIG: &str = r#"
[engine]
scaling_interval = "1s"
healing_interval = "1s"
twin_sync_interval = "1s"
collaborator_timeout = "500ms"

[predictive]
enabled = false

[[policies]]
id = "cpu-high"
name = "cpu high"
type = "horizontal"
cooldown_period = 600

[[policies.triggers]]
metric = "cpu"
operator = "gt"
threshold = 80.0
duration = 300
evaluation_periods = 3

[[policies.actions]]
type = "scale_up"
percentage = 50.0
max_instances = 10

[[rules]]
id = "restart-dead"
name = "restart dead"
target = "api-1"
condition = "health_check_failure"
action = "restart"
threshold = 1.0
cooldown = 300
max_attempts = 1
"#;

struct Fixture {
    fleet: Arc<MemoryFleet>,
    plane: ControlPlane,
}

async fn fixture(config: &str) -> Fixture {
    let fleet = Arc::new(MemoryFleet::new());
    fleet.put_resource(ResourceSnapshot::new("web-1", "acme", ResourceKind::Compute, 2));
    fleet.set_history("web-1", "cpu", &[85.0, 90.0, 95.0]);
    fleet.set_current("web-1", "cpu", 95.0);
    fleet.put_resource(ResourceSnapshot::new("api-1", "acme", ResourceKind::Compute, 3));
    fleet.set_healthy("api-1", false);

    let config = CloudGuardConfig::from_toml_str(config).unwrap();
    let clock = Arc::new(ManualClock::starting_now());
    let plane = ControlPlane::new(&config, Collaborators::from_fleet(fleet.clone()), clock)
        .await
        .unwrap();
    Fixture { fleet, plane }
}

#[tokio::test(start_paused = true)]
async fn loops_act_then_stop_cleanly() {
    let f = fixture(CONFIG).await;
    assert!(f.plane.predictive().is_none());

    f.plane.start().await;
    assert!(f.plane.is_running().await);
    tokio::time::sleep(Duration::from_millis(2500)).await;
    f.plane.stop().await;
    assert!(!f.plane.is_running().await);

    assert_eq!(
        f.fleet.calls_for("web-1"),
        vec![ControllerCall::Scale {
            resource: "web-1".to_string(),
            request: ScaleRequest::instances(3),
        }]
    );
    assert_eq!(
        f.fleet.calls_for("api-1"),
        vec![ControllerCall::Restart {
            resource: "api-1".to_string(),
        }]
    );

    let scaling = f.plane.scaling_history().await;
    assert_eq!(scaling.len(), 1);
    assert_eq!(scaling[0].policy_id, "cpu-high");

    let healing = f.plane.healing().history().await;
    assert_eq!(healing.len(), 1);
    assert_eq!(healing[0].action, HealingAction::Restart);
    assert_eq!(f.plane.healing().attempts("restart-dead").await, 1);

    let twins = f.plane.registry().active_twins().await;
    assert_eq!(twins.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn no_calls_after_stop() {
    let f = fixture(CONFIG).await;
    f.plane.start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    f.plane.stop().await;

    let before = f.fleet.calls().len();
    f.fleet.set_healthy("api-1", true);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(f.fleet.calls().len(), before);
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let f = fixture(CONFIG).await;
    f.plane.stop().await;
    f.plane.start().await;
    f.plane.start().await;
    f.plane.stop().await;
    f.plane.stop().await;
    assert!(!f.plane.is_running().await);
}

#[tokio::test]
async fn registration_goes_through_the_engines() {
    let f = fixture(CONFIG).await;
    assert_eq!(f.plane.scaling().policies().await.len(), 1);
    assert_eq!(f.plane.healing().rules().await.len(), 1);

    let removed = f.plane.remove_scaling_policy("cpu-high").await.unwrap();
    assert!(f.plane.scaling().policies().await.is_empty());
    f.plane.add_scaling_policy(removed).await.unwrap();

    assert!(f.plane.remove_healing_rule("ghost").await.is_err());
    let rule = f.plane.remove_healing_rule("restart-dead").await.unwrap();
    f.plane.add_healing_rule(rule).await.unwrap();
    assert_eq!(f.plane.healing().rules().await.len(), 1);
}

#[tokio::test]
async fn predictive_scaler_follows_config() {
    let enabled = CONFIG.replace("enabled = false", "enabled = true");
    let f = fixture(&enabled).await;
    assert!(f.plane.predictive().is_some());
}

#[test]
fn bundled_config_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("cloudguard.toml");
    let config = CloudGuardConfig::from_file(&path).unwrap();
    assert_eq!(config.policies.len(), 2);
    assert_eq!(config.rules.len(), 3);
    assert_eq!(config.simulation.unwrap().resources.len(), 2);
}

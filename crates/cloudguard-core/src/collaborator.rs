//! Contracts for the external systems the control core talks to.
//!
//! Implementations return `anyhow::Result`; [`call`] and [`act`] wrap every
//! invocation in a timeout and translate failures into [`CoreError`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::ResourceSnapshot;

/// Source of current and historical metric values.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Current value, or `None` when the metric is not available.
    async fn current(&self, resource_id: &str, metric: &str) -> anyhow::Result<Option<f64>>;

    /// Samples covering the last `window`, oldest first.
    async fn history(
        &self,
        resource_id: &str,
        metric: &str,
        window: Duration,
    ) -> anyhow::Result<Vec<f64>>;
}

/// Desired shape for a scale call. At least one field is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleRequest {
    pub desired_instances: Option<u32>,
    pub instance_type: Option<String>,
}

impl ScaleRequest {
    pub fn instances(n: u32) -> Self {
        Self {
            desired_instances: Some(n),
            instance_type: None,
        }
    }

    pub fn instance_type(instance_type: &str) -> Self {
        Self {
            desired_instances: None,
            instance_type: Some(instance_type.to_string()),
        }
    }
}

/// Executes changes against real resources.
#[async_trait]
pub trait ResourceController: Send + Sync {
    async fn scale(&self, resource_id: &str, request: &ScaleRequest) -> anyhow::Result<()>;

    async fn restart(&self, resource_id: &str) -> anyhow::Result<()>;

    /// Move the resource onto a different instance class.
    async fn migrate(&self, resource_id: &str, instance_type: &str) -> anyhow::Result<()>;

    /// Stop routing traffic to the resource until it recovers.
    async fn open_circuit(&self, resource_id: &str) -> anyhow::Result<()>;

    /// Reclaim disk and cached state on the resource.
    async fn cleanup(&self, resource_id: &str) -> anyhow::Result<()>;
}

/// Lists managed resources and their observed state.
#[async_trait]
pub trait ResourceInventory: Send + Sync {
    async fn list(&self) -> anyhow::Result<Vec<ResourceSnapshot>>;

    /// `None` when the resource no longer exists.
    async fn describe(&self, resource_id: &str) -> anyhow::Result<Option<ResourceSnapshot>>;
}

/// Liveness check for a resource.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `true` when the resource answered healthy.
    async fn check(&self, resource_id: &str) -> anyhow::Result<bool>;
}

/// The full set of collaborators handed to the engines.
#[derive(Clone)]
pub struct Collaborators {
    pub metrics: Arc<dyn MetricSource>,
    pub controller: Arc<dyn ResourceController>,
    pub inventory: Arc<dyn ResourceInventory>,
    pub health: Arc<dyn HealthProbe>,
}

impl Collaborators {
    /// Use one object for every role (e.g. an in-memory fleet).
    pub fn from_fleet<F>(fleet: Arc<F>) -> Self
    where
        F: MetricSource + ResourceController + ResourceInventory + HealthProbe + 'static,
    {
        Self {
            metrics: fleet.clone(),
            controller: fleet.clone(),
            inventory: fleet.clone(),
            health: fleet,
        }
    }

    pub fn with_health(mut self, health: Arc<dyn HealthProbe>) -> Self {
        self.health = health;
        self
    }
}

/// Run a read-side collaborator call under `limit`.
///
/// Elapsed calls become `CollaboratorTimeout`, errors become `Collaborator`.
pub async fn call<T, F>(
    operation: &'static str,
    resource: &str,
    limit: Duration,
    fut: F,
) -> CoreResult<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(CoreError::Collaborator {
            operation,
            resource: resource.to_string(),
            reason: format!("{e:#}"),
        }),
        Err(_) => Err(CoreError::CollaboratorTimeout {
            operation,
            resource: resource.to_string(),
            after: limit,
        }),
    }
}

/// Run a controller action under `limit`.
///
/// Both rejections and timeouts become `ActionFailure`: once issued, an
/// action that did not confirm in time is treated as failed.
pub async fn act<F>(action: &str, resource: &str, limit: Duration, fut: F) -> CoreResult<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(CoreError::ActionFailure {
            action: action.to_string(),
            resource: resource.to_string(),
            reason: format!("{e:#}"),
        }),
        Err(_) => Err(CoreError::ActionFailure {
            action: action.to_string(),
            resource: resource.to_string(),
            reason: format!("no confirmation within {limit:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_passes_values_through() {
        let v = call("metric", "vm-1", Duration::from_secs(1), async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn call_times_out() {
        let err = call("metric", "vm-1", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        })
        .await
        .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn call_maps_errors() {
        let err = call::<(), _>("metric", "vm-1", Duration::from_secs(1), async {
            Err(anyhow::anyhow!("boom"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::Collaborator { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn act_timeout_is_action_failure() {
        let err = act("restart", "vm-1", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::ActionFailure { .. }));
    }
}

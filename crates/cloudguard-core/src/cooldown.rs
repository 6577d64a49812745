//! Cooldown tracking shared by the scaling and healing engines.
//!
//! Maps `(owner, resource)` to the last time the owner fired against the
//! resource. Entries never expire; readiness is computed on read.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::clock::SharedClock;

/// Composite key: a policy, rule, or the predictive scaler, against one resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    pub owner: String,
    pub resource: String,
}

impl CooldownKey {
    pub fn new(owner: &str, resource: &str) -> Self {
        Self {
            owner: owner.to_string(),
            resource: resource.to_string(),
        }
    }
}

impl fmt::Display for CooldownKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.owner, self.resource)
    }
}

pub struct CooldownTracker {
    clock: SharedClock,
    last_fired: RwLock<HashMap<CooldownKey, DateTime<Utc>>>,
}

impl CooldownTracker {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            last_fired: RwLock::new(HashMap::new()),
        }
    }

    /// True when the key never fired or fired at least `window` ago.
    pub async fn is_ready(&self, key: &CooldownKey, window: Duration) -> bool {
        let last_fired = self.last_fired.read().await;
        match last_fired.get(key) {
            None => true,
            Some(at) => {
                let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
                self.clock.now().signed_duration_since(*at) >= window
            }
        }
    }

    /// Stamp the key with the current time.
    pub async fn mark_fired(&self, key: &CooldownKey) {
        let now = self.clock.now();
        self.last_fired.write().await.insert(key.clone(), now);
    }

    pub async fn last_fired(&self, key: &CooldownKey) -> Option<DateTime<Utc>> {
        self.last_fired.read().await.get(key).copied()
    }

    pub async fn len(&self) -> usize {
        self.last_fired.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.last_fired.read().await.is_empty()
    }
}

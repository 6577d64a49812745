//! Bounded in-memory action history.

use std::collections::VecDeque;

use tokio::sync::Mutex;

/// Ring of the most recent `limit` events, oldest first.
pub struct EventLog<T> {
    events: Mutex<VecDeque<T>>,
    limit: usize,
}

impl<T: Clone> EventLog<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(limit.min(1024))),
            limit,
        }
    }

    pub async fn record(&self, event: T) {
        let mut events = self.events.lock().await;
        events.push_back(event);
        while events.len() > self.limit {
            events.pop_front();
        }
    }

    pub async fn snapshot(&self) -> Vec<T> {
        self.events.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }
}

//! Periodic background loop shared by every engine.
//!
//! A tick that has started always runs to completion: the shutdown signal is
//! only observed between ticks, so an action is either fully issued or not
//! issued at all.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Run `tick` every `interval` until `shutdown` flips to true or its sender
/// is dropped.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    info!(task = name, interval_ms = interval.as_millis() as u64, "loop started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let started = Instant::now();
        tick().await;
        let elapsed = started.elapsed();

        if elapsed > interval {
            warn!(
                task = name,
                elapsed_ms = elapsed.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "tick overran its interval"
            );
        } else {
            debug!(task = name, elapsed_ms = elapsed.as_millis() as u64, "tick finished");
        }
    }

    info!(task = name, "loop stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_until_shutdown() {
        let (tx, rx) = watch::channel(false);
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();

        let handle = tokio::spawn(run_periodic("test", Duration::from_secs(10), rx, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        // First tick fires immediately, then every 10s.
        tokio::time::sleep(Duration::from_secs(25)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_tick_completes_before_exit() {
        let (tx, rx) = watch::channel(false);
        let finished = Arc::new(AtomicU32::new(0));
        let done = finished.clone();

        let handle = tokio::spawn(run_periodic("slow", Duration::from_secs(60), rx, move || {
            let done = done.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
            }
        }));

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_sender_stops_loop() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        run_periodic("orphan", Duration::from_millis(5), rx, || async {}).await;
    }
}

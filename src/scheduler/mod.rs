// src/scheduler/mod.rs - Fixed-rate periodic callbacks
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

/// Runs short, non-blocking callbacks at a fixed rate until shut down.
#[derive(Debug)]
pub struct SlowTicker {
    shutdown_tx: broadcast::Sender<()>,
}

impl SlowTicker {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx }
    }

    /// Call `callback` `rate_hz` times per second. Must be called from within a
    /// tokio runtime.
    pub fn attach<F>(&self, rate_hz: u32, callback: F) -> JoinHandle<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let period = Duration::from_secs_f64(1.0 / f64::from(rate_hz.max(1)));
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tracing::debug!("Attaching periodic task at {} Hz", rate_hz);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Periodic task shutting down");
                        break;
                    }
                    _ = interval.tick() => callback(),
                }
            }
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Default for SlowTicker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_attach_runs_at_rate_and_stops() {
        let ticker = SlowTicker::new();
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let handle = ticker.attach(100, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(95)).await;
        // First tick fires immediately, then every 10ms.
        let ticks = count.load(Ordering::SeqCst);
        assert!((9..=10).contains(&ticks), "ticks = {}", ticks);

        ticker.shutdown();
        handle.await.unwrap();
        let after = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), after);
    }
}

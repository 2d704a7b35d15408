//! Self-rescheduling damping timers.
//!
//! Each timer is a task that ticks a `tokio` interval and dispatches
//! back into the shared engine; dropping the returned handle cancels
//! both tasks so no tick can fire against a torn-down engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::trace;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;

use super::DampEngine;

pub struct TimerHandle {
    reuse: JoinHandle<()>,
    sweep: JoinHandle<()>,
}

impl TimerHandle {
    /// Cancel both timers; called on protocol-instance teardown
    pub fn shutdown(&self) {
        self.reuse.abort();
        self.sweep.abort();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start the reuse-tick and non-reuse-sweep timers against `engine`
pub fn spawn_timers(
    engine: Arc<Mutex<DampEngine>>,
    reuse_period: Duration,
    sweep_period: Duration,
) -> TimerHandle {
    let reuse_engine = Arc::clone(&engine);
    let reuse = tokio::spawn(async move {
        let mut ticker = interval(reuse_period);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            trace!("damping: reuse tick");
            reuse_engine.lock().await.reuse_tick(Utc::now());
        }
    });
    let sweep = tokio::spawn(async move {
        let mut ticker = interval(sweep_period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            trace!("damping: non-reuse sweep");
            engine.lock().await.nonreuse_sweep(Utc::now());
        }
    });
    TimerHandle { reuse, sweep }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::engine_with_config;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_timers_drive_the_wheel() {
        let (engine, _) = engine_with_config();
        let engine = Arc::new(Mutex::new(engine));
        let handle = spawn_timers(
            Arc::clone(&engine),
            Duration::from_millis(10),
            Duration::from_millis(5),
        );
        sleep(Duration::from_millis(80)).await;
        assert!(engine.lock().await.wheel_offset() > 0);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_dropping_handle_cancels_timers() {
        let (engine, _) = engine_with_config();
        let engine = Arc::new(Mutex::new(engine));
        let handle = spawn_timers(
            Arc::clone(&engine),
            Duration::from_millis(5),
            Duration::from_millis(5),
        );
        sleep(Duration::from_millis(30)).await;
        drop(handle);
        sleep(Duration::from_millis(10)).await;
        let offset = engine.lock().await.wheel_offset();
        sleep(Duration::from_millis(30)).await;
        assert_eq!(engine.lock().await.wheel_offset(), offset);
    }
}

//! Poll loop driver: a warm-up check shortly after startup, then a fixed
//! interval, with a reentrancy guard so a slow cycle is never overlapped.

use crate::config::AiringConfig;
use crate::poller::Poller;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Clears the in-flight flag when a cycle ends, however it ends.
struct CycleGuard(Arc<AtomicBool>);

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    poller: Arc<Poller>,
    warmup_delay: Duration,
    poll_interval: Duration,
    in_flight: Arc<AtomicBool>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(poller: Arc<Poller>, config: &AiringConfig) -> Self {
        Self {
            poller,
            warmup_delay: config.warmup_delay(),
            poll_interval: config.poll_interval(),
            in_flight: Arc::new(AtomicBool::new(false)),
            timer: Mutex::new(None),
        }
    }

    /// Start the poll loop: one warm-up cycle after `warmup_delay`, then a
    /// cycle every `poll_interval`. Calling again replaces the running loop.
    pub async fn start(&self) {
        let poller = Arc::clone(&self.poller);
        let in_flight = Arc::clone(&self.in_flight);
        let warmup_delay = self.warmup_delay;
        let poll_interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(warmup_delay).await;
            tracing::info!("starting initial airing check");
            run_guarded(&poller, &in_flight).await;

            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + poll_interval, poll_interval);
            // A cycle longer than the interval eats the missed ticks instead
            // of firing a burst afterwards.
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                run_guarded(&poller, &in_flight).await;
            }
        });

        let mut timer = self.timer.lock().await;
        if let Some(old) = timer.replace(handle) {
            old.abort();
        }
    }

    /// Run one cycle immediately, subject to the same reentrancy guard as
    /// the timer.
    pub async fn trigger_now(&self) {
        run_guarded(&self.poller, &self.in_flight).await;
    }

    /// Stop the poll loop. A cycle already in flight finishes on its own.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.timer.lock().await.take() {
            handle.abort();
        }
    }
}

async fn run_guarded(poller: &Arc<Poller>, in_flight: &Arc<AtomicBool>) {
    if in_flight
        .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
        .is_err()
    {
        tracing::debug!("previous poll cycle still running, skipping tick");
        return;
    }
    let _guard = CycleGuard(Arc::clone(in_flight));
    poller.run_cycle().await;
}

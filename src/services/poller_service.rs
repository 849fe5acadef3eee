//! Poller: the timer that drives background discovery.
//!
//! An owned scheduler with an explicit start/stop lifecycle rather than an
//! ambient interval. The first cycle runs immediately at start, then one per
//! tick. A cycle-in-progress guard bounds outstanding cycles to one: if the
//! previous cycle is still running when the timer fires, the tick is
//! skipped, not queued.
//!
//! Tests drive [`Poller::run_cycle`] directly instead of waiting on a real
//! timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::sync_service::{SyncReport, SyncService};

/// Timer-driven poll loop over the sync service.
pub struct Poller {
    sync: Arc<SyncService>,
    interval: Duration,
    stop_flag: AtomicBool,
    cycle_running: AtomicBool,
}

impl Poller {
    /// Creates a poller ticking at `interval`.
    pub fn new(sync: Arc<SyncService>, interval: Duration) -> Self {
        Self {
            sync,
            interval,
            stop_flag: AtomicBool::new(false),
            cycle_running: AtomicBool::new(false),
        }
    }

    /// Starts the background loop: one cycle immediately, then one per tick.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        self.stop_flag.store(false, Ordering::SeqCst);
        let poller = Arc::clone(&self);

        tokio::spawn(async move {
            tracing::info!(interval_secs = poller.interval.as_secs(), "poller started");

            let mut ticker = tokio::time::interval(poller.interval);
            loop {
                // The first tick completes immediately.
                ticker.tick().await;
                if poller.stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                poller.run_cycle().await;
            }

            tracing::info!("poller stopped");
        })
    }

    /// Runs one poll cycle now, unless one is already in progress.
    ///
    /// Returns `None` when the tick was skipped or the pass could not even
    /// select accounts; per-account failures live inside the report.
    pub async fn run_cycle(&self) -> Option<SyncReport> {
        if self.cycle_running.swap(true, Ordering::SeqCst) {
            tracing::debug!("previous poll cycle still running, skipping tick");
            return None;
        }

        let report = match self.sync.poll_eligible_accounts().await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = %e, "poll cycle failed to select accounts");
                None
            }
        };

        self.cycle_running.store(false, Ordering::SeqCst);
        report
    }

    /// Signals the loop to stop after the current cycle.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}

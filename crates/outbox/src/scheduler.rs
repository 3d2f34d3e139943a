//! Interval scheduling for the dispatcher.
//!
//! One tokio task owns the trigger loop. The run is awaited inside the
//! tick arm and missed ticks are skipped, so a slow run swallows the
//! triggers that fired while it was busy, so non-reentrancy holds even
//! before the dispatcher's own run guard is consulted.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::dispatcher::{OutboxDispatcher, RunOutcome};

/// Trigger cadence for the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSchedule {
    pub interval: Duration,
}

impl Default for DispatcherSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

/// Handle to the scheduler task: request shutdown, then wait for the
/// in-flight run to finish. Dropping the handle also cancels the loop.
pub struct SchedulerHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Request graceful shutdown. The current run observes the token
    /// between messages/attempts and winds down cleanly.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Wait for the scheduler task to stop.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Spawn the dispatcher on a fixed interval.
///
/// Run-level failures (a batch commit that didn't go through) are logged
/// and the loop keeps going; the next tick retries the same batch from
/// scratch.
pub fn spawn(dispatcher: Arc<OutboxDispatcher>, schedule: DispatcherSchedule) -> SchedulerHandle {
    let token = CancellationToken::new();
    let loop_token = token.clone();

    let task = tokio::spawn(async move {
        let mut ticker = time::interval(schedule.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = schedule.interval.as_secs_f64(), "outbox scheduler started");

        loop {
            // Shutdown wins over a tick that became ready at the same time.
            tokio::select! {
                biased;
                _ = loop_token.cancelled() => break,
                _ = ticker.tick() => {
                    match dispatcher.run_once(&loop_token).await {
                        Ok(RunOutcome::Completed(stats)) if stats.fetched > 0 => {
                            info!(
                                fetched = stats.fetched,
                                published = stats.published,
                                failed = stats.failed,
                                "outbox batch dispatched"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => {
                            error!(error = %err, "outbox dispatch run failed");
                        }
                    }
                }
            }
        }

        info!("outbox scheduler stopped");
    });

    SchedulerHandle {
        token,
        task: Some(task),
    }
}

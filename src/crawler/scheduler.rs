//! Run scheduler for recurring harvests
//!
//! This module handles:
//! - Starting a run on every interval tick (optionally right away)
//! - Keeping at most one run in flight
//! - Skipping or coalescing ticks that arrive during a run
//! - Graceful shutdown that cancels and awaits the in-flight run

use crate::config::{OverlapPolicy, ScheduleConfig};
use crate::crawler::controller::{RunError, RunSummary};
use std::future::Future;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

type RunResult = Result<RunSummary, RunError>;

/// Counters describing what the scheduler did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    /// Runs started
    pub started: u32,

    /// Runs that produced a summary (including cancelled ones)
    pub completed: u32,

    /// Runs that ended with a fatal error or panicked
    pub failed: u32,

    /// Ticks dropped because a run was in flight
    pub skipped: u32,

    /// Ticks folded into a pending follow-up run
    pub coalesced: u32,
}

/// Timer-driven scheduler with a single run slot
#[derive(Debug, Clone)]
pub struct RunScheduler {
    interval: Duration,
    overlap: OverlapPolicy,
    run_on_start: bool,
}

impl RunScheduler {
    pub fn new(config: &ScheduleConfig) -> Self {
        Self::with_settings(
            Duration::from_secs(config.interval_secs),
            config.overlap,
            config.run_on_start,
        )
    }

    pub fn with_settings(interval: Duration, overlap: OverlapPolicy, run_on_start: bool) -> Self {
        Self {
            interval,
            overlap,
            run_on_start,
        }
    }

    /// Runs `job` on every tick until `shutdown` is cancelled
    ///
    /// Each run receives a child token of `shutdown`. On shutdown the
    /// in-flight run is cancelled and awaited so its summary is reported.
    /// Failed runs are logged and the loop keeps going.
    pub async fn run<F, Fut>(&self, job: F, shutdown: CancellationToken) -> SchedulerReport
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = RunResult> + Send + 'static,
    {
        let start = if self.run_on_start {
            Instant::now()
        } else {
            Instant::now() + self.interval
        };
        let mut ticker = interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut report = SchedulerReport::default();
        let mut in_flight: Option<JoinHandle<RunResult>> = None;
        let mut pending = false;

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            overlap = ?self.overlap,
            run_on_start = self.run_on_start,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                _ = ticker.tick() => {
                    if in_flight.is_none() {
                        in_flight = Some(tokio::spawn(job(shutdown.child_token())));
                        report.started += 1;
                        continue;
                    }

                    match self.overlap {
                        OverlapPolicy::Skip => {
                            report.skipped += 1;
                            tracing::info!("Previous run still in flight, skipping tick");
                        }
                        OverlapPolicy::Coalesce => {
                            report.coalesced += 1;
                            if !pending {
                                tracing::info!("Previous run still in flight, queueing one follow-up run");
                            }
                            pending = true;
                        }
                    }
                }

                result = wait_for(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    record_result(result, &mut report);

                    if pending && !shutdown.is_cancelled() {
                        pending = false;
                        in_flight = Some(tokio::spawn(job(shutdown.child_token())));
                        report.started += 1;
                    }
                }
            }
        }

        if let Some(handle) = in_flight.take() {
            tracing::info!("Shutdown requested, waiting for in-flight run");
            record_result(handle.await, &mut report);
        }

        tracing::info!(
            started = report.started,
            completed = report.completed,
            failed = report.failed,
            skipped = report.skipped,
            coalesced = report.coalesced,
            "Scheduler stopped"
        );
        report
    }
}

async fn wait_for(handle: &mut Option<JoinHandle<RunResult>>) -> Result<RunResult, JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn record_result(result: Result<RunResult, JoinError>, report: &mut SchedulerReport) {
    match result {
        Ok(Ok(summary)) => {
            report.completed += 1;
            tracing::info!(%summary, "Scheduled run finished");
        }
        Ok(Err(e)) => {
            report.failed += 1;
            tracing::error!(error = %e, summary = %e.summary, "Scheduled run failed");
        }
        Err(e) => {
            report.failed += 1;
            tracing::error!(error = %e, "Scheduled run panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StopReason;

    #[test]
    fn test_new_from_config() {
        let scheduler = RunScheduler::new(&ScheduleConfig::default());
        assert_eq!(scheduler.interval, Duration::from_secs(1800));
        assert_eq!(scheduler.overlap, OverlapPolicy::Skip);
        assert!(scheduler.run_on_start);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_tick() {
        let scheduler =
            RunScheduler::with_settings(Duration::from_secs(3600), OverlapPolicy::Skip, false);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let report = scheduler
            .run(
                |_token| async {
                    Ok::<_, RunError>(RunSummary {
                        stopped_reason: Some(StopReason::MaxPages),
                        ..Default::default()
                    })
                },
                shutdown,
            )
            .await;
        assert_eq!(report, SchedulerReport::default());
    }
}

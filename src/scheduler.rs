//! Scheduling — one-shot execution and the fixed-interval daemon loop.
//!
//! The daemon runs cycles on a wall-clock interval. SIGINT/SIGTERM clear
//! the running flag; an in-flight cycle is never interrupted mid-item, the
//! loop exits once the current cycle finishes. A nightly cron schedule
//! prunes old audit records.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::{Notify, RwLock};
use tracing::{error, info};

use crate::audit::AuditStats;
use crate::model::CycleReport;
use crate::processor::AlertProcessor;

/// Nightly audit cleanup fire time (02:00 UTC).
const CLEANUP_SCHEDULE: &str = "0 0 2 * * *";

/// Retention applied by the scheduled cleanup.
const CLEANUP_RETENTION_DAYS: u32 = 90;

/// Point-in-time scheduler state for status display.
#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub running: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub stats: AuditStats,
}

/// Drives the processor once or on a fixed interval.
pub struct Scheduler {
    processor: Arc<AlertProcessor>,
    interval: Duration,
    cleanup_schedule: Schedule,
    running: Arc<AtomicBool>,
    next_run: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl Scheduler {
    pub fn new(processor: Arc<AlertProcessor>, interval: Duration) -> Self {
        let cleanup_schedule =
            Schedule::from_str(CLEANUP_SCHEDULE).expect("static cron expression is valid");
        Self {
            processor,
            interval,
            cleanup_schedule,
            running: Arc::new(AtomicBool::new(false)),
            next_run: Arc::new(RwLock::new(None)),
        }
    }

    pub fn processor(&self) -> &Arc<AlertProcessor> {
        &self.processor
    }

    /// Run a single cycle behind a health gate. Returns false when the
    /// health check fails or any item in the cycle failed.
    pub async fn run_once(&self) -> bool {
        info!("Running one-time alert processing");

        if !self.processor.run_health_check().await {
            error!("Health check failed, aborting processing");
            return false;
        }

        let report = self.run_cycle_logged().await;
        report.failed == 0 && report.errors.is_empty()
    }

    /// Run as a daemon until a shutdown signal arrives.
    pub async fn run_daemon(&self, interval_override: Option<Duration>) {
        let interval = interval_override.unwrap_or(self.interval);
        info!(
            interval_secs = interval.as_secs(),
            "Starting scheduled alert processing"
        );

        // Startup health check — result is logged, the daemon proceeds
        // either way and surfaces failures per cycle.
        self.processor.run_health_check().await;

        self.running.store(true, Ordering::SeqCst);

        // Signal listener lives for the whole daemon so a signal landing
        // mid-cycle still requests a stop.
        let shutdown = Arc::new(Notify::new());
        {
            let shutdown = Arc::clone(&shutdown);
            let running = Arc::clone(&self.running);
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("Shutdown signal received, finishing current cycle");
                running.store(false, Ordering::SeqCst);
                shutdown.notify_waiters();
            });
        }

        // Initial cycle runs immediately.
        self.run_cycle_logged().await;

        let mut next_cleanup = self.cleanup_schedule.upcoming(Utc).next();
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await; // consume the immediate first tick

        while self.running.load(Ordering::SeqCst) {
            *self.next_run.write().await =
                Some(Utc::now() + chrono::Duration::seconds(interval.as_secs() as i64));

            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.notified() => {}
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            self.run_cycle_logged().await;

            if let Some(due) = next_cleanup {
                if Utc::now() >= due {
                    let removed = self.processor.cleanup_old_records(CLEANUP_RETENTION_DAYS);
                    info!(removed, "Scheduled audit cleanup complete");
                    next_cleanup = self.cleanup_schedule.upcoming(Utc).next();
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        *self.next_run.write().await = None;
        info!("Alert email scheduler stopped");
    }

    /// Request a stop; the daemon loop exits after the in-flight cycle.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.running.load(Ordering::SeqCst),
            next_run: *self.next_run.read().await,
            stats: self.processor.stats(),
        }
    }

    async fn run_cycle_logged(&self) -> CycleReport {
        let report = self.processor.run_cycle().await;
        info!(
            successful = report.successful,
            failed = report.failed,
            skipped = report.skipped,
            duration_secs = format!("{:.2}", report.duration_seconds()),
            "Cycle finished"
        );
        report
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_schedule_parses_and_fires_in_future() {
        let schedule = Schedule::from_str(CLEANUP_SCHEDULE).unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert!(next > Utc::now());
        assert_eq!(next.format("%H:%M:%S").to_string(), "02:00:00");
    }
}

//! Cron schedule parsing and job driving.
//!
//! The scheduler talks to a [`CronSpawner`] rather than the clock directly,
//! so tests can fire ticks by hand while production uses
//! [`TokioCronSpawner`], which sleeps until each upcoming occurrence in the
//! configured timezone.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use tracing::debug;

use feedloom_shared::{FeedloomError, Result};

/// The body of one scheduled tick.
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Factory producing a fresh future per tick.
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Check that a cron expression parses (seconds-resolution, 6 or 7 fields).
pub fn validate_schedule(expr: &str) -> Result<()> {
    Schedule::from_str(expr)
        .map(|_| ())
        .map_err(|e| FeedloomError::validation(format!("invalid cron expression '{expr}': {e}")))
}

/// A running job registration. Cancelling stops future ticks; a tick
/// already in flight runs to completion.
pub struct JobHandle {
    inner: Option<tokio::task::JoinHandle<()>>,
}

impl JobHandle {
    fn new(handle: tokio::task::JoinHandle<()>) -> Self {
        Self {
            inner: Some(handle),
        }
    }

    /// Handle for a job with no background driver (manual spawners).
    pub fn detached() -> Self {
        Self { inner: None }
    }

    pub fn cancel(&self) {
        if let Some(handle) = &self.inner {
            handle.abort();
        }
    }
}

/// Something that can drive a job on a cron schedule.
pub trait CronSpawner: Send + Sync {
    fn spawn(&self, schedule: &str, job: JobFn) -> Result<JobHandle>;
}

/// Production spawner: one tokio task per job, sleeping until each
/// occurrence of the schedule in the configured timezone.
pub struct TokioCronSpawner {
    timezone: chrono_tz::Tz,
}

impl TokioCronSpawner {
    pub fn new(timezone: chrono_tz::Tz) -> Self {
        Self { timezone }
    }
}

impl CronSpawner for TokioCronSpawner {
    fn spawn(&self, schedule: &str, job: JobFn) -> Result<JobHandle> {
        let parsed = Schedule::from_str(schedule).map_err(|e| {
            FeedloomError::Scheduler(format!("invalid cron expression '{schedule}': {e}"))
        })?;
        let timezone = self.timezone;

        let handle = tokio::spawn(async move {
            loop {
                let now = Utc::now().with_timezone(&timezone);
                let Some(next) = parsed.upcoming(timezone).next() else {
                    // Schedule has no future occurrences
                    break;
                };
                let wait = (next - now).to_std().unwrap_or_default();
                debug!(next = %next, wait_secs = wait.as_secs(), "sleeping until next occurrence");
                tokio::time::sleep(wait).await;
                job().await;
            }
        });

        Ok(JobHandle::new(handle))
    }
}

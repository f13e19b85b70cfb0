//! Task scheduling: keeps running cron jobs in sync with stored tasks.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use tokio::sync::Mutex;
use tracing::{info, warn};

use feedloom_shared::{FeedloomError, Result, Task, TaskStatus};
use feedloom_storage::Storage;

use crate::cron::{CronSpawner, JobFn, JobHandle};
use crate::pipeline::{Pipeline, RunReport};

/// One registered cron job.
struct TrackedJob {
    schedule: String,
    handle: JobHandle,
}

/// Reconciles stored task definitions against running cron jobs and runs
/// one-shot executions on demand.
///
/// The `running` set is the re-entrancy guard shared by scheduled ticks and
/// immediate runs: a tick that finds its task already in the set drops
/// without blocking, so a slow run never piles up behind itself.
pub struct Scheduler {
    storage: Arc<Storage>,
    pipeline: Arc<Pipeline>,
    spawner: Arc<dyn CronSpawner>,
    jobs: Mutex<HashMap<String, TrackedJob>>,
    running: Arc<StdMutex<HashSet<i64>>>,
}

/// Registry key of a task's cron job.
fn job_key(task: &Task) -> String {
    format!("{}_{}", task.function_name, task.id)
}

/// Claim on a task id in the running set, released on drop. Dropping is what
/// releases the claim, so a run that panics still frees its task.
struct RunGuard {
    running: Arc<StdMutex<HashSet<i64>>>,
    task_id: i64,
}

impl RunGuard {
    /// Claim `task_id`, or `None` when a run is already in flight.
    fn acquire(running: &Arc<StdMutex<HashSet<i64>>>, task_id: i64) -> Option<Self> {
        if !lock_running(running).insert(task_id) {
            return None;
        }
        Some(Self {
            running: running.clone(),
            task_id,
        })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        lock_running(&self.running).remove(&self.task_id);
    }
}

// The set is never locked across an await, so a poisoned lock only means a
// holder panicked between insert and remove; the set itself is still valid.
fn lock_running(running: &StdMutex<HashSet<i64>>) -> MutexGuard<'_, HashSet<i64>> {
    running.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Scheduler {
    pub fn new(
        storage: Arc<Storage>,
        pipeline: Arc<Pipeline>,
        spawner: Arc<dyn CronSpawner>,
    ) -> Self {
        Self {
            storage,
            pipeline,
            spawner,
            jobs: Mutex::new(HashMap::new()),
            running: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    /// Bring running jobs in line with the task table: drop jobs whose task
    /// is gone or rescheduled, register jobs for new tasks, then fire any
    /// pending one-shot requests.
    pub async fn reconcile(&self) -> Result<()> {
        let tasks = self.storage.get_all_tasks().await?;
        let desired: HashMap<String, &Task> =
            tasks.iter().map(|task| (job_key(task), task)).collect();

        {
            let mut jobs = self.jobs.lock().await;

            jobs.retain(|key, tracked| match desired.get(key) {
                Some(task) if task.schedule == tracked.schedule => true,
                _ => {
                    info!(job = %key, "removing stale job");
                    tracked.handle.cancel();
                    false
                }
            });

            for (key, task) in &desired {
                if jobs.contains_key(key) {
                    warn!(job = %key, "job key already registered, leaving existing job in place");
                    continue;
                }
                let handle = self.spawn_job(task)?;
                info!(job = %key, schedule = %task.schedule, "registered job");
                jobs.insert(
                    key.clone(),
                    TrackedJob {
                        schedule: task.schedule.clone(),
                        handle,
                    },
                );
            }
        }

        for task in &tasks {
            if task.immediate && task.status == TaskStatus::Pending {
                if let Err(e) = self.run_immediate(task.id).await {
                    warn!(task = %task.name, error = %e, "immediate run failed");
                }
            }
        }

        Ok(())
    }

    /// Run a task once, now, walking its status through
    /// running → completed/failed and clearing the one-shot flag.
    pub async fn run_immediate(&self, task_id: i64) -> Result<RunReport> {
        let task = self
            .storage
            .get_task_by_id(task_id)
            .await?
            .ok_or_else(|| FeedloomError::validation(format!("task {task_id} does not exist")))?;

        let Some(_guard) = RunGuard::acquire(&self.running, task_id) else {
            return Err(FeedloomError::Scheduler(format!(
                "task '{}' is already running",
                task.name
            )));
        };

        self.run_immediate_inner(&task).await
    }

    async fn run_immediate_inner(&self, task: &Task) -> Result<RunReport> {
        self.storage
            .update_task_status(task.id, TaskStatus::Running)
            .await?;

        match self.pipeline.execute(task.id).await {
            Ok(report) => {
                self.storage
                    .update_task_status_and_immediate(task.id, TaskStatus::Completed, false)
                    .await?;
                Ok(report)
            }
            Err(e) => {
                if let Err(update_err) = self
                    .storage
                    .update_task_status_and_immediate(task.id, TaskStatus::Failed, false)
                    .await
                {
                    warn!(task = %task.name, error = %update_err, "failed to record failure status");
                }
                Err(e)
            }
        }
    }

    /// Register a cron job driving the task's pipeline runs.
    fn spawn_job(&self, task: &Task) -> Result<JobHandle> {
        let pipeline = self.pipeline.clone();
        let running = self.running.clone();
        let task_id = task.id;
        let task_name = task.name.clone();

        let job: JobFn = Arc::new(move || {
            let pipeline = pipeline.clone();
            let running = running.clone();
            let task_name = task_name.clone();
            Box::pin(async move {
                let Some(_guard) = RunGuard::acquire(&running, task_id) else {
                    warn!(task = %task_name, "previous run still in progress, skipping tick");
                    return;
                };
                if let Err(e) = pipeline.execute(task_id).await {
                    warn!(task = %task_name, error = %e, "scheduled run failed");
                }
            })
        });

        self.spawner.spawn(&task.schedule, job)
    }

    /// Keys of all registered jobs, sorted.
    pub async fn job_keys(&self) -> Vec<String> {
        let jobs = self.jobs.lock().await;
        let mut keys: Vec<String> = jobs.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Cancel all jobs and forget them.
    pub async fn shutdown(&self) {
        let mut jobs = self.jobs.lock().await;
        for (key, tracked) in jobs.drain() {
            info!(job = %key, "cancelling job");
            tracked.handle.cancel();
        }
    }
}

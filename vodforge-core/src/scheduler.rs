use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::queue::{QueueError, RecordingQueueStore};
use crate::tracker::ExecutionTracker;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

#[async_trait::async_trait]
pub trait ScheduledJob: Send + Sync {
    fn id(&self) -> &'static str;
    async fn execute(&self) -> Result<(), JobError>;
}

#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub id: String,
    pub running: bool,
    pub executing: bool,
    pub last_execution: Option<DateTime<Utc>>,
}

struct RegisteredTask {
    id: &'static str,
    running: Arc<AtomicBool>,
    executing: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

/// Interval-driven task runner. Each registered job ticks immediately
/// and then on its interval; a tick that is still executing when the
/// next one is due makes the runner skip, never queue or overlap.
pub struct Scheduler {
    tasks: Vec<RegisteredTask>,
    store: RecordingQueueStore,
    tracker: ExecutionTracker,
}

impl Scheduler {
    pub fn new(store: RecordingQueueStore, tracker: ExecutionTracker) -> Self {
        Self {
            tasks: Vec::new(),
            store,
            tracker,
        }
    }

    pub fn register(&mut self, job: Arc<dyn ScheduledJob>, every: Duration) {
        let id = job.id();
        let running = Arc::new(AtomicBool::new(true));
        let executing = Arc::new(AtomicBool::new(false));
        let store = self.store.clone();
        let tracker = self.tracker.clone();
        let loop_running = Arc::clone(&running);
        let loop_executing = Arc::clone(&executing);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !loop_running.load(Ordering::SeqCst) {
                    continue;
                }
                if loop_executing
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    debug!(task = id, "previous tick still executing, skipping");
                    continue;
                }
                run_tick(&*job, &store, &tracker).await;
                loop_executing.store(false, Ordering::SeqCst);
            }
        });

        info!(task = id, interval_s = every.as_secs(), "task registered");
        self.tasks.push(RegisteredTask {
            id,
            running,
            executing,
            handle,
        });
    }

    fn find(&self, id: &str) -> Option<&RegisteredTask> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn start(&self, id: &str) -> bool {
        match self.find(id) {
            Some(task) => {
                task.running.store(true, Ordering::SeqCst);
                info!(task = id, "task started");
                true
            }
            None => false,
        }
    }

    pub fn stop(&self, id: &str) -> bool {
        match self.find(id) {
            Some(task) => {
                // Takes effect on the next scheduling boundary; an
                // in-flight tick always runs to completion.
                task.running.store(false, Ordering::SeqCst);
                info!(task = id, "task stopped");
                true
            }
            None => false,
        }
    }

    pub fn start_all(&self) {
        for task in &self.tasks {
            task.running.store(true, Ordering::SeqCst);
        }
        info!("all tasks started");
    }

    pub fn stop_all(&self) {
        for task in &self.tasks {
            task.running.store(false, Ordering::SeqCst);
        }
        info!("all tasks stopped");
    }

    /// Per-task status, with the last execution joined from the tracker
    /// at query time.
    pub fn list(&self) -> Vec<TaskStatus> {
        let runs = self.tracker.all().unwrap_or_default();
        self.tasks
            .iter()
            .map(|task| TaskStatus {
                id: task.id.to_string(),
                running: task.running.load(Ordering::SeqCst),
                executing: task.executing.load(Ordering::SeqCst),
                last_execution: runs.get(task.id).copied(),
            })
            .collect()
    }

    pub fn jobs_disabled(&self) -> bool {
        self.store.jobs_disabled().unwrap_or(false)
    }

    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.handle.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_tick(job: &dyn ScheduledJob, store: &RecordingQueueStore, tracker: &ExecutionTracker) {
    match store.jobs_disabled() {
        Ok(true) => {
            // Disabled means fully dormant: no work, no tracker update.
            debug!(task = job.id(), "jobs disabled, tick is a no-op");
            return;
        }
        Ok(false) => {}
        Err(error) => {
            warn!(task = job.id(), %error, "could not read jobs_disabled, skipping tick");
            return;
        }
    }
    match job.execute().await {
        Ok(()) => {
            if let Err(error) = tracker.record_run(job.id(), Utc::now()) {
                warn!(task = job.id(), %error, "could not record task run");
            }
        }
        Err(error) => {
            warn!(task = job.id(), %error, "task execution failed");
        }
    }
}

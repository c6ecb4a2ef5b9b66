use chrono::{DateTime, Utc};
use market_core::{Clock, MarketClass, RefreshError};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::ingestion::{IngestionService, RefreshReport};

pub const REFRESH_JOB: &str = "market_refresh";
pub const WARMUP_JOB: &str = "initial_warmup";

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type JobTask = Arc<dyn Fn() -> JobFuture + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub name: String,
    /// Registered and not stopped
    pub running: bool,
}

#[derive(Debug, Clone, Copy)]
enum Schedule {
    Periodic(Duration),
    Once,
}

struct Job {
    name: String,
    schedule: Schedule,
    next_run: DateTime<Utc>,
    active: bool,
    task: JobTask,
}

/// Timer-driven job runner on an injected clock.
///
/// Due jobs run one after another to completion before the next due time is
/// considered. `run_pending` executes whatever is due right now, which lets
/// tests drive the schedule by advancing a manual clock.
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    jobs: Mutex<Vec<Job>>,
    stopped: AtomicBool,
    stop_signal: Notify,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            jobs: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            stop_signal: Notify::new(),
        }
    }

    /// Run `task` every `interval`, first firing one interval from now.
    pub fn register_periodic<F, Fut>(&self, name: &str, interval: Duration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(name, Schedule::Periodic(interval), interval, task);
    }

    /// Run `task` once after `delay`, then drop the job.
    pub fn register_once<F, Fut>(&self, name: &str, delay: Duration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(name, Schedule::Once, delay, task);
    }

    fn register<F, Fut>(&self, name: &str, schedule: Schedule, first_in: Duration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task: JobTask = Arc::new(move || Box::pin(task()) as JobFuture);
        let job = Job {
            name: name.to_string(),
            schedule,
            next_run: self.clock.now() + to_chrono(first_in),
            active: true,
            task,
        };

        tracing::info!("Registered job '{}' ({:?}, first run in {}s)", name, schedule, first_in.as_secs());
        self.with_jobs(|jobs| {
            jobs.retain(|j| j.name != job.name);
            jobs.push(job);
        });
    }

    pub fn jobs_status(&self) -> Vec<JobStatus> {
        self.with_jobs(|jobs| {
            jobs.iter()
                .map(|j| JobStatus {
                    name: j.name.clone(),
                    running: j.active,
                })
                .collect()
        })
    }

    /// Execute every job that is due. Returns how many ran.
    pub async fn run_pending(&self) -> usize {
        if self.is_stopped() {
            return 0;
        }

        let now = self.clock.now();
        let due: Vec<(String, JobTask)> = self.with_jobs(|jobs| {
            let mut due = Vec::new();
            for job in jobs.iter_mut().filter(|j| j.active && j.next_run <= now) {
                due.push((job.name.clone(), job.task.clone()));
                match job.schedule {
                    Schedule::Periodic(interval) => {
                        // Skip ticks missed while a long body ran
                        let step = to_chrono(interval.max(Duration::from_millis(1)));
                        while job.next_run <= now {
                            job.next_run += step;
                        }
                    }
                    Schedule::Once => job.active = false,
                }
            }
            // One-shot jobs deregister once fired
            jobs.retain(|j| j.active || matches!(j.schedule, Schedule::Periodic(_)));
            due
        });

        for (name, task) in &due {
            tracing::debug!("Running job '{}'", name);
            // A panicking body must not take the timer loop down with it
            if let Err(e) = tokio::spawn(task()).await {
                tracing::error!("Job '{}' panicked: {}", name, e);
            }
        }

        due.len()
    }

    /// Drive the schedule until `stop_all` is called.
    pub async fn run(&self) {
        tracing::info!("Scheduler started");

        while !self.is_stopped() {
            let Some(next) = self.next_due() else {
                self.stop_signal.notified().await;
                continue;
            };

            let wait = (next - self.clock.now()).to_std().unwrap_or_default();
            if !wait.is_zero() {
                tokio::select! {
                    _ = self.clock.sleep(wait) => {}
                    _ = self.stop_signal.notified() => continue,
                }
            }

            self.run_pending().await;
        }

        tracing::info!("Scheduler stopped");
    }

    /// Mark every job stopped and end the driver loop.
    pub fn stop_all(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.with_jobs(|jobs| {
            for job in jobs.iter_mut() {
                job.active = false;
            }
        });
        self.stop_signal.notify_one();
        tracing::info!("All scheduled jobs stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn next_due(&self) -> Option<DateTime<Utc>> {
        self.with_jobs(|jobs| jobs.iter().filter(|j| j.active).map(|j| j.next_run).min())
    }

    fn with_jobs<R>(&self, f: impl FnOnce(&mut Vec<Job>) -> R) -> R {
        let mut jobs = self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut jobs)
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(d.as_millis() as i64)
}

#[derive(Debug)]
pub enum RefreshOutcome {
    Success(RefreshReport),
    /// Another refresh is in flight; nothing was done
    Busy,
    Failed(RefreshError),
}

impl RefreshOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RefreshOutcome::Success(_))
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, RefreshOutcome::Busy)
    }

    pub fn message(&self) -> String {
        match self {
            RefreshOutcome::Success(report) => format!(
                "Refresh completed: {} records stored, {} failed",
                report.stored,
                report.failed.len()
            ),
            RefreshOutcome::Busy => "Refresh already in progress".to_string(),
            RefreshOutcome::Failed(e) => format!("Refresh failed: {}", e),
        }
    }
}

/// Single entry point for refreshes. Refuses to start one while another is
/// running, whichever path (timer or manual) asked for it.
pub struct RefreshCoordinator {
    ingestion: Arc<IngestionService>,
    guard: tokio::sync::Mutex<()>,
}

impl RefreshCoordinator {
    pub fn new(ingestion: Arc<IngestionService>) -> Self {
        Self {
            ingestion,
            guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.guard.try_lock().is_err()
    }

    pub async fn refresh_all(&self) -> RefreshOutcome {
        let Ok(_running) = self.guard.try_lock() else {
            tracing::info!("Full refresh skipped: a refresh is already in progress");
            return RefreshOutcome::Busy;
        };

        match self.ingestion.update_all_markets().await {
            Ok(report) => RefreshOutcome::Success(report),
            Err(e) => {
                tracing::error!("Full refresh failed: {}", e);
                RefreshOutcome::Failed(e)
            }
        }
    }

    pub async fn refresh_market(&self, market: MarketClass) -> RefreshOutcome {
        let Ok(_running) = self.guard.try_lock() else {
            tracing::info!("{} refresh skipped: a refresh is already in progress", market);
            return RefreshOutcome::Busy;
        };

        match self.ingestion.update_market_by_type(market).await {
            Ok(report) => RefreshOutcome::Success(report),
            Err(e) => {
                tracing::error!("{} refresh failed: {}", market, e);
                RefreshOutcome::Failed(e)
            }
        }
    }

    /// Run `f` while holding the refresh guard, or `None` if a refresh is running.
    pub async fn exclusive<T, F, Fut>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _running = self.guard.try_lock().ok()?;
        Some(f().await)
    }
}

/// Register the periodic refresh and the start-up warm-up against `coordinator`.
pub fn register_refresh_jobs(
    scheduler: &Scheduler,
    coordinator: Arc<RefreshCoordinator>,
    interval: Duration,
    warmup_delay: Duration,
) {
    let periodic = coordinator.clone();
    scheduler.register_periodic(REFRESH_JOB, interval, move || {
        let coordinator = periodic.clone();
        async move {
            let outcome = coordinator.refresh_all().await;
            tracing::info!("Scheduled refresh: {}", outcome.message());
        }
    });

    scheduler.register_once(WARMUP_JOB, warmup_delay, move || {
        let coordinator = coordinator.clone();
        async move {
            let outcome = coordinator.refresh_all().await;
            tracing::info!("Warm-up refresh: {}", outcome.message());
        }
    });
}

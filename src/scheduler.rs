//! Per-source update loops.
//!
//! The [`Scheduler`] owns a registry of jobs, one per source name. Each job is
//! a tokio task that runs an ingestion cycle immediately and then once per
//! `update_interval`, until its own token or the process-wide shutdown token
//! fires. Cancellation is observed between cycles and during retry waits; a
//! cycle attempt already in flight runs to completion.

use crate::item::Source;
use crate::pipeline::{CycleError, Pipeline};
use crate::retry::{retry, RetryError, RetryPolicy};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("No job registered for source '{0}'")]
    NotFound(String),
    #[error("A job is already registered for source '{0}'")]
    AlreadyExists(String),
    #[error("Scheduler is shutting down, not starting '{0}'")]
    ShuttingDown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub update_interval: Duration,
    /// Applied to each whole cycle.
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            update_interval: DEFAULT_UPDATE_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }
}

/// Snapshot of a registered job.
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub name: String,
    pub url: String,
    pub active: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<Arc<RetryError<CycleError>>>,
    pub cycles: u64,
}

#[derive(Debug, Default)]
struct JobState {
    last_run: Option<DateTime<Utc>>,
    last_error: Option<Arc<RetryError<CycleError>>>,
    cycles: u64,
}

struct Job {
    source: Source,
    cancel: CancellationToken,
    state: Arc<RwLock<JobState>>,
    handle: JoinHandle<()>,
}

/// Registry of running update loops. At most one job per source name.
pub struct Scheduler {
    pipeline: Pipeline,
    config: SchedulerConfig,
    shutdown: CancellationToken,
    jobs: tokio::sync::RwLock<HashMap<String, Job>>,
}

impl Scheduler {
    /// Every job token is a child of `shutdown`, so cancelling it stops
    /// all loops.
    pub fn new(pipeline: Pipeline, config: SchedulerConfig, shutdown: CancellationToken) -> Self {
        Self {
            pipeline,
            config,
            shutdown,
            jobs: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Registers a job for `source` and spawns its loop. Returns without
    /// waiting for the first cycle.
    ///
    /// Refused once the process-wide token has fired, since the loop would
    /// exit before its first cycle.
    pub async fn start_job(&self, source: Source) -> Result<(), SchedulerError> {
        let mut jobs = self.jobs.write().await;
        if self.shutdown.is_cancelled() {
            return Err(SchedulerError::ShuttingDown(source.name));
        }
        if jobs.contains_key(&source.name) {
            return Err(SchedulerError::AlreadyExists(source.name));
        }

        let cancel = self.shutdown.child_token();
        let state = Arc::new(RwLock::new(JobState::default()));
        let handle = tokio::spawn(update_loop(
            self.pipeline.clone(),
            source.clone(),
            self.config,
            cancel.clone(),
            Arc::clone(&state),
        ));

        tracing::info!(
            source = %source.name,
            url = %source.url,
            interval_secs = self.config.update_interval.as_secs(),
            "Started job"
        );
        jobs.insert(
            source.name.clone(),
            Job {
                source,
                cancel,
                state,
                handle,
            },
        );
        Ok(())
    }

    /// Removes the job, signals its loop and waits for the loop to exit.
    pub async fn stop_job(&self, name: &str) -> Result<(), SchedulerError> {
        let job = self
            .jobs
            .write()
            .await
            .remove(name)
            .ok_or_else(|| SchedulerError::NotFound(name.to_string()))?;

        stop(job).await;
        Ok(())
    }

    pub async fn job_status(&self, name: &str) -> Result<JobStatus, SchedulerError> {
        let jobs = self.jobs.read().await;
        let job = jobs
            .get(name)
            .ok_or_else(|| SchedulerError::NotFound(name.to_string()))?;

        let state = read_state(&job.state);
        Ok(JobStatus {
            name: job.source.name.clone(),
            url: job.source.url.clone(),
            active: true,
            last_run: state.last_run,
            last_error: state.last_error.clone(),
            cycles: state.cycles,
        })
    }

    /// Starts a job for every source with a URL. Stops at the first error;
    /// jobs started before it keep running.
    pub async fn start_all(
        &self,
        sources: impl IntoIterator<Item = Source>,
    ) -> Result<usize, SchedulerError> {
        let mut started = 0;
        for source in sources {
            if source.url.trim().is_empty() {
                tracing::warn!(source = %source.name, "Source has no URL, not scheduling");
                continue;
            }
            self.start_job(source).await?;
            started += 1;
        }
        Ok(started)
    }

    /// Stops every registered job and waits for all loops to exit.
    pub async fn stop_all(&self) {
        let drained: Vec<Job> = self.jobs.write().await.drain().map(|(_, job)| job).collect();
        let count = drained.len();

        for job in &drained {
            job.cancel.cancel();
        }
        futures::future::join_all(drained.into_iter().map(stop)).await;

        if count > 0 {
            tracing::info!(jobs = count, "Stopped all jobs");
        }
    }

    /// Fires the process-wide token, then drains the registry.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.stop_all().await;
    }

    /// Names of registered jobs, sorted.
    pub async fn active_jobs(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

async fn stop(job: Job) {
    job.cancel.cancel();
    if let Err(e) = job.handle.await {
        tracing::error!(source = %job.source.name, error = %e, "Job task did not exit cleanly");
        return;
    }
    tracing::info!(source = %job.source.name, "Stopped job");
}

fn read_state(state: &RwLock<JobState>) -> std::sync::RwLockReadGuard<'_, JobState> {
    state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_state(state: &RwLock<JobState>) -> std::sync::RwLockWriteGuard<'_, JobState> {
    state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn update_loop(
    pipeline: Pipeline,
    source: Source,
    config: SchedulerConfig,
    cancel: CancellationToken,
    state: Arc<RwLock<JobState>>,
) {
    let mut ticker = tokio::time::interval(config.update_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // The first tick completes immediately.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let outcome = retry(config.retry, &cancel, "update cycle", || {
            pipeline.run_cycle(&source, &cancel)
        })
        .await;

        match outcome {
            Ok(report) => {
                let mut state = write_state(&state);
                state.last_run = Some(Utc::now());
                state.last_error = None;
                state.cycles += 1;
                tracing::debug!(source = %source.name, cycles = state.cycles, stored = report.stored, "Recorded cycle");
            }
            Err(e) if e.is_cancelled() || e.last_error().is_some_and(CycleError::is_cancelled) => {
                tracing::debug!(source = %source.name, "Cycle cancelled");
                break;
            }
            Err(e) => {
                tracing::error!(
                    source = %source.name,
                    attempts = e.attempts().unwrap_or_default(),
                    error = %e,
                    "Cycle failed, waiting for next tick"
                );
                write_state(&state).last_error = Some(Arc::new(e));
            }
        }
    }

    tracing::debug!(source = %source.name, "Update loop exited");
}

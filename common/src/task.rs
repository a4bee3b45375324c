//! The replication control loop
//!
//! A [`Task`] watches a source directory and keeps one or more destinations caught up with
//! it by repeatedly launching copy jobs:
//!
//! 1. one job per destination is launched as soon as the task starts,
//! 2. every `interval` each destination is compared against the source and, if it drifted
//!    and its previous job has resolved, a new job is launched for it,
//! 3. once nothing drifted and no job was active for `wait_exit`, the task stops.
//!
//! At most one job per destination is ever in flight. Job failures are reported through
//! the [`Notifier`] and retried on the next drift, they never stop the task.
//!
//! # Cancellation
//!
//! [`TaskHandle::terminate`] can be called from anywhere, any number of times. Jobs that
//! did not start yet are cancelled, a job that is already copying runs to completion and
//! the loop exits without waiting for the rest of the interval.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::error::ConfigurationError;
use crate::filter::Exclusion;
use crate::invoke::{self, CopyOutcome, CopyPrimitive, CopyRequest};
use crate::job::{JobHandle, JobState, WorkerPool};
use crate::notify::Notifier;
use crate::prune;
use crate::report::{self, Report};
use crate::tree;

/// Scheduling parameters of a replication task
#[derive(Debug, Clone)]
pub struct Settings {
    /// allow two copy jobs to run in parallel when there are at least two destinations
    pub multithread: bool,
    /// delay between two drift checks
    pub interval: Duration,
    /// stop after this long without drift and without an active job
    pub wait_exit: Duration,
    /// remove source files once they are identical in every destination
    pub delete_source: bool,
    pub copy: invoke::Settings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            multithread: false,
            interval: Duration::from_secs(60),
            wait_exit: Duration::from_secs(30 * 60),
            delete_source: false,
            copy: invoke::Settings::default(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Idle = 0,
    Running = 1,
    Stopped = 2,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Idle,
            1 => TaskState::Running,
            _ => TaskState::Stopped,
        }
    }
}

/// Copy jobs may run two at a time only when asked to and when there is something to
/// parallelize
#[must_use]
pub fn worker_count(multithread: bool, destinations: usize) -> usize {
    if multithread && destinations >= 2 { 2 } else { 1 }
}

#[derive(Debug)]
struct Control {
    state: AtomicU8,
    // replaced on every run so that a terminate() issued before start has no lasting effect
    token: Mutex<CancellationToken>,
}

impl Control {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(TaskState::Idle as u8),
            token: Mutex::new(CancellationToken::new()),
        }
    }

    fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    /// Install a fresh token and enter `Running`, atomically with respect to `terminate`
    fn start(&self) -> CancellationToken {
        let mut current = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        let token = CancellationToken::new();
        *current = token.clone();
        self.state
            .store(TaskState::Running as u8, Ordering::Release);
        token
    }

    fn terminate(&self) {
        let token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        if self
            .state
            .compare_exchange(
                TaskState::Running as u8,
                TaskState::Stopped as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            tracing::warn!("Stopping replication task");
        }
        // prevent queued jobs from starting after terminate was called
        token.cancel();
    }
}

/// Running scope of a task: `Running` while alive, `Stopped` once dropped, on every exit
/// path
struct RunGuard<'a> {
    control: &'a Control,
    token: CancellationToken,
}

impl<'a> RunGuard<'a> {
    fn enter(control: &'a Control) -> Self {
        let token = control.start();
        tracing::info!("Starting replication task");
        Self { control, token }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.control
            .state
            .store(TaskState::Stopped as u8, Ordering::Release);
        self.token.cancel();
    }
}

/// Cloneable remote control for a [`Task`]
#[derive(Debug, Clone)]
pub struct TaskHandle {
    control: Arc<Control>,
}

impl TaskHandle {
    /// Ask the task to stop. Idempotent and safe to call before the task started.
    pub fn terminate(&self) {
        self.control.terminate();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    #[must_use]
    pub fn state(&self) -> TaskState {
        self.control.state()
    }
}

/// Moment new work was last observed
#[derive(Debug)]
struct IdleTimer {
    last_change: tokio::time::Instant,
}

impl IdleTimer {
    fn new() -> Self {
        Self {
            last_change: tokio::time::Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_change = tokio::time::Instant::now();
    }

    fn has_expired(&self, wait_exit: Duration) -> bool {
        let idle = self.last_change.elapsed();
        tracing::debug!(
            "Time since last detected change: {:.1} s",
            idle.as_secs_f64()
        );
        idle >= wait_exit
    }
}

async fn sanitize_destinations(destinations: &[PathBuf]) -> Vec<PathBuf> {
    let mut sanitized = vec![];
    for destination in destinations {
        if destination.as_os_str().is_empty() {
            continue;
        }
        match tokio::fs::metadata(destination).await {
            Ok(metadata) if metadata.is_dir() => sanitized.push(destination.clone()),
            _ => tracing::warn!("Destination {:?} does not exist!", destination),
        }
    }
    sanitized
}

fn minutes(duration: Duration) -> f64 {
    duration.as_secs_f64() / 60.0
}

/// Watches a source folder and launches copy jobs for new data
pub struct Task<P: CopyPrimitive> {
    primitive: Arc<P>,
    notifier: Arc<dyn Notifier>,
    control: Arc<Control>,
}

impl<P: CopyPrimitive> Task<P> {
    pub fn new(primitive: P, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            primitive: Arc::new(primitive),
            notifier,
            control: Arc::new(Control::new()),
        }
    }

    #[must_use]
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            control: self.control.clone(),
        }
    }

    /// Request the task to stop, see [`TaskHandle::terminate`]
    pub fn terminate(&self) {
        self.control.terminate();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    #[must_use]
    pub fn state(&self) -> TaskState {
        self.control.state()
    }

    /// Mirror `source` into every usable entry of `destinations` until the task was idle
    /// for `settings.wait_exit` or got terminated.
    ///
    /// Destinations that are empty or not existing directories are dropped with a warning.
    /// Fails only if nothing is left to copy to or the exclusion is invalid.
    #[instrument(skip(self))]
    pub async fn run(
        &self,
        source: &Path,
        destinations: &[PathBuf],
        settings: &Settings,
    ) -> Result<Report, ConfigurationError> {
        let guard = RunGuard::enter(&self.control);
        self.run_scoped(source, destinations, settings, &guard.token)
            .await
    }

    fn submit(
        &self,
        pool: &WorkerPool,
        token: &CancellationToken,
        request: CopyRequest,
    ) -> JobHandle {
        let destination = request.destination.clone();
        let primitive = self.primitive.clone();
        let notifier = self.notifier.clone();
        pool.submit(&destination, token, move || async move {
            match invoke::invoke(primitive.as_ref(), &request).await {
                CopyOutcome::Success | CopyOutcome::Benign(_) => {
                    tracing::debug!(
                        "copy job for {:?} terminated successfully",
                        &request.destination
                    );
                    JobState::Done
                }
                CopyOutcome::Failure(error) => {
                    tracing::error!("{}", &error);
                    notifier.failed(&error);
                    JobState::Failed
                }
            }
        })
    }

    async fn run_scoped(
        &self,
        source: &Path,
        destinations: &[PathBuf],
        settings: &Settings,
        token: &CancellationToken,
    ) -> Result<Report, ConfigurationError> {
        let exclusion = Exclusion::from_suffix(&settings.copy.exclude_suffix)?;
        let destinations = sanitize_destinations(destinations).await;
        if destinations.is_empty() {
            return Err(ConfigurationError::NoDestinations);
        }
        tracing::info!("Source folder: {:?}", source);
        for (counter, destination) in destinations.iter().enumerate() {
            tracing::info!("Destination folder {}: {:?}", counter + 1, destination);
        }
        let pool = WorkerPool::new(worker_count(settings.multithread, destinations.len()));
        let request = |destination: &PathBuf| {
            CopyRequest::new(source, destination, &exclusion, &settings.copy)
        };
        let mut idle = IdleTimer::new();
        let mut deleted = 0;
        // make at least one copy call for each directory even if we don't have anything to do yet
        let mut jobs: Vec<JobHandle> = destinations
            .iter()
            .map(|destination| self.submit(&pool, token, request(destination)))
            .collect();
        while self.control.is_running() {
            // prevent an early stop when a copy job is running long
            if jobs.iter().any(|job| !job.state().is_terminal()) {
                idle.touch();
            }
            if idle.has_expired(settings.wait_exit) {
                tracing::info!(
                    "Stopping replication after {:.1} min of waiting",
                    minutes(settings.wait_exit)
                );
                break;
            }
            for job in &mut jobs {
                // read before comparing: drift seen while the job was still copying is no
                // reason to start another one
                let resolved = job.state().is_terminal();
                let converged = match tree::is_subset(source, job.destination(), &exclusion).await
                {
                    Ok(converged) => converged,
                    Err(error) => {
                        tracing::warn!(
                            "Could not compare {:?} with {:?}: {:#}",
                            source,
                            job.destination(),
                            anyhow::Error::from(error)
                        );
                        continue;
                    }
                };
                if converged {
                    continue;
                }
                idle.touch();
                if resolved && self.control.is_running() {
                    tracing::debug!("{:?} drifted, launching a new copy job", job.destination());
                    let destination = job.destination().to_owned();
                    *job = self.submit(&pool, token, request(&destination));
                }
            }
            if settings.delete_source {
                deleted += prune::prune(source, &destinations, &exclusion).await;
            }
            if !self.control.is_running() {
                break;
            }
            tracing::info!(
                "Waiting for {:.1} min before checking for new files",
                minutes(settings.interval)
            );
            tokio::select! {
                () = tokio::time::sleep(settings.interval) => {}
                () = token.cancelled() => {}
            }
        }
        for job in jobs {
            job.join().await;
        }
        let report = report::build(source, &destinations, &exclusion, deleted).await;
        tracing::info!("Replication summary:");
        report.log();
        self.notifier.finished();
        Ok(report)
    }
}

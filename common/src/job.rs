//! Bounded worker pool and per-destination job handles
//!
//! Jobs are tokio tasks that must take a permit from the pool's semaphore before doing
//! any work, so at most `width` of them run at once. A job still waiting for its permit
//! can be cancelled through its [`CancellationToken`]; once it holds the permit it runs to
//! completion. The worker only ever writes its own state. The control loop only reads it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio_util::sync::CancellationToken;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    Pending = 0,
    Running = 1,
    Done = 2,
    Failed = 3,
    Cancelled = 4,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => JobState::Pending,
            1 => JobState::Running,
            2 => JobState::Done,
            3 => JobState::Failed,
            _ => JobState::Cancelled,
        }
    }

    /// Done, failed or cancelled
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Done | JobState::Failed | JobState::Cancelled
        )
    }
}

#[derive(Debug)]
struct SharedState(AtomicU8);

impl SharedState {
    fn new() -> Self {
        Self(AtomicU8::new(JobState::Pending as u8))
    }

    fn get(&self) -> JobState {
        JobState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: JobState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// The control loop's record of one destination's current or last copy attempt
#[derive(Debug)]
pub struct JobHandle {
    destination: PathBuf,
    state: Arc<SharedState>,
    join: tokio::task::JoinHandle<()>,
}

impl JobHandle {
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn state(&self) -> JobState {
        self.state.get()
    }

    /// Wait for the worker to finish, whatever the outcome
    pub async fn join(self) {
        if let Err(error) = self.join.await {
            tracing::error!("copy job for {:?} panicked: {}", &self.destination, error);
        }
    }
}

/// Fixed-width pool of copy workers
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<tokio::sync::Semaphore>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(width: usize) -> Self {
        Self {
            permits: Arc::new(tokio::sync::Semaphore::new(width.max(1))),
        }
    }

    /// Queue `job` for `destination`. The job resolves to [`JobState::Done`] or
    /// [`JobState::Failed`]; it never starts if `token` is cancelled first.
    pub fn submit<F, Fut>(
        &self,
        destination: &Path,
        token: &CancellationToken,
        job: F,
    ) -> JobHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = JobState> + Send + 'static,
    {
        let state = Arc::new(SharedState::new());
        let permits = self.permits.clone();
        let token = token.clone();
        let join = tokio::spawn({
            let state = state.clone();
            async move {
                let permit = tokio::select! {
                    biased;
                    () = token.cancelled() => None,
                    permit = permits.acquire_owned() => permit.ok(),
                };
                // the token may have fired while we were being granted the permit
                let Some(_permit) = permit.filter(|_| !token.is_cancelled()) else {
                    tracing::debug!("copy job cancelled");
                    state.set(JobState::Cancelled);
                    return;
                };
                state.set(JobState::Running);
                let outcome = job().await;
                state.set(if outcome.is_terminal() {
                    outcome
                } else {
                    JobState::Done
                });
            }
        });
        JobHandle {
            destination: destination.to_owned(),
            state,
            join,
        }
    }
}

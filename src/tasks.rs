//! Scheduled background tasks with cooperative cancellation
//!
//! Every watcher and processing loop is a [`PeriodicTask`]. The runner owns
//! the loop: it calls `tick`, logs and counts failures, waits according to
//! the [`Schedule`], and stops at the next wait point once the shared
//! [`CancellationToken`] fires. A tick in flight always runs to completion.

use crate::error::RelayerResult;
use crate::metrics;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What a tick found to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Work was done and more may be waiting
    Busy,
    /// Nothing to do right now
    Idle,
}

#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &str;

    async fn tick(&self) -> RelayerResult<Tick>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub busy_interval: Duration,
    pub idle_interval: Duration,
    pub error_backoff: Duration,
}

impl Schedule {
    fn delay_after(&self, tick: &RelayerResult<Tick>) -> Duration {
        match tick {
            Ok(Tick::Busy) => self.busy_interval,
            Ok(Tick::Idle) => self.idle_interval,
            Err(_) => self.error_backoff,
        }
    }
}

/// Drive `task` until `cancel` fires
pub async fn run_periodic(task: Arc<dyn PeriodicTask>, schedule: Schedule, cancel: CancellationToken) {
    let name = task.name().to_string();
    info!(task = %name, "Task started");

    while !cancel.is_cancelled() {
        let result = task.tick().await;
        if let Err(e) = &result {
            if e.is_retryable() {
                warn!(task = %name, error = %e, "Task iteration failed, retrying");
            } else {
                error!(task = %name, error = %e, alert = e.should_alert(), "Task iteration failed");
            }
            metrics::record_task_error(&name, e.kind());
        }

        let delay = schedule.delay_after(&result);
        if delay.is_zero() {
            tokio::task::yield_now().await;
            continue;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!(task = %name, "Task stopped");
}

/// Owns every spawned task and the token that stops them
pub struct TaskManager {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl TaskManager {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            tasks: JoinSet::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn_periodic(&mut self, task: Arc<dyn PeriodicTask>, schedule: Schedule) {
        let cancel = self.cancel.clone();
        self.tasks.spawn(run_periodic(task, schedule, cancel));
    }

    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(future);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel everything and wait up to `grace` for tasks to finish
    pub async fn shutdown(mut self, grace: Duration) {
        self.cancel.cancel();
        let drain = async {
            while let Some(joined) = self.tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Task panicked or was aborted");
                }
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("Tasks did not stop within {:?}, aborting", grace);
            self.tasks.abort_all();
        }
    }
}

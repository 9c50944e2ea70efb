//! Bounded fan-out of independent async work items.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// How one work item ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    Completed(T),
    Failed(String),
    TimedOut,
    Panicked(String),
    /// The run was cancelled before this item finished (or started).
    Cancelled,
}

impl<T> TaskOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }

    /// Failure description, `None` for completed items.
    pub fn failure(&self) -> Option<String> {
        match self {
            TaskOutcome::Completed(_) => None,
            TaskOutcome::Failed(reason) => Some(reason.clone()),
            TaskOutcome::TimedOut => Some("timed out".to_string()),
            TaskOutcome::Panicked(message) => Some(format!("worker panicked: {message}")),
            TaskOutcome::Cancelled => Some("cancelled".to_string()),
        }
    }
}

/// An item paired with its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport<I, T> {
    pub item: I,
    pub outcome: TaskOutcome<T>,
}

/// Runs a worker over a list of items with at most `max_concurrency` in
/// flight. Items never affect each other: errors, timeouts and panics are
/// captured per item. The runner does not retry.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    max_concurrency: usize,
    task_timeout: Option<Duration>,
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

impl TaskRunner {
    /// A ceiling of 0 is treated as 1.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            task_timeout: None,
        }
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout
    }

    /// Run `worker` over `items`. Reports come back in submission order.
    ///
    /// A permit is acquired before each task is spawned, so cancelling
    /// `token` stops dispatch immediately; in-flight tasks are aborted and
    /// every unfinished item is reported as [`TaskOutcome::Cancelled`].
    pub async fn run<I, T, E, F, Fut>(
        &self,
        items: Vec<I>,
        worker: F,
        token: &CancellationToken,
    ) -> Vec<TaskReport<I, T>>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut outcomes: Vec<Option<TaskOutcome<T>>> = items.iter().map(|_| None).collect();
        let mut tasks = JoinSet::new();
        let mut slots = HashMap::with_capacity(items.len());

        debug!(
            items = items.len(),
            max_concurrency = self.max_concurrency,
            "Dispatching tasks"
        );

        for (index, item) in items.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let work = worker(item.clone());
            let timeout = self.task_timeout;
            let handle = tasks.spawn(async move {
                let _permit = permit;
                let result = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, work).await {
                        Ok(result) => result,
                        Err(_) => return TaskOutcome::TimedOut,
                    },
                    None => work.await,
                };
                match result {
                    Ok(value) => TaskOutcome::Completed(value),
                    Err(e) => TaskOutcome::Failed(e.to_string()),
                }
            });
            slots.insert(handle.id(), index);
        }

        let mut aborted = false;
        loop {
            let joined = tokio::select! {
                biased;
                _ = token.cancelled(), if !aborted => {
                    debug!(in_flight = tasks.len(), "Run cancelled, aborting tasks");
                    tasks.abort_all();
                    aborted = true;
                    continue;
                }
                joined = tasks.join_next_with_id() => joined,
            };
            let Some(joined) = joined else {
                break;
            };

            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome),
                Err(e) if e.is_panic() => {
                    let id = e.id();
                    let message = panic_message(e.into_panic());
                    warn!(panic = %message, "Task panicked");
                    (id, TaskOutcome::Panicked(message))
                }
                Err(e) => (e.id(), TaskOutcome::Cancelled),
            };
            if let Some(&index) = slots.get(&id) {
                outcomes[index] = Some(outcome);
            }
        }

        items
            .into_iter()
            .zip(outcomes)
            .map(|(item, outcome)| TaskReport {
                item,
                outcome: outcome.unwrap_or(TaskOutcome::Cancelled),
            })
            .collect()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

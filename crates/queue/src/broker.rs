//! Weighted task broker over the Postgres-backed queue.
//!
//! The claim loop walks a weighted round-robin sequence over the three
//! queues (6:3:1), so higher-priority queues get more claim opportunities
//! without starving the others. Multiple broker instances can run against
//! the same database; `FOR UPDATE SKIP LOCKED` claims prevent
//! double-dispatch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use logvault_db::models::Task;
use logvault_db::repositories::TaskRepo;
use sqlx::PgPool;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::QUEUE_WEIGHTS;

/// Idle sleep between claim sweeps that found no work.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// First retry delay; doubles per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(10);

/// Upper bound on the exponential retry delay.
const RETRY_MAX_DELAY: Duration = Duration::from_secs(15 * 60);

/// How long in-flight tasks get to finish after shutdown begins.
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(30);

/// Processing outcome reported by a handler.
///
/// Handlers that decide a job is hopeless (policy errors) mark the job row
/// failed and return `Ok` so the task is acknowledged instead of retried.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Upstream asked us to back off; re-queue after the hinted delay.
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    /// Transient failure; re-queue with exponential backoff until the
    /// retry budget is exhausted, then dead-letter.
    #[error("{0}")]
    Retriable(String),

    /// Unrecoverable for the queue: dead-letter immediately so an operator
    /// sees it (used for data-integrity violations).
    #[error("{0}")]
    Fatal(String),
}

/// A processor for one task kind.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn process(&self, task: &Task) -> Result<(), TaskError>;
}

/// Expand the queue weights into one service cycle, e.g.
/// `[critical x6, default x3, low x1]`.
fn weighted_cycle() -> Vec<&'static str> {
    let mut cycle = Vec::new();
    for (queue, weight) in QUEUE_WEIGHTS {
        cycle.extend(std::iter::repeat(*queue).take(*weight));
    }
    cycle
}

/// Exponential backoff for the nth attempt (1-based), capped.
fn retry_delay(attempts: i32) -> Duration {
    let exp = attempts.saturating_sub(1).min(10) as u32;
    let delay = RETRY_BASE_DELAY.saturating_mul(2u32.saturating_pow(exp));
    delay.min(RETRY_MAX_DELAY)
}

/// The worker-pool server: claims tasks and dispatches them to registered
/// handlers with bounded concurrency.
pub struct Broker {
    pool: PgPool,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    concurrency: usize,
    stop_grace: Duration,
}

impl Broker {
    pub fn new(pool: PgPool, concurrency: usize) -> Self {
        Self {
            pool,
            handlers: HashMap::new(),
            concurrency: concurrency.max(1),
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    /// Register the handler for a task kind. Last registration wins.
    pub fn register(&mut self, kind: &str, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(kind.to_string(), handler);
    }

    /// Claim-and-dispatch until `cancel` fires, then drain in-flight tasks
    /// within the stop grace. Tasks still running after the grace are
    /// released back to `pending`.
    pub async fn run(self, cancel: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let in_flight: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let mut join_set: JoinSet<()> = JoinSet::new();
        let cycle = weighted_cycle();

        tracing::info!(
            concurrency = self.concurrency,
            "task broker started",
        );

        'claim: loop {
            let mut claimed_any = false;

            for queue in &cycle {
                if cancel.is_cancelled() {
                    break 'claim;
                }

                // Reserve a slot before claiming so a claimed task is never
                // left waiting for capacity.
                let permit = tokio::select! {
                    _ = cancel.cancelled() => break 'claim,
                    permit = semaphore.clone().acquire_owned() => {
                        permit.expect("semaphore closed")
                    }
                };

                let task = match TaskRepo::claim(&self.pool, queue).await {
                    Ok(Some(task)) => task,
                    Ok(None) => {
                        drop(permit);
                        continue;
                    }
                    Err(e) => {
                        drop(permit);
                        tracing::error!(queue = %queue, error = %e, "task claim failed");
                        continue;
                    }
                };

                claimed_any = true;
                in_flight.lock().await.insert(task.id.clone());

                let handler = self.handlers.get(&task.kind).cloned();
                let pool = self.pool.clone();
                let tracker = Arc::clone(&in_flight);
                let task_id = task.id.clone();

                join_set.spawn(async move {
                    let _permit = permit;
                    process_one(&pool, task, handler).await;
                    // Aborted tasks never get here; the shutdown path
                    // releases whatever is left in the tracker.
                    tracker.lock().await.remove(&task_id);
                });

                // Reap finished tasks so panics surface promptly.
                while let Some(result) = join_set.try_join_next() {
                    if result.is_err() {
                        tracing::error!("task panicked");
                    }
                }
            }

            if !claimed_any {
                tokio::select! {
                    _ = cancel.cancelled() => break 'claim,
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            }
        }

        // Drain: give in-flight tasks the stop grace, then abort and
        // release whatever is left so another instance can pick it up.
        tracing::info!("task broker stopping, draining in-flight tasks");
        let drained = tokio::time::timeout(self.stop_grace, async {
            while join_set.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            join_set.shutdown().await;
            let stuck: Vec<String> = in_flight.lock().await.iter().cloned().collect();
            for id in stuck {
                if let Err(e) = TaskRepo::release(&self.pool, &id).await {
                    tracing::error!(task_id = %id, error = %e, "failed to release task");
                }
            }
        }
        tracing::info!("task broker stopped");
    }
}

/// Run one claimed task through its handler and record the outcome.
async fn process_one(pool: &PgPool, task: Task, handler: Option<Arc<dyn TaskHandler>>) {
    let Some(handler) = handler else {
        tracing::error!(task_id = %task.id, kind = %task.kind, "no handler registered");
        let _ = TaskRepo::mark_dead(pool, &task.id, "no handler registered").await;
        return;
    };

    let outcome = handler.process(&task).await;

    let result = match outcome {
        Ok(()) => TaskRepo::mark_done(pool, &task.id).await,
        Err(TaskError::RateLimited(delay)) => {
            tracing::warn!(
                task_id = %task.id,
                kind = %task.kind,
                delay_secs = delay.as_secs(),
                "task rate limited, re-queueing",
            );
            TaskRepo::retry_later(pool, &task.id, delay, "rate limited").await
        }
        Err(TaskError::Retriable(msg)) => {
            if task.attempts >= task.max_retries {
                tracing::error!(
                    task_id = %task.id,
                    kind = %task.kind,
                    attempts = task.attempts,
                    error = %msg,
                    "retry budget exhausted, dead-lettering task",
                );
                TaskRepo::mark_dead(pool, &task.id, &msg).await
            } else {
                let delay = retry_delay(task.attempts);
                tracing::warn!(
                    task_id = %task.id,
                    kind = %task.kind,
                    attempts = task.attempts,
                    delay_secs = delay.as_secs(),
                    error = %msg,
                    "task failed, re-queueing",
                );
                TaskRepo::retry_later(pool, &task.id, delay, &msg).await
            }
        }
        Err(TaskError::Fatal(msg)) => {
            tracing::error!(
                task_id = %task.id,
                kind = %task.kind,
                error = %msg,
                "fatal task failure, dead-lettering",
            );
            TaskRepo::mark_dead(pool, &task.id, &msg).await
        }
    };

    if let Err(e) = result {
        tracing::error!(task_id = %task.id, error = %e, "failed to record task outcome");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{QUEUE_CRITICAL, QUEUE_DEFAULT, QUEUE_LOW};

    #[test]
    fn cycle_serves_queues_by_weight() {
        let cycle = weighted_cycle();

        assert_eq!(cycle.len(), 10);
        assert_eq!(cycle.iter().filter(|q| **q == QUEUE_CRITICAL).count(), 6);
        assert_eq!(cycle.iter().filter(|q| **q == QUEUE_DEFAULT).count(), 3);
        assert_eq!(cycle.iter().filter(|q| **q == QUEUE_LOW).count(), 1);
        // Priorities, not strict preemption: one full cycle still reaches
        // the low queue.
        assert_eq!(*cycle.last().unwrap(), QUEUE_LOW);
    }

    #[test]
    fn retry_delay_grows_exponentially_and_caps() {
        assert_eq!(retry_delay(1), Duration::from_secs(10));
        assert_eq!(retry_delay(2), Duration::from_secs(20));
        assert_eq!(retry_delay(3), Duration::from_secs(40));
        assert_eq!(retry_delay(100), RETRY_MAX_DELAY);
    }

    #[test]
    fn retry_delay_handles_zero_attempts() {
        assert_eq!(retry_delay(0), Duration::from_secs(10));
    }
}

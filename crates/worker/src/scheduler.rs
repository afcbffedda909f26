//! Zone scheduler: on every tick, find due zones and enqueue the
//! plan-appropriate window task.
//!
//! Multiple scheduler instances may run concurrently: deterministic task
//! ids make the queue reject a window that another instance already
//! enqueued, and that conflict is treated as success.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use logvault_db::models::{Plan, Zone};
use logvault_db::repositories::ZoneRepo;
use logvault_queue::{
    EnqueueError, LogPullPayload, QueueClient, SecurityPollPayload,
};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

/// Destination for window tasks; narrowed from the queue client so the
/// per-zone decision is testable without a database.
#[async_trait]
pub trait WindowQueue: Send + Sync {
    async fn log_pull(&self, payload: &LogPullPayload) -> Result<(), EnqueueError>;
    async fn security_poll(&self, payload: &SecurityPollPayload) -> Result<(), EnqueueError>;
}

#[async_trait]
impl WindowQueue for QueueClient {
    async fn log_pull(&self, payload: &LogPullPayload) -> Result<(), EnqueueError> {
        self.enqueue_log_pull(payload).await
    }

    async fn security_poll(&self, payload: &SecurityPollPayload) -> Result<(), EnqueueError> {
        self.enqueue_security_poll(payload).await
    }
}

/// Compute the pull window for a due zone: `end = now`, `start` resumes
/// from the last pull or reaches back one interval on the first run.
pub fn pull_window(zone: &Zone, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = zone
        .last_pulled_at
        .unwrap_or_else(|| now - Duration::seconds(i64::from(zone.pull_interval_secs)));
    (start, now)
}

/// Enqueue the right task for one due zone.
///
/// Returns `true` when the window is covered: either freshly enqueued or
/// already enqueued by a sibling scheduler (id conflict). Business zones
/// return `false`: the instant-logs daemon owns them and `last_pulled_at`
/// must stay untouched.
pub async fn schedule_zone<Q: WindowQueue>(
    queue: &Q,
    zone: &Zone,
    now: DateTime<Utc>,
) -> Result<bool, EnqueueError> {
    let (start, end) = pull_window(zone, now);

    let outcome = match zone.plan {
        Plan::Enterprise => {
            queue
                .log_pull(&LogPullPayload {
                    zone_id: zone.id,
                    customer_id: zone.customer_id,
                    period_start: start,
                    period_end: end,
                })
                .await
        }
        Plan::FreePro => {
            queue
                .security_poll(&SecurityPollPayload {
                    zone_id: zone.id,
                    customer_id: zone.customer_id,
                    period_start: start,
                    period_end: end,
                })
                .await
        }
        Plan::Business => return Ok(false),
    };

    match outcome {
        Ok(()) => Ok(true),
        // Another instance already enqueued this window.
        Err(EnqueueError::TaskIdConflict) => Ok(true),
        Err(e) => Err(e),
    }
}

/// The periodic scheduler task.
pub struct ZoneScheduler {
    pool: PgPool,
    queue: QueueClient,
    interval: std::time::Duration,
}

impl ZoneScheduler {
    pub fn new(pool: PgPool, queue: QueueClient, interval: std::time::Duration) -> Self {
        Self {
            pool,
            queue,
            interval,
        }
    }

    /// Tick until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        // The immediate first tick would race startup; skip it.
        ticker.tick().await;

        tracing::info!(interval_secs = self.interval.as_secs(), "zone scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("zone scheduler stopped");
                    return;
                }
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    async fn tick(&self) {
        let zones = match ZoneRepo::list_due(&self.pool).await {
            Ok(zones) => zones,
            Err(e) => {
                tracing::error!(error = %e, "scheduler: list due zones failed");
                return;
            }
        };

        for zone in zones {
            let now = Utc::now();
            match schedule_zone(&self.queue, &zone, now).await {
                Ok(true) => {
                    if let Err(e) = ZoneRepo::update_last_pulled(&self.pool, zone.id, now).await {
                        tracing::error!(
                            zone_id = %zone.id,
                            error = %e,
                            "scheduler: update last pulled failed",
                        );
                    }
                }
                Ok(false) => {} // business plan, daemon-owned
                Err(e) => {
                    tracing::error!(
                        zone_id = %zone.id,
                        error = %e,
                        "scheduler: enqueue window task failed",
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use logvault_queue::{pull_task_id, security_task_id};
    use uuid::Uuid;

    use super::*;

    fn zone(plan: Plan, last_pulled_at: Option<DateTime<Utc>>) -> Zone {
        Zone {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            edge_zone_id: "ezid".into(),
            name: "example.com".into(),
            plan,
            pull_interval_secs: 3600,
            last_pulled_at,
            active: true,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    /// Queue fake that records ids and rejects duplicates like the real
    /// broker's primary key does.
    #[derive(Default)]
    struct FakeQueue {
        ids: Mutex<HashSet<String>>,
        pulls: Mutex<Vec<LogPullPayload>>,
        polls: Mutex<Vec<SecurityPollPayload>>,
    }

    impl FakeQueue {
        fn admit(&self, id: String) -> Result<(), EnqueueError> {
            if !self.ids.lock().unwrap().insert(id) {
                return Err(EnqueueError::TaskIdConflict);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl WindowQueue for FakeQueue {
        async fn log_pull(&self, payload: &LogPullPayload) -> Result<(), EnqueueError> {
            self.admit(pull_task_id(payload.zone_id, payload.period_start))?;
            self.pulls.lock().unwrap().push(payload.clone());
            Ok(())
        }

        async fn security_poll(
            &self,
            payload: &SecurityPollPayload,
        ) -> Result<(), EnqueueError> {
            self.admit(security_task_id(payload.zone_id, payload.period_start))?;
            self.polls.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    #[test]
    fn window_resumes_from_last_pull() {
        let now = Utc::now();
        let last = now - Duration::minutes(90);
        let z = zone(Plan::Enterprise, Some(last));

        assert_eq!(pull_window(&z, now), (last, now));
    }

    #[test]
    fn first_window_reaches_back_one_interval() {
        let now = Utc::now();
        let z = zone(Plan::Enterprise, None);

        let (start, end) = pull_window(&z, now);
        assert_eq!(end, now);
        assert_eq!(start, now - Duration::seconds(3600));
    }

    #[tokio::test]
    async fn enterprise_zone_enqueues_log_pull() {
        let queue = FakeQueue::default();
        let z = zone(Plan::Enterprise, None);

        assert!(schedule_zone(&queue, &z, Utc::now()).await.unwrap());
        assert_eq!(queue.pulls.lock().unwrap().len(), 1);
        assert!(queue.polls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn free_pro_zone_enqueues_security_poll() {
        let queue = FakeQueue::default();
        let z = zone(Plan::FreePro, None);

        assert!(schedule_zone(&queue, &z, Utc::now()).await.unwrap());
        assert!(queue.pulls.lock().unwrap().is_empty());
        assert_eq!(queue.polls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn business_zone_is_skipped() {
        let queue = FakeQueue::default();
        let z = zone(Plan::Business, None);

        assert!(!schedule_zone(&queue, &z, Utc::now()).await.unwrap());
        assert!(queue.pulls.lock().unwrap().is_empty());
        assert!(queue.polls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_window_is_treated_as_success() {
        // Two scheduler instances race on the same due zone and tick time:
        // exactly one task lands in the queue, both report success.
        let queue = FakeQueue::default();
        let now = Utc::now();
        let z = zone(Plan::Enterprise, Some(now - Duration::hours(2)));

        assert!(schedule_zone(&queue, &z, now).await.unwrap());
        assert!(schedule_zone(&queue, &z, now).await.unwrap());

        assert_eq!(queue.pulls.lock().unwrap().len(), 1);
    }
}

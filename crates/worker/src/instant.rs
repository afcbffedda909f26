//! Instant-logs daemon: one persistent upstream websocket session per
//! business-plan zone, batching lines into fan-out uploads.
//!
//! The supervisor reconciles the live session set against the database
//! every 30 seconds: sessions for zones that left the business plan are
//! cancelled (their buffers flush on the way out), new business zones get a
//! fresh session. Sessions reconnect with exponential backoff and never
//! interleave uploads from two zones.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use logvault_db::models::{Plan, Zone};
use logvault_db::repositories::{CustomerRepo, ZoneRepo};
use logvault_edge::InstantLogsClient;
use logvault_notify::Severity;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::WorkerContext;

/// How often the supervisor re-queries the zone set.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Interval flush: a quiet stream still uploads twice a minute.
const FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Size flush: a busy stream uploads every this-many lines.
const MAX_BUFFER_LINES: usize = 2000;

/// Detached deadline for one batch upload; a cancelled stream must not
/// drop in-flight data.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Reconnect backoff bounds: 5s doubling up to 5 minutes.
const MIN_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// Backing off longer than this raises an operator alert.
const ALERT_BACKOFF_THRESHOLD: Duration = Duration::from_secs(60);

/// Object-key prefix for streamed archives.
const LOG_TYPE_INSTANT: &str = "instant";

#[derive(Debug, thiserror::Error)]
enum SessionError {
    #[error("get customer: {0}")]
    Database(#[from] sqlx::Error),

    #[error("decrypt api token: {0}")]
    Kms(#[from] logvault_kms::KmsError),

    #[error(transparent)]
    Edge(#[from] logvault_edge::EdgeError),

    #[error("stream closed by remote")]
    StreamClosed,
}

// ---------------------------------------------------------------------------
// Flush buffer
// ---------------------------------------------------------------------------

/// One flushed batch: LF-joined lines plus the flush window.
struct FlushBatch {
    raw: Vec<u8>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    lines: usize,
}

/// Line buffer tracking the current flush window `[last_flush, now]`.
struct FlushBuffer {
    lines: Vec<Vec<u8>>,
    last_flush: DateTime<Utc>,
}

impl FlushBuffer {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            lines: Vec::with_capacity(MAX_BUFFER_LINES),
            last_flush: now,
        }
    }

    /// Append a line; returns `true` once the size threshold is reached.
    fn push(&mut self, line: Vec<u8>) -> bool {
        self.lines.push(line);
        self.lines.len() >= MAX_BUFFER_LINES
    }

    /// Drain the buffer into a batch, advancing the flush window. `None`
    /// when there is nothing to upload.
    fn take(&mut self, now: DateTime<Utc>) -> Option<FlushBatch> {
        if self.lines.is_empty() {
            return None;
        }

        let count = self.lines.len();
        let mut raw = Vec::new();
        for line in self.lines.drain(..) {
            raw.extend_from_slice(&line);
            raw.push(b'\n');
        }

        let batch = FlushBatch {
            raw,
            start: self.last_flush,
            end: now,
            lines: count,
        };
        self.last_flush = now;
        Some(batch)
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Diff the running session set against the desired business-zone set.
fn reconcile_diff(
    running: &HashSet<Uuid>,
    desired: &HashMap<Uuid, Zone>,
) -> (Vec<Uuid>, Vec<Zone>) {
    let to_stop = running
        .iter()
        .filter(|id| !desired.contains_key(id))
        .copied()
        .collect();
    let to_start = desired
        .values()
        .filter(|zone| !running.contains(&zone.id))
        .cloned()
        .collect();
    (to_stop, to_start)
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

struct SessionHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Supervises one streaming session per business zone.
pub struct InstantLogsManager {
    ctx: Arc<WorkerContext>,
    sessions: Mutex<HashMap<Uuid, SessionHandle>>,
}

impl InstantLogsManager {
    pub fn new(ctx: Arc<WorkerContext>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Reconcile until cancelled, then stop every session gracefully
    /// (flushing their buffers).
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!("instant logs daemon started");

        self.sync_streams(&cancel).await;

        let mut ticker = tokio::time::interval(RECONCILE_INTERVAL);
        ticker.tick().await; // the initial sync just ran

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.stop_all().await;
                    tracing::info!("instant logs daemon stopped");
                    return;
                }
                _ = ticker.tick() => self.sync_streams(&cancel).await,
            }
        }
    }

    /// One reconcile pass. The zone query happens before the session map
    /// lock is taken; the lock covers only map surgery.
    async fn sync_streams(&self, parent: &CancellationToken) {
        let zones = match ZoneRepo::list_active(&self.ctx.pool).await {
            Ok(zones) => zones,
            Err(e) => {
                tracing::error!(error = %e, "instant logs: list zones failed");
                return;
            }
        };

        let desired: HashMap<Uuid, Zone> = zones
            .into_iter()
            .filter(|z| z.plan == Plan::Business)
            .map(|z| (z.id, z))
            .collect();

        let mut sessions = self.sessions.lock().await;
        let running: HashSet<Uuid> = sessions.keys().copied().collect();
        let (to_stop, to_start) = reconcile_diff(&running, &desired);

        for zone_id in to_stop {
            if let Some(session) = sessions.remove(&zone_id) {
                tracing::info!(
                    zone_id = %zone_id,
                    "stopping instant logs stream (zone removed or downgraded)",
                );
                // The session flushes its buffer on cancellation; no need
                // to wait for it here.
                session.cancel.cancel();
            }
        }

        for zone in to_start {
            tracing::info!(zone = %zone.name, "starting instant logs stream");
            let session_cancel = parent.child_token();
            let handle = tokio::spawn(run_zone_session(
                Arc::clone(&self.ctx),
                zone.clone(),
                session_cancel.clone(),
            ));
            sessions.insert(
                zone.id,
                SessionHandle {
                    cancel: session_cancel,
                    handle,
                },
            );
        }
    }

    /// Cancel every session and wait for the final flushes.
    async fn stop_all(&self) {
        let drained: Vec<(Uuid, SessionHandle)> =
            self.sessions.lock().await.drain().collect();

        for (_, session) in &drained {
            session.cancel.cancel();
        }
        for (zone_id, session) in drained {
            if let Err(e) = session.handle.await {
                tracing::error!(zone_id = %zone_id, error = %e, "session task join failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-zone session
// ---------------------------------------------------------------------------

/// Connection lifecycle for one zone: stream until error, back off, repeat
/// until cancelled.
async fn run_zone_session(ctx: Arc<WorkerContext>, zone: Zone, cancel: CancellationToken) {
    let mut backoff = MIN_BACKOFF;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        match stream_session(&ctx, &zone, &cancel).await {
            // Clean exit: the session was cancelled after a final flush.
            Ok(()) => return,
            Err(e) => {
                tracing::error!(
                    zone = %zone.name,
                    error = %e,
                    backoff_secs = backoff.as_secs(),
                    "instant logs stream disconnected, retrying",
                );
                // Short blips are routine; alert once the backoff shows the
                // failure is persistent.
                if backoff > ALERT_BACKOFF_THRESHOLD {
                    let message = format!(
                        "Instant logs stream persistent failure for zone {}: {e}",
                        zone.name
                    );
                    if let Err(e) = ctx
                        .notifier
                        .send_alert(&zone.id.to_string(), Severity::Error, &message)
                        .await
                    {
                        tracing::warn!(error = %e, "stream failure alert delivery failed");
                    }
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

/// One websocket session: connect, buffer lines, flush on interval / size /
/// cancellation / close.
async fn stream_session(
    ctx: &WorkerContext,
    zone: &Zone,
    cancel: &CancellationToken,
) -> Result<(), SessionError> {
    // Re-read the customer each connect so a rotated credential takes
    // effect on the next session.
    let customer = CustomerRepo::get_by_id(&ctx.pool, zone.customer_id).await?;
    let api_token = ctx.kms.decrypt(&customer.api_token_enc)?;

    let client = InstantLogsClient::new(&ctx.edge.base_url, &zone.edge_zone_id, &api_token);
    let ws_url = client.start_session().await?;
    let mut messages = client.stream(&ws_url).await?;

    tracing::info!(zone = %zone.name, "instant logs stream connected");

    let mut buffer = FlushBuffer::new(Utc::now());
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                flush(ctx, customer.id, zone, &mut buffer).await;
                return Ok(());
            }
            _ = ticker.tick() => {
                flush(ctx, customer.id, zone, &mut buffer).await;
            }
            message = messages.recv() => match message {
                Some(line) => {
                    if buffer.push(line) {
                        flush(ctx, customer.id, zone, &mut buffer).await;
                    }
                }
                None => {
                    flush(ctx, customer.id, zone, &mut buffer).await;
                    return Err(SessionError::StreamClosed);
                }
            }
        }
    }
}

/// Upload the buffered batch under a detached deadline.
async fn flush(ctx: &WorkerContext, customer_id: Uuid, zone: &Zone, buffer: &mut FlushBuffer) {
    let Some(batch) = buffer.take(Utc::now()) else {
        return;
    };

    let upload = ctx.store.put_logs(
        customer_id,
        zone.id,
        batch.start,
        batch.end,
        &batch.raw,
        LOG_TYPE_INSTANT,
    );

    match tokio::time::timeout(UPLOAD_TIMEOUT, upload).await {
        Ok(Ok(archived)) => {
            tracing::info!(
                zone = %zone.name,
                lines = batch.lines,
                key = %archived.key,
                provider = %archived.provider,
                "uploaded instant logs batch",
            );
        }
        Ok(Err(e)) => {
            tracing::error!(zone = %zone.name, error = %e, "instant logs upload failed");
        }
        Err(_) => {
            tracing::error!(
                zone = %zone.name,
                timeout_secs = UPLOAD_TIMEOUT.as_secs(),
                "instant logs upload timed out",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(id: Uuid, plan: Plan) -> Zone {
        Zone {
            id,
            customer_id: Uuid::new_v4(),
            edge_zone_id: "ezid".into(),
            name: format!("zone-{id}"),
            plan,
            pull_interval_secs: 3600,
            last_pulled_at: None,
            active: true,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn buffer_flushes_at_line_threshold() {
        let mut buffer = FlushBuffer::new(Utc::now());

        for _ in 0..MAX_BUFFER_LINES - 1 {
            assert!(!buffer.push(b"line".to_vec()));
        }
        assert!(buffer.push(b"line".to_vec()));
    }

    #[test]
    fn take_joins_lines_with_lf_and_advances_window() {
        let t0 = Utc::now();
        let mut buffer = FlushBuffer::new(t0);
        buffer.push(b"one".to_vec());
        buffer.push(b"two".to_vec());

        let t1 = t0 + chrono::Duration::seconds(30);
        let batch = buffer.take(t1).unwrap();

        assert_eq!(batch.raw, b"one\ntwo\n");
        assert_eq!(batch.lines, 2);
        assert_eq!(batch.start, t0);
        assert_eq!(batch.end, t1);

        // The next window starts where this one ended.
        buffer.push(b"three".to_vec());
        let t2 = t1 + chrono::Duration::seconds(30);
        let next = buffer.take(t2).unwrap();
        assert_eq!(next.start, t1);
        assert_eq!(next.end, t2);
    }

    #[test]
    fn take_on_empty_buffer_is_none() {
        let mut buffer = FlushBuffer::new(Utc::now());
        assert!(buffer.take(Utc::now()).is_none());
    }

    #[test]
    fn diff_stops_removed_and_starts_new_zones() {
        let keep = Uuid::new_v4();
        let gone = Uuid::new_v4();
        let fresh = Uuid::new_v4();

        let running: HashSet<Uuid> = [keep, gone].into_iter().collect();
        let desired: HashMap<Uuid, Zone> = [
            (keep, zone(keep, Plan::Business)),
            (fresh, zone(fresh, Plan::Business)),
        ]
        .into_iter()
        .collect();

        let (to_stop, to_start) = reconcile_diff(&running, &desired);

        assert_eq!(to_stop, vec![gone]);
        assert_eq!(to_start.len(), 1);
        assert_eq!(to_start[0].id, fresh);
    }

    #[test]
    fn diff_is_empty_when_sets_match() {
        let id = Uuid::new_v4();
        let running: HashSet<Uuid> = [id].into_iter().collect();
        let desired: HashMap<Uuid, Zone> =
            [(id, zone(id, Plan::Business))].into_iter().collect();

        let (to_stop, to_start) = reconcile_diff(&running, &desired);
        assert!(to_stop.is_empty());
        assert!(to_start.is_empty());
    }
}

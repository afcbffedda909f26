//! Minimal liveness endpoint for container orchestration probes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use logvault_db::repositories::TaskRepo;
use logvault_queue::{QUEUE_CRITICAL, QUEUE_DEFAULT, QUEUE_LOW};
use serde::Serialize;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

#[derive(Serialize)]
struct QueueInfo {
    size: i64,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    queues: std::collections::HashMap<&'static str, QueueInfo>,
}

/// GET /health/worker -- overall status plus pending depth per queue.
async fn worker_health(State(pool): State<PgPool>) -> (StatusCode, Json<HealthResponse>) {
    let mut queues = std::collections::HashMap::new();
    let mut status = "ok";

    for queue in [QUEUE_CRITICAL, QUEUE_DEFAULT, QUEUE_LOW] {
        match TaskRepo::pending_depth(&pool, queue).await {
            Ok(size) => {
                queues.insert(queue, QueueInfo { size });
            }
            Err(_) => {
                status = "degraded";
                queues.insert(queue, QueueInfo { size: 0 });
            }
        }
    }

    let code = if status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            queues,
        }),
    )
}

fn router(pool: PgPool) -> Router {
    Router::new()
        .route("/health/worker", get(worker_health))
        .with_state(pool)
}

/// Serve the health endpoint until cancelled.
pub async fn serve(addr: String, pool: PgPool, cancel: CancellationToken) {
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "health endpoint bind failed");
            return;
        }
    };

    tracing::info!(addr = %addr, "health endpoint listening");

    let shutdown = async move { cancel.cancelled().await };
    if let Err(e) = axum::serve(listener, router(pool))
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(error = %e, "health endpoint stopped");
    }
}

use std::sync::Arc;

use logvault_kms::KeyRing;
use logvault_notify::{ConsoleNotifier, Notifier, SlackNotifier};
use logvault_queue::{Broker, QueueClient};
use logvault_storage::{FsStore, LogStore, MultiStore, RemoteStore};
use logvault_worker::config::{StorageConfig, WorkerConfig};
use logvault_worker::expire::{ExpireProcessor, PgExpirableJobs};
use logvault_worker::export::ExportProcessor;
use logvault_worker::instant::InstantLogsManager;
use logvault_worker::pull::PullProcessor;
use logvault_worker::ratelimit::RateLimiter;
use logvault_worker::scheduler::ZoneScheduler;
use logvault_worker::security::SecurityEventsProcessor;
use logvault_worker::verify::VerifyProcessor;
use logvault_worker::{health, WorkerContext};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logvault_worker=debug,logvault_queue=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env().expect("failed to load configuration");

    // --- Database ---
    let pool = logvault_db::create_pool(&config.database_url)
        .await
        .expect("failed to connect to database");
    logvault_db::health_check(&pool)
        .await
        .expect("database health check failed");
    logvault_db::run_migrations(&pool)
        .await
        .expect("failed to run database migrations");
    tracing::info!("database ready");

    // --- KMS ---
    let kms = Arc::new(
        KeyRing::new(&config.kms_keys, &config.kms_active_key)
            .expect("failed to initialize KMS key ring"),
    );

    // --- Storage fan-out ---
    let mut backends: Vec<Arc<dyn LogStore>> = Vec::new();
    match &config.storage {
        StorageConfig::Fs { root } => {
            let store = FsStore::new(root.clone())
                .await
                .expect("failed to initialize filesystem storage");
            backends.push(Arc::new(store));
        }
        StorageConfig::S3 { primary, secondary } => {
            let store = RemoteStore::s3_compatible(primary, &primary.name)
                .expect("failed to initialize primary storage");
            backends.push(Arc::new(store));

            if let Some(secondary) = secondary {
                match RemoteStore::s3_compatible(secondary, &secondary.name) {
                    Ok(store) => {
                        tracing::info!(
                            provider = %secondary.name,
                            "enabled secondary storage failover",
                        );
                        backends.push(Arc::new(store));
                    }
                    // A broken secondary must not take the worker down.
                    Err(e) => {
                        tracing::error!(error = %e, "failed to initialize secondary storage");
                    }
                }
            }
        }
    }
    let store = Arc::new(MultiStore::new(backends));

    // --- Shared context ---
    let notifier: Arc<dyn Notifier> = if config.slack_webhook_url.is_empty() {
        Arc::new(ConsoleNotifier)
    } else {
        Arc::new(SlackNotifier::new(&config.slack_webhook_url))
    };
    let limiter = (config.edge.rate_limit > 0.0)
        .then(|| Arc::new(RateLimiter::new(config.edge.rate_limit)));
    let queue = QueueClient::new(pool.clone());

    let ctx = Arc::new(WorkerContext {
        pool: pool.clone(),
        kms,
        store: Arc::clone(&store),
        queue: queue.clone(),
        notifier,
        limiter,
        edge: config.edge.clone(),
    });

    // --- Task broker ---
    let mut broker = Broker::new(pool.clone(), config.concurrency);
    broker.register(
        logvault_queue::TYPE_LOG_PULL,
        Arc::new(PullProcessor::new(Arc::clone(&ctx))),
    );
    broker.register(
        logvault_queue::TYPE_SECURITY_POLL,
        Arc::new(SecurityEventsProcessor::new(Arc::clone(&ctx))),
    );
    broker.register(
        logvault_queue::TYPE_LOG_VERIFY,
        Arc::new(VerifyProcessor::new(Arc::clone(&ctx))),
    );
    broker.register(
        logvault_queue::TYPE_LOG_EXPIRE,
        Arc::new(ExpireProcessor::new(
            Arc::new(PgExpirableJobs::new(pool.clone())),
            Arc::clone(&store),
        )),
    );
    broker.register(
        logvault_queue::TYPE_LOG_EXPORT,
        Arc::new(ExportProcessor::new(Arc::clone(&ctx))),
    );

    // --- Spawn the moving parts ---
    let cancel = CancellationToken::new();

    let scheduler = ZoneScheduler::new(pool.clone(), queue, config.scheduler_interval);
    let scheduler_handle = tokio::spawn(scheduler.run(cancel.child_token()));

    let instant_manager = InstantLogsManager::new(Arc::clone(&ctx));
    let instant_handle = tokio::spawn(instant_manager.run(cancel.child_token()));

    let health_handle = tokio::spawn(health::serve(
        config.health_addr.clone(),
        pool.clone(),
        cancel.child_token(),
    ));

    let broker_handle = tokio::spawn(broker.run(cancel.child_token()));

    tracing::info!("worker started");

    // --- Graceful shutdown ---
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");
    tracing::info!("shutting down worker");
    cancel.cancel();

    let _ = broker_handle.await;
    let _ = instant_handle.await;
    let _ = scheduler_handle.await;
    let _ = health_handle.await;
}

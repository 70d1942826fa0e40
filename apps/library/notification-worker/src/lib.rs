//! Notification Worker Service
//!
//! A background worker that delivers library emails from the Redis job queue
//! and runs the daily reminder scan.
//!
//! ## Architecture
//!
//! ```text
//! Redis job queue (queue:email-notifications:*)
//!   ↓ (dequeue under lease, bounded concurrency)
//! QueueWorker<NotificationJob, NotificationProcessor>
//!   ↓ (renders templates)
//! TemplateEngine (Handlebars)
//!   ↓ (sends emails)
//! EmailProvider (Resend/SMTP)
//!
//! ReminderScheduler (daily cron, one process per day wins the trigger)
//!   ↓ (overdue + due-soon borrowings from Postgres)
//! Redis job queue
//! ```
//!
//! ## Features
//!
//! - Several worker processes can share one queue
//! - Automatic retry with exponential backoff (3 attempts)
//! - Stalled job recovery after a crash
//! - Graceful shutdown with a bounded drain
//! - Health, queue and Prometheus endpoints for Kubernetes probes

pub mod config;

use axum::Router;
use config::{ProviderKind, WorkerSettings};
use core_config::{FromEnv, service_info};
use domain_borrowings::PgBorrowingRepository;
use domain_notifications::{
    EmailProvider, NotificationJob, NotificationProcessor, NotificationQueue, ReminderScheduler, ResendProvider,
    SchedulerConfig, SmtpProvider, TemplateEngine,
};
use eyre::{Result, WrapErr};
use job_queue::{
    HealthState, QueueContext, QueueLimits, QueueWorker, RedisJobQueue, RedisSettings, health_router, metrics,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Start the health HTTP server
///
/// Provides endpoints for:
/// - Liveness probes: `/health`, `/healthz`
/// - Readiness probes: `/ready`, `/readyz`
/// - Queue monitoring: `/queue/info`, `/queue/failed`
/// - Prometheus metrics: `/metrics`
async fn start_health_server(health_state: HealthState, port: u16) -> Result<()> {
    let app: Router = health_router(health_state).layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(port = %port, "Health server listening");

    axum::serve(listener, app).await.wrap_err("Health server failed")?;

    Ok(())
}

/// Run the notification worker
///
/// 1. Sets up structured logging and metrics
/// 2. Connects to Redis (with retry) and Postgres
/// 3. Builds the email provider chosen by `EMAIL_PROVIDER`
/// 4. Registers the daily reminder trigger and starts the health server
/// 5. Consumes jobs until SIGINT/SIGTERM, then drains, stops the scheduler and
///    closes the queue context
///
/// # Errors
///
/// Returns an error if configuration is invalid, a connection cannot be
/// established, the provider cannot be built, or the worker fails fatally.
pub async fn run() -> Result<()> {
    let settings = WorkerSettings::from_env().wrap_err("Failed to load worker configuration")?;
    core_config::tracing::init_tracing(&settings.environment);
    metrics::init_metrics();

    let service = service_info!();
    info!(
        name = %service.name,
        version = %service.version,
        environment = ?settings.environment,
        provider = %settings.provider,
        "Starting notification worker"
    );

    let templates = TemplateEngine::new().wrap_err("Failed to initialize template engine")?;

    match settings.provider {
        ProviderKind::Resend => {
            let provider = ResendProvider::from_env()
                .wrap_err("Resend configuration error. Ensure RESEND_API_KEY is set.")?;
            serve(settings, provider, templates).await
        }
        ProviderKind::Smtp => {
            let provider = SmtpProvider::from_env()
                .wrap_err("SMTP configuration error. Ensure SMTP_HOST and SMTP_PORT are reachable.")?;
            serve(settings, provider, templates).await
        }
    }
}

async fn serve<P: EmailProvider + 'static>(
    settings: WorkerSettings,
    provider: P,
    templates: TemplateEngine,
) -> Result<()> {
    match provider.health_check().await {
        Ok(true) => info!(provider = provider.name(), "Email provider ready"),
        Ok(false) => error!(provider = provider.name(), "Email provider reports unhealthy, continuing"),
        Err(e) => error!(provider = provider.name(), error = %e, "Email provider health check failed, continuing"),
    }

    let redis_settings = RedisSettings::from_env().wrap_err("Failed to load Redis configuration")?;
    info!("Connecting to Redis...");
    let context = QueueContext::connect(&redis_settings)
        .await
        .wrap_err("Failed to connect to Redis")?;
    info!("Connected to Redis successfully");

    let queue: Arc<RedisJobQueue<NotificationJob>> = Arc::new(
        context.named_queue::<NotificationJob>(&settings.queue_name, QueueLimits::from_def::<NotificationQueue>()),
    );

    info!("Connecting to Postgres...");
    let db = sea_orm::Database::connect(&settings.database_url)
        .await
        .wrap_err("Failed to connect to Postgres")?;
    info!("Connected to Postgres successfully");

    let scheduler_config = SchedulerConfig::from_env().wrap_err("Failed to load reminder scheduler configuration")?;
    let scheduler = Arc::new(ReminderScheduler::new(
        queue.clone(),
        Arc::new(PgBorrowingRepository::new(db)),
        scheduler_config,
    ));
    let cron = scheduler.start().await.wrap_err("Failed to register the daily reminder trigger")?;

    // Set up a shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        let _ = shutdown_tx.send(true);
    });

    let health_state = HealthState::new(queue.clone(), service_info!().name, service_info!().version)
        .with_failed_jobs::<NotificationJob, _>(queue.clone());
    let health_port = settings.health_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_port).await {
            error!(error = %e, "Health server failed");
        }
    });

    info!(
        queue = %settings.worker.queue_name,
        worker_id = %settings.worker.worker_id,
        concurrency = settings.worker.concurrency,
        poll_interval_ms = settings.worker.poll_interval_ms,
        "Worker configuration loaded"
    );
    let processor = NotificationProcessor::new(provider, templates);
    let worker = QueueWorker::new(queue, processor, settings.worker);
    let worker_result = worker.run(shutdown_rx).await;

    // The worker has drained; stop producing reminders before closing the queues.
    if let Err(e) = cron.shutdown().await {
        error!(error = %e, "Failed to stop reminder scheduler");
    }
    context.shutdown();

    worker_result.wrap_err("Worker failed")?;
    info!("Notification worker stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.wrap_err("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}

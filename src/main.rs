// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use dispatchrs::config::settings::Settings;
use dispatchrs::domain::models::job::JobType;
use dispatchrs::domain::services::content_processor::ContentBatchProcessor;
use dispatchrs::domain::services::significance::{ContentProducer, SeverityThresholdFilter};
use dispatchrs::infrastructure::database::connection;
use dispatchrs::infrastructure::repositories::content_queue_repo_impl::ContentQueueRepositoryImpl;
use dispatchrs::infrastructure::repositories::job_repo_impl::JobRepositoryImpl;
use dispatchrs::infrastructure::services::http_content_generator::HttpContentGenerator;
use dispatchrs::infrastructure::services::webhook_notifier::WebhookNotifier;
use dispatchrs::presentation::routes;
use dispatchrs::queue::job_queue::{PostgresJobQueue, QueueDefaults};
use dispatchrs::queue::scheduler::{MaintenanceScheduler, PeriodicJob};
use dispatchrs::workers::cleanup_worker::CleanupHandler;
use dispatchrs::workers::content_worker::{self, DrainContentQueueHandler, IngestEventsHandler};
use dispatchrs::workers::notification_worker::SendNotificationHandler;
use dispatchrs::workers::{HandlerRegistry, WorkerConfig, WorkerRuntime};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use dispatchrs::utils::telemetry;
use migration::{Migrator, MigratorTrait};

/// 达到该严重程度的事件才会生成文章
const MIN_PUBLISH_SEVERITY: f64 = 5.0;

/// 主函数
///
/// 应用程序入口点，负责初始化所有组件并启动服务
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();
    info!("Starting dispatchrs...");

    // 2. Load configuration
    let settings = Arc::new(Settings::new()?);
    info!("Configuration loaded");

    if settings.metrics.enabled {
        dispatchrs::infrastructure::metrics::init_metrics(&settings.metrics.listen_addr)?;
    }

    // 3. Connect to database
    let db = Arc::new(connection::create_pool(&settings.database).await?);
    info!("Database connection established");

    info!("Running database migrations...");
    Migrator::up(db.as_ref(), None).await?;
    info!("Database migrations applied");

    // 4. Repositories and queue
    let job_repo = Arc::new(JobRepositoryImpl::new(
        db.clone(),
        chrono::Duration::seconds(settings.worker.claim_timeout_secs as i64),
    ));
    let content_repo = Arc::new(
        ContentQueueRepositoryImpl::new(
            db.clone(),
            chrono::Duration::seconds(settings.content.claim_timeout_secs as i64),
            settings.content.max_attempts,
        )
        .with_retry_delay(Duration::from_millis(settings.content.retry_delay_ms)),
    );

    let worker_config = WorkerConfig::from_settings(&settings.worker)?;

    // 5. Handlers
    let generator = Arc::new(HttpContentGenerator::new(
        settings.content.generator_url.clone(),
        Duration::from_secs(settings.content.generator_timeout_secs),
    )?);
    let notifier = Arc::new(WebhookNotifier::new(
        settings.notifier.webhook_url.clone(),
        settings.notifier.webhook_secret.clone(),
        Duration::from_secs(settings.notifier.timeout_secs),
    )?);
    let processor = Arc::new(ContentBatchProcessor::new(
        content_repo.clone(),
        generator,
        settings.content.batch_size,
        worker_config.worker_id.clone(),
    ));
    let producer = Arc::new(ContentProducer::new(
        content_repo.clone(),
        Arc::new(SeverityThresholdFilter::new(MIN_PUBLISH_SEVERITY)),
    ));

    let claim_timeout = Duration::from_secs(
        settings
            .worker
            .claim_timeout_secs
            .min(settings.content.claim_timeout_secs),
    );
    let generator_timeout = Duration::from_secs(settings.content.generator_timeout_secs);
    let drain_timeout =
        content_worker::drain_timeout(generator_timeout, settings.content.batch_size, claim_timeout);
    if drain_timeout < generator_timeout * settings.content.batch_size.max(1) as u32 {
        warn!(
            drain_timeout_secs = drain_timeout.as_secs(),
            claim_timeout_secs = claim_timeout.as_secs(),
            "Drain timeout clamped below the claim timeout, large batches may not finish in one run"
        );
    }
    if worker_config.default_timeout >= Duration::from_secs(settings.worker.claim_timeout_secs) {
        warn!(
            default_timeout_ms = worker_config.default_timeout.as_millis() as u64,
            claim_timeout_secs = settings.worker.claim_timeout_secs,
            "Default job timeout is not shorter than the claim timeout, running jobs may be reclaimed"
        );
    }

    // 清理处理器需要队列本身，队列又需要注册表里的默认值，先用无注册表的队列构建
    let base_queue = Arc::new(PostgresJobQueue::new(
        job_repo.clone(),
        QueueDefaults::from(&settings.queue),
    ));
    let registry = Arc::new(
        HandlerRegistry::new()
            .register(Arc::new(DrainContentQueueHandler::new(processor, drain_timeout)))
            .register(Arc::new(IngestEventsHandler::new(producer)))
            .register(Arc::new(SendNotificationHandler::new(notifier)))
            .register(Arc::new(CleanupHandler::new(
                base_queue,
                content_repo.clone(),
                settings.retention.clone(),
            ))),
    );
    let queue = Arc::new(
        PostgresJobQueue::new(job_repo.clone(), QueueDefaults::from(&settings.queue))
            .with_registry(registry.clone()),
    );

    // 6. Start worker runtime and scheduler
    let runtime = WorkerRuntime::new(queue.clone(), registry, worker_config);
    runtime.start().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Arc::new(MaintenanceScheduler::new(
        queue.clone(),
        vec![
            PeriodicJob::new(
                JobType::Cleanup,
                Duration::from_secs(settings.retention.cleanup_interval_secs),
            ),
            PeriodicJob::new(
                JobType::DrainContentQueue,
                Duration::from_secs(settings.content.drain_interval_secs),
            )
            .with_priority(10),
        ],
    ));
    let scheduler_handle = scheduler.start(shutdown_rx);

    // 7. Start HTTP server
    let app = routes::routes(queue.clone(), content_repo.clone(), settings.retention.clone());

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 8. Drain
    info!("Shutting down...");
    shutdown_tx.send_replace(true);
    if let Err(e) = scheduler_handle.await {
        error!("Scheduler task failed: {}", e);
    }
    let abandoned = runtime.stop().await;
    if !abandoned.is_empty() {
        info!(
            "{} jobs left in processing, they will be reclaimed after the claim timeout",
            abandoned.len()
        );
    }

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => error!("Unable to listen for shutdown signal: {}", err),
    }
}

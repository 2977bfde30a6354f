// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{
    job_queue, job_queue_with, setup_db, wait_until, Behavior, ScriptedHandler, TestQueue,
};
use dispatchrs::domain::models::job::{EnqueueOptions, JobState, JobType};
use dispatchrs::queue::job_queue::{JobQueue, QueueError};
use dispatchrs::utils::errors::WorkerError;
use dispatchrs::workers::{HandlerRegistry, WorkerConfig, WorkerRuntime};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn config() -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(20),
        max_concurrent_jobs: 4,
        job_types: None,
        shutdown_timeout: Duration::from_secs(2),
        default_timeout: Duration::from_secs(5),
        worker_id: "test-worker".to_string(),
    }
}

async fn runtime_with(
    handlers: Vec<ScriptedHandler>,
    config: WorkerConfig,
) -> (Arc<TestQueue>, WorkerRuntime<Arc<TestQueue>>) {
    let ctx = setup_db().await;
    let registry = handlers
        .into_iter()
        .fold(HandlerRegistry::new(), |registry, handler| {
            registry.register(Arc::new(handler))
        });
    let registry = Arc::new(registry);
    let queue = Arc::new(job_queue_with(ctx.job_repo.clone(), registry.clone()));
    let runtime = WorkerRuntime::new(queue.clone(), registry, config);
    (queue, runtime)
}

async fn wait_for_state(queue: &Arc<TestQueue>, id: &str, state: JobState) -> bool {
    wait_until(Duration::from_secs(5), || async move {
        matches!(queue.find(id).await, Ok(Some(job)) if job.state == state)
    })
    .await
}

#[tokio::test]
async fn test_runtime_completes_jobs() {
    let handler = ScriptedHandler::new(JobType::SendNotification, Behavior::Succeed);
    let calls = handler.calls();
    let (queue, runtime) = runtime_with(vec![handler], config()).await;

    runtime.start().await.unwrap();
    let id = queue
        .enqueue(
            JobType::SendNotification,
            json!({"recipient": "ops"}),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    assert!(wait_for_state(&queue, &id, JobState::Completed).await);
    let job = queue.find(&id).await.unwrap().unwrap();
    assert_eq!(job.result, Some(json!({"recipient": "ops"})));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(runtime.stop().await.is_empty());
    assert!(!runtime.is_running().await);
}

#[tokio::test]
async fn test_runtime_rejects_double_start() {
    let (_queue, runtime) = runtime_with(vec![], config()).await;

    runtime.start().await.unwrap();
    assert!(matches!(
        runtime.start().await,
        Err(WorkerError::AlreadyRunning)
    ));

    runtime.stop().await;
    // 停止后可以再次启动
    runtime.start().await.unwrap();
    runtime.stop().await;
}

#[tokio::test]
async fn test_transient_errors_retry_until_dead_letter() {
    let handler = ScriptedHandler::new(JobType::SendNotification, Behavior::FailTransient);
    let calls = handler.calls();
    let (queue, runtime) = runtime_with(vec![handler], config()).await;

    runtime.start().await.unwrap();
    let id = queue
        .enqueue(
            JobType::SendNotification,
            json!({}),
            EnqueueOptions::default()
                .with_max_retries(1)
                .with_retry_delay(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    assert!(wait_for_state(&queue, &id, JobState::Failed).await);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let dead = queue.dead_letters(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 2);
    assert!(dead[0].error.contains("connection reset"));

    runtime.stop().await;
}

#[tokio::test]
async fn test_permanent_outcome_is_not_retried() {
    let handler = ScriptedHandler::new(JobType::SendNotification, Behavior::FailPermanent);
    let calls = handler.calls();
    let (queue, runtime) = runtime_with(vec![handler], config()).await;

    runtime.start().await.unwrap();
    let id = queue
        .enqueue(JobType::SendNotification, json!({}), EnqueueOptions::default())
        .await
        .unwrap();

    assert!(wait_for_state(&queue, &id, JobState::Failed).await);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(queue.dead_letters(10).await.unwrap()[0].error, "payload rejected");

    runtime.stop().await;
}

#[tokio::test]
async fn test_timeout_is_recorded_as_failure() {
    let handler = ScriptedHandler::new(
        JobType::GenerateContent,
        Behavior::Sleep(Duration::from_secs(10)),
    )
    .with_timeout(Duration::from_millis(100));
    let (queue, runtime) = runtime_with(vec![handler], config()).await;

    runtime.start().await.unwrap();
    let id = queue
        .enqueue(
            JobType::GenerateContent,
            json!({}),
            EnqueueOptions::default().with_max_retries(0),
        )
        .await
        .unwrap();

    assert!(wait_for_state(&queue, &id, JobState::Failed).await);
    let job = queue.find(&id).await.unwrap().unwrap();
    assert!(job.error.unwrap().contains("timed out after 100ms"));

    runtime.stop().await;
}

#[tokio::test]
async fn test_job_timeout_overrides_handler_timeout() {
    let handler = ScriptedHandler::new(
        JobType::GenerateContent,
        Behavior::Sleep(Duration::from_millis(300)),
    )
    .with_timeout(Duration::from_millis(50));
    let (queue, runtime) = runtime_with(vec![handler], config()).await;

    runtime.start().await.unwrap();
    let id = queue
        .enqueue(
            JobType::GenerateContent,
            json!({}),
            EnqueueOptions::default().with_timeout(Duration::from_secs(2)),
        )
        .await
        .unwrap();

    assert!(wait_for_state(&queue, &id, JobState::Completed).await);
    runtime.stop().await;
}

#[tokio::test]
async fn test_panicking_handler_fails_the_job() {
    let handler = ScriptedHandler::new(JobType::PublishSocial, Behavior::Panic);
    let calls = handler.calls();
    let (queue, runtime) = runtime_with(vec![handler], config()).await;

    runtime.start().await.unwrap();
    let id = queue
        .enqueue(JobType::PublishSocial, json!({}), EnqueueOptions::default())
        .await
        .unwrap();

    assert!(wait_for_state(&queue, &id, JobState::Failed).await);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let job = queue.find(&id).await.unwrap().unwrap();
    assert!(job.error.unwrap().contains("handler exploded"));

    // 运行时在处理器崩溃后继续工作
    assert!(runtime.is_running().await);
    runtime.stop().await;
}

#[tokio::test]
async fn test_missing_handler_fails_permanently() {
    let handler = ScriptedHandler::new(JobType::SendNotification, Behavior::Succeed);
    let (queue, runtime) = runtime_with(vec![handler], config()).await;

    assert!(matches!(
        queue
            .enqueue(JobType::PublishSocial, json!({}), EnqueueOptions::default())
            .await,
        Err(QueueError::NoHandler(JobType::PublishSocial))
    ));

    // 外部生产者绕过注册表写入的任务
    let producer = job_queue(queue.repository().clone());
    runtime.start().await.unwrap();
    let id = producer
        .enqueue(JobType::PublishSocial, json!({}), EnqueueOptions::default())
        .await
        .unwrap();

    assert!(wait_for_state(&queue, &id, JobState::Failed).await);
    let job = queue.find(&id).await.unwrap().unwrap();
    assert_eq!(job.attempts, 1);
    assert!(job
        .error
        .unwrap()
        .contains("No handler registered for job type 'publish_social'"));

    runtime.stop().await;
}

#[tokio::test]
async fn test_job_type_filter_leaves_other_jobs() {
    let handler = ScriptedHandler::new(JobType::SendNotification, Behavior::Succeed);
    let mut config = config();
    config.job_types = Some(vec![JobType::SendNotification]);
    let (queue, runtime) = runtime_with(vec![handler], config).await;

    runtime.start().await.unwrap();
    let other = job_queue(queue.repository().clone())
        .enqueue(JobType::Cleanup, json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    let mine = queue
        .enqueue(JobType::SendNotification, json!({}), EnqueueOptions::default())
        .await
        .unwrap();

    assert!(wait_for_state(&queue, &mine, JobState::Completed).await);
    runtime.stop().await;

    let untouched = queue.find(&other).await.unwrap().unwrap();
    assert_eq!(untouched.state, JobState::Pending);
    assert_eq!(untouched.attempts, 0);
}

#[tokio::test]
async fn test_concurrency_limit_is_respected() {
    let handler = ScriptedHandler::new(
        JobType::SendNotification,
        Behavior::Sleep(Duration::from_millis(400)),
    );
    let mut config = config();
    config.max_concurrent_jobs = 2;
    let (queue, runtime) = runtime_with(vec![handler], config).await;

    for _ in 0..5 {
        queue
            .enqueue(JobType::SendNotification, json!({}), EnqueueOptions::default())
            .await
            .unwrap();
    }
    runtime.start().await.unwrap();

    let rt = &runtime;
    assert!(
        wait_until(Duration::from_secs(2), || async move { rt.active_jobs() == 2 }).await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(runtime.active_jobs() <= 2);
    assert_eq!(queue.metrics().await.unwrap().processing, 2);

    runtime.stop().await;
}

#[tokio::test]
async fn test_stop_waits_for_active_jobs() {
    let handler = ScriptedHandler::new(
        JobType::SendNotification,
        Behavior::Sleep(Duration::from_millis(300)),
    );
    let (queue, runtime) = runtime_with(vec![handler], config()).await;

    let id = queue
        .enqueue(JobType::SendNotification, json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    runtime.start().await.unwrap();

    let rt = &runtime;
    assert!(wait_until(Duration::from_secs(2), || async move { rt.active_jobs() == 1 }).await);

    let remaining = runtime.stop().await;
    assert!(remaining.is_empty());
    assert_eq!(
        queue.find(&id).await.unwrap().unwrap().state,
        JobState::Completed
    );
}

#[tokio::test]
async fn test_stop_reports_jobs_still_running_after_timeout() {
    let handler = ScriptedHandler::new(
        JobType::SendNotification,
        Behavior::Sleep(Duration::from_secs(10)),
    );
    let mut config = config();
    config.shutdown_timeout = Duration::from_millis(100);
    let (queue, runtime) = runtime_with(vec![handler], config).await;

    let id = queue
        .enqueue(JobType::SendNotification, json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    runtime.start().await.unwrap();
    let rt = &runtime;
    assert!(wait_until(Duration::from_secs(2), || async move { rt.active_jobs() == 1 }).await);

    let remaining = runtime.stop().await;
    assert_eq!(remaining, vec![id.clone()]);

    // 认领保持，等待过期回收
    let job = queue.find(&id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Processing);
    assert_eq!(job.worker_id.as_deref(), Some("test-worker"));
}

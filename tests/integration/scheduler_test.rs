// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{job_queue, setup_db};
use chrono::{Duration as ChronoDuration, Utc};
use dispatchrs::domain::models::job::{JobState, JobType};
use dispatchrs::queue::job_queue::JobQueue;
use dispatchrs::queue::scheduler::{MaintenanceScheduler, PeriodicJob};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test]
async fn test_tick_enqueues_once_per_interval() {
    let ctx = setup_db().await;
    let queue = Arc::new(job_queue(ctx.job_repo.clone()));
    let scheduler = MaintenanceScheduler::new(
        queue.clone(),
        vec![
            PeriodicJob::new(JobType::Cleanup, Duration::from_secs(3600)),
            PeriodicJob::new(JobType::DrainContentQueue, Duration::from_secs(60)).with_priority(10),
        ],
    );

    let now = Utc::now();
    let first = scheduler.tick(now).await.unwrap();
    assert_eq!(first.len(), 2);

    // 同一时间桶内重复调度不会产生新任务
    assert!(scheduler.tick(now).await.unwrap().is_empty());

    let later = scheduler.tick(now + ChronoDuration::seconds(61)).await.unwrap();
    assert_eq!(later.len(), 1);
    assert!(later[0].starts_with("drain_content_queue-"));

    let metrics = queue.metrics().await.unwrap();
    assert_eq!(metrics.pending, 3);

    let drain = queue.find(&first[1]).await.unwrap().unwrap();
    assert_eq!(drain.priority, 10);
    assert_eq!(drain.state, JobState::Pending);
}

#[tokio::test]
async fn test_scheduler_stops_on_shutdown() {
    let ctx = setup_db().await;
    let queue = Arc::new(job_queue(ctx.job_repo.clone()));
    let scheduler = Arc::new(MaintenanceScheduler::new(
        queue.clone(),
        vec![PeriodicJob::new(JobType::Cleanup, Duration::from_secs(3600))],
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = scheduler.start(shutdown_rx);

    // 第一次 tick 立即触发
    let q = &queue;
    assert!(
        super::helpers::wait_until(Duration::from_secs(2), || async move {
            matches!(q.metrics().await, Ok(m) if m.pending == 1)
        })
        .await
    );

    shutdown_tx.send_replace(true);
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_cleanup_handler_applies_payload_overrides() {
    use dispatchrs::config::settings::RetentionSettings;
    use dispatchrs::domain::models::job::EnqueueOptions;
    use dispatchrs::workers::cleanup_worker::CleanupHandler;
    use dispatchrs::workers::{JobHandler, JobOutcome};
    use serde_json::json;

    let ctx = setup_db().await;
    let queue = Arc::new(job_queue(ctx.job_repo.clone()));
    let handler = CleanupHandler::new(
        queue.clone(),
        ctx.content_repo.clone(),
        RetentionSettings {
            completed_days: 7,
            dead_letter_days: 30,
            content_days: 14,
            cleanup_interval_secs: 3600,
        },
    );

    queue
        .enqueue(JobType::SendNotification, json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    let claimed = queue.claim("w1", None).await.unwrap().unwrap();
    assert!(queue.complete(&claimed.claim_token(), None).await.unwrap());
    tokio::time::sleep(Duration::from_millis(10)).await;

    let outcome = handler.handle(serde_json::Value::Null).await.unwrap();
    let JobOutcome::Success(Some(report)) = outcome else {
        panic!("unexpected outcome {:?}", outcome);
    };
    assert_eq!(report["jobs"]["completed_deleted"], 0);

    let outcome = handler.handle(json!({"completed_days": 0})).await.unwrap();
    let JobOutcome::Success(Some(report)) = outcome else {
        panic!("unexpected outcome {:?}", outcome);
    };
    assert_eq!(report["jobs"]["completed_deleted"], 1);
    assert_eq!(report["content_deleted"], 0);

    let invalid = handler.handle(json!({"completed_days": "soon"})).await.unwrap();
    assert!(matches!(
        invalid,
        JobOutcome::Failure {
            retryable: Some(false),
            ..
        }
    ));
}

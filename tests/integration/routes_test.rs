// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{job_queue, job_queue_with, setup_db, Behavior, ScriptedHandler, TestQueue};
use axum::http::StatusCode;
use axum_test::TestServer;
use dispatchrs::config::settings::RetentionSettings;
use dispatchrs::domain::models::job::{EnqueueOptions, JobType};
use dispatchrs::domain::repositories::content_queue_repository::ContentQueueRepository;
use dispatchrs::infrastructure::repositories::content_queue_repo_impl::ContentQueueRepositoryImpl;
use dispatchrs::presentation::routes;
use dispatchrs::queue::job_queue::JobQueue;
use dispatchrs::workers::HandlerRegistry;
use serde_json::{json, Value};
use std::sync::Arc;

async fn create_test_server() -> (TestServer, Arc<TestQueue>, Arc<ContentQueueRepositoryImpl>) {
    let ctx = setup_db().await;
    let queue = Arc::new(job_queue(ctx.job_repo.clone()));
    let retention = RetentionSettings {
        completed_days: 7,
        dead_letter_days: 30,
        content_days: 14,
        cleanup_interval_secs: 3600,
    };

    let app = routes::routes(queue.clone(), ctx.content_repo.clone(), retention);
    let server = TestServer::new(app).unwrap();
    (server, queue, ctx.content_repo.clone())
}

#[tokio::test]
async fn test_health_and_version() {
    let (server, _, _) = create_test_server().await;

    let response = server.get("/health").await;
    response.assert_status_ok();
    response.assert_text("OK");

    server
        .get("/v1/version")
        .await
        .assert_text(env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_enqueue_and_fetch_job() {
    let (server, _, _) = create_test_server().await;

    let response = server
        .post("/v1/queue/jobs")
        .json(&json!({
            "job_type": "send_notification",
            "payload": {"recipient": "ops", "message": "disk full"},
            "priority": 5,
            "max_retries": 1
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let id = response.json::<Value>()["id"].as_str().unwrap().to_string();

    let job = server
        .get(&format!("/v1/queue/jobs/{}", id))
        .await
        .json::<Value>();
    assert_eq!(job["state"], "pending");
    assert_eq!(job["priority"], 5);
    assert_eq!(job["max_retries"], 1);
    assert_eq!(job["payload"]["recipient"], "ops");
}

#[tokio::test]
async fn test_enqueue_validation_errors() {
    let (server, _, _) = create_test_server().await;

    let response = server
        .post("/v1/queue/jobs")
        .json(&json!({"job_type": "resize_image"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.json::<Value>()["error"]
        .as_str()
        .unwrap()
        .contains("resize_image"));

    let first = server
        .post("/v1/queue/jobs")
        .json(&json!({"job_type": "cleanup", "id": "cleanup-1"}))
        .await;
    first.assert_status(StatusCode::CREATED);

    server
        .post("/v1/queue/jobs")
        .json(&json!({"job_type": "cleanup", "id": "cleanup-1"}))
        .await
        .assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_enqueue_rejects_timeout_beyond_claim_timeout() {
    let (server, _, _) = create_test_server().await;

    // 测试库的认领超时为 5 分钟
    let response = server
        .post("/v1/queue/jobs")
        .json(&json!({"job_type": "cleanup", "timeout_ms": 300_000}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.json::<Value>()["error"]
        .as_str()
        .unwrap()
        .contains("claim timeout"));

    server
        .post("/v1/queue/jobs")
        .json(&json!({"job_type": "cleanup", "timeout_ms": 299_000}))
        .await
        .assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn test_enqueue_rejects_type_without_handler() {
    let ctx = setup_db().await;
    let registry = Arc::new(HandlerRegistry::new().register(Arc::new(ScriptedHandler::new(
        JobType::Cleanup,
        Behavior::Succeed,
    ))));
    let queue = Arc::new(job_queue_with(ctx.job_repo.clone(), registry));
    let retention = RetentionSettings {
        completed_days: 7,
        dead_letter_days: 30,
        content_days: 14,
        cleanup_interval_secs: 3600,
    };
    let server = TestServer::new(routes::routes(queue, ctx.content_repo.clone(), retention)).unwrap();

    let response = server
        .post("/v1/queue/jobs")
        .json(&json!({"job_type": "publish_social"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.json::<Value>()["error"]
        .as_str()
        .unwrap()
        .contains("No handler registered for job type 'publish_social'"));

    server
        .post("/v1/queue/jobs")
        .json(&json!({"job_type": "cleanup"}))
        .await
        .assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn test_unknown_job_returns_not_found() {
    let (server, _, _) = create_test_server().await;

    server
        .get("/v1/queue/jobs/does-not-exist")
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_metrics_and_dead_letters() {
    let (server, queue, content) = create_test_server().await;

    let id = queue
        .enqueue(JobType::Cleanup, json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    queue
        .enqueue(JobType::Cleanup, json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    let claimed = queue.claim("w1", None).await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
    queue
        .fail(&claimed.claim_token(), "payload rejected", false)
        .await
        .unwrap();
    content.enqueue("evt-1", 3).await.unwrap();

    let metrics = server.get("/v1/queue/metrics").await.json::<Value>();
    assert_eq!(metrics["pending"], 1);
    assert_eq!(metrics["failed"], 1);
    assert_eq!(metrics["dead_letters"], 1);

    let dead = server
        .get("/v1/queue/dead-letters")
        .add_query_param("limit", 10)
        .await
        .json::<Vec<Value>>();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0]["original_job_id"], id.as_str());
    assert_eq!(dead[0]["error"], "payload rejected");

    let content_metrics = server.get("/v1/content-queue/metrics").await.json::<Value>();
    assert_eq!(content_metrics["pending"], 1);
    assert_eq!(content_metrics["total"], 1);
}

#[tokio::test]
async fn test_manual_cleanup_uses_query_overrides() {
    let (server, queue, _) = create_test_server().await;

    let id = queue
        .enqueue(JobType::Cleanup, json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    let claimed = queue.claim("w1", None).await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
    assert!(queue.complete(&claimed.claim_token(), None).await.unwrap());

    // 默认保留期内不删除
    let kept = server.post("/v1/queue/cleanup").await.json::<Value>();
    assert_eq!(kept["jobs"]["completed_deleted"], 0);

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let report = server
        .post("/v1/queue/cleanup")
        .add_query_param("completed_days", 0)
        .await
        .json::<Value>();
    assert_eq!(report["jobs"]["completed_deleted"], 1);
    assert_eq!(report["content_deleted"], 0);
}

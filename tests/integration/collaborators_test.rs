// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{job_queue_with, setup_db, setup_db_with};
use dispatchrs::domain::models::content_item::ContentStatus;
use dispatchrs::domain::models::job::{EnqueueOptions, JobState, JobType};
use dispatchrs::domain::repositories::content_queue_repository::ContentQueueRepository;
use dispatchrs::domain::services::content_generator::{ContentGenerator, GenerationOutcome};
use dispatchrs::domain::services::content_processor::ContentBatchProcessor;
use dispatchrs::domain::services::notifier::Notifier;
use dispatchrs::domain::services::significance::{ContentProducer, SeverityThresholdFilter};
use dispatchrs::infrastructure::services::http_content_generator::HttpContentGenerator;
use dispatchrs::infrastructure::services::webhook_notifier::{sign, WebhookNotifier, SIGNATURE_HEADER};
use dispatchrs::queue::job_queue::JobQueue;
use dispatchrs::utils::retry_policy::is_retryable_error;
use dispatchrs::workers::content_worker::{DrainContentQueueHandler, IngestEventsHandler};
use dispatchrs::workers::{HandlerRegistry, JobHandler, JobOutcome, WorkerConfig, WorkerRuntime};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn generator(server: &MockServer) -> HttpContentGenerator {
    HttpContentGenerator::new(format!("{}/generate", server.uri()), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_generator_parses_generated_and_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .and(body_json(json!({"raw_event_id": "evt-1"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"article_id": "art-1", "cost_usd": 0.02})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .and(body_json(json!({"raw_event_id": "evt-2"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"skipped": true, "reason": "duplicate coverage"})),
        )
        .mount(&server)
        .await;

    let generator = generator(&server);

    assert_eq!(
        generator.generate("evt-1").await.unwrap(),
        GenerationOutcome::Generated {
            article_id: "art-1".to_string(),
            cost_usd: 0.02
        }
    );
    assert_eq!(
        generator.generate("evt-2").await.unwrap(),
        GenerationOutcome::Skipped {
            reason: "duplicate coverage".to_string()
        }
    );
}

#[tokio::test]
async fn test_generator_error_statuses_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .and(body_json(json!({"raw_event_id": "busy"})))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .and(body_json(json!({"raw_event_id": "bad"})))
        .respond_with(ResponseTemplate::new(422).set_body_string("unknown event"))
        .mount(&server)
        .await;

    let generator = generator(&server);

    let busy = generator.generate("busy").await.unwrap_err();
    assert!(is_retryable_error(&busy));

    let bad = generator.generate("bad").await.unwrap_err();
    assert!(!is_retryable_error(&bad));
    assert!(format!("{:#}", bad).contains("unknown event"));
}

#[tokio::test]
async fn test_webhook_notifier_signs_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/alerts"))
        .and(header_exists(SIGNATURE_HEADER))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(
        format!("{}/hooks/alerts", server.uri()),
        "shared-secret",
        Duration::from_secs(5),
    )
    .unwrap();
    notifier.send("ops@example.com", "M6.1 quake").await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    let signature = request
        .headers
        .get(SIGNATURE_HEADER)
        .unwrap()
        .to_str()
        .unwrap();
    assert_eq!(signature, sign("shared-secret", &request.body).unwrap());

    let body: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["recipient"], "ops@example.com");
    assert_eq!(body["message"], "M6.1 quake");
    assert!(body["sent_at"].is_string());
}

#[tokio::test]
async fn test_webhook_notifier_reports_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(server.uri(), "secret", Duration::from_secs(5)).unwrap();
    let err = notifier.send("ops", "hello").await.unwrap_err();
    assert!(is_retryable_error(&err));
}

#[tokio::test]
async fn test_batch_processor_records_each_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(json!({"raw_event_id": "quake"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"article_id": "art-7"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_json(json!({"raw_event_id": "minor"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"skipped": true, "reason": "stale"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_json(json!({"raw_event_id": "flaky"})))
        .respond_with(ResponseTemplate::new(504))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_json(json!({"raw_event_id": "broken"})))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let ctx = setup_db_with(chrono::Duration::minutes(5), 3).await;
    let repo = ctx.content_repo.clone();
    for event in ["quake", "minor", "flaky", "broken"] {
        repo.enqueue(event, 1).await.unwrap();
    }

    let processor =
        ContentBatchProcessor::new(repo.clone(), Arc::new(generator(&server)), 10, "drainer");
    let report = processor.drain_once().await.unwrap();

    assert_eq!(report.claimed, 4);
    assert_eq!(report.completed, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.retried, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.store_errors, 0);

    let quake = repo.find_by_event("quake").await.unwrap().unwrap();
    assert_eq!(quake.status, ContentStatus::Completed);
    assert_eq!(quake.article_id.as_deref(), Some("art-7"));
    assert_eq!(
        repo.find_by_event("minor").await.unwrap().unwrap().status,
        ContentStatus::Skipped
    );
    assert_eq!(
        repo.find_by_event("flaky").await.unwrap().unwrap().status,
        ContentStatus::Pending
    );
    assert_eq!(
        repo.find_by_event("broken").await.unwrap().unwrap().status,
        ContentStatus::Failed
    );

    // 只剩下待重试的项
    let second = processor.drain_once().await.unwrap();
    assert_eq!(second.claimed, 1);
    assert_eq!(second.retried, 1);
}

#[tokio::test]
async fn test_ingest_then_drain_through_runtime() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"article_id": "art-1"})))
        .mount(&server)
        .await;

    let ctx = setup_db().await;
    let content = ctx.content_repo.clone();
    let processor = Arc::new(ContentBatchProcessor::new(
        content.clone(),
        Arc::new(generator(&server)),
        10,
        "drainer",
    ));
    let producer = Arc::new(ContentProducer::new(
        content.clone(),
        Arc::new(SeverityThresholdFilter::new(5.0)),
    ));

    let registry = Arc::new(
        HandlerRegistry::new()
            .register(Arc::new(IngestEventsHandler::new(producer)))
            .register(Arc::new(DrainContentQueueHandler::new(
                processor,
                Duration::from_secs(30),
            ))),
    );
    let queue = Arc::new(job_queue_with(ctx.job_repo.clone(), registry.clone()));
    let runtime = WorkerRuntime::new(
        queue.clone(),
        registry,
        WorkerConfig {
            poll_interval: Duration::from_millis(20),
            max_concurrent_jobs: 1,
            worker_id: "e2e-worker".to_string(),
            ..WorkerConfig::default()
        },
    );
    runtime.start().await.unwrap();

    let ingest = queue
        .enqueue(
            JobType::IngestEvents,
            json!({"events": [
                {"id": "evt-big", "category": "earthquake", "severity": 7.2},
                {"id": "evt-small", "category": "flood", "severity": 1.0}
            ]}),
            EnqueueOptions::default().with_priority(5),
        )
        .await
        .unwrap();
    let drain = queue
        .enqueue(JobType::DrainContentQueue, json!({}), EnqueueOptions::default())
        .await
        .unwrap();

    let (q, drain_id) = (&queue, drain.as_str());
    let done = super::helpers::wait_until(Duration::from_secs(5), || async move {
        matches!(q.find(drain_id).await, Ok(Some(job)) if job.state == JobState::Completed)
    })
    .await;
    assert!(done);
    runtime.stop().await;

    let ingest_job = queue.find(&ingest).await.unwrap().unwrap();
    assert_eq!(
        ingest_job.result,
        Some(json!({"received": 2, "queued": 1, "revived": 0, "ignored": 1}))
    );

    let item = content.find_by_event("evt-big").await.unwrap().unwrap();
    assert_eq!(item.status, ContentStatus::Completed);
    assert_eq!(item.priority, 7);
    assert!(content.find_by_event("evt-small").await.unwrap().is_none());
}

#[tokio::test]
async fn test_drain_handler_is_not_retried() {
    let server = MockServer::start().await;
    let ctx = setup_db().await;
    let processor = Arc::new(ContentBatchProcessor::new(
        ctx.content_repo.clone(),
        Arc::new(generator(&server)),
        5,
        "drainer",
    ));
    let handler = DrainContentQueueHandler::new(processor, Duration::from_secs(10));

    assert_eq!(handler.max_retries(), Some(0));
    assert_eq!(handler.timeout(), Some(Duration::from_secs(10)));

    let outcome = handler.handle(json!({})).await.unwrap();
    let JobOutcome::Success(Some(report)) = outcome else {
        panic!("expected a batch report, got {:?}", outcome);
    };
    assert_eq!(report["claimed"], 0);
}

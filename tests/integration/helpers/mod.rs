// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use dispatchrs::domain::models::job::JobType;
use dispatchrs::infrastructure::repositories::content_queue_repo_impl::ContentQueueRepositoryImpl;
use dispatchrs::infrastructure::repositories::job_repo_impl::JobRepositoryImpl;
use dispatchrs::queue::job_queue::{PostgresJobQueue, QueueDefaults};
use dispatchrs::workers::{HandlerRegistry, JobHandler, JobOutcome};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub type TestQueue = PostgresJobQueue<JobRepositoryImpl>;

#[allow(dead_code)]
pub struct TestDb {
    pub db: Arc<DatabaseConnection>,
    pub job_repo: Arc<JobRepositoryImpl>,
    pub content_repo: Arc<ContentQueueRepositoryImpl>,
}

/// 内存 SQLite，单连接保证所有调用看到同一个库
pub async fn setup_db() -> TestDb {
    setup_db_with(chrono::Duration::minutes(5), 3).await
}

pub async fn setup_db_with(claim_timeout: chrono::Duration, content_max_attempts: i32) -> TestDb {
    let mut opt = ConnectOptions::new("sqlite::memory:".to_string());
    opt.max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);

    let db = Arc::new(
        Database::connect(opt)
            .await
            .expect("Failed to open in-memory database"),
    );
    Migrator::up(db.as_ref(), None)
        .await
        .expect("Failed to run migrations");

    TestDb {
        job_repo: Arc::new(JobRepositoryImpl::new(db.clone(), claim_timeout)),
        content_repo: Arc::new(
            ContentQueueRepositoryImpl::new(db.clone(), claim_timeout, content_max_attempts)
                .with_retry_delay(Duration::ZERO),
        ),
        db,
    }
}

pub fn fast_defaults() -> QueueDefaults {
    QueueDefaults {
        priority: 0,
        max_retries: 3,
        retry_delay: Duration::from_millis(50),
    }
}

pub fn job_queue(repo: Arc<JobRepositoryImpl>) -> TestQueue {
    PostgresJobQueue::new(repo, fast_defaults())
}

pub fn job_queue_with(repo: Arc<JobRepositoryImpl>, registry: Arc<HandlerRegistry>) -> TestQueue {
    PostgresJobQueue::new(repo, fast_defaults()).with_registry(registry)
}

/// 可编排行为的测试处理器
#[allow(dead_code)]
pub enum Behavior {
    Succeed,
    Sleep(Duration),
    FailTransient,
    FailPermanent,
    Panic,
}

pub struct ScriptedHandler {
    job_type: JobType,
    behavior: Behavior,
    timeout: Option<Duration>,
    pub calls: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl ScriptedHandler {
    pub fn new(job_type: JobType, behavior: Behavior) -> Self {
        Self {
            job_type,
            behavior,
            timeout: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl JobHandler for ScriptedHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn handle(&self, payload: Value) -> anyhow::Result<JobOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Succeed => Ok(JobOutcome::success_with(payload)),
            Behavior::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(JobOutcome::success())
            }
            Behavior::FailTransient => Err(anyhow::anyhow!("connection reset by peer")),
            Behavior::FailPermanent => Ok(JobOutcome::permanent("payload rejected")),
            Behavior::Panic => panic!("handler exploded"),
        }
    }
}

/// 轮询直到条件成立或超时
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check().await
}

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::RetentionSettings;
use crate::domain::models::content_item::ContentQueueMetrics;
use crate::domain::models::job::{DeadLetterJob, EnqueueOptions, Job, JobType, QueueMetrics};
use crate::domain::repositories::content_queue_repository::ContentQueueRepository;
use crate::presentation::errors::AppError;
use crate::queue::job_queue::JobQueue;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 死信列表默认条数
const DEFAULT_DEAD_LETTER_LIMIT: u64 = 50;
/// 死信列表最大条数
const MAX_DEAD_LETTER_LIMIT: u64 = 500;

/// 入队请求
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub job_type: String,
    #[serde(default)]
    pub payload: Value,
    pub id: Option<String>,
    pub priority: Option<i32>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub delay_ms: Option<u64>,
}

impl EnqueueRequest {
    fn options(&self) -> EnqueueOptions {
        EnqueueOptions {
            id: self.id.clone(),
            priority: self.priority,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay_ms.map(Duration::from_millis),
            timeout: self.timeout_ms.map(Duration::from_millis),
            delay: self.delay_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    pub limit: Option<u64>,
}

/// 清理参数，未提供时使用配置的保留天数
#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    pub completed_days: Option<u32>,
    pub dead_letter_days: Option<u32>,
    pub content_days: Option<u32>,
}

/// 入队任务
///
/// # 返回值
///
/// * `201` - 返回任务ID
/// * `400` - 未知任务类型或选项无效
/// * `409` - 任务ID已存在
pub async fn enqueue_job<Q: JobQueue + 'static>(
    Extension(queue): Extension<Arc<Q>>,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let job_type: JobType = request.job_type.parse()?;
    let options = request.options();
    let id = queue.enqueue(job_type, request.payload, options).await?;

    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

/// 查询任务
pub async fn get_job<Q: JobQueue + 'static>(
    Extension(queue): Extension<Arc<Q>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, AppError> {
    let job = queue.find(&id).await?.ok_or_else(AppError::not_found)?;
    Ok(Json(job))
}

pub async fn queue_metrics<Q: JobQueue + 'static>(
    Extension(queue): Extension<Arc<Q>>,
) -> Result<Json<QueueMetrics>, AppError> {
    Ok(Json(queue.metrics().await?))
}

/// 最近的死信记录，按失败时间倒序
pub async fn dead_letters<Q: JobQueue + 'static>(
    Extension(queue): Extension<Arc<Q>>,
    Query(query): Query<DeadLetterQuery>,
) -> Result<Json<Vec<DeadLetterJob>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_DEAD_LETTER_LIMIT)
        .clamp(1, MAX_DEAD_LETTER_LIMIT);
    Ok(Json(queue.dead_letters(limit).await?))
}

/// 立即执行一次清理
pub async fn cleanup<Q, C>(
    Extension(queue): Extension<Arc<Q>>,
    Extension(content): Extension<Arc<C>>,
    Extension(retention): Extension<Arc<RetentionSettings>>,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<Value>, AppError>
where
    Q: JobQueue + 'static,
    C: ContentQueueRepository + 'static,
{
    let completed_days = query.completed_days.unwrap_or(retention.completed_days);
    let dead_letter_days = query.dead_letter_days.unwrap_or(retention.dead_letter_days);
    let content_days = query.content_days.unwrap_or(retention.content_days);

    let jobs = queue.cleanup(completed_days, dead_letter_days).await?;
    let content_deleted = content.cleanup(content_days).await?;
    info!(
        completed_days,
        dead_letter_days, content_days, content_deleted, "Manual cleanup finished"
    );

    Ok(Json(json!({
        "jobs": jobs,
        "content_deleted": content_deleted,
    })))
}

pub async fn content_queue_metrics<C: ContentQueueRepository + 'static>(
    Extension(content): Extension<Arc<C>>,
) -> Result<Json<ContentQueueMetrics>, AppError> {
    Ok(Json(content.metrics().await?))
}

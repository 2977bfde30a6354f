// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::content_item::ContentEnqueueOutcome;
use crate::domain::models::job::JobType;
use crate::domain::repositories::content_queue_repository::ContentQueueRepository;
use crate::domain::services::content_processor::ContentBatchProcessor;
use crate::domain::services::significance::{ContentProducer, RawEvent};
use crate::workers::handler::{JobHandler, JobOutcome};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// 批处理在生成调用之外的余量
const DRAIN_OVERHEAD: Duration = Duration::from_secs(30);

/// 计算单批消费的执行超时
///
/// 按整批生成调用估算，并限制在认领超时的 90% 以内，
/// 让运行时总是先于过期回收结束等待
pub fn drain_timeout(generator_timeout: Duration, batch_size: u64, claim_timeout: Duration) -> Duration {
    let batch = u32::try_from(batch_size.max(1)).unwrap_or(u32::MAX);
    let estimate = generator_timeout
        .saturating_mul(batch)
        .saturating_add(DRAIN_OVERHEAD);
    estimate.min(claim_timeout.mul_f64(0.9))
}

/// 消费内容队列的任务处理器
pub struct DrainContentQueueHandler<R: ContentQueueRepository> {
    processor: Arc<ContentBatchProcessor<R>>,
    timeout: Duration,
}

impl<R: ContentQueueRepository> DrainContentQueueHandler<R> {
    /// # 参数
    ///
    /// * `processor` - 内容批处理器
    /// * `timeout` - 单批处理的执行超时，应覆盖整批生成调用
    pub fn new(processor: Arc<ContentBatchProcessor<R>>, timeout: Duration) -> Self {
        Self { processor, timeout }
    }
}

#[async_trait]
impl<R: ContentQueueRepository + 'static> JobHandler for DrainContentQueueHandler<R> {
    fn job_type(&self) -> JobType {
        JobType::DrainContentQueue
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    // 下一次调度会再次消费，无需重试
    fn max_retries(&self) -> Option<u32> {
        Some(0)
    }

    async fn handle(&self, _payload: Value) -> anyhow::Result<JobOutcome> {
        match self.processor.drain_once().await {
            Ok(report) => Ok(JobOutcome::success_with(serde_json::to_value(report)?)),
            Err(e) => Ok(JobOutcome::retryable(format!(
                "Failed to claim content items: {}",
                e
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IngestPayload {
    events: Vec<RawEvent>,
}

/// 接收外部事件并按显著性放入内容队列
pub struct IngestEventsHandler<R: ContentQueueRepository> {
    producer: Arc<ContentProducer<R>>,
}

impl<R: ContentQueueRepository> IngestEventsHandler<R> {
    pub fn new(producer: Arc<ContentProducer<R>>) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl<R: ContentQueueRepository + 'static> JobHandler for IngestEventsHandler<R> {
    fn job_type(&self) -> JobType {
        JobType::IngestEvents
    }

    async fn handle(&self, payload: Value) -> anyhow::Result<JobOutcome> {
        let payload: IngestPayload = match serde_json::from_value(payload) {
            Ok(payload) => payload,
            Err(e) => return Ok(JobOutcome::permanent(format!("Invalid payload: {}", e))),
        };

        let mut queued = 0;
        let mut revived = 0;
        let mut ignored = 0;
        for event in &payload.events {
            match self.producer.offer(event).await {
                Ok(Some(ContentEnqueueOutcome::Created)) => queued += 1,
                Ok(Some(ContentEnqueueOutcome::Revived)) => revived += 1,
                Ok(Some(_)) => {}
                Ok(None) => ignored += 1,
                Err(e) => {
                    // 已入队的事件再次入队是无害的，整体重试即可
                    error!(raw_event_id = %event.id, "Failed to queue event: {}", e);
                    return Ok(JobOutcome::retryable(format!(
                        "Failed to queue event {}: {}",
                        event.id, e
                    )));
                }
            }
        }

        Ok(JobOutcome::success_with(json!({
            "received": payload.events.len(),
            "queued": queued,
            "revived": revived,
            "ignored": ignored,
        })))
    }
}

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::RetentionSettings;
use crate::domain::models::job::JobType;
use crate::domain::repositories::content_queue_repository::ContentQueueRepository;
use crate::queue::job_queue::JobQueue;
use crate::workers::handler::{JobHandler, JobOutcome};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// 负载中可覆盖的保留天数
#[derive(Debug, Default, Deserialize)]
struct CleanupPayload {
    completed_days: Option<u32>,
    dead_letter_days: Option<u32>,
    content_days: Option<u32>,
}

/// 清理历史任务和内容队列项
pub struct CleanupHandler<Q: JobQueue, C: ContentQueueRepository> {
    queue: Q,
    content: Arc<C>,
    retention: RetentionSettings,
}

impl<Q: JobQueue, C: ContentQueueRepository> CleanupHandler<Q, C> {
    pub fn new(queue: Q, content: Arc<C>, retention: RetentionSettings) -> Self {
        Self {
            queue,
            content,
            retention,
        }
    }
}

#[async_trait]
impl<Q, C> JobHandler for CleanupHandler<Q, C>
where
    Q: JobQueue + 'static,
    C: ContentQueueRepository + 'static,
{
    fn job_type(&self) -> JobType {
        JobType::Cleanup
    }

    fn max_retries(&self) -> Option<u32> {
        Some(1)
    }

    async fn handle(&self, payload: Value) -> anyhow::Result<JobOutcome> {
        let overrides: CleanupPayload = if payload.is_null() {
            CleanupPayload::default()
        } else {
            match serde_json::from_value(payload) {
                Ok(overrides) => overrides,
                Err(e) => return Ok(JobOutcome::permanent(format!("Invalid payload: {}", e))),
            }
        };

        let completed_days = overrides
            .completed_days
            .unwrap_or(self.retention.completed_days);
        let dead_letter_days = overrides
            .dead_letter_days
            .unwrap_or(self.retention.dead_letter_days);
        let content_days = overrides
            .content_days
            .unwrap_or(self.retention.content_days);

        let jobs = self.queue.cleanup(completed_days, dead_letter_days).await?;
        let content = self.content.cleanup(content_days).await?;

        info!(
            completed_deleted = jobs.completed_deleted,
            failed_deleted = jobs.failed_deleted,
            dead_letters_deleted = jobs.dead_letters_deleted,
            content_deleted = content,
            "Cleanup finished"
        );

        Ok(JobOutcome::success_with(json!({
            "jobs": jobs,
            "content_deleted": content,
        })))
    }
}

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::content_item::{ContentQueueItem, ContentStatus};
use crate::domain::repositories::content_queue_repository::ContentQueueRepository;
use crate::domain::repositories::job_repository::RepositoryError;
use crate::domain::services::content_generator::{ContentGenerator, GenerationOutcome};
use crate::utils::retry_policy::is_retryable_error;
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// 单批次处理统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub claimed: usize,
    pub completed: usize,
    pub skipped: usize,
    /// 退回待处理等待重试
    pub retried: usize,
    pub failed: usize,
    /// 认领已过期并被其它工作者接手，结果未写入
    pub lost_claims: usize,
    /// 记录结果时存储出错的项，稍后由过期回收处理
    pub store_errors: usize,
}

/// 内容队列批处理器
///
/// 认领一小批队列项，在当前任务内逐个同步调用生成服务
pub struct ContentBatchProcessor<R: ContentQueueRepository> {
    repository: Arc<R>,
    generator: Arc<dyn ContentGenerator>,
    batch_size: u64,
    worker_id: String,
}

impl<R: ContentQueueRepository> ContentBatchProcessor<R> {
    /// 创建新的批处理器
    ///
    /// # 参数
    ///
    /// * `repository` - 内容队列仓库
    /// * `generator` - 内容生成服务
    /// * `batch_size` - 每批最多认领数量
    /// * `worker_id` - 认领时写入的工作者标识
    pub fn new(
        repository: Arc<R>,
        generator: Arc<dyn ContentGenerator>,
        batch_size: u64,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            generator,
            batch_size: batch_size.max(1),
            worker_id: worker_id.into(),
        }
    }

    /// 处理一批队列项
    ///
    /// # 返回值
    ///
    /// * `Ok(BatchReport)` - 本批统计
    /// * `Err(RepositoryError)` - 认领失败
    pub async fn drain_once(&self) -> Result<BatchReport, RepositoryError> {
        let items = self
            .repository
            .claim(self.batch_size, &self.worker_id)
            .await?;

        let mut report = BatchReport {
            claimed: items.len(),
            ..Default::default()
        };

        for item in items {
            if let Err(e) = self.process(&item, &mut report).await {
                report.store_errors += 1;
                error!(
                    item_id = item.id,
                    raw_event_id = %item.raw_event_id,
                    "Failed to record content item outcome: {}",
                    e
                );
            }
        }

        if report.claimed > 0 {
            info!(
                worker_id = %self.worker_id,
                claimed = report.claimed,
                completed = report.completed,
                skipped = report.skipped,
                retried = report.retried,
                failed = report.failed,
                "Content batch processed"
            );
        }

        Ok(report)
    }

    async fn process(
        &self,
        item: &ContentQueueItem,
        report: &mut BatchReport,
    ) -> Result<(), RepositoryError> {
        match self.generator.generate(&item.raw_event_id).await {
            Ok(GenerationOutcome::Generated {
                article_id,
                cost_usd,
            }) => {
                if !self.repository.complete(&item.claim_token(), &article_id).await? {
                    report.lost_claims += 1;
                    warn!(item_id = item.id, %article_id, "Content item no longer held, article discarded");
                    return Ok(());
                }
                report.completed += 1;
                counter!("content_items_processed_total", "outcome" => "completed").increment(1);
                info!(
                    item_id = item.id,
                    raw_event_id = %item.raw_event_id,
                    %article_id,
                    cost_usd,
                    "Article generated"
                );
            }
            Ok(GenerationOutcome::Skipped { reason }) => {
                if !self.repository.skip(&item.claim_token(), &reason).await? {
                    report.lost_claims += 1;
                    warn!(item_id = item.id, "Content item no longer held, skip ignored");
                    return Ok(());
                }
                report.skipped += 1;
                counter!("content_items_processed_total", "outcome" => "skipped").increment(1);
                info!(item_id = item.id, raw_event_id = %item.raw_event_id, %reason, "Content item skipped");
            }
            Err(err) => {
                let retryable = is_retryable_error(&err);
                let message = format!("{:#}", err);
                match self
                    .repository
                    .fail(&item.claim_token(), &message, retryable)
                    .await?
                {
                    Some(ContentStatus::Pending) => {
                        report.retried += 1;
                        counter!("content_items_processed_total", "outcome" => "retried")
                            .increment(1);
                        warn!(
                            item_id = item.id,
                            attempts = item.attempts,
                            "Content generation failed, will retry: {}",
                            message
                        );
                    }
                    Some(_) => {
                        report.failed += 1;
                        counter!("content_items_processed_total", "outcome" => "failed")
                            .increment(1);
                        error!(
                            item_id = item.id,
                            attempts = item.attempts,
                            retryable,
                            "Content generation failed permanently: {}",
                            message
                        );
                    }
                    None => {
                        report.lost_claims += 1;
                        warn!(item_id = item.id, "Content item no longer held, failure ignored");
                    }
                }
            }
        }

        Ok(())
    }
}

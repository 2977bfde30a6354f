// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::job_repository::RepositoryError;
use crate::domain::models::claim::ContentClaim;
use crate::domain::models::content_item::{
    ContentEnqueueOutcome, ContentQueueItem, ContentQueueMetrics, ContentStatus,
};
use crate::domain::models::job::ReleasedClaims;
use async_trait::async_trait;
use chrono::Duration;

/// 内容生成队列仓库
///
/// 与通用任务队列共享认领与回收算法，但以源事件为键
#[async_trait]
pub trait ContentQueueRepository: Send + Sync {
    /// 入队（按源事件 upsert）
    ///
    /// # 参数
    ///
    /// * `raw_event_id` - 源事件引用
    /// * `priority` - 优先级
    ///
    /// # 返回值
    ///
    /// 返回本次入队对已有行产生的效果
    async fn enqueue(
        &self,
        raw_event_id: &str,
        priority: i32,
    ) -> Result<ContentEnqueueOutcome, RepositoryError>;
    /// 回收过期认领后批量认领最多 `limit` 项
    async fn claim(
        &self,
        limit: u64,
        worker_id: &str,
    ) -> Result<Vec<ContentQueueItem>, RepositoryError>;
    /// 记录生成的文章
    ///
    /// 返回 `false` 表示该项已不由 `claim` 持有，未做修改
    async fn complete(&self, claim: &ContentClaim, article_id: &str)
        -> Result<bool, RepositoryError>;
    /// 业务规则短路，返回值同 `complete`
    async fn skip(&self, claim: &ContentClaim, reason: &str) -> Result<bool, RepositoryError>;
    /// 记录失败，可重试时按退避时间退回待处理
    ///
    /// # 返回值
    ///
    /// * `Some(ContentStatus::Pending)` - 已退回待处理
    /// * `Some(ContentStatus::Failed)` - 终止
    /// * `None` - 队列项已不由该认领持有
    async fn fail(
        &self,
        claim: &ContentClaim,
        error: &str,
        retryable: bool,
    ) -> Result<Option<ContentStatus>, RepositoryError>;
    async fn release_stale(&self, claim_timeout: Duration)
        -> Result<ReleasedClaims, RepositoryError>;
    async fn find_by_event(
        &self,
        raw_event_id: &str,
    ) -> Result<Option<ContentQueueItem>, RepositoryError>;
    async fn metrics(&self) -> Result<ContentQueueMetrics, RepositoryError>;
    /// 删除早于保留期的已完成与已跳过项
    async fn cleanup(&self, retention_days: u32) -> Result<u64, RepositoryError>;
}

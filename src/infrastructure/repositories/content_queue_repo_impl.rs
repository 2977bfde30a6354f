// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::claim::ContentClaim;
use crate::domain::models::content_item::{
    ContentEnqueueOutcome, ContentQueueItem, ContentQueueMetrics, ContentStatus,
};
use crate::domain::models::job::ReleasedClaims;
use crate::domain::repositories::content_queue_repository::ContentQueueRepository;
use crate::domain::repositories::job_repository::RepositoryError;
use crate::infrastructure::database::entities::content_queue_item as item_entity;
use crate::queue::claim::{self, Claimable};
use crate::utils::retry_policy;
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use sea_orm::{
    sea_query::{Expr, OnConflict, SimpleExpr},
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect, Set,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 默认退避基准时间
pub const DEFAULT_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(30);

/// 内容队列仓库实现
#[derive(Clone)]
pub struct ContentQueueRepositoryImpl {
    db: Arc<DatabaseConnection>,
    /// 认领超时
    claim_timeout: Duration,
    /// 新建队列项的最大执行次数
    max_attempts: i32,
    /// 可重试失败的退避基准时间
    retry_delay: std::time::Duration,
}

impl ContentQueueRepositoryImpl {
    /// 创建新的内容队列仓库实例
    ///
    /// # 参数
    ///
    /// * `db` - 数据库连接
    /// * `claim_timeout` - 认领超时
    /// * `max_attempts` - 新建队列项的最大执行次数
    pub fn new(db: Arc<DatabaseConnection>, claim_timeout: Duration, max_attempts: i32) -> Self {
        Self {
            db,
            claim_timeout,
            max_attempts: max_attempts.max(1),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// 设置可重试失败的退避基准时间
    pub fn with_retry_delay(mut self, retry_delay: std::time::Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// 仍由 `claim` 持有时更新为终止状态，返回是否成功
    async fn transition_from_processing(
        &self,
        claim: &ContentClaim,
        status: ContentStatus,
        article_id: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        let now: DateTime<FixedOffset> = Utc::now().into();

        let mut update = item_entity::Entity::update_many()
            .col_expr(item_entity::Column::Status, Expr::value(status.to_string()))
            .col_expr(
                item_entity::Column::ErrorMessage,
                Expr::value(error_message.map(str::to_string)),
            )
            .col_expr(
                item_entity::Column::WorkerId,
                Expr::value(Option::<String>::None),
            )
            .col_expr(item_entity::Column::ProcessedAt, Expr::value(now))
            .col_expr(item_entity::Column::UpdatedAt, Expr::value(now));

        if let Some(article_id) = article_id {
            update = update.col_expr(item_entity::Column::ArticleId, Expr::value(article_id));
        }

        let result = update
            .filter(held_by(claim))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<ContentQueueItem>, RepositoryError> {
        item_entity::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(ContentQueueItem::try_from)
            .transpose()
    }

    /// 未发生状态转换时区分“不存在”和“已不由该认领持有”
    async fn ensure_exists(&self, claim: &ContentClaim, action: &str) -> Result<(), RepositoryError> {
        let item = self
            .find_by_id(claim.id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        debug!(
            item_id = claim.id,
            status = %item.status,
            holder = ?item.worker_id,
            attempts = item.attempts,
            claimant = %claim.worker_id,
            claimed_attempts = claim.attempts,
            action,
            "Content item no longer held by this claim, ignored"
        );
        Ok(())
    }
}

/// 行仍处于处理中且持有者和次数与凭证一致
fn held_by(claim: &ContentClaim) -> Condition {
    Condition::all()
        .add(item_entity::Column::Id.eq(claim.id))
        .add(item_entity::Column::Status.eq(ContentStatus::Processing.to_string()))
        .add(item_entity::Column::WorkerId.eq(claim.worker_id.as_str()))
        .add(item_entity::Column::Attempts.eq(claim.attempts))
}

impl Claimable for item_entity::Entity {
    fn id_column() -> Self::Column {
        item_entity::Column::Id
    }

    fn status_column() -> Self::Column {
        item_entity::Column::Status
    }

    fn worker_column() -> Self::Column {
        item_entity::Column::WorkerId
    }

    fn claimed_at_column() -> Self::Column {
        item_entity::Column::AssignedAt
    }

    fn attempts_column() -> Self::Column {
        item_entity::Column::Attempts
    }

    fn priority_column() -> Self::Column {
        item_entity::Column::Priority
    }

    fn created_at_column() -> Self::Column {
        item_entity::Column::CreatedAt
    }

    fn updated_at_column() -> Self::Column {
        item_entity::Column::UpdatedAt
    }

    fn attempt_budget() -> SimpleExpr {
        Expr::col(item_entity::Column::MaxAttempts).into()
    }

    fn ready_condition(now: DateTime<Utc>) -> Condition {
        let now: DateTime<FixedOffset> = now.into();
        Condition::any()
            .add(item_entity::Column::NextRetryAt.is_null())
            .add(item_entity::Column::NextRetryAt.lte(now))
    }
}

impl TryFrom<item_entity::Model> for ContentQueueItem {
    type Error = RepositoryError;

    fn try_from(model: item_entity::Model) -> Result<Self, Self::Error> {
        let status = model.status.parse().map_err(|e| {
            RepositoryError::InvalidState(format!("content item {}: {}", model.id, e))
        })?;

        Ok(Self {
            id: model.id,
            raw_event_id: model.raw_event_id,
            status,
            priority: model.priority,
            worker_id: model.worker_id,
            assigned_at: model.assigned_at.map(Into::into),
            attempts: model.attempts,
            max_attempts: model.max_attempts,
            article_id: model.article_id,
            error_message: model.error_message,
            next_retry_at: model.next_retry_at.map(Into::into),
            created_at: model.created_at.into(),
            processed_at: model.processed_at.map(Into::into),
            updated_at: model.updated_at.into(),
        })
    }
}

#[async_trait]
impl ContentQueueRepository for ContentQueueRepositoryImpl {
    async fn enqueue(
        &self,
        raw_event_id: &str,
        priority: i32,
    ) -> Result<ContentEnqueueOutcome, RepositoryError> {
        let now: DateTime<FixedOffset> = Utc::now().into();

        let inserted = item_entity::Entity::insert(item_entity::ActiveModel {
            raw_event_id: Set(raw_event_id.to_string()),
            status: Set(ContentStatus::Pending.to_string()),
            priority: Set(priority),
            attempts: Set(0),
            max_attempts: Set(self.max_attempts),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        })
        .on_conflict(
            OnConflict::column(item_entity::Column::RawEventId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(self.db.as_ref())
        .await?;

        if inserted == 1 {
            debug!(raw_event_id, priority, "Content item created");
            return Ok(ContentEnqueueOutcome::Created);
        }

        let revivable = [
            ContentStatus::Failed.to_string(),
            ContentStatus::Skipped.to_string(),
        ];

        let revived = item_entity::Entity::update_many()
            .col_expr(
                item_entity::Column::Status,
                Expr::value(ContentStatus::Pending.to_string()),
            )
            .col_expr(item_entity::Column::Priority, Expr::value(priority))
            .col_expr(item_entity::Column::Attempts, Expr::value(0))
            .col_expr(
                item_entity::Column::ErrorMessage,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                item_entity::Column::ProcessedAt,
                Expr::value(Option::<DateTime<FixedOffset>>::None),
            )
            .col_expr(
                item_entity::Column::WorkerId,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                item_entity::Column::AssignedAt,
                Expr::value(Option::<DateTime<FixedOffset>>::None),
            )
            .col_expr(
                item_entity::Column::NextRetryAt,
                Expr::value(Option::<DateTime<FixedOffset>>::None),
            )
            .col_expr(item_entity::Column::UpdatedAt, Expr::value(now))
            .filter(item_entity::Column::RawEventId.eq(raw_event_id))
            .filter(item_entity::Column::Status.is_in(revivable.clone()))
            .exec(self.db.as_ref())
            .await?;

        if revived.rows_affected == 1 {
            info!(raw_event_id, "Content item revived");
            return Ok(ContentEnqueueOutcome::Revived);
        }

        let raised = item_entity::Entity::update_many()
            .col_expr(item_entity::Column::Priority, Expr::value(priority))
            .col_expr(item_entity::Column::UpdatedAt, Expr::value(now))
            .filter(item_entity::Column::RawEventId.eq(raw_event_id))
            .filter(item_entity::Column::Status.is_not_in(revivable))
            .filter(item_entity::Column::Priority.lt(priority))
            .exec(self.db.as_ref())
            .await?;

        if raised.rows_affected == 1 {
            debug!(raw_event_id, priority, "Content item priority raised");
            Ok(ContentEnqueueOutcome::PriorityRaised)
        } else {
            Ok(ContentEnqueueOutcome::Unchanged)
        }
    }

    async fn claim(
        &self,
        limit: u64,
        worker_id: &str,
    ) -> Result<Vec<ContentQueueItem>, RepositoryError> {
        self.release_stale(self.claim_timeout).await?;

        let claimed = claim::claim_batch::<item_entity::Entity>(
            self.db.as_ref(),
            worker_id,
            limit,
            Condition::all(),
        )
        .await?;

        claimed
            .into_iter()
            .map(ContentQueueItem::try_from)
            .collect()
    }

    async fn complete(
        &self,
        claim: &ContentClaim,
        article_id: &str,
    ) -> Result<bool, RepositoryError> {
        let moved = self
            .transition_from_processing(claim, ContentStatus::Completed, Some(article_id), None)
            .await?;
        if !moved {
            self.ensure_exists(claim, "complete").await?;
        }
        Ok(moved)
    }

    async fn skip(&self, claim: &ContentClaim, reason: &str) -> Result<bool, RepositoryError> {
        let moved = self
            .transition_from_processing(claim, ContentStatus::Skipped, None, Some(reason))
            .await?;
        if !moved {
            self.ensure_exists(claim, "skip").await?;
        }
        Ok(moved)
    }

    async fn fail(
        &self,
        claim: &ContentClaim,
        error: &str,
        retryable: bool,
    ) -> Result<Option<ContentStatus>, RepositoryError> {
        let item = self
            .find_by_id(claim.id)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        if item.status != ContentStatus::Processing
            || !claim.matches(item.worker_id.as_deref(), item.attempts)
        {
            warn!(
                item_id = claim.id,
                status = %item.status,
                holder = ?item.worker_id,
                claimant = %claim.worker_id,
                "Failure reported for a content item this claim no longer holds"
            );
            return Ok(None);
        }

        if !(retryable && item.can_retry()) {
            let moved = self
                .transition_from_processing(claim, ContentStatus::Failed, None, Some(error))
                .await?;
            return Ok(moved.then_some(ContentStatus::Failed));
        }

        let now = Utc::now();
        let now_fixed: DateTime<FixedOffset> = now.into();
        let delay = retry_policy::next_delay(
            item.attempts.saturating_sub(1).max(0) as u32,
            self.retry_delay,
        );
        let next_retry_at: DateTime<FixedOffset> =
            (now + Duration::milliseconds(delay.as_millis() as i64)).into();

        let requeued = item_entity::Entity::update_many()
            .col_expr(
                item_entity::Column::Status,
                Expr::value(ContentStatus::Pending.to_string()),
            )
            .col_expr(item_entity::Column::ErrorMessage, Expr::value(error))
            .col_expr(item_entity::Column::NextRetryAt, Expr::value(next_retry_at))
            .col_expr(
                item_entity::Column::WorkerId,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                item_entity::Column::AssignedAt,
                Expr::value(Option::<DateTime<FixedOffset>>::None),
            )
            .col_expr(item_entity::Column::UpdatedAt, Expr::value(now_fixed))
            .filter(held_by(claim))
            .exec(self.db.as_ref())
            .await?;

        if requeued.rows_affected == 1 {
            debug!(item_id = claim.id, attempts = item.attempts, %next_retry_at, "Content item scheduled for retry");
        }
        Ok((requeued.rows_affected == 1).then_some(ContentStatus::Pending))
    }

    async fn release_stale(
        &self,
        claim_timeout: Duration,
    ) -> Result<ReleasedClaims, RepositoryError> {
        let threshold = Utc::now() - claim_timeout;
        let mut report = ReleasedClaims::default();

        let exhausted =
            claim::find_stale_exhausted::<item_entity::Entity, _>(self.db.as_ref(), threshold)
                .await?;
        for model in exhausted {
            let error = format!("Claim expired after {} attempts", model.attempts);
            let stale_claim = ContentClaim::new(
                model.id,
                model.worker_id.clone().unwrap_or_default(),
                model.attempts,
            );
            if self
                .transition_from_processing(&stale_claim, ContentStatus::Failed, None, Some(&error))
                .await?
            {
                report.exhausted += 1;
                warn!(item_id = model.id, raw_event_id = %model.raw_event_id, "Stale content item exhausted its attempts");
            }
        }

        report.requeued =
            claim::release_stale::<item_entity::Entity, _>(self.db.as_ref(), threshold).await?;

        if report.requeued > 0 {
            info!(count = report.requeued, "Released stale content claims");
        }

        Ok(report)
    }

    async fn find_by_event(
        &self,
        raw_event_id: &str,
    ) -> Result<Option<ContentQueueItem>, RepositoryError> {
        item_entity::Entity::find()
            .filter(item_entity::Column::RawEventId.eq(raw_event_id))
            .one(self.db.as_ref())
            .await?
            .map(ContentQueueItem::try_from)
            .transpose()
    }

    async fn metrics(&self) -> Result<ContentQueueMetrics, RepositoryError> {
        let rows = item_entity::Entity::find()
            .select_only()
            .column(item_entity::Column::Status)
            .column_as(item_entity::Column::Id.count(), "count")
            .group_by(item_entity::Column::Status)
            .into_tuple::<(String, i64)>()
            .all(self.db.as_ref())
            .await?;

        let mut metrics = ContentQueueMetrics::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match status.parse::<ContentStatus>() {
                Ok(ContentStatus::Pending) => metrics.pending += count,
                Ok(ContentStatus::Processing) => metrics.processing += count,
                Ok(ContentStatus::Completed) => metrics.completed += count,
                Ok(ContentStatus::Failed) => metrics.failed += count,
                Ok(ContentStatus::Skipped) => metrics.skipped += count,
                Err(_) => warn!(status = %status, count, "Unknown content status in store"),
            }
            metrics.total += count;
        }

        Ok(metrics)
    }

    async fn cleanup(&self, retention_days: u32) -> Result<u64, RepositoryError> {
        let before: DateTime<FixedOffset> =
            (Utc::now() - Duration::days(retention_days as i64)).into();

        let result = item_entity::Entity::delete_many()
            .filter(item_entity::Column::Status.is_in([
                ContentStatus::Completed.to_string(),
                ContentStatus::Skipped.to_string(),
            ]))
            .filter(item_entity::Column::ProcessedAt.lt(before))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected)
    }
}

// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::domain::models::claim::JobClaim;
use crate::domain::models::job::{
    CleanupReport, DeadLetterJob, FailureDisposition, Job, JobState, JobType, QueueMetrics,
    ReleasedClaims,
};
use crate::domain::repositories::job_repository::{JobRepository, RepositoryError};
use crate::infrastructure::database::entities::{dead_letter_job, job as job_entity};
use crate::queue::claim::{self, Claimable};
use crate::utils::retry_policy;
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{
    sea_query::{Expr, SimpleExpr},
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 任务仓库实现
///
/// 基于SeaORM实现的任务数据访问层
#[derive(Clone)]
pub struct JobRepositoryImpl {
    /// 数据库连接
    db: Arc<DatabaseConnection>,
    /// 认领超时，每次认领前回收早于该时间的处理中任务
    claim_timeout: Duration,
}

impl JobRepositoryImpl {
    /// 创建新的任务仓库实例
    ///
    /// # 参数
    ///
    /// * `db` - 数据库连接
    /// * `claim_timeout` - 认领超时
    ///
    /// # 返回值
    ///
    /// 返回新的任务仓库实例
    pub fn new(db: Arc<DatabaseConnection>, claim_timeout: Duration) -> Self {
        Self { db, claim_timeout }
    }

    /// 在事务内将处理中任务转为失败并写入死信
    ///
    /// 以持有者和 `attempts` 作为乐观锁条件，返回是否由本次调用完成转换
    async fn dead_letter<C: ConnectionTrait>(
        conn: &C,
        model: &job_entity::Model,
        claim: &JobClaim,
        error: &str,
        now: DateTime<FixedOffset>,
    ) -> Result<bool, DbErr> {
        let result = job_entity::Entity::update_many()
            .col_expr(
                job_entity::Column::State,
                Expr::value(JobState::Failed.to_string()),
            )
            .col_expr(job_entity::Column::Error, Expr::value(error))
            .col_expr(job_entity::Column::FailedAt, Expr::value(now))
            .col_expr(
                job_entity::Column::WorkerId,
                Expr::value(Option::<String>::None),
            )
            .col_expr(job_entity::Column::UpdatedAt, Expr::value(now))
            .filter(held_by(claim))
            .exec(conn)
            .await?;

        if result.rows_affected != 1 {
            return Ok(false);
        }

        dead_letter_job::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            original_job_id: Set(model.id.clone()),
            job_type: Set(model.job_type.clone()),
            payload: Set(model.payload.clone()),
            error: Set(error.to_string()),
            attempts: Set(model.attempts),
            failed_at: Set(now),
        }
        .insert(conn)
        .await?;

        Ok(true)
    }

    async fn count_by_state(&self) -> Result<Vec<(String, i64)>, RepositoryError> {
        let rows = job_entity::Entity::find()
            .select_only()
            .column(job_entity::Column::State)
            .column_as(job_entity::Column::Id.count(), "count")
            .group_by(job_entity::Column::State)
            .into_tuple::<(String, i64)>()
            .all(self.db.as_ref())
            .await?;
        Ok(rows)
    }
}

/// 任务仍处于处理中且持有者和次数与凭证一致
fn held_by(claim: &JobClaim) -> Condition {
    Condition::all()
        .add(job_entity::Column::Id.eq(claim.id.as_str()))
        .add(job_entity::Column::State.eq(JobState::Processing.to_string()))
        .add(job_entity::Column::WorkerId.eq(claim.worker_id.as_str()))
        .add(job_entity::Column::Attempts.eq(claim.attempts))
}

impl Claimable for job_entity::Entity {
    fn id_column() -> Self::Column {
        job_entity::Column::Id
    }

    fn status_column() -> Self::Column {
        job_entity::Column::State
    }

    fn worker_column() -> Self::Column {
        job_entity::Column::WorkerId
    }

    fn claimed_at_column() -> Self::Column {
        job_entity::Column::StartedAt
    }

    fn attempts_column() -> Self::Column {
        job_entity::Column::Attempts
    }

    fn priority_column() -> Self::Column {
        job_entity::Column::Priority
    }

    fn created_at_column() -> Self::Column {
        job_entity::Column::CreatedAt
    }

    fn updated_at_column() -> Self::Column {
        job_entity::Column::UpdatedAt
    }

    fn attempt_budget() -> SimpleExpr {
        Expr::col(job_entity::Column::MaxRetries).add(1)
    }

    fn ready_condition(now: DateTime<Utc>) -> Condition {
        let now: DateTime<FixedOffset> = now.into();
        Condition::any()
            .add(job_entity::Column::NextRetryAt.is_null())
            .add(job_entity::Column::NextRetryAt.lte(now))
    }
}

impl TryFrom<job_entity::Model> for Job {
    type Error = RepositoryError;

    fn try_from(model: job_entity::Model) -> Result<Self, Self::Error> {
        let state = model
            .state
            .parse()
            .map_err(|e| RepositoryError::InvalidState(format!("job {}: {}", model.id, e)))?;

        Ok(Self {
            id: model.id,
            job_type: model.job_type,
            state,
            priority: model.priority,
            payload: model.payload,
            attempts: model.attempts,
            max_retries: model.max_retries,
            retry_delay_ms: model.retry_delay_ms,
            timeout_ms: model.timeout_ms,
            result: model.result,
            error: model.error,
            worker_id: model.worker_id,
            started_at: model.started_at.map(Into::into),
            completed_at: model.completed_at.map(Into::into),
            failed_at: model.failed_at.map(Into::into),
            next_retry_at: model.next_retry_at.map(Into::into),
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        })
    }
}

impl From<&Job> for job_entity::ActiveModel {
    fn from(job: &Job) -> Self {
        Self {
            id: Set(job.id.clone()),
            job_type: Set(job.job_type.clone()),
            state: Set(job.state.to_string()),
            priority: Set(job.priority),
            payload: Set(job.payload.clone()),
            attempts: Set(job.attempts),
            max_retries: Set(job.max_retries),
            retry_delay_ms: Set(job.retry_delay_ms),
            timeout_ms: Set(job.timeout_ms),
            result: Set(job.result.clone()),
            error: Set(job.error.clone()),
            worker_id: Set(job.worker_id.clone()),
            started_at: Set(job.started_at.map(Into::into)),
            completed_at: Set(job.completed_at.map(Into::into)),
            failed_at: Set(job.failed_at.map(Into::into)),
            next_retry_at: Set(job.next_retry_at.map(Into::into)),
            created_at: Set(job.created_at.into()),
            updated_at: Set(job.updated_at.into()),
        }
    }
}

impl From<dead_letter_job::Model> for DeadLetterJob {
    fn from(model: dead_letter_job::Model) -> Self {
        Self {
            id: model.id,
            original_job_id: model.original_job_id,
            job_type: model.job_type,
            payload: model.payload,
            error: model.error,
            attempts: model.attempts,
            failed_at: model.failed_at.into(),
        }
    }
}

#[async_trait]
impl JobRepository for JobRepositoryImpl {
    async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        Migrator::up(self.db.as_ref(), None).await?;
        Ok(())
    }

    fn claim_timeout(&self) -> Duration {
        self.claim_timeout
    }

    async fn create(&self, job: &Job) -> Result<Job, RepositoryError> {
        let model: job_entity::ActiveModel = job.into();

        match model.insert(self.db.as_ref()).await {
            Ok(inserted) => inserted.try_into(),
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(RepositoryError::AlreadyExists(job.id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Job>, RepositoryError> {
        let model = job_entity::Entity::find_by_id(id.to_string())
            .one(self.db.as_ref())
            .await?;

        model.map(Job::try_from).transpose()
    }

    async fn claim(
        &self,
        worker_id: &str,
        job_types: Option<&[JobType]>,
    ) -> Result<Option<Job>, RepositoryError> {
        self.release_stale(self.claim_timeout).await?;

        let mut filter = Condition::all();
        if let Some(types) = job_types.filter(|types| !types.is_empty()) {
            filter = filter.add(
                job_entity::Column::JobType.is_in(types.iter().map(|t| t.to_string())),
            );
        }

        let mut claimed =
            claim::claim_batch::<job_entity::Entity>(self.db.as_ref(), worker_id, 1, filter)
                .await?;

        claimed.pop().map(Job::try_from).transpose()
    }

    async fn complete(
        &self,
        claim: &JobClaim,
        result: Option<serde_json::Value>,
    ) -> Result<bool, RepositoryError> {
        let now: DateTime<FixedOffset> = Utc::now().into();

        // 回收后尚未再次认领的任务 attempts 不变，仍可由原持有者关闭
        let released_unclaimed = Condition::all()
            .add(job_entity::Column::Id.eq(claim.id.as_str()))
            .add(job_entity::Column::State.eq(JobState::Pending.to_string()))
            .add(job_entity::Column::Attempts.eq(claim.attempts));

        let updated = job_entity::Entity::update_many()
            .col_expr(
                job_entity::Column::State,
                Expr::value(JobState::Completed.to_string()),
            )
            .col_expr(job_entity::Column::Result, Expr::value(result))
            .col_expr(job_entity::Column::CompletedAt, Expr::value(now))
            .col_expr(
                job_entity::Column::WorkerId,
                Expr::value(Option::<String>::None),
            )
            .col_expr(job_entity::Column::UpdatedAt, Expr::value(now))
            .filter(
                Condition::any()
                    .add(held_by(claim))
                    .add(released_unclaimed),
            )
            .exec(self.db.as_ref())
            .await?;

        if updated.rows_affected == 0 {
            let job = self
                .find_by_id(&claim.id)
                .await?
                .ok_or(RepositoryError::NotFound)?;
            debug!(
                job_id = %claim.id,
                state = %job.state,
                holder = ?job.worker_id,
                attempts = job.attempts,
                claimant = %claim.worker_id,
                claimed_attempts = claim.attempts,
                "Job not held by this claim, completion ignored"
            );
            return Ok(false);
        }

        Ok(true)
    }

    async fn fail(
        &self,
        claim: &JobClaim,
        error: &str,
        retryable: bool,
    ) -> Result<FailureDisposition, RepositoryError> {
        let id = claim.id.as_str();
        let now = Utc::now();
        let now_fixed: DateTime<FixedOffset> = now.into();
        let txn = self.db.begin().await?;

        let model = job_entity::Entity::find_by_id(id.to_string())
            .one(&txn)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        if model.state != JobState::Processing.to_string()
            || !claim.matches(model.worker_id.as_deref(), model.attempts)
        {
            warn!(
                job_id = %id,
                state = %model.state,
                holder = ?model.worker_id,
                claimant = %claim.worker_id,
                "Failure reported for a job this claim no longer holds"
            );
            return Ok(FailureDisposition::Ignored);
        }

        let attempts = model.attempts.max(0) as u32;
        let max_retries = model.max_retries.max(0) as u32;

        if retry_policy::should_retry(attempts, max_retries, retryable) {
            let base = std::time::Duration::from_millis(model.retry_delay_ms.max(0) as u64);
            let delay = retry_policy::next_delay(attempts.saturating_sub(1), base);
            let next_retry_at = now + Duration::milliseconds(delay.as_millis() as i64);
            let next_retry_fixed: DateTime<FixedOffset> = next_retry_at.into();

            let updated = job_entity::Entity::update_many()
                .col_expr(
                    job_entity::Column::State,
                    Expr::value(JobState::Pending.to_string()),
                )
                .col_expr(job_entity::Column::Error, Expr::value(error))
                .col_expr(job_entity::Column::NextRetryAt, Expr::value(next_retry_fixed))
                .col_expr(
                    job_entity::Column::WorkerId,
                    Expr::value(Option::<String>::None),
                )
                .col_expr(
                    job_entity::Column::StartedAt,
                    Expr::value(Option::<DateTime<FixedOffset>>::None),
                )
                .col_expr(job_entity::Column::UpdatedAt, Expr::value(now_fixed))
                .filter(held_by(claim))
                .exec(&txn)
                .await?;

            if updated.rows_affected != 1 {
                return Ok(FailureDisposition::Ignored);
            }

            txn.commit().await?;
            debug!(job_id = %id, attempts, %next_retry_at, "Job scheduled for retry");
            return Ok(FailureDisposition::Retrying { next_retry_at });
        }

        if !Self::dead_letter(&txn, &model, claim, error, now_fixed).await? {
            return Ok(FailureDisposition::Ignored);
        }

        txn.commit().await?;
        info!(job_id = %id, attempts, retryable, "Job moved to dead letter table");
        Ok(FailureDisposition::DeadLettered)
    }

    async fn release_stale(
        &self,
        claim_timeout: Duration,
    ) -> Result<ReleasedClaims, RepositoryError> {
        let threshold = Utc::now() - claim_timeout;

        let exhausted =
            claim::find_stale_exhausted::<job_entity::Entity, _>(self.db.as_ref(), threshold)
                .await?;

        let mut report = ReleasedClaims::default();
        for model in exhausted {
            let error = format!(
                "Claim by {} expired after {} attempts",
                model.worker_id.as_deref().unwrap_or("unknown worker"),
                model.attempts
            );
            let stale_claim = JobClaim::new(
                model.id.clone(),
                model.worker_id.clone().unwrap_or_default(),
                model.attempts,
            );
            let txn = self.db.begin().await?;
            if Self::dead_letter(&txn, &model, &stale_claim, &error, Utc::now().into()).await? {
                txn.commit().await?;
                report.exhausted += 1;
                warn!(job_id = %model.id, attempts = model.attempts, "Stale job exhausted its retries");
            }
        }

        report.requeued =
            claim::release_stale::<job_entity::Entity, _>(self.db.as_ref(), threshold).await?;

        if report.requeued > 0 {
            info!(count = report.requeued, "Released stale job claims");
        }

        Ok(report)
    }

    async fn metrics(&self) -> Result<QueueMetrics, RepositoryError> {
        let mut metrics = QueueMetrics::default();

        for (state, count) in self.count_by_state().await? {
            let count = count.max(0) as u64;
            match state.parse::<JobState>() {
                Ok(JobState::Pending) => metrics.pending += count,
                Ok(JobState::Processing) => metrics.processing += count,
                Ok(JobState::Completed) => metrics.completed += count,
                Ok(JobState::Failed) => metrics.failed += count,
                Ok(JobState::Cancelled) => metrics.cancelled += count,
                Err(_) => warn!(state = %state, count, "Unknown job state in store"),
            }
            metrics.total += count;
        }

        metrics.dead_letters = dead_letter_job::Entity::find()
            .count(self.db.as_ref())
            .await?;

        Ok(metrics)
    }

    async fn cleanup(
        &self,
        completed_retention_days: u32,
        dead_letter_retention_days: u32,
    ) -> Result<CleanupReport, RepositoryError> {
        let now = Utc::now();
        let completed_before: DateTime<FixedOffset> =
            (now - Duration::days(completed_retention_days as i64)).into();
        let dead_letter_before: DateTime<FixedOffset> =
            (now - Duration::days(dead_letter_retention_days as i64)).into();

        let completed = job_entity::Entity::delete_many()
            .filter(
                Condition::any()
                    .add(
                        Condition::all()
                            .add(job_entity::Column::State.eq(JobState::Completed.to_string()))
                            .add(job_entity::Column::CompletedAt.lt(completed_before)),
                    )
                    .add(
                        Condition::all()
                            .add(job_entity::Column::State.eq(JobState::Cancelled.to_string()))
                            .add(job_entity::Column::UpdatedAt.lt(completed_before)),
                    ),
            )
            .exec(self.db.as_ref())
            .await?;

        // Audit copies live in dead_letter_jobs
        let failed = job_entity::Entity::delete_many()
            .filter(job_entity::Column::State.eq(JobState::Failed.to_string()))
            .filter(job_entity::Column::FailedAt.lt(dead_letter_before))
            .exec(self.db.as_ref())
            .await?;

        let dead_letters = dead_letter_job::Entity::delete_many()
            .filter(dead_letter_job::Column::FailedAt.lt(dead_letter_before))
            .exec(self.db.as_ref())
            .await?;

        let report = CleanupReport {
            completed_deleted: completed.rows_affected,
            failed_deleted: failed.rows_affected,
            dead_letters_deleted: dead_letters.rows_affected,
        };
        info!(?report, "Job cleanup finished");
        Ok(report)
    }

    async fn dead_letters(&self, limit: u64) -> Result<Vec<DeadLetterJob>, RepositoryError> {
        let models = dead_letter_job::Entity::find()
            .order_by_desc(dead_letter_job::Column::FailedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await?;

        Ok(models.into_iter().map(DeadLetterJob::from).collect())
    }
}

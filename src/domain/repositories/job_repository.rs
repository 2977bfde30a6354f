// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::claim::JobClaim;
use crate::domain::models::job::{
    CleanupReport, DeadLetterJob, FailureDisposition, Job, JobType, QueueMetrics, ReleasedClaims,
};
use async_trait::async_trait;
use chrono::Duration;
use sea_orm::DbErr;
use thiserror::Error;

/// 仓库错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// 数据库错误
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    /// 记录未找到
    #[error("Record not found")]
    NotFound,
    /// 主键或唯一键冲突
    #[error("Record already exists: {0}")]
    AlreadyExists(String),
    /// 存储中的数据无法映射为领域模型
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// 任务仓库特质
///
/// 队列的全部状态转换都经由此接口，运行时从不直接修改行
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// 确保表结构已初始化
    async fn ensure_schema(&self) -> Result<(), RepositoryError>;
    /// 认领超时，超过后处理中任务会被回收
    fn claim_timeout(&self) -> Duration;
    /// 插入新任务
    async fn create(&self, job: &Job) -> Result<Job, RepositoryError>;
    /// 根据ID查找任务
    async fn find_by_id(&self, id: &str) -> Result<Option<Job>, RepositoryError>;
    /// 先回收过期认领，再原子地认领一个就绪任务
    async fn claim(
        &self,
        worker_id: &str,
        job_types: Option<&[JobType]>,
    ) -> Result<Option<Job>, RepositoryError>;
    /// 标记任务完成
    ///
    /// 只有 `claim` 仍持有该任务，或任务被回收后尚未再次认领时才生效。
    /// 返回 `false` 表示任务已终止或已被其它认领接手，未做修改
    async fn complete(
        &self,
        claim: &JobClaim,
        result: Option<serde_json::Value>,
    ) -> Result<bool, RepositoryError>;
    /// 记录失败：按退避策略重试或写入死信表
    ///
    /// `claim` 不再持有该任务时返回 [`FailureDisposition::Ignored`]
    async fn fail(
        &self,
        claim: &JobClaim,
        error: &str,
        retryable: bool,
    ) -> Result<FailureDisposition, RepositoryError>;
    /// 回收认领时间早于 `claim_timeout` 的处理中任务
    async fn release_stale(&self, claim_timeout: Duration)
        -> Result<ReleasedClaims, RepositoryError>;
    /// 按状态统计
    async fn metrics(&self) -> Result<QueueMetrics, RepositoryError>;
    /// 清理过期的已完成任务和死信
    async fn cleanup(
        &self,
        completed_retention_days: u32,
        dead_letter_retention_days: u32,
    ) -> Result<CleanupReport, RepositoryError>;
    /// 最近的死信记录
    async fn dead_letters(&self, limit: u64) -> Result<Vec<DeadLetterJob>, RepositoryError>;
}

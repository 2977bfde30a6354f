// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::QueueSettings;
use crate::domain::models::claim::JobClaim;
use crate::domain::models::job::{
    CleanupReport, DeadLetterJob, EnqueueOptions, FailureDisposition, Job, JobState, JobType,
    QueueMetrics, ReleasedClaims,
};
use crate::domain::repositories::job_repository::{JobRepository, RepositoryError};
use crate::workers::handler::HandlerRegistry;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// 队列错误类型
#[derive(Error, Debug)]
pub enum QueueError {
    /// 仓库错误
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// 入队选项无效
    #[error("Invalid enqueue options: {0}")]
    InvalidOptions(String),

    /// 注册表中没有该类型的处理器
    #[error("No handler registered for job type '{0}'")]
    NoHandler(JobType),
}

/// 任务队列特质
///
/// 生产者、运行时和运维接口都通过它访问队列
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// 确保存储已初始化
    async fn initialize(&self) -> Result<(), QueueError>;

    /// 入队任务，返回任务ID
    async fn enqueue(
        &self,
        job_type: JobType,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<String, QueueError>;

    /// 按ID查询任务
    async fn find(&self, job_id: &str) -> Result<Option<Job>, QueueError>;

    /// 认领一个就绪任务
    async fn claim(
        &self,
        worker_id: &str,
        job_types: Option<&[JobType]>,
    ) -> Result<Option<Job>, QueueError>;

    /// 完成任务，返回 `false` 表示该认领已不再持有任务
    async fn complete(&self, claim: &JobClaim, result: Option<Value>) -> Result<bool, QueueError>;

    /// 失败任务
    async fn fail(
        &self,
        claim: &JobClaim,
        error: &str,
        retryable: bool,
    ) -> Result<FailureDisposition, QueueError>;

    /// 回收过期认领
    async fn release_stale(&self, claim_timeout: Duration) -> Result<ReleasedClaims, QueueError>;

    async fn metrics(&self) -> Result<QueueMetrics, QueueError>;

    async fn cleanup(
        &self,
        completed_retention_days: u32,
        dead_letter_retention_days: u32,
    ) -> Result<CleanupReport, QueueError>;

    async fn dead_letters(&self, limit: u64) -> Result<Vec<DeadLetterJob>, QueueError>;
}

/// 入队默认值
#[derive(Debug, Clone)]
pub struct QueueDefaults {
    pub priority: i32,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for QueueDefaults {
    fn default() -> Self {
        Self {
            priority: 0,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl From<&QueueSettings> for QueueDefaults {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            priority: settings.priority,
            max_retries: settings.max_retries,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
        }
    }
}

/// 基于关系数据库的任务队列实现
pub struct PostgresJobQueue<R: JobRepository> {
    /// 任务仓库
    repository: Arc<R>,
    defaults: QueueDefaults,
    /// 用于读取处理器声明的默认值
    registry: Option<Arc<HandlerRegistry>>,
}

impl<R: JobRepository> PostgresJobQueue<R> {
    /// 创建新的任务队列实例
    ///
    /// # 参数
    ///
    /// * `repository` - 任务仓库
    /// * `defaults` - 入队默认值
    ///
    /// # 返回值
    ///
    /// 返回新的任务队列实例
    pub fn new(repository: Arc<R>, defaults: QueueDefaults) -> Self {
        Self {
            repository,
            defaults,
            registry: None,
        }
    }

    /// 附加处理器注册表，入队时优先使用处理器声明的默认值
    pub fn with_registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// 按 选项 → 处理器 → 队列默认值 的顺序构建任务
    ///
    /// 附加了注册表时拒绝没有处理器的类型；
    /// 解析出的超时必须短于认领超时，否则任务仍在运行时就会被回收
    fn build_job(
        &self,
        job_type: JobType,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<Job, QueueError> {
        let handler = match &self.registry {
            Some(registry) => Some(registry.get(job_type).ok_or(QueueError::NoHandler(job_type))?),
            None => None,
        };

        let max_retries = options
            .max_retries
            .or_else(|| handler.as_ref().and_then(|h| h.max_retries()))
            .unwrap_or(self.defaults.max_retries);
        let retry_delay = options
            .retry_delay
            .or_else(|| handler.as_ref().and_then(|h| h.retry_delay()))
            .unwrap_or(self.defaults.retry_delay);
        let timeout = options
            .timeout
            .or_else(|| handler.as_ref().and_then(|h| h.timeout()));

        let max_retries = i32::try_from(max_retries)
            .map_err(|_| QueueError::InvalidOptions(format!("max_retries {} too large", max_retries)))?;
        let retry_delay_ms = i64::try_from(retry_delay.as_millis())
            .map_err(|_| QueueError::InvalidOptions("retry_delay too large".to_string()))?;
        let timeout_ms = timeout
            .map(|t| i64::try_from(t.as_millis()))
            .transpose()
            .map_err(|_| QueueError::InvalidOptions("timeout too large".to_string()))?;

        let claim_timeout_ms = self.repository.claim_timeout().num_milliseconds();
        if let Some(ms) = timeout_ms.filter(|ms| *ms > 0 && *ms >= claim_timeout_ms) {
            return Err(QueueError::InvalidOptions(format!(
                "timeout {}ms must be shorter than the claim timeout {}ms",
                ms, claim_timeout_ms
            )));
        }

        let id = match options.id {
            Some(id) if id.trim().is_empty() => {
                return Err(QueueError::InvalidOptions("job id cannot be empty".to_string()))
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };

        let now = Utc::now();
        let next_retry_at = options
            .delay
            .map(chrono::Duration::from_std)
            .transpose()
            .map_err(|e| QueueError::InvalidOptions(format!("delay out of range: {}", e)))?
            .map(|delay| now + delay);

        Ok(Job {
            id,
            job_type: job_type.to_string(),
            state: JobState::Pending,
            priority: options.priority.unwrap_or(self.defaults.priority),
            payload,
            attempts: 0,
            max_retries,
            retry_delay_ms,
            timeout_ms,
            result: None,
            error: None,
            worker_id: None,
            started_at: None,
            completed_at: None,
            failed_at: None,
            next_retry_at,
            created_at: now,
            updated_at: now,
        })
    }
}

#[async_trait]
impl<R: JobRepository> JobQueue for PostgresJobQueue<R> {
    async fn initialize(&self) -> Result<(), QueueError> {
        self.repository.ensure_schema().await?;
        Ok(())
    }

    /// 入队任务
    ///
    /// # 参数
    ///
    /// * `job_type` - 任务类型
    /// * `payload` - 任务负载
    /// * `options` - 入队选项
    ///
    /// # 返回值
    ///
    /// * `Ok(String)` - 任务ID
    /// * `Err(QueueError)` - 入队失败
    async fn enqueue(
        &self,
        job_type: JobType,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<String, QueueError> {
        let job = self.build_job(job_type, payload, options)?;
        let created = self.repository.create(&job).await?;
        debug!(job_id = %created.id, job_type = %created.job_type, priority = created.priority, "Job enqueued");
        Ok(created.id)
    }

    async fn find(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        Ok(self.repository.find_by_id(job_id).await?)
    }

    /// 认领任务
    ///
    /// # 返回值
    ///
    /// * `Ok(Some(Job))` - 成功认领的任务
    /// * `Ok(None)` - 没有就绪任务
    /// * `Err(QueueError)` - 认领失败
    async fn claim(
        &self,
        worker_id: &str,
        job_types: Option<&[JobType]>,
    ) -> Result<Option<Job>, QueueError> {
        Ok(self.repository.claim(worker_id, job_types).await?)
    }

    async fn complete(&self, claim: &JobClaim, result: Option<Value>) -> Result<bool, QueueError> {
        Ok(self.repository.complete(claim, result).await?)
    }

    async fn fail(
        &self,
        claim: &JobClaim,
        error: &str,
        retryable: bool,
    ) -> Result<FailureDisposition, QueueError> {
        Ok(self.repository.fail(claim, error, retryable).await?)
    }

    async fn release_stale(&self, claim_timeout: Duration) -> Result<ReleasedClaims, QueueError> {
        let timeout = chrono::Duration::from_std(claim_timeout)
            .map_err(|e| QueueError::InvalidOptions(format!("claim timeout out of range: {}", e)))?;
        Ok(self.repository.release_stale(timeout).await?)
    }

    async fn metrics(&self) -> Result<QueueMetrics, QueueError> {
        Ok(self.repository.metrics().await?)
    }

    async fn cleanup(
        &self,
        completed_retention_days: u32,
        dead_letter_retention_days: u32,
    ) -> Result<CleanupReport, QueueError> {
        Ok(self
            .repository
            .cleanup(completed_retention_days, dead_letter_retention_days)
            .await?)
    }

    async fn dead_letters(&self, limit: u64) -> Result<Vec<DeadLetterJob>, QueueError> {
        Ok(self.repository.dead_letters(limit).await?)
    }
}

#[async_trait]
impl<T: JobQueue + ?Sized> JobQueue for Arc<T> {
    async fn initialize(&self) -> Result<(), QueueError> {
        (**self).initialize().await
    }

    async fn enqueue(
        &self,
        job_type: JobType,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<String, QueueError> {
        (**self).enqueue(job_type, payload, options).await
    }

    async fn find(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        (**self).find(job_id).await
    }

    async fn claim(
        &self,
        worker_id: &str,
        job_types: Option<&[JobType]>,
    ) -> Result<Option<Job>, QueueError> {
        (**self).claim(worker_id, job_types).await
    }

    async fn complete(&self, claim: &JobClaim, result: Option<Value>) -> Result<bool, QueueError> {
        (**self).complete(claim, result).await
    }

    async fn fail(
        &self,
        claim: &JobClaim,
        error: &str,
        retryable: bool,
    ) -> Result<FailureDisposition, QueueError> {
        (**self).fail(claim, error, retryable).await
    }

    async fn release_stale(&self, claim_timeout: Duration) -> Result<ReleasedClaims, QueueError> {
        (**self).release_stale(claim_timeout).await
    }

    async fn metrics(&self) -> Result<QueueMetrics, QueueError> {
        (**self).metrics().await
    }

    async fn cleanup(
        &self,
        completed_retention_days: u32,
        dead_letter_retention_days: u32,
    ) -> Result<CleanupReport, QueueError> {
        (**self)
            .cleanup(completed_retention_days, dead_letter_retention_days)
            .await
    }

    async fn dead_letters(&self, limit: u64) -> Result<Vec<DeadLetterJob>, QueueError> {
        (**self).dead_letters(limit).await
    }
}

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::claim::JobClaim;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// 任务实体
///
/// 通用队列中的一行。`attempts` 在每次认领时递增，
/// 因此它同时代表该任务已被执行（或尝试执行）的次数。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// 任务唯一标识符，调用方提供或系统生成
    pub id: String,
    /// 任务类型标签，存储层原样保存，解析见 [`Job::kind`]
    pub job_type: String,
    /// 任务状态
    pub state: JobState,
    /// 优先级，数值越大越先被认领
    pub priority: i32,
    /// 任务负载，仅对处理器有意义
    pub payload: serde_json::Value,
    /// 已认领次数
    pub attempts: i32,
    /// 最大重试次数
    pub max_retries: i32,
    /// 退避基准时间（毫秒）
    pub retry_delay_ms: i64,
    /// 单次执行超时（毫秒），为空时使用处理器或运行时默认值
    pub timeout_ms: Option<i64>,
    /// 执行结果
    pub result: Option<serde_json::Value>,
    /// 最近一次错误信息
    pub error: Option<String>,
    /// 当前持有认领的工作者
    pub worker_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    /// 下次可被认领的时间
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 任务类型枚举
///
/// 每个类型对应一个注册的处理器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// 拉取外部事件源并筛选
    IngestEvents,
    /// 为单个事件生成文章
    ///
    /// 预留给外部生产者，本进程不注册处理器，带注册表的队列入队时会拒绝
    GenerateContent,
    /// 发布社交媒体内容，同上预留
    PublishSocial,
    /// 发送通知
    SendNotification,
    /// 批量消费内容生成队列
    DrainContentQueue,
    /// 清理历史任务
    Cleanup,
}

impl JobType {
    /// 所有任务类型
    pub const ALL: [JobType; 6] = [
        JobType::IngestEvents,
        JobType::GenerateContent,
        JobType::PublishSocial,
        JobType::SendNotification,
        JobType::DrainContentQueue,
        JobType::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::IngestEvents => "ingest_events",
            JobType::GenerateContent => "generate_content",
            JobType::PublishSocial => "publish_social",
            JobType::SendNotification => "send_notification",
            JobType::DrainContentQueue => "drain_content_queue",
            JobType::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::UnknownJobType(s.to_string()))
    }
}

/// 任务状态枚举
///
/// 状态转换：
/// pending → processing → completed | pending（可重试失败）| failed（进入死信）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    /// 保留状态，当前没有生产者使用
    Cancelled,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Processing => write!(f, "processing"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            other => Err(DomainError::UnknownState(other.to_string())),
        }
    }
}

/// 领域错误类型
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DomainError {
    /// 未知的任务类型
    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    /// 未知的状态值
    #[error("Unknown state: {0}")]
    UnknownState(String),

    /// 验证错误
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl Job {
    /// 解析任务类型
    ///
    /// # 返回值
    ///
    /// * `Some(JobType)` - 已知类型
    /// * `None` - 存储中的类型标签无法识别
    pub fn kind(&self) -> Option<JobType> {
        self.job_type.parse().ok()
    }

    /// 失败后是否还允许重试
    ///
    /// 认领时已计数，所以第 `max_retries + 1` 次执行失败后不再重试
    pub fn can_retry(&self) -> bool {
        self.attempts <= self.max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms.max(0) as u64)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64))
    }

    /// 当前是否被某个工作者持有
    pub fn is_claimed(&self) -> bool {
        self.worker_id.is_some()
    }

    /// 本次认领的凭证，完成和失败都需要出示
    pub fn claim_token(&self) -> JobClaim {
        JobClaim::new(
            self.id.clone(),
            self.worker_id.clone().unwrap_or_default(),
            self.attempts,
        )
    }
}

/// 入队选项
///
/// 未设置的字段依次回退到处理器声明的值和队列默认配置
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// 指定任务ID，为空时生成 UUID
    pub id: Option<String>,
    pub priority: Option<i32>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub timeout: Option<Duration>,
    /// 延迟认领的时间
    pub delay: Option<Duration>,
}

impl EnqueueOptions {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = Some(retry_delay);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// 死信记录
///
/// 只追加，不修改。负载是复制的，原任务被清理后依然保留
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterJob {
    pub id: String,
    pub original_job_id: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub error: String,
    pub attempts: i32,
    pub failed_at: DateTime<Utc>,
}

/// 失败处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    /// 已退回待处理，等待退避时间后重新认领
    Retrying { next_retry_at: DateTime<Utc> },
    /// 已标记为失败并写入死信表
    DeadLettered,
    /// 任务已不由该认领持有（已终止或被其它工作者重新认领），忽略本次失败
    Ignored,
}

/// 过期认领回收结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReleasedClaims {
    /// 退回待处理的数量
    pub requeued: u64,
    /// 次数耗尽而终止的数量
    pub exhausted: u64,
}

/// 队列指标
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueMetrics {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total: u64,
    /// 死信表行数
    pub dead_letters: u64,
}

/// 清理结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub completed_deleted: u64,
    pub failed_deleted: u64,
    pub dead_letters_deleted: u64,
}

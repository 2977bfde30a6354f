// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::claim::ContentClaim;
use super::job::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 内容生成队列项
///
/// 每个源事件最多一行，以 `raw_event_id` 标识
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentQueueItem {
    /// 存储层分配的自增ID
    pub id: i32,
    /// 源事件引用
    pub raw_event_id: String,
    pub status: ContentStatus,
    pub priority: i32,
    pub worker_id: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    /// 已认领次数
    pub attempts: i32,
    /// 最多执行次数
    pub max_attempts: i32,
    /// 成功时生成的文章ID
    pub article_id: Option<String>,
    pub error_message: Option<String>,
    /// 失败退避结束前不可认领
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ContentQueueItem {
    /// 是否可以在再次入队时复活
    pub fn is_revivable(&self) -> bool {
        matches!(self.status, ContentStatus::Failed | ContentStatus::Skipped)
    }

    /// 失败后是否还允许重试
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// 本次认领的凭证
    pub fn claim_token(&self) -> ContentClaim {
        ContentClaim::new(
            self.id,
            self.worker_id.clone().unwrap_or_default(),
            self.attempts,
        )
    }
}

/// 内容队列状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    #[default]
    Pending,
    Processing,
    /// 已生成文章
    Completed,
    /// 重试耗尽或不可重试
    Failed,
    /// 业务规则短路，不算失败
    Skipped,
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ContentStatus::Pending => write!(f, "pending"),
            ContentStatus::Processing => write!(f, "processing"),
            ContentStatus::Completed => write!(f, "completed"),
            ContentStatus::Failed => write!(f, "failed"),
            ContentStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl FromStr for ContentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ContentStatus::Pending),
            "processing" => Ok(ContentStatus::Processing),
            "completed" => Ok(ContentStatus::Completed),
            "failed" => Ok(ContentStatus::Failed),
            "skipped" => Ok(ContentStatus::Skipped),
            other => Err(DomainError::UnknownState(other.to_string())),
        }
    }
}

/// 入队结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentEnqueueOutcome {
    /// 新建了队列项
    Created,
    /// 失败或跳过的队列项被重置为待处理
    Revived,
    /// 已存在，优先级被提高
    PriorityRaised,
    /// 已存在，无变化
    Unchanged,
}

/// 内容队列指标
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContentQueueMetrics {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub total: u64,
}

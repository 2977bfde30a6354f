// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::content_item::ContentEnqueueOutcome;
use crate::domain::repositories::content_queue_repository::ContentQueueRepository;
use crate::domain::repositories::job_repository::RepositoryError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// 待评估的灾害事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    /// 源事件引用
    pub id: String,
    /// 事件类别，如 earthquake、flood
    pub category: String,
    /// 归一化严重程度 (0.0-10.0)
    pub severity: f64,
    #[serde(default)]
    pub title: Option<String>,
}

/// 显著性判断结果
#[derive(Debug, Clone, PartialEq)]
pub enum SignificanceDecision {
    /// 生成文章，并使用给定优先级入队
    Publish { priority: i32 },
    Ignore { reason: String },
}

/// 显著性过滤器
///
/// 纯函数，不访问外部资源
pub trait SignificanceFilter: Send + Sync {
    fn evaluate(&self, event: &RawEvent) -> SignificanceDecision;
}

/// 按严重程度阈值过滤
///
/// 优先级取严重程度向下取整，越严重越先处理
#[derive(Debug, Clone)]
pub struct SeverityThresholdFilter {
    pub min_severity: f64,
}

impl SeverityThresholdFilter {
    pub fn new(min_severity: f64) -> Self {
        Self { min_severity }
    }
}

impl SignificanceFilter for SeverityThresholdFilter {
    fn evaluate(&self, event: &RawEvent) -> SignificanceDecision {
        if !event.severity.is_finite() || event.severity < self.min_severity {
            return SignificanceDecision::Ignore {
                reason: format!(
                    "severity {} below threshold {}",
                    event.severity, self.min_severity
                ),
            };
        }

        SignificanceDecision::Publish {
            priority: event.severity.floor().clamp(0.0, 10.0) as i32,
        }
    }
}

/// 内容生产者
///
/// 只把通过显著性过滤的事件放进内容队列
pub struct ContentProducer<R: ContentQueueRepository> {
    repository: Arc<R>,
    filter: Arc<dyn SignificanceFilter>,
}

impl<R: ContentQueueRepository> ContentProducer<R> {
    pub fn new(repository: Arc<R>, filter: Arc<dyn SignificanceFilter>) -> Self {
        Self { repository, filter }
    }

    /// 评估并入队
    ///
    /// # 返回值
    ///
    /// * `Ok(Some(outcome))` - 已入队
    /// * `Ok(None)` - 过滤器拒绝
    /// * `Err(RepositoryError)` - 入队失败
    pub async fn offer(
        &self,
        event: &RawEvent,
    ) -> Result<Option<ContentEnqueueOutcome>, RepositoryError> {
        match self.filter.evaluate(event) {
            SignificanceDecision::Publish { priority } => {
                let outcome = self.repository.enqueue(&event.id, priority).await?;
                debug!(raw_event_id = %event.id, priority, ?outcome, "Event queued for content");
                Ok(Some(outcome))
            }
            SignificanceDecision::Ignore { reason } => {
                debug!(raw_event_id = %event.id, %reason, "Event ignored");
                Ok(None)
            }
        }
    }
}

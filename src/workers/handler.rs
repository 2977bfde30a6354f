// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::job::JobType;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// 处理器执行结果
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// 成功，可附带结果数据
    Success(Option<Value>),
    /// 失败；`retryable` 为空时视为可重试
    Failure {
        error: String,
        retryable: Option<bool>,
    },
}

impl JobOutcome {
    pub fn success() -> Self {
        JobOutcome::Success(None)
    }

    pub fn success_with(data: Value) -> Self {
        JobOutcome::Success(Some(data))
    }

    /// 瞬时故障
    pub fn retryable(error: impl Into<String>) -> Self {
        JobOutcome::Failure {
            error: error.into(),
            retryable: Some(true),
        }
    }

    /// 永久性输入错误，不会重试
    pub fn permanent(error: impl Into<String>) -> Self {
        JobOutcome::Failure {
            error: error.into(),
            retryable: Some(false),
        }
    }
}

/// 任务处理器特质
///
/// 处理器只接收负载，不接触队列元数据。超时后运行时不再等待结果，
/// 但处理器本身不会被取消，必须能容忍被放弃。
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// 处理的任务类型
    fn job_type(&self) -> JobType;

    /// 默认执行超时
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// 默认最大重试次数
    fn max_retries(&self) -> Option<u32> {
        None
    }

    /// 默认退避基准时间
    fn retry_delay(&self) -> Option<Duration> {
        None
    }

    /// 执行任务
    ///
    /// 返回 `Err` 时由运行时按瞬时错误模式分类
    async fn handle(&self, payload: Value) -> anyhow::Result<JobOutcome>;
}

/// 处理器注册表
///
/// 构建完成后只读，通过 `Arc` 在运行时和队列之间共享
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，同类型的旧处理器会被替换
    pub fn register(mut self, handler: Arc<dyn JobHandler>) -> Self {
        let job_type = handler.job_type();
        if self.handlers.insert(job_type, handler).is_some() {
            warn!(job_type = %job_type, "Replacing previously registered handler");
        }
        self
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    /// 按存储中的类型标签查找
    pub fn resolve(&self, tag: &str) -> Option<Arc<dyn JobHandler>> {
        tag.parse().ok().and_then(|job_type| self.get(job_type))
    }

    pub fn job_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.handlers.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

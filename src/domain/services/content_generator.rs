// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 内容生成结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GenerationOutcome {
    /// 生成了文章
    Generated {
        article_id: String,
        /// 本次调用的成本估算（美元）
        cost_usd: f64,
    },
    /// 业务规则短路，例如文章已存在或源事件不存在
    Skipped { reason: String },
}

/// 内容生成服务特质
///
/// 调用付费的 AI 接口为单个源事件生成文章
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// 为源事件生成文章
    ///
    /// # 参数
    ///
    /// * `raw_event_id` - 源事件引用
    ///
    /// # 返回值
    ///
    /// * `Ok(GenerationOutcome)` - 生成或跳过
    /// * `Err(anyhow::Error)` - 调用失败，由调用方按瞬时错误模式分类
    async fn generate(&self, raw_event_id: &str) -> Result<GenerationOutcome>;
}

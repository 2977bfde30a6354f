// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::services::content_generator::{ContentGenerator, GenerationOutcome};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// 生成服务响应
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeneratorResponse {
    Generated {
        article_id: String,
        #[serde(default)]
        cost_usd: f64,
    },
    Skipped {
        #[allow(dead_code)]
        skipped: bool,
        reason: String,
    },
}

/// 基于 HTTP 的内容生成服务
pub struct HttpContentGenerator {
    /// HTTP 客户端
    client: reqwest::Client,
    /// 生成接口地址
    endpoint: String,
}

impl HttpContentGenerator {
    /// 创建新的 HTTP 内容生成服务
    ///
    /// # 参数
    ///
    /// * `endpoint` - 生成接口地址
    /// * `timeout` - 单次请求超时
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static(concat!("Dispatchrs/", env!("CARGO_PKG_VERSION"))),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("failed to build content generator client")?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl ContentGenerator for HttpContentGenerator {
    async fn generate(&self, raw_event_id: &str) -> Result<GenerationOutcome> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "raw_event_id": raw_event_id }))
            .send()
            .await
            .with_context(|| format!("content generator request for {} failed", raw_event_id))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Content generator returned status {}: {}",
                status,
                body
            ));
        }

        let parsed: GeneratorResponse = response
            .json()
            .await
            .context("malformed content generator response")?;
        debug!(raw_event_id, ?parsed, "Content generator responded");

        Ok(match parsed {
            GeneratorResponse::Generated {
                article_id,
                cost_usd,
            } => GenerationOutcome::Generated {
                article_id,
                cost_usd,
            },
            GeneratorResponse::Skipped { reason, .. } => GenerationOutcome::Skipped { reason },
        })
    }
}

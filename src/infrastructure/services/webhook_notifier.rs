// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::services::notifier::Notifier;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use metrics::{counter, histogram};
use reqwest::header;
use serde_json::json;
use sha2::Sha256;
use std::time::{Duration, Instant};
use tracing::info;

type HmacSha256 = Hmac<Sha256>;

/// 签名请求头
pub const SIGNATURE_HEADER: &str = "X-Dispatchrs-Signature";

/// 基于 Webhook 的通知渠道
pub struct WebhookNotifier {
    /// HTTP 客户端
    client: reqwest::Client,
    /// 投递地址
    url: String,
    /// 签名密钥
    secret: String,
}

impl WebhookNotifier {
    /// 创建新的 Webhook 通知渠道
    pub fn new(url: impl Into<String>, secret: impl Into<String>, timeout: Duration) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static(concat!(
                "Dispatchrs-Webhook/",
                env!("CARGO_PKG_VERSION")
            )),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("failed to build webhook client")?;

        Ok(Self {
            client,
            url: url.into(),
            secret: secret.into(),
        })
    }
}

/// 计算请求体的 HMAC-SHA256 十六进制签名
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .context("invalid webhook signing key")?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, recipient: &str, message: &str) -> Result<()> {
        counter!("notification_delivery_attempts_total").increment(1);
        let start = Instant::now();

        let body = serde_json::to_vec(&json!({
            "recipient": recipient,
            "message": message,
            "sent_at": chrono::Utc::now(),
        }))?;
        let signature = sign(&self.secret, &body)?;

        let response = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
            .context("notification delivery failed")?;

        histogram!("notification_delivery_duration_seconds").record(start.elapsed().as_secs_f64());

        let status = response.status();
        if status.is_success() {
            info!(%recipient, "Notification delivered");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(anyhow!(
                "Notification delivery failed with status {}: {}",
                status,
                body
            ))
        }
    }
}

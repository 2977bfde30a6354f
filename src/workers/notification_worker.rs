// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::job::JobType;
use crate::domain::services::notifier::Notifier;
use crate::workers::handler::{JobHandler, JobOutcome};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    recipient: String,
    message: String,
}

/// 发送通知的任务处理器
pub struct SendNotificationHandler {
    notifier: Arc<dyn Notifier>,
}

impl SendNotificationHandler {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl JobHandler for SendNotificationHandler {
    fn job_type(&self) -> JobType {
        JobType::SendNotification
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(30))
    }

    fn max_retries(&self) -> Option<u32> {
        Some(5)
    }

    fn retry_delay(&self) -> Option<Duration> {
        Some(Duration::from_secs(5))
    }

    async fn handle(&self, payload: Value) -> anyhow::Result<JobOutcome> {
        let payload: NotificationPayload = match serde_json::from_value(payload) {
            Ok(payload) => payload,
            Err(e) => return Ok(JobOutcome::permanent(format!("Invalid payload: {}", e))),
        };

        if payload.recipient.trim().is_empty() {
            return Ok(JobOutcome::permanent("Recipient cannot be empty"));
        }

        self.notifier
            .send(&payload.recipient, &payload.message)
            .await?;
        Ok(JobOutcome::success())
    }
}

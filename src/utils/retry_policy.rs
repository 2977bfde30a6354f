// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

/// 退避上限：一小时
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// 默认抖动因子 (±25%)
pub const DEFAULT_JITTER_FACTOR: f64 = 0.25;

/// 重试策略配置
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 基准退避时间，同时也是退避下限
    pub base_delay: Duration,
    /// 最大退避时间
    pub max_backoff: Duration,
    /// 抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
    /// 是否启用抖动
    pub enable_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// 以给定基准时间创建标准策略
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_backoff: MAX_BACKOFF,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            enable_jitter: true,
        }
    }

    /// 计算第 `attempt` 次重试的退避时间
    ///
    /// `base * 2^attempt`，先截断到上限，再施加对称抖动，
    /// 最终结果落在 `[base, max_backoff]` 区间内
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let cap_ms = self.max_backoff.as_secs_f64() * 1000.0;
        let base_ms = (self.base_delay.as_secs_f64() * 1000.0).min(cap_ms);

        let exp = attempt.min(63) as i32;
        let capped = (base_ms * 2f64.powi(exp)).min(cap_ms);

        let jittered = if self.enable_jitter && self.jitter_factor > 0.0 {
            let jitter_range = capped * self.jitter_factor;
            capped + rand::random_range(-jitter_range..=jitter_range)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered.clamp(base_ms, cap_ms) / 1000.0)
    }

    /// 计算下次重试时间
    pub fn next_retry_time(&self, attempt: u32, base_time: DateTime<Utc>) -> DateTime<Utc> {
        let backoff = self.calculate_backoff(attempt);
        base_time + chrono::Duration::milliseconds(backoff.as_millis() as i64)
    }
}

/// 按标准策略计算退避时间
///
/// # 参数
///
/// * `attempt` - 从 0 开始的重试序号
/// * `base_delay` - 基准退避时间
pub fn next_delay(attempt: u32, base_delay: Duration) -> Duration {
    RetryPolicy::new(base_delay).calculate_backoff(attempt)
}

/// 是否应该重试
///
/// `attempts` 在认领时已递增，所以允许 `max_retries + 1` 次执行
pub fn should_retry(attempts: u32, max_retries: u32, retryable: bool) -> bool {
    retryable && attempts <= max_retries
}

static TRANSIENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(connection (reset|refused|closed|aborted)|econnreset|econnrefused|broken pipe|network is unreachable|socket hang up|timed? ?out|etimedout|dns|enotfound|failed to lookup address|rate.?limit|too many requests|\b429\b|\b50[234]\b|bad gateway|service unavailable|gateway timeout|too many connections)",
    )
    .expect("transient error pattern is valid")
});

/// 判断错误信息是否属于瞬时故障
pub fn is_transient_message(message: &str) -> bool {
    TRANSIENT_PATTERN.is_match(message)
}

/// 判断错误是否可重试
///
/// 检查整条错误链，网络、超时、DNS、限流和 502/503/504 视为可重试
pub fn is_retryable_error(error: &anyhow::Error) -> bool {
    is_transient_message(&format!("{:#}", error))
}

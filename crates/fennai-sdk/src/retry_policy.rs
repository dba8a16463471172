//! 上传重试策略
//!
//! 仅对瞬时失败（超时、网络中断、5xx、限流）做指数退避重试，
//! 调用方最终只看到一次结果。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StudioSDKError;

/// 上传失败原因分类
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum UploadFailureReason {
    /// 网络超时 - 可重试
    NetworkTimeout,
    /// 网络不可用 - 可重试
    NetworkUnavailable,
    /// 服务端返回错误码
    ServerError(u16),
    /// 限流 - 延迟重试
    RateLimited,
    /// 内容超出服务端限制 - 不重试
    PayloadTooLarge,
    /// 认证或权限问题 - 不重试
    Unauthorized,
    /// 其他
    Unknown(String),
}

impl UploadFailureReason {
    /// 判断是否可以重试
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadFailureReason::NetworkTimeout => true,
            UploadFailureReason::NetworkUnavailable => true,
            UploadFailureReason::ServerError(code) => (500..600).contains(code),
            UploadFailureReason::RateLimited => true,
            UploadFailureReason::PayloadTooLarge => false,
            UploadFailureReason::Unauthorized => false,
            UploadFailureReason::Unknown(_) => false,
        }
    }

    /// 重试延迟倍数
    pub fn delay_multiplier(&self) -> f64 {
        match self {
            UploadFailureReason::NetworkUnavailable => 2.0,
            UploadFailureReason::ServerError(_) => 1.5,
            UploadFailureReason::RateLimited => 3.0,
            _ => 1.0,
        }
    }
}

impl From<&StudioSDKError> for UploadFailureReason {
    fn from(error: &StudioSDKError) -> Self {
        match error {
            StudioSDKError::Transport(msg) => {
                let lower = msg.to_lowercase();
                if lower.contains("timeout") || lower.contains("timed out") {
                    UploadFailureReason::NetworkTimeout
                } else {
                    UploadFailureReason::NetworkUnavailable
                }
            }
            StudioSDKError::Http { status: 429, .. } => UploadFailureReason::RateLimited,
            StudioSDKError::Http { status: 413, .. } => UploadFailureReason::PayloadTooLarge,
            StudioSDKError::Http { status: 401 | 403, .. } => UploadFailureReason::Unauthorized,
            StudioSDKError::Http { status, .. } => UploadFailureReason::ServerError(*status),
            other => UploadFailureReason::Unknown(other.to_string()),
        }
    }
}

/// 重试策略配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次尝试）
    pub max_retries: u32,
    /// 基础延迟（毫秒）
    pub base_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避因子
    pub backoff_factor: f64,
    /// 随机抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// 不重试
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// 检查是否应该重试
    pub fn should_retry(&self, retry_count: u32, reason: &UploadFailureReason) -> bool {
        retry_count < self.max_retries && reason.is_retryable()
    }

    /// 第 `retry_count` 次重试前的等待时间；不应重试时返回 None
    pub fn next_delay(&self, retry_count: u32, reason: &UploadFailureReason) -> Option<Duration> {
        if !self.should_retry(retry_count, reason) {
            return None;
        }

        // base * factor^n * 原因倍数，封顶后加抖动
        let base = self.base_delay_ms as f64 * self.backoff_factor.powf(retry_count as f64);
        let capped = (base * reason.delay_multiplier()).min(self.max_delay_ms as f64);
        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5);
        let delay = (capped + jitter).max(0.0);

        Some(Duration::from_millis(delay as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_retryable() {
        assert!(UploadFailureReason::NetworkTimeout.is_retryable());
        assert!(UploadFailureReason::ServerError(503).is_retryable());
        assert!(!UploadFailureReason::ServerError(404).is_retryable());
        assert!(UploadFailureReason::RateLimited.is_retryable());
        assert!(!UploadFailureReason::PayloadTooLarge.is_retryable());
        assert!(!UploadFailureReason::Unauthorized.is_retryable());
    }

    #[test]
    fn test_reason_from_error() {
        let timeout = StudioSDKError::Transport("operation timed out".into());
        assert_eq!(UploadFailureReason::from(&timeout), UploadFailureReason::NetworkTimeout);

        let limited = StudioSDKError::Http { status: 429, message: String::new() };
        assert_eq!(UploadFailureReason::from(&limited), UploadFailureReason::RateLimited);

        let forbidden = StudioSDKError::Http { status: 403, message: String::new() };
        assert!(!UploadFailureReason::from(&forbidden).is_retryable());

        let server = StudioSDKError::Http { status: 502, message: String::new() };
        assert_eq!(UploadFailureReason::from(&server), UploadFailureReason::ServerError(502));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        };
        let reason = UploadFailureReason::NetworkTimeout;

        assert_eq!(policy.next_delay(0, &reason), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(1, &reason), Some(Duration::from_millis(1000)));
        assert_eq!(policy.next_delay(2, &reason), Some(Duration::from_millis(2000)));
        assert_eq!(policy.next_delay(3, &reason), None);

        let capped = RetryPolicy {
            max_retries: 20,
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(capped.next_delay(10, &reason), Some(Duration::from_millis(10_000)));
    }

    #[test]
    fn test_non_retryable_never_delays() {
        let policy = RetryPolicy::default();
        assert!(policy.next_delay(0, &UploadFailureReason::PayloadTooLarge).is_none());
        assert!(RetryPolicy::none().next_delay(0, &UploadFailureReason::NetworkTimeout).is_none());
    }
}

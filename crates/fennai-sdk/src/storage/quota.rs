//! 存储配额估算
//!
//! 宿主平台提供的配额估算可能不可用；不可用时返回全零结果，
//! 调用方必须把 0 当作“未知”而不是“空”。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 严重存储压力阈值（百分比）
pub const CRITICAL_PERCENT: f64 = 90.0;
/// 免费用户的预警阈值（百分比）
pub const FREE_WARNING_PERCENT: f64 = 70.0;

/// 平台返回的原始估算值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageEstimate {
    pub usage: u64,
    pub quota: u64,
}

/// 平台存储估算接口
#[async_trait]
pub trait StorageEstimator: Send + Sync + std::fmt::Debug {
    /// `tracked_usage` 为媒体库自身统计的占用字节数，平台无法统计占用时可直接使用
    async fn estimate(&self, tracked_usage: u64) -> Result<Option<StorageEstimate>>;
}

/// 固定配额：占用取媒体库统计值
#[derive(Debug, Clone, Copy)]
pub struct ConfiguredQuota {
    pub quota_bytes: u64,
}

impl ConfiguredQuota {
    pub fn new(quota_bytes: u64) -> Self {
        Self { quota_bytes }
    }
}

#[async_trait]
impl StorageEstimator for ConfiguredQuota {
    async fn estimate(&self, tracked_usage: u64) -> Result<Option<StorageEstimate>> {
        if self.quota_bytes == 0 {
            return Ok(None);
        }
        Ok(Some(StorageEstimate {
            usage: tracked_usage,
            quota: self.quota_bytes,
        }))
    }
}

/// 平台不支持估算
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedEstimator;

#[async_trait]
impl StorageEstimator for UnsupportedEstimator {
    async fn estimate(&self, _tracked_usage: u64) -> Result<Option<StorageEstimate>> {
        Ok(None)
    }
}

/// 配额估算结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaEstimate {
    pub used_bytes: u64,
    pub quota_bytes: u64,
    pub percent_used: f64,
    pub available_bytes: u64,
}

impl QuotaEstimate {
    pub fn from_estimate(estimate: StorageEstimate) -> Self {
        if estimate.quota == 0 {
            return Self::unknown();
        }
        let percent_used = estimate.usage as f64 / estimate.quota as f64 * 100.0;
        Self {
            used_bytes: estimate.usage,
            quota_bytes: estimate.quota,
            percent_used,
            available_bytes: estimate.quota.saturating_sub(estimate.usage),
        }
    }

    /// 全零结果
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_known(&self) -> bool {
        self.quota_bytes > 0
    }

    /// 配额未知时不做拦截
    pub fn can_fit(&self, required: u64) -> bool {
        !self.is_known() || self.available_bytes >= required
    }

    pub fn is_critical(&self) -> bool {
        self.is_known() && self.percent_used >= CRITICAL_PERCENT
    }

    pub fn pressure(&self, is_free_tier: bool) -> StoragePressure {
        if !self.is_known() {
            StoragePressure::Unknown
        } else if self.percent_used >= CRITICAL_PERCENT {
            StoragePressure::Critical
        } else if is_free_tier && self.percent_used >= FREE_WARNING_PERCENT {
            StoragePressure::Warning
        } else {
            StoragePressure::Normal
        }
    }
}

/// 存储压力等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoragePressure {
    Unknown,
    Normal,
    Warning,
    Critical,
}

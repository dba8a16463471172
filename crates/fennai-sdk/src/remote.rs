//! 远端协作方接口
//!
//! 核心逻辑只依赖这里定义的 trait：
//! - 远端清单（按角色）
//! - 媒体上传 / 下载
//! - 任务文档的订阅与读取
//! - 任务设置写入（唯一的写操作）
//!
//! HTTP 实现见 `http_client`，测试使用内存实现。

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::job::{JobKind, JobStatus};
use crate::storage::entities::{LocalInventory, MediaKind, MediaPayload};

/// 远端清单快照（单次对账有效，不缓存）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInventorySnapshot {
    pub owner_id: String,
    /// 云端音色总数
    pub cloud_voice_count: u32,
    /// 云端配音总数
    pub cloud_dubbing_count: u32,
    #[serde(default)]
    pub cloud_voice_ids: Vec<String>,
    #[serde(default)]
    pub cloud_dubbing_ids: Vec<String>,
    #[serde(default)]
    pub fetched_at: i64,
}

impl RemoteInventorySnapshot {
    /// 由 ID 列表构造，数量取列表长度
    pub fn from_ids(owner_id: impl Into<String>, voice_ids: Vec<String>, dubbing_ids: Vec<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            cloud_voice_count: voice_ids.len() as u32,
            cloud_dubbing_count: dubbing_ids.len() as u32,
            cloud_voice_ids: voice_ids,
            cloud_dubbing_ids: dubbing_ids,
            fetched_at: 0,
        }
    }

    pub fn empty(owner_id: impl Into<String>) -> Self {
        Self::from_ids(owner_id, Vec::new(), Vec::new())
    }

    pub fn cloud_total(&self) -> usize {
        (self.cloud_voice_count as usize).saturating_add(self.cloud_dubbing_count as usize)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.cloud_voice_ids.iter().any(|v| v == id) || self.cloud_dubbing_ids.iter().any(|d| d == id)
    }

    /// 远端存在但本地没有的 ID
    pub fn remote_only(&self, local: &LocalInventory) -> Vec<String> {
        let local_ids: HashSet<&String> = local.all_ids().collect();
        self.cloud_voice_ids
            .iter()
            .chain(self.cloud_dubbing_ids.iter())
            .filter(|id| !local_ids.contains(id))
            .cloned()
            .collect()
    }

    /// 本地存在但远端没有的 ID（保持本地顺序）
    pub fn missing_from_remote(&self, local: &LocalInventory) -> Vec<String> {
        let remote_ids: HashSet<&String> = self
            .cloud_voice_ids
            .iter()
            .chain(self.cloud_dubbing_ids.iter())
            .collect();
        local.all_ids().filter(|id| !remote_ids.contains(id)).cloned().collect()
    }
}

/// 远端清单接口
#[async_trait]
pub trait RemoteInventoryEndpoint: Send + Sync {
    async fn fetch_inventory(&self, owner_id: &str) -> Result<RemoteInventorySnapshot>;
}

/// 上传请求
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub item_id: String,
    pub owner_id: String,
    pub kind: MediaKind,
    pub payload: MediaPayload,
}

/// 上传结果；`success = false` 视为该条失败
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UploadReceipt {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl UploadReceipt {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// 上传接口，同一条目重复提交是安全的
#[async_trait]
pub trait MediaUploadEndpoint: Send + Sync {
    async fn upload(&self, request: UploadRequest) -> Result<UploadReceipt>;
}

/// 下载得到的媒体
#[derive(Debug, Clone)]
pub struct DownloadedMedia {
    pub item_id: String,
    pub owner_id: String,
    pub kind: MediaKind,
    pub payload: MediaPayload,
}

/// 下载接口
#[async_trait]
pub trait MediaDownloadEndpoint: Send + Sync {
    async fn download(&self, item_id: &str) -> Result<DownloadedMedia>;
}

/// 任务状态来源
#[async_trait]
pub trait JobStatusSource: Send + Sync {
    /// 建立推送订阅；返回 Err 表示订阅无法建立
    async fn subscribe(&self, job_id: &str, kind: JobKind) -> Result<BoxStream<'static, Result<JobStatus>>>;

    /// 读取一次当前状态；任务不存在时返回 None
    async fn fetch(&self, job_id: &str, kind: JobKind) -> Result<Option<JobStatus>>;
}

/// 配音目标设置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DubbingTargetOptions {
    pub target_language: String,
    /// 说话人 ID -> 音色 ID
    #[serde(default)]
    pub voice_mapping: HashMap<String, String>,
}

/// 任务设置写入接口
#[async_trait]
pub trait JobSettingsEndpoint: Send + Sync {
    async fn update_target_options(&self, job_id: &str, options: &DubbingTargetOptions) -> Result<()>;
}

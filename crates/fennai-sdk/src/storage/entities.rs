//! 本地媒体实体定义
//!
//! 媒体内容始终以原始字节 + MIME 类型的形式持久化，读取时重新构造，
//! 不保存任何“活”的文件句柄。

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 媒体类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    /// 克隆音色
    Voice,
    /// 配音原始素材
    DubbingOriginal,
    /// 配音结果
    DubbingResult,
}

impl MediaKind {
    pub fn is_voice(&self) -> bool {
        matches!(self, MediaKind::Voice)
    }

    pub fn is_dubbing(&self) -> bool {
        !self.is_voice()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Voice => "voice",
            MediaKind::DubbingOriginal => "dubbing-original",
            MediaKind::DubbingResult => "dubbing-result",
        }
    }

    /// `as_str` 的逆操作
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "voice" => Some(MediaKind::Voice),
            "dubbing-original" => Some(MediaKind::DubbingOriginal),
            "dubbing-result" => Some(MediaKind::DubbingResult),
            _ => None,
        }
    }
}

/// 云端状态（仅对音色有意义；配音通过远端任务记录隐式判断）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloudState {
    LocalOnly,
    Cloud,
}

impl Default for CloudState {
    fn default() -> Self {
        CloudState::LocalOnly
    }
}

/// 媒体内容视图（每次读取都重新构造）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub bytes: Bytes,
    pub mime_type: String,
}

impl MediaPayload {
    pub fn new(bytes: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// SHA-256 摘要（十六进制）
    pub fn digest(&self) -> String {
        digest_bytes(&self.bytes)
    }
}

pub(crate) fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// 本地媒体记录
#[derive(Debug, Clone, PartialEq)]
pub struct LocalMediaRecord {
    /// 与远端共享的稳定 ID
    pub id: String,
    /// 角色或任务 ID
    pub owner_id: String,
    pub kind: MediaKind,
    pub payload: MediaPayload,
    /// 配音任务完成后附加的结果
    pub result: Option<MediaPayload>,
    pub size_bytes: u64,
    /// 0 表示由存储层在写入时填充
    pub created_at: i64,
    pub last_accessed_at: i64,
    pub cloud_state: CloudState,
}

impl LocalMediaRecord {
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        kind: MediaKind,
        payload: MediaPayload,
    ) -> Self {
        let size_bytes = payload.len();
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            kind,
            payload,
            result: None,
            size_bytes,
            created_at: 0,
            last_accessed_at: 0,
            cloud_state: CloudState::LocalOnly,
        }
    }

    pub fn with_cloud_state(mut self, cloud_state: CloudState) -> Self {
        self.cloud_state = cloud_state;
        self
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }
}

/// 已持久化内容的元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoredPayloadMeta {
    pub mime_type: String,
    pub size_bytes: u64,
    pub digest: String,
}

/// 记录元数据（bincode 编码存入 sled）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredMediaMeta {
    pub id: String,
    pub owner_id: String,
    pub kind: MediaKind,
    /// None 表示本地没有原始字节（已清理或仅有云端副本）
    pub payload: Option<StoredPayloadMeta>,
    pub result: Option<StoredPayloadMeta>,
    pub created_at: i64,
    pub last_accessed_at: i64,
    pub cloud_state: CloudState,
}

impl StoredMediaMeta {
    /// 本地占用字节数（原始内容 + 结果）
    pub fn local_bytes(&self) -> u64 {
        self.payload.as_ref().map(|p| p.size_bytes).unwrap_or(0)
            + self.result.as_ref().map(|p| p.size_bytes).unwrap_or(0)
    }

    pub fn info(&self) -> MediaRecordInfo {
        MediaRecordInfo {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            kind: self.kind,
            mime_type: self.payload.as_ref().map(|p| p.mime_type.clone()),
            size_bytes: self.local_bytes(),
            has_payload: self.payload.is_some(),
            has_result: self.result.is_some(),
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
            cloud_state: self.cloud_state,
        }
    }
}

/// 列表查询返回的记录摘要（不含字节内容）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRecordInfo {
    pub id: String,
    pub owner_id: String,
    pub kind: MediaKind,
    pub mime_type: Option<String>,
    pub size_bytes: u64,
    pub has_payload: bool,
    pub has_result: bool,
    pub created_at: i64,
    pub last_accessed_at: i64,
    pub cloud_state: CloudState,
}

/// 排序方式（均为降序，最新在前）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSortBy {
    LastAccessed,
    CreatedAt,
}

impl Default for MediaSortBy {
    fn default() -> Self {
        MediaSortBy::LastAccessed
    }
}

/// 按归属查询条件
#[derive(Debug, Clone, Default)]
pub struct MediaQuery {
    pub sort_by: MediaSortBy,
    pub limit: Option<usize>,
    /// 是否包含本地无内容的记录
    pub include_without_payload: bool,
    pub kind: Option<MediaKind>,
}

impl MediaQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort_by(mut self, sort_by: MediaSortBy) -> Self {
        self.sort_by = sort_by;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn include_without_payload(mut self) -> Self {
        self.include_without_payload = true;
        self
    }

    pub fn kind(mut self, kind: MediaKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// 淘汰/清理结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionReport {
    pub deleted_count: usize,
    pub freed_bytes: u64,
    pub remaining: usize,
}

/// 媒体统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStats {
    pub total_records: u64,
    pub with_payload: u64,
    pub voice_count: u64,
    pub dubbing_count: u64,
    pub total_bytes: u64,
}

/// 某个角色在本设备上的媒体清单
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalInventory {
    pub owner_id: String,
    pub voice_ids: Vec<String>,
    pub dubbing_ids: Vec<String>,
}

impl LocalInventory {
    pub fn total(&self) -> usize {
        self.voice_ids.len() + self.dubbing_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// 全部 ID（音色在前，保持各自顺序）
    pub fn all_ids(&self) -> impl Iterator<Item = &String> {
        self.voice_ids.iter().chain(self.dubbing_ids.iter())
    }
}

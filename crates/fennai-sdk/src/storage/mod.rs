//! 存储模块 - 媒体工作室 SDK 的本地持久化层
//!
//! 分层设计：
//! - StorageManager: 打开唯一的 sled 数据库，持有各存储组件
//! - LocalMediaStore: 配额感知的媒体缓存
//! - KvStore: 偏好与状态（横幅忽略、任务面包屑）
//! - Entities: 数据实体定义

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sled::Db;

use crate::error::{Result, StudioSDKError};
use crate::utils::clock::Clock;

pub mod entities;
pub mod kv;
pub mod media;
pub mod quota;

pub use entities::*;
pub use kv::{KvStore, MemoryPreferenceStore, PreferenceStore, PreferenceStoreExt};
pub use media::{EvictionPolicy, LocalMediaStore};
pub use quota::{
    ConfiguredQuota, QuotaEstimate, StorageEstimate, StorageEstimator, StoragePressure,
    UnsupportedEstimator,
};

const DB_DIR_NAME: &str = "studio.sled";

/// 存储管理器 - 统一的本地数据访问入口
///
/// 显式构造、显式关闭，测试可以各自创建隔离实例。
#[derive(Debug, Clone)]
pub struct StorageManager {
    base_path: PathBuf,
    db: Db,
    kv: Arc<KvStore>,
    media: Arc<LocalMediaStore>,
}

impl StorageManager {
    /// 创建存储管理器
    ///
    /// # 参数
    /// - `base_path`: 数据目录，sled 数据库位于其下的 `studio.sled`
    /// - `clock`: 时间来源
    /// - `estimator`: 平台配额估算
    /// - `policy`: 写入时自动淘汰参数
    pub async fn new(
        base_path: &Path,
        clock: Arc<dyn Clock>,
        estimator: Arc<dyn StorageEstimator>,
        policy: EvictionPolicy,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(base_path)
            .await
            .map_err(|e| StudioSDKError::IO(format!("创建存储目录失败: {}", e)))?;

        let db = sled::open(base_path.join(DB_DIR_NAME))
            .map_err(|e| StudioSDKError::KvStore(format!("打开 sled 数据库失败: {}", e)))?;
        let kv = Arc::new(KvStore::new(&db)?);
        let media = Arc::new(LocalMediaStore::new(&db, clock, estimator, policy)?);

        tracing::info!("✅ 本地存储已打开: {:?}", base_path);
        Ok(Self {
            base_path: base_path.to_path_buf(),
            db,
            kv,
            media,
        })
    }

    pub fn kv_store(&self) -> Arc<KvStore> {
        self.kv.clone()
    }

    pub fn media_store(&self) -> Arc<LocalMediaStore> {
        self.media.clone()
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// 数据库在磁盘上的大小
    pub fn size_on_disk(&self) -> Result<u64> {
        Ok(self.db.size_on_disk()?)
    }

    /// 刷盘
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| StudioSDKError::KvStore(format!("刷盘失败: {}", e)))?;
        Ok(())
    }
}

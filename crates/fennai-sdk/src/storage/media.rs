//! 本地媒体库 - 基于 sled 的配额感知缓存
//!
//! 本模块提供：
//! - 音色 / 配音媒体的原始字节持久化（读取时重新构造内容视图）
//! - 访问时间与大小跟踪
//! - 配额估算与写入前容量检查
//! - 按最久未访问优先的淘汰策略（保底数量不可突破）
//! - 云端已备份音色的本地字节清理
//!
//! 同一 ID 的并发写入按最后写入为准，跨两次调用不保证原子性。

use std::sync::Arc;

use bytes::Bytes;
use sled::{Db, Tree};
use tracing::{debug, info, warn};

use crate::error::{Result, StudioSDKError};
use crate::storage::entities::{
    digest_bytes, CloudState, EvictionReport, LocalInventory, LocalMediaRecord, MediaKind,
    MediaPayload, MediaQuery, MediaRecordInfo, MediaSortBy, MediaStats, StoredMediaMeta,
    StoredPayloadMeta,
};
use crate::storage::quota::{QuotaEstimate, StorageEstimator};
use crate::utils::clock::{Clock, MILLIS_PER_DAY};

const META_TREE: &str = "media_meta";
const PAYLOAD_TREE: &str = "media_payloads";
const RESULT_TREE: &str = "media_results";

/// 写入时自动淘汰使用的参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub min_to_keep: usize,
    pub max_age_days: u32,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            min_to_keep: 10,
            max_age_days: 30,
        }
    }
}

/// 本地媒体库
#[derive(Debug, Clone)]
pub struct LocalMediaStore {
    meta: Tree,
    payloads: Tree,
    results: Tree,
    clock: Arc<dyn Clock>,
    estimator: Arc<dyn StorageEstimator>,
    policy: EvictionPolicy,
}

impl LocalMediaStore {
    /// 在已打开的 sled 数据库上创建媒体库
    pub fn new(
        db: &Db,
        clock: Arc<dyn Clock>,
        estimator: Arc<dyn StorageEstimator>,
        policy: EvictionPolicy,
    ) -> Result<Self> {
        let open = |name: &str| {
            db.open_tree(name)
                .map_err(|e| StudioSDKError::KvStore(format!("打开媒体 Tree {} 失败: {}", name, e)))
        };
        Ok(Self {
            meta: open(META_TREE)?,
            payloads: open(PAYLOAD_TREE)?,
            results: open(RESULT_TREE)?,
            clock,
            estimator,
            policy,
        })
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// 写入一条记录
    ///
    /// 空间不足时自动淘汰一次后重新检查，仍不足则返回 `StorageFull`。
    pub async fn put(&self, record: LocalMediaRecord) -> Result<()> {
        if record.payload.is_empty() {
            return Err(StudioSDKError::EmptyPayload(record.id));
        }
        if record.id.is_empty() {
            return Err(StudioSDKError::InvalidArgument("媒体 ID 不能为空".to_string()));
        }

        let required = record.payload.len() + record.result.as_ref().map(|r| r.len()).unwrap_or(0);
        self.ensure_capacity(&record.id, required, StoredMediaMeta::local_bytes).await?;

        let now = self.clock.now_millis();
        let created_at = if record.created_at > 0 { record.created_at } else { now };
        let last_accessed_at = if record.last_accessed_at > 0 {
            record.last_accessed_at
        } else {
            created_at
        };

        let payload_meta = payload_meta(&record.payload);
        self.payloads
            .insert(record.id.as_bytes(), record.payload.bytes.to_vec())?;

        let result_meta = match &record.result {
            Some(result) if !result.is_empty() => {
                self.results.insert(record.id.as_bytes(), result.bytes.to_vec())?;
                Some(self::payload_meta(result))
            }
            _ => {
                self.results.remove(record.id.as_bytes())?;
                None
            }
        };

        let meta = StoredMediaMeta {
            id: record.id.clone(),
            owner_id: record.owner_id,
            kind: record.kind,
            payload: Some(payload_meta),
            result: result_meta,
            created_at,
            last_accessed_at,
            cloud_state: record.cloud_state,
        };
        self.save_meta(&meta)?;

        debug!("📥 媒体写入完成: id={}, kind={}, size={}", meta.id, meta.kind.as_str(), required);
        Ok(())
    }

    /// 读取记录；本地没有字节或校验失败都视为不存在
    pub async fn get(&self, id: &str) -> Result<Option<LocalMediaRecord>> {
        let mut meta = match self.load_meta(id)? {
            Some(meta) => meta,
            None => return Ok(None),
        };

        let payload = match &meta.payload {
            Some(stored) => match self.reconstruct(&self.payloads, id, stored)? {
                Some(payload) => payload,
                None => return Ok(None),
            },
            None => return Ok(None),
        };

        let result = match &meta.result {
            Some(stored) => self.reconstruct(&self.results, id, stored)?,
            None => None,
        };

        meta.last_accessed_at = self.clock.now_millis();
        self.save_meta(&meta)?;

        Ok(Some(LocalMediaRecord {
            size_bytes: meta.local_bytes(),
            id: meta.id,
            owner_id: meta.owner_id,
            kind: meta.kind,
            payload,
            result,
            created_at: meta.created_at,
            last_accessed_at: meta.last_accessed_at,
            cloud_state: meta.cloud_state,
        }))
    }

    /// 是否存在可读取的本地内容（不更新访问时间）
    pub fn has_payload(&self, id: &str) -> Result<bool> {
        Ok(self
            .load_meta(id)?
            .map(|meta| meta.payload.is_some())
            .unwrap_or(false))
    }

    /// 查询某个归属下的记录摘要
    pub async fn get_all_for_owner(&self, owner_id: &str, query: &MediaQuery) -> Result<Vec<MediaRecordInfo>> {
        let mut records: Vec<MediaRecordInfo> = self
            .load_all_meta()?
            .into_iter()
            .filter(|meta| meta.owner_id == owner_id)
            .filter(|meta| query.include_without_payload || meta.payload.is_some())
            .filter(|meta| query.kind.map(|kind| kind == meta.kind).unwrap_or(true))
            .map(|meta| meta.info())
            .collect();

        match query.sort_by {
            MediaSortBy::LastAccessed => {
                records.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at))
            }
            MediaSortBy::CreatedAt => records.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }

        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    /// 删除记录，返回是否确实删除
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let existed = self.meta.remove(id.as_bytes())?.is_some();
        self.payloads.remove(id.as_bytes())?;
        self.results.remove(id.as_bytes())?;
        Ok(existed)
    }

    /// 批量删除；单条失败不影响其余条目
    pub async fn delete_batch(&self, ids: &[String]) -> usize {
        let mut deleted = 0;
        for id in ids {
            match self.delete(id).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => warn!("删除媒体失败，继续处理下一条: id={}, error={}", id, e),
            }
        }
        deleted
    }

    /// 估算配额；平台不支持或出错时返回全零结果
    pub async fn estimate_quota(&self) -> QuotaEstimate {
        let tracked = match self.tracked_usage() {
            Ok(tracked) => tracked,
            Err(e) => {
                warn!("统计本地媒体占用失败: {}", e);
                return QuotaEstimate::unknown();
            }
        };
        match self.estimator.estimate(tracked).await {
            Ok(Some(estimate)) => QuotaEstimate::from_estimate(estimate),
            Ok(None) => QuotaEstimate::unknown(),
            Err(e) => {
                warn!("存储配额估算失败: {}", e);
                QuotaEstimate::unknown()
            }
        }
    }

    /// 检查是否还能写入 `required` 字节（配额未知时放行）
    pub async fn check_available(&self, required: u64) -> bool {
        self.estimate_quota().await.can_fit(required)
    }

    /// 淘汰超过 `max_age_days` 未访问的记录，最旧的优先，剩余数量不低于 `min_to_keep`
    pub async fn evict_oldest(&self, min_to_keep: usize, max_age_days: u32) -> Result<EvictionReport> {
        let all = self.load_all_meta()?;
        let total = all.len();
        let cutoff = self.clock.now_millis() - i64::from(max_age_days) * MILLIS_PER_DAY;

        let mut expired: Vec<StoredMediaMeta> = all
            .into_iter()
            .filter(|meta| meta.last_accessed_at < cutoff)
            .collect();
        expired.sort_by(|a, b| {
            a.last_accessed_at
                .cmp(&b.last_accessed_at)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        let budget = total.saturating_sub(min_to_keep);
        let mut report = EvictionReport::default();
        for meta in expired.into_iter().take(budget) {
            match self.delete(&meta.id).await {
                Ok(true) => {
                    report.deleted_count += 1;
                    report.freed_bytes += meta.local_bytes();
                }
                Ok(false) => {}
                Err(e) => warn!("淘汰媒体失败: id={}, error={}", meta.id, e),
            }
        }
        report.remaining = total - report.deleted_count;

        if report.deleted_count > 0 {
            info!(
                "🧹 媒体淘汰完成: 删除 {} 条, 释放 {} 字节, 剩余 {} 条",
                report.deleted_count, report.freed_bytes, report.remaining
            );
        }
        Ok(report)
    }

    /// 清理某个角色下已备份到云端的音色字节，保留元数据
    pub async fn purge_cloud_backed(&self, owner_id: &str) -> Result<EvictionReport> {
        let mut report = EvictionReport::default();
        for mut meta in self.load_all_meta()? {
            if meta.owner_id != owner_id || meta.payload.is_none() {
                continue;
            }
            if meta.kind.is_voice() && meta.cloud_state == CloudState::Cloud {
                let freed = meta.local_bytes();
                self.payloads.remove(meta.id.as_bytes())?;
                self.results.remove(meta.id.as_bytes())?;
                meta.payload = None;
                meta.result = None;
                self.save_meta(&meta)?;
                report.deleted_count += 1;
                report.freed_bytes += freed;
            } else {
                report.remaining += 1;
            }
        }
        info!(
            "云端备份音色本地清理: owner={}, 清理 {} 条, 释放 {} 字节",
            owner_id, report.deleted_count, report.freed_bytes
        );
        Ok(report)
    }

    /// 配音任务完成后附加结果
    pub async fn attach_result(&self, id: &str, result: MediaPayload) -> Result<()> {
        if result.is_empty() {
            return Err(StudioSDKError::EmptyPayload(id.to_string()));
        }
        if self.load_meta(id)?.is_none() {
            return Err(StudioSDKError::NotFound(format!("媒体记录不存在: {}", id)));
        }
        self.ensure_capacity(id, result.len(), |meta| meta.result.as_ref().map(|r| r.size_bytes).unwrap_or(0))
            .await?;

        // 淘汰可能刚好删掉了这条记录
        let mut meta = self
            .load_meta(id)?
            .ok_or_else(|| StudioSDKError::NotFound(format!("媒体记录不存在: {}", id)))?;
        self.results.insert(id.as_bytes(), result.bytes.to_vec())?;
        meta.result = Some(payload_meta(&result));
        self.save_meta(&meta)?;
        debug!("配音结果已附加: id={}, size={}", id, result.len());
        Ok(())
    }

    /// 更新云端状态（仅元数据）
    pub async fn set_cloud_state(&self, id: &str, cloud_state: CloudState) -> Result<()> {
        let mut meta = self
            .load_meta(id)?
            .ok_or_else(|| StudioSDKError::NotFound(format!("媒体记录不存在: {}", id)))?;
        meta.cloud_state = cloud_state;
        self.save_meta(&meta)
    }

    /// 获取媒体统计信息
    pub async fn stats(&self) -> Result<MediaStats> {
        let mut stats = MediaStats::default();
        for meta in self.load_all_meta()? {
            stats.total_records += 1;
            if meta.payload.is_some() {
                stats.with_payload += 1;
            }
            match meta.kind {
                MediaKind::Voice => stats.voice_count += 1,
                MediaKind::DubbingOriginal | MediaKind::DubbingResult => stats.dubbing_count += 1,
            }
            stats.total_bytes += meta.local_bytes();
        }
        Ok(stats)
    }

    /// 某个角色在本地可用的媒体 ID（按创建时间升序）
    pub async fn local_inventory(&self, owner_id: &str) -> Result<LocalInventory> {
        let mut metas: Vec<StoredMediaMeta> = self
            .load_all_meta()?
            .into_iter()
            .filter(|meta| meta.owner_id == owner_id && meta.payload.is_some())
            .collect();
        metas.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut inventory = LocalInventory {
            owner_id: owner_id.to_string(),
            ..Default::default()
        };
        for meta in metas {
            if meta.kind.is_voice() {
                inventory.voice_ids.push(meta.id);
            } else {
                inventory.dubbing_ids.push(meta.id);
            }
        }
        Ok(inventory)
    }

    /// 刷盘
    pub async fn flush(&self) -> Result<()> {
        self.meta.flush_async().await?;
        self.payloads.flush_async().await?;
        self.results.flush_async().await?;
        Ok(())
    }

    /// 覆盖写入只按净增长检查；`replaced` 给出同 ID 现有记录将被替换的字节数
    async fn ensure_capacity(&self, id: &str, required: u64, replaced: fn(&StoredMediaMeta) -> u64) -> Result<()> {
        let required = self.net_growth(id, required, replaced)?;
        if self.check_available(required).await {
            return Ok(());
        }

        info!("存储空间不足，尝试淘汰: required={}", required);
        let report = self
            .evict_oldest(self.policy.min_to_keep, self.policy.max_age_days)
            .await?;
        if report.deleted_count == 0 {
            debug!("淘汰未释放任何空间");
        }

        // 淘汰可能删掉了被覆盖的记录
        let required = self.net_growth(id, required, replaced)?;
        let quota = self.estimate_quota().await;
        if quota.can_fit(required) {
            Ok(())
        } else {
            warn!(
                "淘汰后空间仍不足: required={}, available={}",
                required, quota.available_bytes
            );
            Err(StudioSDKError::StorageFull {
                required,
                available: quota.available_bytes,
            })
        }
    }

    fn reconstruct(&self, tree: &Tree, id: &str, stored: &StoredPayloadMeta) -> Result<Option<MediaPayload>> {
        let raw = match tree.get(id.as_bytes())? {
            Some(raw) => raw,
            None => {
                warn!("媒体元数据存在但内容缺失: id={}", id);
                return Ok(None);
            }
        };
        if raw.is_empty() || digest_bytes(&raw) != stored.digest {
            warn!("媒体内容校验失败，视为不存在: id={}", id);
            return Ok(None);
        }
        Ok(Some(MediaPayload {
            bytes: Bytes::copy_from_slice(&raw),
            mime_type: stored.mime_type.clone(),
        }))
    }

    fn net_growth(&self, id: &str, required: u64, replaced: fn(&StoredMediaMeta) -> u64) -> Result<u64> {
        let existing = self.load_meta(id)?.map(|meta| replaced(&meta)).unwrap_or(0);
        Ok(required.saturating_sub(existing))
    }

    fn tracked_usage(&self) -> Result<u64> {
        Ok(self.load_all_meta()?.iter().map(|meta| meta.local_bytes()).sum())
    }

    fn load_meta(&self, id: &str) -> Result<Option<StoredMediaMeta>> {
        match self.meta.get(id.as_bytes())? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    fn save_meta(&self, meta: &StoredMediaMeta) -> Result<()> {
        let raw = bincode::serialize(meta)?;
        self.meta.insert(meta.id.as_bytes(), raw)?;
        Ok(())
    }

    fn load_all_meta(&self) -> Result<Vec<StoredMediaMeta>> {
        let mut metas = Vec::new();
        for item in self.meta.iter() {
            let (_, raw) = item?;
            match bincode::deserialize::<StoredMediaMeta>(&raw) {
                Ok(meta) => metas.push(meta),
                Err(e) => warn!("跳过无法解析的媒体元数据: {}", e),
            }
        }
        Ok(metas)
    }
}

fn payload_meta(payload: &MediaPayload) -> StoredPayloadMeta {
    StoredPayloadMeta {
        mime_type: payload.mime_type.clone(),
        size_bytes: payload.len(),
        digest: payload.digest(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::quota::{ConfiguredQuota, UnsupportedEstimator};
    use crate::utils::clock::ManualClock;
    use tempfile::TempDir;

    const T0: i64 = 1_700_000_000_000;

    struct Fixture {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        store: LocalMediaStore,
    }

    fn fixture(estimator: Arc<dyn StorageEstimator>, policy: EvictionPolicy) -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = sled::open(dir.path().join("db")).unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let store = LocalMediaStore::new(&db, clock.clone(), estimator, policy).unwrap();
        Fixture { _dir: dir, clock, store }
    }

    fn unlimited() -> Fixture {
        fixture(Arc::new(UnsupportedEstimator), EvictionPolicy::default())
    }

    fn voice(id: &str, owner: &str, len: usize) -> LocalMediaRecord {
        LocalMediaRecord::new(id, owner, MediaKind::Voice, MediaPayload::new(vec![7u8; len], "audio/wav"))
    }

    #[tokio::test]
    async fn test_put_get_reconstructs_identical_payload() {
        let fx = unlimited();
        let bytes: Vec<u8> = (0..=255u8).collect();
        let record = LocalMediaRecord::new(
            "v1",
            "char-1",
            MediaKind::Voice,
            MediaPayload::new(bytes.clone(), "audio/webm"),
        );
        fx.store.put(record).await.unwrap();

        let loaded = fx.store.get("v1").await.unwrap().unwrap();
        assert_eq!(loaded.payload.bytes.as_ref(), bytes.as_slice());
        assert_eq!(loaded.payload.mime_type, "audio/webm");
        assert_eq!(loaded.created_at, T0);
        assert_eq!(loaded.size_bytes, 256);
    }

    #[tokio::test]
    async fn test_put_rejects_empty_payload() {
        let fx = unlimited();
        let err = fx.store.put(voice("v1", "c", 0)).await.unwrap_err();
        assert!(matches!(err, StudioSDKError::EmptyPayload(id) if id == "v1"));
        assert!(fx.store.get("v1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_bumps_last_accessed() {
        let fx = unlimited();
        fx.store.put(voice("v1", "c", 4)).await.unwrap();
        fx.clock.advance_hours(5);

        let loaded = fx.store.get("v1").await.unwrap().unwrap();
        assert_eq!(loaded.last_accessed_at, T0 + 5 * 3_600_000);

        let listed = fx.store.get_all_for_owner("c", &MediaQuery::new()).await.unwrap();
        assert_eq!(listed[0].last_accessed_at, T0 + 5 * 3_600_000);
    }

    #[tokio::test]
    async fn test_missing_or_corrupt_bytes_read_as_not_found() {
        let fx = unlimited();
        fx.store.put(voice("gone", "c", 4)).await.unwrap();
        fx.store.put(voice("bad", "c", 4)).await.unwrap();

        fx.store.payloads.remove("gone").unwrap();
        fx.store.payloads.insert("bad", vec![1u8, 2, 3, 4]).unwrap();

        assert!(fx.store.get("gone").await.unwrap().is_none());
        assert!(fx.store.get("bad").await.unwrap().is_none());
        assert!(fx.store.get("never-written").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_all_for_owner_filters_sorts_and_limits() {
        let fx = unlimited();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            fx.clock.set(T0 + i as i64 * 1000);
            fx.store.put(voice(id, "owner", 2)).await.unwrap();
        }
        fx.store.put(voice("other", "someone-else", 2)).await.unwrap();
        fx.store
            .put(
                LocalMediaRecord::new(
                    "dub",
                    "owner",
                    MediaKind::DubbingOriginal,
                    MediaPayload::new(vec![1u8; 3], "video/mp4"),
                )
                .with_created_at(T0 - 10),
            )
            .await
            .unwrap();

        let by_created = fx
            .store
            .get_all_for_owner("owner", &MediaQuery::new().sort_by(MediaSortBy::CreatedAt).limit(2))
            .await
            .unwrap();
        let ids: Vec<&str> = by_created.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);

        let dubs = fx
            .store
            .get_all_for_owner("owner", &MediaQuery::new().kind(MediaKind::DubbingOriginal))
            .await
            .unwrap();
        assert_eq!(dubs.len(), 1);
        assert_eq!(dubs[0].mime_type.as_deref(), Some("video/mp4"));
    }

    #[tokio::test]
    async fn test_records_without_payload_hidden_unless_requested() {
        let fx = unlimited();
        fx.store.put(voice("v1", "c", 4).with_cloud_state(CloudState::Cloud)).await.unwrap();
        fx.store.put(voice("v2", "c", 4)).await.unwrap();

        let report = fx.store.purge_cloud_backed("c").await.unwrap();
        assert_eq!(report.deleted_count, 1);
        assert_eq!(report.freed_bytes, 4);
        assert_eq!(report.remaining, 1);

        assert!(fx.store.get("v1").await.unwrap().is_none());
        let visible = fx.store.get_all_for_owner("c", &MediaQuery::new()).await.unwrap();
        assert_eq!(visible.len(), 1);
        let all = fx
            .store
            .get_all_for_owner("c", &MediaQuery::new().include_without_payload())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|r| r.id == "v1" && !r.has_payload));
    }

    #[tokio::test]
    async fn test_delete_batch_counts_actual_deletions() {
        let fx = unlimited();
        fx.store.put(voice("a", "c", 1)).await.unwrap();
        fx.store.put(voice("b", "c", 1)).await.unwrap();

        let ids = vec!["a".to_string(), "missing".to_string(), "b".to_string()];
        assert_eq!(fx.store.delete_batch(&ids).await, 2);
        assert!(!fx.store.delete("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_evict_oldest_respects_floor() {
        let fx = unlimited();
        for i in 0..15 {
            fx.clock.set(T0 + i);
            fx.store.put(voice(&format!("v{:02}", i), "c", 10)).await.unwrap();
        }
        fx.clock.set(T0 + 40 * MILLIS_PER_DAY);

        let report = fx.store.evict_oldest(10, 30).await.unwrap();
        assert_eq!(report.deleted_count, 5);
        assert_eq!(report.freed_bytes, 50);
        assert_eq!(report.remaining, 10);

        // 最旧的先被淘汰
        assert!(fx.store.get("v00").await.unwrap().is_none());
        assert!(fx.store.get("v05").await.unwrap().is_some());

        let again = fx.store.evict_oldest(10, 30).await.unwrap();
        assert_eq!(again.deleted_count, 0);
        assert_eq!(again.remaining, 10);
    }

    #[tokio::test]
    async fn test_evict_oldest_only_touches_expired_records() {
        let fx = unlimited();
        fx.store.put(voice("old", "c", 1)).await.unwrap();
        fx.clock.advance_millis(20 * MILLIS_PER_DAY);
        fx.store.put(voice("fresh", "c", 1)).await.unwrap();
        fx.clock.advance_millis(15 * MILLIS_PER_DAY);

        let report = fx.store.evict_oldest(0, 30).await.unwrap();
        assert_eq!(report.deleted_count, 1);
        assert!(fx.store.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_put_fails_with_storage_full_when_eviction_cannot_help() {
        let fx = fixture(Arc::new(ConfiguredQuota::new(100)), EvictionPolicy::default());
        fx.store.put(voice("a", "c", 60)).await.unwrap();

        let err = fx.store.put(voice("b", "c", 60)).await.unwrap_err();
        match err {
            StudioSDKError::StorageFull { required, available } => {
                assert_eq!(required, 60);
                assert_eq!(available, 40);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(fx.store.get("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_put_evicts_once_then_succeeds() {
        let policy = EvictionPolicy { min_to_keep: 0, max_age_days: 30 };
        let fx = fixture(Arc::new(ConfiguredQuota::new(100)), policy);
        fx.store.put(voice("old", "c", 60)).await.unwrap();
        fx.clock.advance_millis(31 * MILLIS_PER_DAY);

        fx.store.put(voice("new", "c", 60)).await.unwrap();
        assert!(fx.store.get("old").await.unwrap().is_none());
        assert!(fx.store.get("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_overwrite_near_quota_counts_net_growth() {
        let fx = fixture(Arc::new(ConfiguredQuota::new(100)), EvictionPolicy::default());
        fx.store.put(voice("a", "c", 60)).await.unwrap();

        fx.store.put(voice("a", "c", 60)).await.unwrap();
        fx.store.put(voice("a", "c", 90)).await.unwrap();
        assert_eq!(fx.store.get("a").await.unwrap().unwrap().size_bytes, 90);

        let err = fx.store.put(voice("a", "c", 120)).await.unwrap_err();
        assert!(matches!(err, StudioSDKError::StorageFull { required: 30, available: 10 }));
    }

    #[tokio::test]
    async fn test_replacing_result_near_quota_counts_net_growth() {
        let fx = fixture(Arc::new(ConfiguredQuota::new(100)), EvictionPolicy::default());
        fx.store
            .put(LocalMediaRecord::new(
                "job-1",
                "job-1",
                MediaKind::DubbingOriginal,
                MediaPayload::new(vec![1u8; 40], "video/mp4"),
            ))
            .await
            .unwrap();
        fx.store
            .attach_result("job-1", MediaPayload::new(vec![2u8; 50], "audio/mpeg"))
            .await
            .unwrap();

        fx.store
            .attach_result("job-1", MediaPayload::new(vec![3u8; 55], "audio/mpeg"))
            .await
            .unwrap();
        let loaded = fx.store.get("job-1").await.unwrap().unwrap();
        assert_eq!(loaded.size_bytes, 95);
    }

    #[tokio::test]
    async fn test_estimate_quota_degrades_to_zero() {
        let fx = unlimited();
        fx.store.put(voice("a", "c", 60)).await.unwrap();
        let quota = fx.store.estimate_quota().await;
        assert_eq!(quota, QuotaEstimate::unknown());
        assert!(fx.store.check_available(u64::MAX).await);
    }

    #[tokio::test]
    async fn test_attach_result_and_cloud_state() {
        let fx = unlimited();
        fx.store
            .put(LocalMediaRecord::new(
                "job-1",
                "job-1",
                MediaKind::DubbingOriginal,
                MediaPayload::new(vec![1u8; 8], "video/mp4"),
            ))
            .await
            .unwrap();

        fx.store
            .attach_result("job-1", MediaPayload::new(vec![2u8; 4], "audio/mpeg"))
            .await
            .unwrap();
        let loaded = fx.store.get("job-1").await.unwrap().unwrap();
        let result = loaded.result.unwrap();
        assert_eq!(result.mime_type, "audio/mpeg");
        assert_eq!(loaded.size_bytes, 12);

        let missing = fx
            .store
            .attach_result("nope", MediaPayload::new(vec![1u8], "audio/mpeg"))
            .await;
        assert!(matches!(missing, Err(StudioSDKError::NotFound(_))));

        fx.store.set_cloud_state("job-1", CloudState::Cloud).await.unwrap();
        let info = fx.store.get_all_for_owner("job-1", &MediaQuery::new()).await.unwrap();
        assert_eq!(info[0].cloud_state, CloudState::Cloud);
        assert!(info[0].has_result);
    }

    #[tokio::test]
    async fn test_stats_and_inventory() {
        let fx = unlimited();
        fx.store.put(voice("v1", "c", 3)).await.unwrap();
        fx.clock.advance_millis(1);
        fx.store.put(voice("v2", "c", 5)).await.unwrap();
        fx.store
            .put(LocalMediaRecord::new(
                "d1",
                "c",
                MediaKind::DubbingResult,
                MediaPayload::new(vec![1u8; 2], "video/mp4"),
            ))
            .await
            .unwrap();

        let stats = fx.store.stats().await.unwrap();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.voice_count, 2);
        assert_eq!(stats.dubbing_count, 1);
        assert_eq!(stats.total_bytes, 10);

        let inventory = fx.store.local_inventory("c").await.unwrap();
        assert_eq!(inventory.voice_ids, vec!["v1".to_string(), "v2".to_string()]);
        assert_eq!(inventory.dubbing_ids, vec!["d1".to_string()]);
        assert!(fx.store.local_inventory("nobody").await.unwrap().is_empty());
    }
}

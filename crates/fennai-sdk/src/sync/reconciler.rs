//! 本地/云端对账决策
//!
//! `decide` 是纯函数：给定本地清单、远端清单、用户等级、角色同步开关与存储占用，
//! 按固定优先级自上而下匹配，返回唯一的状态。
//!
//! `Reconciler` 负责取数并执行一次完整的对账：
//! - 24 小时内已被忽略 → `Idle`
//! - 远端清单获取失败 → `NetworkError`
//! - 其他意外错误 → `Idle`

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::StudioSDKError;
use crate::remote::{RemoteInventoryEndpoint, RemoteInventorySnapshot};
use crate::storage::entities::LocalInventory;
use crate::storage::media::LocalMediaStore;
use crate::sync::dismissal::DismissalStore;

/// 用户等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserTier {
    Free,
    Pro,
    Enterprise,
}

/// 上传限制；None 表示不限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadLimits {
    pub max_duration_secs: Option<u32>,
    pub max_file_bytes: Option<u64>,
}

impl UserTier {
    /// 企业版按专业版对待
    pub fn is_pro(&self) -> bool {
        matches!(self, UserTier::Pro | UserTier::Enterprise)
    }

    pub fn upload_limits(&self) -> UploadLimits {
        match self {
            UserTier::Free => UploadLimits {
                max_duration_secs: Some(120),
                max_file_bytes: Some(100 * 1024 * 1024),
            },
            UserTier::Pro => UploadLimits {
                max_duration_secs: Some(1800),
                max_file_bytes: Some(2048 * 1024 * 1024),
            },
            UserTier::Enterprise => UploadLimits {
                max_duration_secs: None,
                max_file_bytes: None,
            },
        }
    }
}

impl UploadLimits {
    pub fn allows(&self, duration_secs: u32, file_bytes: u64) -> bool {
        self.max_duration_secs.map(|max| duration_secs <= max).unwrap_or(true)
            && self.max_file_bytes.map(|max| file_bytes <= max).unwrap_or(true)
    }
}

/// 对账状态（按优先级排列）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    StorageCritical,
    ProCloudDisabled,
    ProSyncNeeded,
    ProRemoteAvailable,
    FreeRemoteOnly,
    FreeMixedRemote,
    FreeLocalAtRisk,
    FreeStorageWarning,
    /// 远端清单获取失败的降级状态
    NetworkError,
    Idle,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::StorageCritical => "storage-critical",
            SyncState::ProCloudDisabled => "pro-cloud-disabled",
            SyncState::ProSyncNeeded => "pro-sync-needed",
            SyncState::ProRemoteAvailable => "pro-remote-available",
            SyncState::FreeRemoteOnly => "free-remote-only",
            SyncState::FreeMixedRemote => "free-mixed-remote",
            SyncState::FreeLocalAtRisk => "free-local-at-risk",
            SyncState::FreeStorageWarning => "free-storage-warning",
            SyncState::NetworkError => "network-error",
            SyncState::Idle => "idle",
        }
    }

    /// 是否需要展示横幅
    pub fn is_visible(&self) -> bool {
        !matches!(self, SyncState::Idle)
    }
}

/// 对账结果，每次重新计算，不持久化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncDecision {
    pub owner_id: String,
    pub state: SyncState,
    /// 当前动作（上传）可处理的条目
    pub candidate_set: Vec<String>,
    /// 远端有、本地没有的条目，可用于下载恢复
    pub remote_only: Vec<String>,
    pub storage_percent_used: f64,
}

impl SyncDecision {
    pub fn idle(owner_id: impl Into<String>) -> Self {
        Self::bare(owner_id, SyncState::Idle)
    }

    pub fn network_error(owner_id: impl Into<String>) -> Self {
        Self::bare(owner_id, SyncState::NetworkError)
    }

    fn bare(owner_id: impl Into<String>, state: SyncState) -> Self {
        Self {
            owner_id: owner_id.into(),
            state,
            candidate_set: Vec::new(),
            remote_only: Vec::new(),
            storage_percent_used: 0.0,
        }
    }
}

/// 判定阈值（严格大于）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionThresholds {
    pub critical_percent: f64,
    pub free_warning_percent: f64,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            critical_percent: 90.0,
            free_warning_percent: 70.0,
        }
    }
}

/// 决策输入
#[derive(Debug, Clone, Copy)]
pub struct DecisionInputs<'a> {
    pub local: &'a LocalInventory,
    pub remote: &'a RemoteInventorySnapshot,
    pub tier: UserTier,
    pub character_sync_enabled: bool,
    pub storage_percent_used: f64,
}

/// 决策矩阵，先匹配者胜出
pub fn decide(inputs: &DecisionInputs<'_>, thresholds: &DecisionThresholds) -> SyncDecision {
    let local_total = inputs.local.total();
    let remote_total = inputs.remote.cloud_total();
    let percent = inputs.storage_percent_used;
    let is_pro = inputs.tier.is_pro();

    let sync_on = is_pro && inputs.character_sync_enabled;
    let missing = if sync_on {
        inputs.remote.missing_from_remote(inputs.local)
    } else {
        Vec::new()
    };

    let state = if percent > thresholds.critical_percent {
        SyncState::StorageCritical
    } else if is_pro && !inputs.character_sync_enabled && local_total > 0 {
        SyncState::ProCloudDisabled
    } else if sync_on && !missing.is_empty() {
        SyncState::ProSyncNeeded
    } else if sync_on && remote_total > local_total {
        SyncState::ProRemoteAvailable
    } else if !is_pro && remote_total > local_total && local_total == 0 {
        SyncState::FreeRemoteOnly
    } else if !is_pro && remote_total > local_total {
        SyncState::FreeMixedRemote
    } else if !is_pro && local_total > 0 {
        SyncState::FreeLocalAtRisk
    } else if !is_pro && percent > thresholds.free_warning_percent {
        SyncState::FreeStorageWarning
    } else {
        SyncState::Idle
    };

    let candidate_set = if state == SyncState::ProSyncNeeded {
        missing
    } else {
        Vec::new()
    };

    SyncDecision {
        owner_id: inputs.local.owner_id.clone(),
        state,
        candidate_set,
        remote_only: inputs.remote.remote_only(inputs.local),
        storage_percent_used: percent,
    }
}

/// 一次对账的请求参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    pub owner_id: String,
    pub tier: UserTier,
    pub character_sync_enabled: bool,
}

impl ReconcileRequest {
    pub fn new(owner_id: impl Into<String>, tier: UserTier, character_sync_enabled: bool) -> Self {
        Self {
            owner_id: owner_id.into(),
            tier,
            character_sync_enabled,
        }
    }
}

/// 对账执行器
pub struct Reconciler {
    media: Arc<LocalMediaStore>,
    inventory: Arc<dyn RemoteInventoryEndpoint>,
    dismissals: DismissalStore,
    thresholds: DecisionThresholds,
}

impl Reconciler {
    pub fn new(
        media: Arc<LocalMediaStore>,
        inventory: Arc<dyn RemoteInventoryEndpoint>,
        dismissals: DismissalStore,
        thresholds: DecisionThresholds,
    ) -> Self {
        Self {
            media,
            inventory,
            dismissals,
            thresholds,
        }
    }

    /// 执行一次对账，永不失败
    pub async fn reconcile(&self, request: &ReconcileRequest) -> SyncDecision {
        match self.try_reconcile(request).await {
            Ok(decision) => {
                info!(
                    "对账完成: owner={}, state={}, candidates={}",
                    request.owner_id,
                    decision.state.as_str(),
                    decision.candidate_set.len()
                );
                decision
            }
            Err(PassError::Inventory(e)) => {
                warn!("远端清单检查失败，进入降级状态: owner={}, error={}", request.owner_id, e);
                SyncDecision::network_error(&request.owner_id)
            }
            Err(PassError::Unexpected(e)) => {
                error!("对账出现意外错误，隐藏横幅: owner={}, error={}", request.owner_id, e);
                SyncDecision::idle(&request.owner_id)
            }
        }
    }

    pub fn dismissals(&self) -> &DismissalStore {
        &self.dismissals
    }

    async fn try_reconcile(&self, request: &ReconcileRequest) -> std::result::Result<SyncDecision, PassError> {
        if self.dismissals.is_dismissed(&request.owner_id)? {
            debug!("横幅处于忽略期: owner={}", request.owner_id);
            return Ok(SyncDecision::idle(&request.owner_id));
        }

        let local = self.media.local_inventory(&request.owner_id).await?;
        // 清单接口的任何非成功响应都按检查失败处理
        let remote = self
            .inventory
            .fetch_inventory(&request.owner_id)
            .await
            .map_err(PassError::Inventory)?;
        let quota = self.media.estimate_quota().await;

        let inputs = DecisionInputs {
            local: &local,
            remote: &remote,
            tier: request.tier,
            character_sync_enabled: request.character_sync_enabled,
            storage_percent_used: quota.percent_used,
        };
        Ok(decide(&inputs, &self.thresholds))
    }
}

enum PassError {
    Inventory(StudioSDKError),
    Unexpected(StudioSDKError),
}

impl From<StudioSDKError> for PassError {
    fn from(error: StudioSDKError) -> Self {
        PassError::Unexpected(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::FakeInventory;
    use crate::storage::entities::{LocalMediaRecord, MediaKind, MediaPayload};
    use crate::storage::kv::MemoryPreferenceStore;
    use crate::storage::media::EvictionPolicy;
    use crate::storage::quota::{ConfiguredQuota, StorageEstimator, UnsupportedEstimator};
    use crate::utils::clock::{ManualClock, MILLIS_PER_HOUR};
    use tempfile::TempDir;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    fn local(voices: usize, dubs: usize) -> LocalInventory {
        LocalInventory {
            owner_id: "char-1".into(),
            voice_ids: ids("lv", voices),
            dubbing_ids: ids("ld", dubs),
        }
    }

    fn run(
        local: &LocalInventory,
        remote: &RemoteInventorySnapshot,
        tier: UserTier,
        sync: bool,
        percent: f64,
    ) -> SyncDecision {
        decide(
            &DecisionInputs {
                local,
                remote,
                tier,
                character_sync_enabled: sync,
                storage_percent_used: percent,
            },
            &DecisionThresholds::default(),
        )
    }

    #[test]
    fn test_pro_with_unsynced_local_voices_needs_sync() {
        let local = local(3, 0);
        let remote = RemoteInventorySnapshot::empty("char-1");
        let decision = run(&local, &remote, UserTier::Pro, true, 0.0);
        assert_eq!(decision.state, SyncState::ProSyncNeeded);
        assert_eq!(decision.candidate_set, local.voice_ids);
    }

    #[test]
    fn test_free_with_only_remote_media() {
        let remote = RemoteInventorySnapshot::from_ids("char-1", ids("rv", 5), vec![]);
        let decision = run(&local(0, 0), &remote, UserTier::Free, false, 0.0);
        assert_eq!(decision.state, SyncState::FreeRemoteOnly);
        assert!(decision.candidate_set.is_empty());
        assert_eq!(decision.remote_only.len(), 5);
    }

    #[test]
    fn test_storage_critical_wins_for_any_tier() {
        let local = local(3, 0);
        let remote = RemoteInventorySnapshot::empty("char-1");
        for tier in [UserTier::Free, UserTier::Pro, UserTier::Enterprise] {
            for sync in [true, false] {
                let decision = run(&local, &remote, tier, sync, 90.5);
                assert_eq!(decision.state, SyncState::StorageCritical);
                assert!(decision.candidate_set.is_empty());
            }
        }
        // 90 整不算严重
        assert_eq!(run(&local, &remote, UserTier::Pro, true, 90.0).state, SyncState::ProSyncNeeded);
    }

    #[test]
    fn test_pro_cloud_disabled_precedes_sync_needed() {
        let decision = run(&local(2, 1), &RemoteInventorySnapshot::empty("char-1"), UserTier::Pro, false, 10.0);
        assert_eq!(decision.state, SyncState::ProCloudDisabled);

        let nothing_local = run(&local(0, 0), &RemoteInventorySnapshot::empty("char-1"), UserTier::Pro, false, 10.0);
        assert_eq!(nothing_local.state, SyncState::Idle);
    }

    #[test]
    fn test_pro_remote_available_when_everything_local_is_synced() {
        let local = local(1, 0);
        let mut voices = local.voice_ids.clone();
        voices.push("remote-extra".into());
        let remote = RemoteInventorySnapshot::from_ids("char-1", voices, vec![]);
        let decision = run(&local, &remote, UserTier::Enterprise, true, 0.0);
        assert_eq!(decision.state, SyncState::ProRemoteAvailable);
        assert_eq!(decision.remote_only, vec!["remote-extra".to_string()]);
    }

    #[test]
    fn test_free_tier_ordering() {
        let remote5 = RemoteInventorySnapshot::from_ids("char-1", ids("rv", 5), vec![]);
        let empty = RemoteInventorySnapshot::empty("char-1");

        assert_eq!(run(&local(2, 0), &remote5, UserTier::Free, true, 0.0).state, SyncState::FreeMixedRemote);
        assert_eq!(run(&local(2, 0), &empty, UserTier::Free, true, 85.0).state, SyncState::FreeLocalAtRisk);
        assert_eq!(run(&local(0, 0), &empty, UserTier::Free, true, 85.0).state, SyncState::FreeStorageWarning);
        assert_eq!(run(&local(0, 0), &empty, UserTier::Free, true, 70.0).state, SyncState::Idle);
        assert_eq!(run(&local(0, 0), &empty, UserTier::Pro, true, 85.0).state, SyncState::Idle);
    }

    #[test]
    fn test_percent_sweep_matches_thresholds() {
        let empty = RemoteInventorySnapshot::empty("char-1");
        let nothing = local(0, 0);
        for step in 0..=200 {
            let p = step as f64 * 0.5;
            let state = run(&nothing, &empty, UserTier::Free, false, p).state;
            let expected = if p > 90.0 {
                SyncState::StorageCritical
            } else if p > 70.0 {
                SyncState::FreeStorageWarning
            } else {
                SyncState::Idle
            };
            assert_eq!(state, expected, "p = {}", p);
        }
    }

    #[test]
    fn test_tier_limits() {
        assert!(UserTier::Free.upload_limits().allows(120, 100 * 1024 * 1024));
        assert!(!UserTier::Free.upload_limits().allows(121, 1));
        assert!(UserTier::Pro.upload_limits().allows(1800, 1));
        assert!(UserTier::Enterprise.upload_limits().allows(u32::MAX, u64::MAX));
        assert!(UserTier::Enterprise.is_pro());
    }

    struct Fixture {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        media: Arc<LocalMediaStore>,
        inventory: Arc<FakeInventory>,
        reconciler: Reconciler,
    }

    fn fixture(estimator: Arc<dyn StorageEstimator>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = sled::open(dir.path().join("db")).unwrap();
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let media = Arc::new(
            LocalMediaStore::new(&db, clock.clone(), estimator, EvictionPolicy::default()).unwrap(),
        );
        let inventory = Arc::new(FakeInventory::default());
        let dismissals = DismissalStore::new(Arc::new(MemoryPreferenceStore::new()), clock.clone());
        let reconciler = Reconciler::new(media.clone(), inventory.clone(), dismissals, DecisionThresholds::default());
        Fixture { _dir: dir, clock, media, inventory, reconciler }
    }

    async fn add_voice(media: &LocalMediaStore, id: &str, len: usize) {
        media
            .put(LocalMediaRecord::new(id, "char-1", MediaKind::Voice, MediaPayload::new(vec![1u8; len], "audio/wav")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reconcile_pass_uses_store_and_remote() {
        let fx = fixture(Arc::new(UnsupportedEstimator));
        for id in ["a", "b", "c"] {
            add_voice(&fx.media, id, 4).await;
        }
        let request = ReconcileRequest::new("char-1", UserTier::Pro, true);
        let decision = fx.reconciler.reconcile(&request).await;
        assert_eq!(decision.state, SyncState::ProSyncNeeded);
        assert_eq!(decision.candidate_set.len(), 3);
    }

    #[tokio::test]
    async fn test_inventory_failure_degrades_to_network_error() {
        let fx = fixture(Arc::new(UnsupportedEstimator));
        add_voice(&fx.media, "a", 4).await;
        fx.inventory.set_failing(true);

        let decision = fx.reconciler.reconcile(&ReconcileRequest::new("char-1", UserTier::Pro, true)).await;
        assert_eq!(decision.state, SyncState::NetworkError);
        assert!(decision.candidate_set.is_empty());
    }

    #[tokio::test]
    async fn test_storage_pressure_from_quota() {
        let fx = fixture(Arc::new(ConfiguredQuota::new(100)));
        add_voice(&fx.media, "a", 95).await;
        let decision = fx.reconciler.reconcile(&ReconcileRequest::new("char-1", UserTier::Pro, true)).await;
        assert_eq!(decision.state, SyncState::StorageCritical);
    }

    #[tokio::test]
    async fn test_dismissal_window() {
        let fx = fixture(Arc::new(UnsupportedEstimator));
        add_voice(&fx.media, "a", 4).await;
        let request = ReconcileRequest::new("char-1", UserTier::Free, false);

        fx.reconciler.dismissals().dismiss("char-1").unwrap();
        fx.clock.advance_millis(23 * MILLIS_PER_HOUR);
        assert_eq!(fx.reconciler.reconcile(&request).await.state, SyncState::Idle);

        fx.clock.advance_millis(2 * MILLIS_PER_HOUR);
        assert_eq!(fx.reconciler.reconcile(&request).await.state, SyncState::FreeLocalAtRisk);
    }

    #[tokio::test]
    async fn test_dismissal_is_per_owner() {
        let fx = fixture(Arc::new(UnsupportedEstimator));
        add_voice(&fx.media, "a", 4).await;
        fx.reconciler.dismissals().dismiss("char-2").unwrap();

        let decision = fx.reconciler.reconcile(&ReconcileRequest::new("char-1", UserTier::Free, false)).await;
        assert_eq!(decision.state, SyncState::FreeLocalAtRisk);
    }
}

//! 统一 SDK 接口 - StudioSDK 主入口
//!
//! 分层架构设计：
//! ```text
//! StudioSDK (业务逻辑层)
//!   ├── StorageManager (存储管理层：KV + 本地媒体库)
//!   ├── Reconciler / MigrationExecutor (同步层)
//!   ├── JobStatusChannel / JobTracker (任务观察层)
//!   ├── RemoteServices (远端协作方)
//!   └── EventManager (事件系统层)
//! ```
//!
//! 设计原则：
//! - 异步优先：主要 API 使用 async/await
//! - 横幅状态只经过 `sync::banner::reduce` 变更
//! - 事件驱动：所有状态变化通过 `EventManager` 广播

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, StudioSDKError};
use crate::events::{EventManager, SDKEvent};
use crate::http_client::HttpStudioClient;
use crate::job::{ActiveJobBreadcrumb, JobKind, JobStatus, JobStatusChannel, JobTracker, JobWatchHandle, WatchCanceller, WatchOptions};
use crate::remote::{
    DubbingTargetOptions, JobSettingsEndpoint, JobStatusSource, MediaDownloadEndpoint, MediaUploadEndpoint,
    RemoteInventoryEndpoint,
};
use crate::retry_policy::RetryPolicy;
use crate::storage::entities::EvictionReport;
use crate::storage::quota::{ConfiguredQuota, StorageEstimator};
use crate::storage::{EvictionPolicy, LocalMediaStore, PreferenceStore, StorageManager};
use crate::sync::{
    reduce, BannerAction, BannerState, DecisionThresholds, DismissalStore, MigrationDirection, MigrationExecutor,
    MigrationReport, ReconcileRequest, Reconciler, SyncDecision,
};
use crate::utils::clock::{Clock, SystemClock};

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
    /// 是否启用重试
    pub enable_retry: bool,
    /// 最大重试次数
    pub max_retries: u32,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(30),
            request_timeout_secs: Some(300), // 视频上传可能需要较长时间
            enable_retry: true,
            max_retries: 3,
        }
    }
}

/// 本地存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 配额（字节），0 表示未知
    pub quota_bytes: u64,
    /// 淘汰时至少保留的条目数
    pub eviction_min_to_keep: usize,
    /// 超过该天数未访问的条目可被淘汰
    pub eviction_max_age_days: u32,
    /// 存储紧急阈值（百分比，严格大于）
    pub critical_percent: f64,
    /// 免费用户存储警告阈值（百分比，严格大于）
    pub free_warning_percent: f64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            quota_bytes: 0,
            eviction_min_to_keep: 10,
            eviction_max_age_days: 30,
            critical_percent: 90.0,
            free_warning_percent: 70.0,
        }
    }
}

impl StorageConfig {
    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            min_to_keep: self.eviction_min_to_keep,
            max_age_days: self.eviction_max_age_days,
        }
    }

    pub fn thresholds(&self) -> DecisionThresholds {
        DecisionThresholds {
            critical_percent: self.critical_percent,
            free_warning_percent: self.free_warning_percent,
        }
    }
}

/// 任务观察配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobWatchConfig {
    /// 轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 音色任务超时（毫秒）
    pub voice_timeout_ms: u64,
    /// 配音任务超时（毫秒）
    pub dubbing_timeout_ms: u64,
}

impl Default for JobWatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            voice_timeout_ms: JobKind::VOICE_TIMEOUT.as_millis() as u64,
            dubbing_timeout_ms: JobKind::DUBBING_TIMEOUT.as_millis() as u64,
        }
    }
}

impl JobWatchConfig {
    pub fn options(&self, kind: JobKind) -> WatchOptions {
        let timeout_ms = match kind {
            JobKind::Voice => self.voice_timeout_ms,
            JobKind::Dubbing => self.dubbing_timeout_ms,
        };
        WatchOptions::for_kind(kind)
            .with_timeout(Duration::from_millis(timeout_ms))
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
    }
}

/// 横幅配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BannerConfig {
    /// 忽略窗口（秒）
    pub dismiss_window_secs: u64,
    /// 同步完成后自动清除的延迟（毫秒）
    pub sync_complete_clear_ms: u64,
}

impl Default for BannerConfig {
    fn default() -> Self {
        Self {
            dismiss_window_secs: 24 * 60 * 60,
            sync_complete_clear_ms: crate::sync::SYNC_COMPLETE_CLEAR.as_millis() as u64,
        }
    }
}

/// 上传重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 最大重试次数
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

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            base_delay_ms: policy.base_delay_ms,
            max_delay_ms: policy.max_delay_ms,
            backoff_factor: policy.backoff_factor,
            jitter_factor: policy.jitter_factor,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            backoff_factor: config.backoff_factor,
            jitter_factor: config.jitter_factor,
        }
    }
}

/// Studio SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudioConfig {
    /// 数据存储目录（sled 数据库所在目录）
    pub data_dir: PathBuf,
    /// 远端 API 基础 URL
    pub api_base_url: Option<String>,
    /// Bearer token
    pub auth_token: Option<String>,
    /// HTTP 客户端配置
    pub http_client_config: HttpClientConfig,
    /// 本地存储配置
    pub storage_config: StorageConfig,
    /// 任务观察配置
    pub job_watch_config: JobWatchConfig,
    /// 横幅配置
    pub banner_config: BannerConfig,
    /// 上传重试配置
    pub retry_config: RetryConfig,
    /// 事件广播缓冲区大小
    pub event_buffer_size: usize,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            api_base_url: None,
            auth_token: None,
            http_client_config: HttpClientConfig::default(),
            storage_config: StorageConfig::default(),
            job_watch_config: JobWatchConfig::default(),
            banner_config: BannerConfig::default(),
            retry_config: RetryConfig::default(),
            event_buffer_size: 1000,
        }
    }
}

/// 获取默认数据目录 ~/.fennai/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".fennai")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        // Windows 支持
        home_dir.join(".fennai")
    } else {
        PathBuf::from("./fennai_data")
    }
}

/// Studio SDK 配置构建器
pub struct StudioConfigBuilder {
    config: StudioConfig,
}

impl Default for StudioConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StudioConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: StudioConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn api_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.api_base_url = Some(url.into());
        self
    }

    pub fn auth_token<S: Into<String>>(mut self, token: S) -> Self {
        self.config.auth_token = Some(token.into());
        self
    }

    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client_config = config;
        self
    }

    pub fn storage_config(mut self, config: StorageConfig) -> Self {
        self.config.storage_config = config;
        self
    }

    /// 设置配额（字节），0 表示未知
    pub fn quota_bytes(mut self, quota_bytes: u64) -> Self {
        self.config.storage_config.quota_bytes = quota_bytes;
        self
    }

    pub fn job_watch_config(mut self, config: JobWatchConfig) -> Self {
        self.config.job_watch_config = config;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.job_watch_config.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn banner_config(mut self, config: BannerConfig) -> Self {
        self.config.banner_config = config;
        self
    }

    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.config.retry_config = config;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    pub fn build(self) -> StudioConfig {
        self.config
    }
}

impl StudioConfig {
    pub fn builder() -> StudioConfigBuilder {
        StudioConfigBuilder::new()
    }
}

/// 远端协作方集合
#[derive(Clone)]
pub struct RemoteServices {
    pub inventory: Arc<dyn RemoteInventoryEndpoint>,
    pub uploader: Arc<dyn MediaUploadEndpoint>,
    pub downloader: Arc<dyn MediaDownloadEndpoint>,
    pub jobs: Arc<dyn JobStatusSource>,
    pub settings: Arc<dyn JobSettingsEndpoint>,
}

impl RemoteServices {
    /// 全部由同一个 HTTP 客户端提供
    pub fn http(client: HttpStudioClient) -> Self {
        let client = Arc::new(client);
        Self {
            inventory: client.clone(),
            uploader: client.clone(),
            downloader: client.clone(),
            jobs: client.clone(),
            settings: client,
        }
    }

    /// 根据配置创建 HTTP 实现
    pub fn from_config(config: &StudioConfig) -> Result<Self> {
        let base_url = config
            .api_base_url
            .as_ref()
            .ok_or_else(|| StudioSDKError::Config("未配置 api_base_url".to_string()))?;
        let client = HttpStudioClient::new(
            &config.http_client_config,
            base_url.clone(),
            config.auth_token.clone(),
            RetryPolicy::from(&config.retry_config),
        )?;
        Ok(Self::http(client))
    }
}

/// 观察回调转发到 SDK 内部的消息
enum WatchMessage {
    Update(JobStatus),
    Failed(StudioSDKError),
}

/// 横幅状态与代数（用于判断自动清除计时是否过期）
struct BannerCell {
    state: Mutex<BannerState>,
    generation: AtomicU64,
}

impl BannerCell {
    fn new() -> Self {
        Self {
            state: Mutex::new(BannerState::Hidden),
            generation: AtomicU64::new(0),
        }
    }

    /// 应用动作，状态变化时返回 (新状态, 新代数)
    fn apply(&self, action: BannerAction) -> Option<(BannerState, u64)> {
        let mut state = self.state.lock();
        let next = reduce(&state, action);
        if next == *state {
            return None;
        }
        *state = next.clone();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Some((next, generation))
    }

    fn snapshot(&self) -> BannerState {
        self.state.lock().clone()
    }
}

/// Studio SDK 主接口
pub struct StudioSDK {
    /// SDK 配置
    config: StudioConfig,

    clock: Arc<dyn Clock>,

    /// 存储管理器
    storage: Arc<StorageManager>,

    /// 事件管理器
    event_manager: Arc<EventManager>,

    reconciler: Reconciler,

    executor: MigrationExecutor,

    job_channel: JobStatusChannel,

    tracker: Arc<JobTracker>,

    settings: Arc<dyn JobSettingsEndpoint>,

    banner: Arc<BannerCell>,

    /// 活跃的任务观察
    watches: Arc<Mutex<HashMap<String, WatchCanceller>>>,

    /// 关闭时取消后台计时任务
    shutdown_token: CancellationToken,

    /// 是否已初始化
    initialized: Arc<RwLock<bool>>,

    /// 是否正在关闭
    shutting_down: Arc<RwLock<bool>>,
}

impl StudioSDK {
    /// 异步初始化 SDK（系统时钟 + 配置中的配额）
    pub async fn initialize(config: StudioConfig, remote: RemoteServices) -> Result<Arc<Self>> {
        let estimator = Arc::new(ConfiguredQuota::new(config.storage_config.quota_bytes));
        Self::initialize_with(config, remote, Arc::new(SystemClock), estimator).await
    }

    /// 使用指定时钟与配额估算器初始化
    ///
    /// 分层初始化顺序：
    /// 1. 存储层 → 2. 事件层 → 3. 同步层 → 4. 任务观察层
    pub async fn initialize_with(
        config: StudioConfig,
        remote: RemoteServices,
        clock: Arc<dyn Clock>,
        estimator: Arc<dyn StorageEstimator>,
    ) -> Result<Arc<Self>> {
        info!("正在初始化 StudioSDK...");

        // 验证配置
        Self::validate_config(&config)?;

        // === 第1层：存储管理器 ===
        let storage = Arc::new(
            StorageManager::new(
                &config.data_dir,
                clock.clone(),
                estimator,
                config.storage_config.eviction_policy(),
            )
            .await?,
        );
        let prefs: Arc<dyn PreferenceStore> = storage.kv_store();

        // === 第2层：事件管理器 ===
        let event_manager = Arc::new(EventManager::new(config.event_buffer_size));

        // === 第3层：同步层 ===
        let dismissals = DismissalStore::with_window(
            prefs.clone(),
            clock.clone(),
            Duration::from_secs(config.banner_config.dismiss_window_secs),
        );
        let reconciler = Reconciler::new(
            storage.media_store(),
            remote.inventory.clone(),
            dismissals,
            config.storage_config.thresholds(),
        );
        let executor = MigrationExecutor::new(storage.media_store(), remote.uploader.clone(), clock.clone())
            .with_downloader(remote.downloader.clone())
            .with_events(event_manager.clone());

        // === 第4层：任务观察 ===
        let job_channel = JobStatusChannel::new(remote.jobs.clone());
        let tracker = Arc::new(JobTracker::new(prefs, clock.clone()));

        let banner = Arc::new(BannerCell::new());

        // 迁移进度只更新横幅，不额外广播横幅事件
        {
            let banner = banner.clone();
            event_manager
                .add_listener("migration_progress", move |event| {
                    if let SDKEvent::MigrationProgress(progress) = event {
                        banner.apply(BannerAction::MigrationProgressed(progress.clone()));
                    }
                })
                .await;
        }

        let sdk = Arc::new(Self {
            config,
            clock,
            storage,
            event_manager,
            reconciler,
            executor,
            job_channel,
            tracker,
            settings: remote.settings,
            banner,
            watches: Arc::new(Mutex::new(HashMap::new())),
            shutdown_token: CancellationToken::new(),
            initialized: Arc::new(RwLock::new(true)),
            shutting_down: Arc::new(RwLock::new(false)),
        });

        info!("✅ StudioSDK 初始化完成");
        Ok(sdk)
    }

    /// 验证配置
    fn validate_config(config: &StudioConfig) -> Result<()> {
        if config.data_dir.as_os_str().is_empty() {
            return Err(StudioSDKError::Config("数据目录不能为空".to_string()));
        }

        let watch = &config.job_watch_config;
        if watch.poll_interval_ms == 0 {
            return Err(StudioSDKError::Config("轮询间隔不能为0".to_string()));
        }
        if watch.voice_timeout_ms == 0 || watch.dubbing_timeout_ms == 0 {
            return Err(StudioSDKError::Config("任务观察超时不能为0".to_string()));
        }

        let storage = &config.storage_config;
        if !(storage.free_warning_percent < storage.critical_percent && storage.critical_percent <= 100.0) {
            return Err(StudioSDKError::Config(format!(
                "存储阈值无效: free_warning_percent={}, critical_percent={}",
                storage.free_warning_percent, storage.critical_percent
            )));
        }

        if config.event_buffer_size == 0 {
            return Err(StudioSDKError::Config("事件缓冲区大小不能为0".to_string()));
        }

        Ok(())
    }

    async fn ensure_running(&self) -> Result<()> {
        if *self.shutting_down.read().await {
            return Err(StudioSDKError::ShuttingDown("SDK 正在关闭".to_string()));
        }
        if !*self.initialized.read().await {
            return Err(StudioSDKError::NotInitialized("SDK 未初始化".to_string()));
        }
        Ok(())
    }

    /// 应用横幅动作，变化时广播并在同步完成时安排自动清除
    async fn apply_banner(&self, action: BannerAction) -> BannerState {
        let Some((state, generation)) = self.banner.apply(action) else {
            return self.banner.snapshot();
        };
        debug!("横幅状态变更: {}", state.label());

        self.event_manager
            .emit(SDKEvent::BannerStateChanged {
                state: state.clone(),
                timestamp: self.clock.now_millis(),
            })
            .await;

        if matches!(state, BannerState::SyncComplete { .. }) {
            self.schedule_auto_clear(generation);
        }
        state
    }

    fn schedule_auto_clear(&self, generation: u64) {
        let banner = self.banner.clone();
        let events = self.event_manager.clone();
        let clock = self.clock.clone();
        let token = self.shutdown_token.clone();
        let delay = Duration::from_millis(self.config.banner_config.sync_complete_clear_ms);

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    // 期间横幅已变化则放弃
                    if banner.generation.load(Ordering::SeqCst) != generation {
                        return;
                    }
                    if let Some((state, _)) = banner.apply(BannerAction::AutoClearElapsed) {
                        events
                            .emit(SDKEvent::BannerStateChanged {
                                state,
                                timestamp: clock.now_millis(),
                            })
                            .await;
                    }
                }
            }
        });
    }

    // ========== 对账 / 横幅 ==========

    /// 执行一次对账并更新横幅
    pub async fn reconcile(&self, request: &ReconcileRequest) -> Result<SyncDecision> {
        self.ensure_running().await?;

        let decision = self.reconciler.reconcile(request).await;
        self.event_manager
            .emit(SDKEvent::SyncDecisionChanged {
                decision: decision.clone(),
                timestamp: self.clock.now_millis(),
            })
            .await;
        self.apply_banner(BannerAction::DecisionComputed(decision.clone())).await;
        Ok(decision)
    }

    /// 忽略当前角色的横幅（24 小时窗口）
    pub async fn dismiss(&self, owner_id: &str) -> Result<()> {
        self.ensure_running().await?;
        self.reconciler.dismissals().dismiss(owner_id)?;
        self.apply_banner(BannerAction::Dismissed).await;
        Ok(())
    }

    pub fn banner_state(&self) -> BannerState {
        self.banner.snapshot()
    }

    // ========== 迁移 ==========

    /// 上传候选集
    pub async fn run_migration(&self, candidate_set: &[String]) -> Result<MigrationReport> {
        self.migrate(MigrationDirection::Upload, candidate_set).await
    }

    /// 只重跑上一次失败的条目，方向与失败的那次一致
    pub async fn retry_failed(&self) -> Result<MigrationReport> {
        let banner = self.banner.snapshot();
        let (Some(direction), retry_set) = (banner.retry_direction(), banner.retry_set()) else {
            return Err(StudioSDKError::InvalidArgument("没有可重试的条目".to_string()));
        };
        if retry_set.is_empty() {
            return Err(StudioSDKError::InvalidArgument("没有可重试的条目".to_string()));
        }
        info!("重试失败条目: {} 条, direction={:?}", retry_set.len(), direction);
        self.migrate(direction, &retry_set).await
    }

    /// 下载远端独有条目到本地
    pub async fn restore(&self, item_ids: &[String]) -> Result<MigrationReport> {
        self.migrate(MigrationDirection::Download, item_ids).await
    }

    async fn migrate(&self, direction: MigrationDirection, item_ids: &[String]) -> Result<MigrationReport> {
        self.ensure_running().await?;
        self.apply_banner(BannerAction::MigrationStarted {
            direction,
            total: item_ids.len(),
        })
        .await;

        let report = match direction {
            MigrationDirection::Upload => self.executor.run(item_ids).await,
            MigrationDirection::Download => self.executor.restore(item_ids).await,
        };
        self.apply_banner(BannerAction::MigrationFinished(report.clone())).await;
        Ok(report)
    }

    // ========== 本地存储 ==========

    pub fn storage(&self) -> Arc<StorageManager> {
        self.storage.clone()
    }

    pub fn media_store(&self) -> Arc<LocalMediaStore> {
        self.storage.media_store()
    }

    /// 清理云端已备份音色的本地字节
    pub async fn purge_cloud_backed(&self, owner_id: &str) -> Result<EvictionReport> {
        self.ensure_running().await?;
        let report = self.storage.media_store().purge_cloud_backed(owner_id).await?;
        self.emit_eviction(Some(owner_id.to_string()), report).await;
        Ok(report)
    }

    /// 按配置的淘汰策略手动淘汰
    pub async fn evict(&self) -> Result<EvictionReport> {
        self.ensure_running().await?;
        let policy = self.config.storage_config.eviction_policy();
        let report = self
            .storage
            .media_store()
            .evict_oldest(policy.min_to_keep, policy.max_age_days)
            .await?;
        self.emit_eviction(None, report).await;
        Ok(report)
    }

    async fn emit_eviction(&self, owner_id: Option<String>, report: EvictionReport) {
        if report.deleted_count == 0 {
            return;
        }
        self.event_manager
            .emit(SDKEvent::StorageEvicted {
                owner_id,
                report,
                timestamp: self.clock.now_millis(),
            })
            .await;
    }

    // ========== 任务 ==========

    /// 写入配音目标设置
    pub async fn set_target_options(&self, job_id: &str, options: &DubbingTargetOptions) -> Result<()> {
        self.ensure_running().await?;
        if options.target_language.is_empty() {
            return Err(StudioSDKError::InvalidArgument("target_language 不能为空".to_string()));
        }
        self.settings.update_target_options(job_id, options).await
    }

    /// 记录新提交的任务并开始观察
    pub async fn track_job(&self, job_id: &str, kind: JobKind) -> Result<JobWatchHandle> {
        self.ensure_running().await?;
        self.tracker.begin(job_id, kind)?;
        self.watch_job(job_id, kind).await
    }

    /// 观察任务，状态通过 `JobStatusUpdated` / `JobWatchFailed` 事件发布
    pub async fn watch_job(&self, job_id: &str, kind: JobKind) -> Result<JobWatchHandle> {
        self.ensure_running().await?;

        if let Some(previous) = self.watches.lock().remove(job_id) {
            debug!("替换已有的任务观察: job_id={}", job_id);
            previous.cancel();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let update_tx = tx.clone();
        let error_tx = tx;
        let handle = self.job_channel.watch(
            job_id,
            move |status| {
                let _ = update_tx.send(WatchMessage::Update(status));
            },
            move |error| {
                let _ = error_tx.send(WatchMessage::Failed(error));
            },
            self.config.job_watch_config.options(kind),
        );

        self.watches.lock().insert(job_id.to_string(), handle.canceller());
        tokio::spawn(forward_watch_messages(
            job_id.to_string(),
            rx,
            self.tracker.clone(),
            self.event_manager.clone(),
            self.clock.clone(),
            self.watches.clone(),
            handle.canceller(),
        ));

        Ok(handle)
    }

    /// 页面重载后恢复观察上次未结束的任务
    pub async fn resume_pending_job(&self) -> Result<Option<JobWatchHandle>> {
        match self.tracker.pending()? {
            Some(breadcrumb) => {
                info!("恢复观察未结束的任务: job_id={}", breadcrumb.job_id);
                Ok(Some(self.watch_job(&breadcrumb.job_id, breadcrumb.kind).await?))
            }
            None => Ok(None),
        }
    }

    pub fn pending_job(&self) -> Result<Option<ActiveJobBreadcrumb>> {
        self.tracker.pending()
    }

    // ========== 事件 ==========

    pub fn subscribe(&self) -> broadcast::Receiver<SDKEvent> {
        self.event_manager.subscribe()
    }

    pub fn event_manager(&self) -> Arc<EventManager> {
        self.event_manager.clone()
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    // ========== 生命周期 ==========

    /// 异步关闭 SDK
    pub async fn shutdown(&self) -> Result<()> {
        info!("正在关闭 StudioSDK...");

        {
            let mut shutting_down = self.shutting_down.write().await;
            *shutting_down = true;
        }

        self.shutdown_token.cancel();

        let watches: Vec<WatchCanceller> = self.watches.lock().drain().map(|(_, c)| c).collect();
        for canceller in watches {
            canceller.cancel();
        }

        if let Err(e) = self.storage.flush().await {
            error!("关闭时刷盘失败: {}", e);
        }

        {
            let mut initialized = self.initialized.write().await;
            *initialized = false;
        }

        info!("StudioSDK 关闭完成");
        Ok(())
    }

    /// 检查 SDK 是否已初始化
    pub async fn is_initialized(&self) -> bool {
        *self.initialized.read().await
    }

    /// 检查 SDK 是否正在关闭
    pub async fn is_shutting_down(&self) -> bool {
        *self.shutting_down.read().await
    }
}

/// 把观察回调转成面包屑更新与事件，观察结束（回调被释放）后退出
async fn forward_watch_messages(
    job_id: String,
    mut rx: mpsc::UnboundedReceiver<WatchMessage>,
    tracker: Arc<JobTracker>,
    events: Arc<EventManager>,
    clock: Arc<dyn Clock>,
    watches: Arc<Mutex<HashMap<String, WatchCanceller>>>,
    canceller: WatchCanceller,
) {
    while let Some(message) = rx.recv().await {
        match message {
            WatchMessage::Update(status) => {
                if let Err(e) = tracker.record(&status) {
                    warn!("更新任务面包屑失败: job_id={}, error={}", job_id, e);
                }
                events.emit(SDKEvent::JobStatusUpdated(status)).await;
            }
            WatchMessage::Failed(error) => {
                warn!("任务观察失败: job_id={}, error={}", job_id, error);
                events
                    .emit(SDKEvent::JobWatchFailed {
                        job_id: job_id.clone(),
                        message: error.to_string(),
                        timed_out: error.is_timeout(),
                        timestamp: clock.now_millis(),
                    })
                    .await;
            }
        }
    }

    // 只移除自己登记的观察，避免误删同一任务的新观察
    let mut watches = watches.lock();
    if watches.get(&job_id).map(|c| c.same_watch(&canceller)).unwrap_or(false) {
        watches.remove(&job_id);
    }
    debug!("任务观察结束: job_id={}", job_id);
}

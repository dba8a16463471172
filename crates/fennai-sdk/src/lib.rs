//! Fennai SDK - 媒体工作室客户端 SDK
//!
//! 本 SDK 负责本地 / 云端媒体（克隆音色与配音视频）的对账与同步：
//! - 💾 本地媒体库：sled 持久化原始字节，配额感知，最久未访问优先淘汰
//! - 🧭 同步对账：按会员等级、同步开关、存储压力得出唯一的横幅状态
//! - 🚚 迁移执行：逐条上传 / 恢复，部分失败只重试失败子集
//! - 📡 任务观察：推送优先，失败后降级为轮询，带超时
//! - ⚙️ 事件系统：类型化事件广播与监听
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use fennai_sdk::{ReconcileRequest, RemoteServices, StudioConfig, StudioSDK, SyncState, UserTier};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StudioConfig::builder()
//!         .data_dir("/path/to/data")
//!         .api_base_url("https://studio.example.com/api")
//!         .auth_token("token")
//!         .build();
//!
//!     let remote = RemoteServices::from_config(&config)?;
//!     let sdk = StudioSDK::initialize(config, remote).await?;
//!
//!     let decision = sdk
//!         .reconcile(&ReconcileRequest::new("character-1", UserTier::Pro, true))
//!         .await?;
//!     if decision.state == SyncState::ProSyncNeeded {
//!         let report = sdk.run_migration(&decision.candidate_set).await?;
//!         println!("成功 {} 条，失败 {} 条", report.succeeded_count(), report.failed_count());
//!     }
//!
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod error;
pub mod events;
pub mod http_client;
pub mod job;
pub mod remote;
pub mod retry_policy;
pub mod sdk;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod version;

// 重新导出核心类型，方便使用
pub use error::{Result, StudioSDKError};
pub use events::{EventFilter, EventManager, EventStats, FilteredEventReceiver, SDKEvent};
pub use http_client::HttpStudioClient;
pub use job::{
    ActiveJobBreadcrumb, DubbingStage, JobKind, JobPhase, JobStatus, JobStatusChannel, JobTracker, JobWatchHandle,
    WatchOptions,
};
pub use remote::{
    DownloadedMedia, DubbingTargetOptions, JobSettingsEndpoint, JobStatusSource, MediaDownloadEndpoint,
    MediaUploadEndpoint, RemoteInventoryEndpoint, RemoteInventorySnapshot, UploadReceipt, UploadRequest,
};
pub use retry_policy::{RetryPolicy, UploadFailureReason};
pub use sdk::{
    BannerConfig, HttpClientConfig, JobWatchConfig, RemoteServices, RetryConfig, StorageConfig, StudioConfig,
    StudioConfigBuilder, StudioSDK,
};
pub use storage::{
    CloudState, EvictionPolicy, EvictionReport, LocalInventory, LocalMediaRecord, LocalMediaStore, MediaKind,
    MediaPayload, MediaQuery, MediaRecordInfo, MediaStats, QuotaEstimate, StorageManager,
};
pub use sync::{
    BannerAction, BannerState, MigrationExecutor, MigrationOutcome, MigrationReport, ReconcileRequest, Reconciler,
    SyncDecision, SyncState, UserTier,
};
pub use utils::{Clock, ManualClock, SystemClock};
pub use version::{BUILD_TIME, GIT_SHA, SDK_VERSION};

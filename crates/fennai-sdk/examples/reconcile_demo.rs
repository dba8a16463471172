use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fennai_sdk::{
    error::Result, DownloadedMedia, DubbingTargetOptions, JobKind, JobPhase, JobSettingsEndpoint, JobStatus,
    JobStatusSource, LocalMediaRecord, MediaDownloadEndpoint, MediaKind, MediaPayload, MediaUploadEndpoint,
    ReconcileRequest, RemoteInventoryEndpoint, RemoteInventorySnapshot, RemoteServices, SDKEvent, StudioConfig,
    StudioSDK, StudioSDKError, UploadReceipt, UploadRequest, UserTier,
};
use futures::stream::BoxStream;
use tracing::{info, warn};

// ========== 内存版远端服务 ==========

struct DemoInventory;

#[async_trait]
impl RemoteInventoryEndpoint for DemoInventory {
    async fn fetch_inventory(&self, owner_id: &str) -> Result<RemoteInventorySnapshot> {
        Ok(RemoteInventorySnapshot::from_ids(owner_id, vec!["voice-remote".to_string()], Vec::new()))
    }
}

/// 第一次上传 `flaky` 列表中的条目会失败
struct DemoUploader {
    flaky: parking_lot::Mutex<HashSet<String>>,
}

#[async_trait]
impl MediaUploadEndpoint for DemoUploader {
    async fn upload(&self, request: UploadRequest) -> Result<UploadReceipt> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if self.flaky.lock().remove(&request.item_id) {
            return Err(StudioSDKError::Http {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        Ok(UploadReceipt::ok())
    }
}

struct DemoDownloader;

#[async_trait]
impl MediaDownloadEndpoint for DemoDownloader {
    async fn download(&self, item_id: &str) -> Result<DownloadedMedia> {
        Ok(DownloadedMedia {
            item_id: item_id.to_string(),
            owner_id: "character-1".to_string(),
            kind: MediaKind::Voice,
            payload: MediaPayload::new(vec![0u8; 2048], "audio/wav"),
        })
    }
}

/// 推送不可用，轮询三次后完成
#[derive(Default)]
struct DemoJobs {
    polls: AtomicUsize,
}

#[async_trait]
impl JobStatusSource for DemoJobs {
    async fn subscribe(&self, _job_id: &str, _kind: JobKind) -> Result<BoxStream<'static, Result<JobStatus>>> {
        Err(StudioSDKError::Transport("push channel unavailable".to_string()))
    }

    async fn fetch(&self, job_id: &str, _kind: JobKind) -> Result<Option<JobStatus>> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst);
        let phase = if n >= 2 { JobPhase::Completed } else { JobPhase::Processing };
        Ok(Some(JobStatus::new(job_id, phase).with_progress(((n.min(2) + 1) * 33) as u8)))
    }
}

struct DemoSettings;

#[async_trait]
impl JobSettingsEndpoint for DemoSettings {
    async fn update_target_options(&self, job_id: &str, options: &DubbingTargetOptions) -> Result<()> {
        info!("设置任务 {} 目标语言: {}", job_id, options.target_language);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let data_dir = tempfile::tempdir()?;
    let config = StudioConfig::builder()
        .data_dir(data_dir.path())
        .quota_bytes(64 * 1024 * 1024)
        .poll_interval(Duration::from_millis(500))
        .build();

    let remote = RemoteServices {
        inventory: Arc::new(DemoInventory),
        uploader: Arc::new(DemoUploader {
            flaky: parking_lot::Mutex::new(HashSet::from(["voice-2".to_string()])),
        }),
        downloader: Arc::new(DemoDownloader),
        jobs: Arc::new(DemoJobs::default()),
        settings: Arc::new(DemoSettings),
    };
    let sdk = StudioSDK::initialize(config, remote).await?;

    let mut events = sdk.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SDKEvent::MigrationProgress(p) => {
                    info!("📦 迁移进度 {:.0}% ({}/{})", p.percent_complete, p.succeeded + p.failed, p.total)
                }
                SDKEvent::BannerStateChanged { state, .. } => info!("🏷️ 横幅: {}", state.label()),
                SDKEvent::JobStatusUpdated(status) => {
                    info!("🎬 任务 {}: {} {:?}%", status.job_id, status.phase.as_str(), status.progress)
                }
                SDKEvent::JobWatchFailed { job_id, message, .. } => warn!("任务 {} 观察失败: {}", job_id, message),
                _ => {}
            }
        }
    });

    // 1. 写入本地音色
    for id in ["voice-1", "voice-2", "voice-3"] {
        let record = LocalMediaRecord::new(
            id,
            "character-1",
            MediaKind::Voice,
            MediaPayload::new(vec![1u8; 4096], "audio/webm"),
        );
        sdk.media_store().put(record).await?;
    }

    // 2. 对账
    let request = ReconcileRequest::new("character-1", UserTier::Pro, true);
    let decision = sdk.reconcile(&request).await?;
    info!("对账结果: {} 候选 {:?}", decision.state.as_str(), decision.candidate_set);

    // 3. 迁移，voice-2 第一次会失败
    let report = sdk.run_migration(&decision.candidate_set).await?;
    info!("迁移结果: {:?}, 重试集 {:?}", report.outcome(), report.retry_set());

    // 4. 只重试失败条目
    let retry = sdk.retry_failed().await?;
    info!("重试结果: {:?}", retry.outcome());

    // 5. 恢复远端独有的音色
    let restored = sdk.restore(&decision.remote_only).await?;
    info!("恢复结果: 成功 {} 条", restored.succeeded_count());

    // 6. 观察配音任务（推送不可用，自动降级为轮询）
    let handle = sdk.track_job("job-demo", JobKind::Dubbing).await?;
    handle.join().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!("未结束任务: {:?}", sdk.pending_job()?);

    // 等待横幅自动清除
    tokio::time::sleep(Duration::from_millis(3_200)).await;
    info!("最终横幅: {}", sdk.banner_state().label());

    sdk.shutdown().await?;
    Ok(())
}

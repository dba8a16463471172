/// 迁移执行器
///
/// 职责：
/// - 按候选集顺序逐条上传本地媒体（上一条结果记录后才开始下一条）
/// - 单条失败不中断，汇总成功 / 失败 / 跳过
/// - 每条处理后广播进度并让出执行权
/// - 上传成功的音色标记为云端已备份
/// - 反向恢复：下载远端独有条目写回本地媒体库

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{Result, StudioSDKError};
use crate::events::{EventManager, SDKEvent};
use crate::remote::{MediaDownloadEndpoint, MediaUploadEndpoint, UploadRequest};
use crate::storage::entities::{CloudState, LocalMediaRecord};
use crate::storage::LocalMediaStore;
use crate::utils::clock::Clock;

/// 迁移方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationDirection {
    /// 本地 -> 云端
    Upload,
    /// 云端 -> 本地
    Download,
}

/// 单条失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationFailure {
    pub item_id: String,
    pub message: String,
}

/// 进度信号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationProgress {
    pub direction: MigrationDirection,
    /// 刚处理完的条目
    pub item_id: String,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
    /// (succeeded + failed) / total * 100
    ///
    /// 跳过的条目不计入，有跳过时最后一次进度低于 100；结束以 `MigrationFinished` 为准
    pub percent_complete: f64,
}

/// 最终分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// 没有失败条目
    Complete,
    /// 有失败且没有成功
    AllFailed,
    /// 成功与失败并存
    Partial,
}

/// 一次迁移的汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub direction: MigrationDirection,
    pub total: usize,
    pub succeeded: Vec<String>,
    pub failed: Vec<MigrationFailure>,
    /// 本地缺少内容（上传）或本地已存在（下载）
    pub skipped: Vec<String>,
}

impl MigrationReport {
    fn new(direction: MigrationDirection, total: usize) -> Self {
        Self {
            direction,
            total,
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn outcome(&self) -> MigrationOutcome {
        match (self.succeeded.is_empty(), self.failed.is_empty()) {
            (_, true) => MigrationOutcome::Complete,
            (true, false) => MigrationOutcome::AllFailed,
            (false, false) => MigrationOutcome::Partial,
        }
    }

    /// 重试只针对原本失败的条目，保持原顺序
    pub fn retry_set(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.item_id.clone()).collect()
    }

    /// 有跳过条目时小于 100
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.succeeded.len() + self.failed.len()) as f64 / self.total as f64 * 100.0
    }

    /// 第一条失败信息，用于横幅提示
    pub fn first_error(&self) -> Option<&str> {
        self.failed.first().map(|f| f.message.as_str())
    }

    fn progress(&self, item_id: &str) -> MigrationProgress {
        MigrationProgress {
            direction: self.direction,
            item_id: item_id.to_string(),
            succeeded: self.succeeded.len(),
            failed: self.failed.len(),
            skipped: self.skipped.len(),
            total: self.total,
            percent_complete: self.percent_complete(),
        }
    }
}

/// 单条处理结果
enum ItemOutcome {
    Succeeded,
    Skipped,
    Failed(String),
}

/// 迁移执行器
pub struct MigrationExecutor {
    media: Arc<LocalMediaStore>,
    uploader: Arc<dyn MediaUploadEndpoint>,
    downloader: Option<Arc<dyn MediaDownloadEndpoint>>,
    events: Option<Arc<EventManager>>,
    clock: Arc<dyn Clock>,
    /// 同一时刻只允许一次迁移
    run_lock: Mutex<()>,
}

impl MigrationExecutor {
    pub fn new(media: Arc<LocalMediaStore>, uploader: Arc<dyn MediaUploadEndpoint>, clock: Arc<dyn Clock>) -> Self {
        Self {
            media,
            uploader,
            downloader: None,
            events: None,
            clock,
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_downloader(mut self, downloader: Arc<dyn MediaDownloadEndpoint>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn with_events(mut self, events: Arc<EventManager>) -> Self {
        self.events = Some(events);
        self
    }

    /// 上传候选集
    ///
    /// 不返回错误：每条的异常都记入报告，循环总会跑完整个候选集。
    pub async fn run(&self, candidate_set: &[String]) -> MigrationReport {
        let _guard = self.run_lock.lock().await;
        info!("开始上传迁移: {} 条", candidate_set.len());

        let mut report = MigrationReport::new(MigrationDirection::Upload, candidate_set.len());
        for item_id in candidate_set {
            let outcome = self.upload_one(item_id).await;
            self.record(&mut report, item_id, outcome).await;
        }

        self.finish(report).await
    }

    /// 下载远端独有条目写入本地
    pub async fn restore(&self, item_ids: &[String]) -> MigrationReport {
        let _guard = self.run_lock.lock().await;
        info!("开始恢复下载: {} 条", item_ids.len());

        let mut report = MigrationReport::new(MigrationDirection::Download, item_ids.len());
        for item_id in item_ids {
            let outcome = match self.downloader {
                Some(ref downloader) => self.download_one(downloader.as_ref(), item_id).await,
                None => ItemOutcome::Failed(StudioSDKError::NotInitialized("下载端点未配置".into()).to_string()),
            };
            self.record(&mut report, item_id, outcome).await;
        }

        self.finish(report).await
    }

    async fn upload_one(&self, item_id: &str) -> ItemOutcome {
        let record = match self.media.get(item_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("本地无内容，跳过: {}", item_id);
                return ItemOutcome::Skipped;
            }
            Err(e) => {
                error!("读取本地媒体失败: {}: {}", item_id, e);
                return ItemOutcome::Failed(e.to_string());
            }
        };

        let kind = record.kind;
        let request = UploadRequest {
            item_id: record.id,
            owner_id: record.owner_id,
            kind,
            payload: record.payload,
        };

        match self.uploader.upload(request).await {
            Ok(receipt) if receipt.success => {
                if kind.is_voice() {
                    if let Err(e) = self.media.set_cloud_state(item_id, CloudState::Cloud).await {
                        warn!("上传成功但标记云端状态失败: {}: {}", item_id, e);
                    }
                }
                ItemOutcome::Succeeded
            }
            Ok(receipt) => {
                let message = receipt.message.unwrap_or_else(|| "上传被拒绝".to_string());
                warn!("上传被拒绝: {}: {}", item_id, message);
                ItemOutcome::Failed(message)
            }
            Err(e) => {
                warn!("上传失败: {}: {}", item_id, e);
                ItemOutcome::Failed(e.to_string())
            }
        }
    }

    async fn download_one(&self, downloader: &dyn MediaDownloadEndpoint, item_id: &str) -> ItemOutcome {
        match self.media.has_payload(item_id) {
            Ok(true) => {
                debug!("本地已存在，跳过: {}", item_id);
                return ItemOutcome::Skipped;
            }
            Ok(false) => {}
            Err(e) => return ItemOutcome::Failed(e.to_string()),
        }

        match self.store_download(downloader, item_id).await {
            Ok(()) => ItemOutcome::Succeeded,
            Err(e) => {
                warn!("恢复失败: {}: {}", item_id, e);
                ItemOutcome::Failed(e.to_string())
            }
        }
    }

    async fn store_download(&self, downloader: &dyn MediaDownloadEndpoint, item_id: &str) -> Result<()> {
        let downloaded = downloader.download(item_id).await?;
        let cloud_state = if downloaded.kind.is_voice() {
            CloudState::Cloud
        } else {
            CloudState::LocalOnly
        };
        let record = LocalMediaRecord::new(
            downloaded.item_id,
            downloaded.owner_id,
            downloaded.kind,
            downloaded.payload,
        )
        .with_cloud_state(cloud_state);
        self.media.put(record).await
    }

    async fn record(&self, report: &mut MigrationReport, item_id: &str, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Succeeded => report.succeeded.push(item_id.to_string()),
            ItemOutcome::Skipped => report.skipped.push(item_id.to_string()),
            ItemOutcome::Failed(message) => report.failed.push(MigrationFailure {
                item_id: item_id.to_string(),
                message,
            }),
        }

        let progress = report.progress(item_id);
        debug!(
            "迁移进度: {}/{} 成功={} 失败={} 跳过={}",
            progress.succeeded + progress.failed + progress.skipped,
            progress.total,
            progress.succeeded,
            progress.failed,
            progress.skipped
        );
        if let Some(ref events) = self.events {
            events.emit(SDKEvent::MigrationProgress(progress)).await;
        }

        tokio::task::yield_now().await;
    }

    async fn finish(&self, report: MigrationReport) -> MigrationReport {
        let outcome = report.outcome();
        info!(
            "迁移结束: direction={:?}, outcome={:?}, 成功={}, 失败={}, 跳过={}",
            report.direction,
            outcome,
            report.succeeded_count(),
            report.failed_count(),
            report.skipped_count()
        );
        if let Some(ref events) = self.events {
            events
                .emit(SDKEvent::MigrationFinished {
                    report: report.clone(),
                    outcome,
                    timestamp: self.clock.now_millis(),
                })
                .await;
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::{FakeDownloader, FakeUploader};
    use crate::storage::entities::{MediaKind, MediaPayload};
    use crate::storage::quota::UnsupportedEstimator;
    use crate::storage::EvictionPolicy;
    use crate::utils::clock::ManualClock;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        media: Arc<LocalMediaStore>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = sled::open(dir.path().join("db")).unwrap();
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let media = LocalMediaStore::new(&db, clock.clone(), Arc::new(UnsupportedEstimator), EvictionPolicy::default())
            .unwrap();
        Fixture {
            _dir: dir,
            clock,
            media: Arc::new(media),
        }
    }

    async fn seed(media: &LocalMediaStore, ids: &[&str], kind: MediaKind) {
        for id in ids {
            media
                .put(LocalMediaRecord::new(*id, "char-1", kind, MediaPayload::new(vec![1u8; 32], "audio/wav")))
                .await
                .unwrap();
        }
    }

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_one_failing_item_does_not_stop_the_batch() {
        let fx = fixture();
        seed(&fx.media, &["i1", "i2", "i3", "i4"], MediaKind::Voice).await;
        let uploader = Arc::new(FakeUploader::erroring_on(&["i2"]));
        let executor = MigrationExecutor::new(fx.media.clone(), uploader.clone(), fx.clock.clone());

        let report = executor.run(&ids(&["i1", "i2", "i3", "i4"])).await;

        assert_eq!(report.succeeded_count(), 3);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.outcome(), MigrationOutcome::Partial);
        assert_eq!(report.retry_set(), ids(&["i2"]));
        assert_eq!(uploader.uploaded(), ids(&["i1", "i3", "i4"]));
    }

    #[tokio::test]
    async fn test_missing_payload_is_skipped_and_accounted() {
        let fx = fixture();
        seed(&fx.media, &["a", "b"], MediaKind::Voice).await;
        let executor = MigrationExecutor::new(fx.media.clone(), Arc::new(FakeUploader::default()), fx.clock.clone());

        let report = executor.run(&ids(&["a", "ghost", "b"])).await;

        assert_eq!(report.skipped, ids(&["ghost"]));
        assert_eq!(report.succeeded_count() + report.failed_count() + report.skipped_count(), report.total);
        assert_eq!(report.outcome(), MigrationOutcome::Complete);
        assert!((report.percent_complete() - 200.0 / 3.0).abs() < 1e-9);
        assert!(report.percent_complete() < 100.0);
    }

    #[tokio::test]
    async fn test_rejected_receipt_counts_as_failure() {
        let fx = fixture();
        seed(&fx.media, &["a"], MediaKind::DubbingOriginal).await;
        let uploader = FakeUploader::default();
        uploader.rejecting.lock().insert("a".to_string());
        let executor = MigrationExecutor::new(fx.media.clone(), Arc::new(uploader), fx.clock.clone());

        let report = executor.run(&ids(&["a"])).await;

        assert_eq!(report.outcome(), MigrationOutcome::AllFailed);
        assert_eq!(report.first_error(), Some("quota exceeded"));
    }

    #[tokio::test]
    async fn test_successful_voice_upload_marks_cloud_state() {
        let fx = fixture();
        seed(&fx.media, &["v"], MediaKind::Voice).await;
        seed(&fx.media, &["d"], MediaKind::DubbingOriginal).await;
        let executor = MigrationExecutor::new(fx.media.clone(), Arc::new(FakeUploader::default()), fx.clock.clone());

        executor.run(&ids(&["v", "d"])).await;

        assert_eq!(fx.media.get("v").await.unwrap().unwrap().cloud_state, CloudState::Cloud);
        assert_eq!(fx.media.get("d").await.unwrap().unwrap().cloud_state, CloudState::LocalOnly);
    }

    #[tokio::test]
    async fn test_progress_events_follow_each_item() {
        let fx = fixture();
        seed(&fx.media, &["a", "b"], MediaKind::Voice).await;
        let events = Arc::new(EventManager::new(32));
        let mut receiver = events.subscribe();
        let executor = MigrationExecutor::new(fx.media.clone(), Arc::new(FakeUploader::erroring_on(&["b"])), fx.clock.clone())
            .with_events(events.clone());

        executor.run(&ids(&["a", "b"])).await;

        let mut percents = Vec::new();
        let mut finished = None;
        while let Ok(event) = receiver.try_recv() {
            match event {
                SDKEvent::MigrationProgress(p) => percents.push(p.percent_complete),
                SDKEvent::MigrationFinished { outcome, .. } => finished = Some(outcome),
                _ => {}
            }
        }
        assert_eq!(percents, vec![50.0, 100.0]);
        assert_eq!(finished, Some(MigrationOutcome::Partial));
    }

    #[tokio::test]
    async fn test_empty_candidate_set_is_complete() {
        let fx = fixture();
        let executor = MigrationExecutor::new(fx.media.clone(), Arc::new(FakeUploader::default()), fx.clock.clone());
        let report = executor.run(&[]).await;
        assert_eq!(report.total, 0);
        assert_eq!(report.outcome(), MigrationOutcome::Complete);
    }

    #[tokio::test]
    async fn test_restore_writes_downloaded_items() {
        let fx = fixture();
        seed(&fx.media, &["have"], MediaKind::Voice).await;
        let downloader = Arc::new(FakeDownloader::default());
        downloader.add("r1", "char-1", MediaKind::Voice, vec![9u8; 16]);
        let executor = MigrationExecutor::new(fx.media.clone(), Arc::new(FakeUploader::default()), fx.clock.clone())
            .with_downloader(downloader);

        let report = executor.restore(&ids(&["have", "r1", "gone"])).await;

        assert_eq!(report.direction, MigrationDirection::Download);
        assert_eq!(report.skipped, ids(&["have"]));
        assert_eq!(report.succeeded, ids(&["r1"]));
        assert_eq!(report.retry_set(), ids(&["gone"]));
        let restored = fx.media.get("r1").await.unwrap().unwrap();
        assert_eq!(restored.payload.bytes.as_ref(), &[9u8; 16]);
        assert_eq!(restored.cloud_state, CloudState::Cloud);
    }

    #[tokio::test]
    async fn test_restore_without_downloader_fails_every_item() {
        let fx = fixture();
        let executor = MigrationExecutor::new(fx.media.clone(), Arc::new(FakeUploader::default()), fx.clock.clone());
        let report = executor.restore(&ids(&["x", "y"])).await;
        assert_eq!(report.outcome(), MigrationOutcome::AllFailed);
        assert_eq!(report.failed_count(), 2);
    }
}

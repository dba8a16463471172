//! 远端任务模块
//!
//! 职责：
//! - 远端任务文档到 `JobStatus` 的只读映射
//! - 单个任务的推送/轮询观察（`channel`）
//! - 进行中任务面包屑的持久化与恢复（`tracker`）

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod channel;
pub mod tracker;

pub use channel::{JobStatusChannel, JobWatchHandle, WatchCanceller, WatchOptions};
pub use tracker::{ActiveJobBreadcrumb, JobTracker};

/// 任务阶段（queued → processing → [retrying] → completed | failed）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Processing,
    Retrying,
    Completed,
    Failed,
}

impl JobPhase {
    /// 终态之后不会再有更新
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed)
    }

    /// 远端状态字符串映射；未知状态返回 None
    pub fn from_remote_status(status: &str) -> Option<Self> {
        let phase = match status {
            "pending" | "queued" | "uploading" => JobPhase::Queued,
            "processing" | "chunk_completed" | "extracting" | "transcribing"
            | "transcribing_done" | "translating" | "cloning" | "merging" => JobPhase::Processing,
            "retrying" => JobPhase::Retrying,
            "completed" => JobPhase::Completed,
            "failed" | "expired" => JobPhase::Failed,
            _ => return None,
        };
        Some(phase)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Queued => "queued",
            JobPhase::Processing => "processing",
            JobPhase::Retrying => "retrying",
            JobPhase::Completed => "completed",
            JobPhase::Failed => "failed",
        }
    }
}

/// 配音流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DubbingStage {
    Uploading,
    Extracting,
    Transcribing,
    Translating,
    Cloning,
    Merging,
    Done,
}

impl DubbingStage {
    pub fn from_remote_status(status: &str) -> Option<Self> {
        match status {
            "pending" | "queued" | "uploading" => Some(DubbingStage::Uploading),
            "extracting" => Some(DubbingStage::Extracting),
            "transcribing" | "transcribing_done" => Some(DubbingStage::Transcribing),
            "translating" => Some(DubbingStage::Translating),
            "cloning" | "chunk_completed" => Some(DubbingStage::Cloning),
            "merging" => Some(DubbingStage::Merging),
            "completed" => Some(DubbingStage::Done),
            _ => None,
        }
    }
}

/// 任务类别，决定观察超时上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// 单条音色克隆
    Voice,
    /// 多阶段配音流水线
    Dubbing,
}

impl JobKind {
    pub const VOICE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
    pub const DUBBING_TIMEOUT: Duration = Duration::from_secs(30 * 60);

    pub fn default_timeout(&self) -> Duration {
        match self {
            JobKind::Voice => Self::VOICE_TIMEOUT,
            JobKind::Dubbing => Self::DUBBING_TIMEOUT,
        }
    }
}

/// 客户端持有的任务状态只读镜像
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub phase: JobPhase,
    /// 远端原始状态字符串
    pub raw_status: String,
    pub stage: Option<DubbingStage>,
    /// 0-100
    pub progress: Option<u8>,
    pub step: Option<String>,
    pub error: Option<String>,
    pub completed_chunks: Option<u32>,
    pub total_chunks: Option<u32>,
    pub retry_count: u32,
    /// 结果位置（音频或视频）
    pub result_url: Option<String>,
}

impl JobStatus {
    pub fn new(job_id: impl Into<String>, phase: JobPhase) -> Self {
        Self {
            job_id: job_id.into(),
            phase,
            raw_status: phase.as_str().to_string(),
            stage: None,
            progress: None,
            step: None,
            error: None,
            completed_chunks: None,
            total_chunks: None,
            retry_count: 0,
            result_url: None,
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// 远端任务文档（只读字段）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteJobDocument {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub completed_chunks: Option<u32>,
    #[serde(default)]
    pub total_chunks: Option<u32>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
}

impl RemoteJobDocument {
    /// 映射为 `JobStatus`；未知状态按处理中对待
    pub fn into_status(self, job_id: &str, kind: Option<JobKind>) -> JobStatus {
        let phase = JobPhase::from_remote_status(&self.status).unwrap_or_else(|| {
            tracing::debug!("未知任务状态 {:?}，按处理中对待: job_id={}", self.status, job_id);
            JobPhase::Processing
        });
        let stage = match kind {
            Some(JobKind::Dubbing) => DubbingStage::from_remote_status(&self.status),
            _ => None,
        };
        let progress = self
            .progress
            .filter(|p| p.is_finite())
            .map(|p| p.clamp(0.0, 100.0).round() as u8);

        JobStatus {
            job_id: job_id.to_string(),
            phase,
            raw_status: self.status,
            stage,
            progress,
            step: self.step,
            error: self.error.or(self.last_error),
            completed_chunks: self.completed_chunks,
            total_chunks: self.total_chunks,
            retry_count: self.retry_count.unwrap_or(0),
            result_url: self.video_url.or(self.audio_url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_status_vocabulary() {
        for status in ["pending", "queued", "uploading"] {
            assert_eq!(JobPhase::from_remote_status(status), Some(JobPhase::Queued));
        }
        for status in ["chunk_completed", "transcribing_done", "merging", "cloning"] {
            assert_eq!(JobPhase::from_remote_status(status), Some(JobPhase::Processing));
        }
        assert_eq!(JobPhase::from_remote_status("retrying"), Some(JobPhase::Retrying));
        assert_eq!(JobPhase::from_remote_status("expired"), Some(JobPhase::Failed));
        assert_eq!(JobPhase::from_remote_status("healthy"), None);
        assert!(JobPhase::Completed.is_terminal());
        assert!(!JobPhase::Retrying.is_terminal());
    }

    #[test]
    fn test_document_mapping() {
        let doc: RemoteJobDocument = serde_json::from_value(serde_json::json!({
            "status": "translating",
            "progress": 42.6,
            "lastError": "chunk 3 retry",
            "completedChunks": 2,
            "totalChunks": 5,
            "retryCount": 1
        }))
        .unwrap();

        let status = doc.into_status("job-1", Some(JobKind::Dubbing));
        assert_eq!(status.phase, JobPhase::Processing);
        assert_eq!(status.stage, Some(DubbingStage::Translating));
        assert_eq!(status.progress, Some(43));
        assert_eq!(status.error.as_deref(), Some("chunk 3 retry"));
        assert_eq!(status.total_chunks, Some(5));
        assert_eq!(status.retry_count, 1);
    }

    #[test]
    fn test_voice_document_has_no_stage() {
        let doc: RemoteJobDocument = serde_json::from_value(serde_json::json!({
            "status": "completed",
            "audioUrl": "https://cdn.example/v.wav",
            "progress": 150
        }))
        .unwrap();
        let status = doc.into_status("v", Some(JobKind::Voice));
        assert!(status.is_terminal());
        assert_eq!(status.stage, None);
        assert_eq!(status.progress, Some(100));
        assert_eq!(status.result_url.as_deref(), Some("https://cdn.example/v.wav"));
    }

    #[test]
    fn test_dubbing_needs_longer_ceiling() {
        assert!(JobKind::Dubbing.default_timeout() > JobKind::Voice.default_timeout());
    }
}

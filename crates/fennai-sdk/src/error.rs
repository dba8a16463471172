use thiserror::Error;

#[derive(Debug, Error)]
pub enum StudioSDKError {
    /// 本地存储空间不足（已尝试过一次淘汰）
    #[error("Storage full: required {required} bytes, available {available} bytes")]
    StorageFull { required: u64, available: u64 },
    #[error("Empty payload: {0}")]
    EmptyPayload(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("KV store error: {0}")]
    KvStore(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    IO(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("HTTP error [{status}]: {message}")]
    Http { status: u16, message: String },
    /// 任务在超时上限内未进入终态（与任务自身报告的失败区分）
    #[error("Job {job_id} did not reach a terminal phase within {timeout_ms} ms")]
    JobWatchTimeout { job_id: String, timeout_ms: u64 },
    #[error("Job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },
    #[error("Config error: {0}")]
    Config(String),
    #[error("Not initialized: {0}")]
    NotInitialized(String),
    #[error("Shutting down: {0}")]
    ShuttingDown(String),
    #[error("Other error: {0}")]
    Other(String),
}

impl From<sled::Error> for StudioSDKError {
    fn from(error: sled::Error) -> Self {
        StudioSDKError::KvStore(error.to_string())
    }
}

impl From<serde_json::Error> for StudioSDKError {
    fn from(error: serde_json::Error) -> Self {
        StudioSDKError::Serialization(error.to_string())
    }
}

impl From<bincode::Error> for StudioSDKError {
    fn from(error: bincode::Error) -> Self {
        StudioSDKError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for StudioSDKError {
    fn from(error: std::io::Error) -> Self {
        StudioSDKError::IO(error.to_string())
    }
}

impl From<reqwest::Error> for StudioSDKError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => StudioSDKError::Http {
                status: status.as_u16(),
                message: error.to_string(),
            },
            None => StudioSDKError::Transport(error.to_string()),
        }
    }
}

impl StudioSDKError {
    /// 是否为可恢复的瞬时错误（网络、超时、5xx、限流）
    pub fn is_transient(&self) -> bool {
        match self {
            StudioSDKError::Transport(_) => true,
            StudioSDKError::JobWatchTimeout { .. } => true,
            StudioSDKError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn is_storage_full(&self) -> bool {
        matches!(self, StudioSDKError::StorageFull { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StudioSDKError::JobWatchTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, StudioSDKError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StudioSDKError::Transport("connection reset".into()).is_transient());
        assert!(StudioSDKError::Http { status: 503, message: "unavailable".into() }.is_transient());
        assert!(StudioSDKError::Http { status: 429, message: "slow down".into() }.is_transient());
        assert!(!StudioSDKError::Http { status: 404, message: "missing".into() }.is_transient());
        assert!(!StudioSDKError::StorageFull { required: 10, available: 1 }.is_transient());
    }

    #[test]
    fn test_timeout_is_distinct_from_job_failure() {
        let timeout = StudioSDKError::JobWatchTimeout { job_id: "j1".into(), timeout_ms: 1000 };
        let failed = StudioSDKError::JobFailed { job_id: "j1".into(), message: "boom".into() };
        assert!(timeout.is_timeout());
        assert!(!failed.is_timeout());
    }
}

//! 事件系统模块 - 媒体工作室 SDK 的类型化事件
//!
//! 功能包括：
//! - 对账结果变更事件
//! - 横幅状态变更事件
//! - 迁移进度 / 完成事件
//! - 任务状态与观察失败事件
//! - 存储淘汰事件
//! - 事件广播和订阅机制

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::job::JobStatus;
use crate::storage::entities::EvictionReport;
use crate::sync::banner::BannerState;
use crate::sync::migration::{MigrationOutcome, MigrationProgress, MigrationReport};
use crate::sync::reconciler::SyncDecision;

/// SDK 事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SDKEvent {
    /// 对账结果变更
    SyncDecisionChanged { decision: SyncDecision, timestamp: i64 },
    /// 横幅状态变更
    BannerStateChanged { state: BannerState, timestamp: i64 },
    /// 迁移进度（每处理完一条）
    MigrationProgress(MigrationProgress),
    /// 迁移结束
    MigrationFinished {
        report: MigrationReport,
        outcome: MigrationOutcome,
        timestamp: i64,
    },
    /// 任务状态更新
    JobStatusUpdated(JobStatus),
    /// 任务观察失败（超时等）
    JobWatchFailed {
        job_id: String,
        message: String,
        timed_out: bool,
        timestamp: i64,
    },
    /// 本地存储淘汰或清理
    StorageEvicted {
        owner_id: Option<String>,
        report: EvictionReport,
        timestamp: i64,
    },
}

impl SDKEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            SDKEvent::SyncDecisionChanged { .. } => "sync_decision_changed",
            SDKEvent::BannerStateChanged { .. } => "banner_state_changed",
            SDKEvent::MigrationProgress(_) => "migration_progress",
            SDKEvent::MigrationFinished { .. } => "migration_finished",
            SDKEvent::JobStatusUpdated(_) => "job_status_updated",
            SDKEvent::JobWatchFailed { .. } => "job_watch_failed",
            SDKEvent::StorageEvicted { .. } => "storage_evicted",
        }
    }

    /// 事件关联的角色或任务 ID
    pub fn owner_id(&self) -> Option<&str> {
        match self {
            SDKEvent::SyncDecisionChanged { decision, .. } => Some(&decision.owner_id),
            SDKEvent::JobStatusUpdated(status) => Some(&status.job_id),
            SDKEvent::JobWatchFailed { job_id, .. } => Some(job_id),
            SDKEvent::StorageEvicted { owner_id, .. } => owner_id.as_deref(),
            _ => None,
        }
    }

    /// 事件时间戳（毫秒，未携带时为 0）
    pub fn timestamp(&self) -> i64 {
        match self {
            SDKEvent::SyncDecisionChanged { timestamp, .. }
            | SDKEvent::BannerStateChanged { timestamp, .. }
            | SDKEvent::MigrationFinished { timestamp, .. }
            | SDKEvent::JobWatchFailed { timestamp, .. }
            | SDKEvent::StorageEvicted { timestamp, .. } => *timestamp,
            _ => 0,
        }
    }
}

/// 事件过滤器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// 事件类型过滤器
    pub event_types: Option<Vec<String>>,
    /// 角色/任务 ID 过滤器
    pub owner_ids: Option<Vec<String>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    pub fn with_owner_ids(mut self, owner_ids: Vec<String>) -> Self {
        self.owner_ids = Some(owner_ids);
        self
    }

    /// 检查事件是否匹配过滤器
    pub fn matches(&self, event: &SDKEvent) -> bool {
        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        if let Some(ref owner_ids) = self.owner_ids {
            match event.owner_id() {
                Some(owner_id) => {
                    if !owner_ids.iter().any(|o| o == owner_id) {
                        return false;
                    }
                }
                None => return false,
            }
        }

        true
    }
}

/// 事件监听器类型
pub type EventListener = Box<dyn Fn(&SDKEvent) + Send + Sync>;

/// 事件管理器
pub struct EventManager {
    /// 广播发送器
    sender: broadcast::Sender<SDKEvent>,
    /// 事件监听器映射
    listeners: Arc<tokio::sync::RwLock<HashMap<String, Vec<EventListener>>>>,
    /// 事件统计
    stats: Arc<tokio::sync::RwLock<EventStats>>,
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 监听器数量
    pub listener_count: usize,
    /// 最后事件时间
    pub last_event_time: Option<i64>,
}

impl EventManager {
    /// 创建新的事件管理器
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            listeners: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            stats: Arc::new(tokio::sync::RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    pub async fn emit(&self, event: SDKEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write().await;
            stats.total_events += 1;
            *stats.events_by_type.entry(event.event_type().to_string()).or_insert(0) += 1;
            if event.timestamp() > 0 {
                stats.last_event_time = Some(event.timestamp());
            }
        }

        // 无订阅者时 send 会失败，属正常场景
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        let listeners = self.listeners.read().await;
        if let Some(event_listeners) = listeners.get(event.event_type()) {
            for listener in event_listeners {
                listener(&event);
            }
        }
        if let Some(general_listeners) = listeners.get("*") {
            for listener in general_listeners {
                listener(&event);
            }
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<SDKEvent> {
        self.sender.subscribe()
    }

    /// 订阅特定条件的事件
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventReceiver {
        FilteredEventReceiver::new(self.sender.subscribe(), filter)
    }

    /// 添加事件监听器，`event_type` 为 `"*"` 时监听全部事件
    pub async fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&SDKEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().await;
        listeners
            .entry(event_type.to_string())
            .or_insert_with(Vec::new)
            .push(Box::new(listener));

        let mut stats = self.stats.write().await;
        stats.listener_count = listeners.values().map(|v| v.len()).sum();

        info!("Added listener for event type: {}", event_type);
    }

    /// 移除所有监听器
    pub async fn clear_listeners(&self) {
        let mut listeners = self.listeners.write().await;
        listeners.clear();

        let mut stats = self.stats.write().await;
        stats.listener_count = 0;

        info!("Cleared all event listeners");
    }

    /// 获取事件统计
    pub async fn get_stats(&self) -> EventStats {
        self.stats.read().await.clone()
    }

    /// 获取活跃订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// 过滤事件接收器
pub struct FilteredEventReceiver {
    receiver: broadcast::Receiver<SDKEvent>,
    filter: EventFilter,
}

impl FilteredEventReceiver {
    pub fn new(receiver: broadcast::Receiver<SDKEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// 接收下一个匹配的事件
    pub async fn recv(&mut self) -> Result<SDKEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// 尝试接收事件（非阻塞）
    pub fn try_recv(&mut self) -> Result<SDKEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.receiver.try_recv()?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

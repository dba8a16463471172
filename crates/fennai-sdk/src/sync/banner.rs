//! 同步横幅状态机
//!
//! 纯函数 `reduce(state, action) -> state`，不做 I/O。计时（完成后自动清除）
//! 由调用方负责，到点后派发 `AutoClearElapsed`。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sync::migration::{MigrationDirection, MigrationOutcome, MigrationProgress, MigrationReport};
use crate::sync::reconciler::SyncDecision;

/// 迁移全部成功后横幅自动清除的延迟
pub const SYNC_COMPLETE_CLEAR: Duration = Duration::from_millis(3000);

/// 全部失败且没有具体错误信息时的提示
const DEFAULT_FAILURE_MESSAGE: &str = "同步失败，请稍后重试";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BannerState {
    #[default]
    Hidden,
    /// 展示对账结果
    Decision { decision: SyncDecision },
    Migrating {
        direction: MigrationDirection,
        total: usize,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        percent_complete: f64,
    },
    SyncComplete { succeeded: usize },
    /// 全部失败
    SyncNeeded {
        direction: MigrationDirection,
        message: String,
        candidate_set: Vec<String>,
    },
    PartialSync {
        direction: MigrationDirection,
        succeeded: usize,
        failed: usize,
        retry_set: Vec<String>,
    },
}

impl BannerState {
    pub fn is_visible(&self) -> bool {
        !matches!(self, BannerState::Hidden)
    }

    pub fn is_migrating(&self) -> bool {
        matches!(self, BannerState::Migrating { .. })
    }

    /// 重试入口对应的条目，仅失败状态下非空
    pub fn retry_set(&self) -> Vec<String> {
        match self {
            BannerState::SyncNeeded { candidate_set, .. } => candidate_set.clone(),
            BannerState::PartialSync { retry_set, .. } => retry_set.clone(),
            _ => Vec::new(),
        }
    }

    /// 失败条目对应的迁移方向，重试时沿用
    pub fn retry_direction(&self) -> Option<MigrationDirection> {
        match self {
            BannerState::SyncNeeded { direction, .. } | BannerState::PartialSync { direction, .. } => Some(*direction),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BannerState::Hidden => "hidden",
            BannerState::Decision { decision } => decision.state.as_str(),
            BannerState::Migrating { .. } => "migrating",
            BannerState::SyncComplete { .. } => "sync-complete",
            BannerState::SyncNeeded { .. } => "sync-needed",
            BannerState::PartialSync { .. } => "partial-sync",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BannerAction {
    DecisionComputed(SyncDecision),
    Dismissed,
    MigrationStarted { direction: MigrationDirection, total: usize },
    MigrationProgressed(MigrationProgress),
    MigrationFinished(MigrationReport),
    AutoClearElapsed,
    Reset,
}

pub fn reduce(state: &BannerState, action: BannerAction) -> BannerState {
    match action {
        // 迁移进行中不被新的对账结果覆盖
        BannerAction::DecisionComputed(_) if state.is_migrating() => state.clone(),
        BannerAction::DecisionComputed(decision) => {
            if decision.state.is_visible() {
                BannerState::Decision { decision }
            } else {
                BannerState::Hidden
            }
        }
        BannerAction::Dismissed if state.is_migrating() => state.clone(),
        BannerAction::Dismissed => BannerState::Hidden,
        BannerAction::MigrationStarted { direction, total } => BannerState::Migrating {
            direction,
            total,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            percent_complete: 0.0,
        },
        BannerAction::MigrationProgressed(progress) => match state {
            BannerState::Migrating { .. } => BannerState::Migrating {
                direction: progress.direction,
                total: progress.total,
                succeeded: progress.succeeded,
                failed: progress.failed,
                skipped: progress.skipped,
                percent_complete: progress.percent_complete,
            },
            _ => state.clone(),
        },
        BannerAction::MigrationFinished(report) => finished(&report),
        BannerAction::AutoClearElapsed => match state {
            BannerState::SyncComplete { .. } => BannerState::Hidden,
            _ => state.clone(),
        },
        BannerAction::Reset => BannerState::Hidden,
    }
}

fn finished(report: &MigrationReport) -> BannerState {
    match report.outcome() {
        MigrationOutcome::Complete => BannerState::SyncComplete {
            succeeded: report.succeeded_count(),
        },
        MigrationOutcome::AllFailed => BannerState::SyncNeeded {
            direction: report.direction,
            message: report.first_error().unwrap_or(DEFAULT_FAILURE_MESSAGE).to_string(),
            candidate_set: report.retry_set(),
        },
        MigrationOutcome::Partial => BannerState::PartialSync {
            direction: report.direction,
            succeeded: report.succeeded_count(),
            failed: report.failed_count(),
            retry_set: report.retry_set(),
        },
    }
}

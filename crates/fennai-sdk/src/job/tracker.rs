//! 进行中任务的面包屑
//!
//! 页面重载后可以据此提示恢复观察。任务到达终态后删除；
//! 观察超时不删除，以便稍后继续。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::job::{JobKind, JobPhase, JobStatus};
use crate::storage::kv::{keys, PreferenceStore, PreferenceStoreExt};
use crate::utils::clock::Clock;

/// 面包屑内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveJobBreadcrumb {
    pub job_id: String,
    pub kind: JobKind,
    pub last_phase: JobPhase,
    pub started_at: i64,
    pub updated_at: i64,
}

pub struct JobTracker {
    prefs: Arc<dyn PreferenceStore>,
    clock: Arc<dyn Clock>,
}

impl JobTracker {
    pub fn new(prefs: Arc<dyn PreferenceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { prefs, clock }
    }

    /// 记录新提交的任务（覆盖旧的面包屑）
    pub fn begin(&self, job_id: &str, kind: JobKind) -> Result<ActiveJobBreadcrumb> {
        let now = self.clock.now_millis();
        let breadcrumb = ActiveJobBreadcrumb {
            job_id: job_id.to_string(),
            kind,
            last_phase: JobPhase::Queued,
            started_at: now,
            updated_at: now,
        };
        self.prefs.set_json(keys::ACTIVE_JOB, &breadcrumb)?;
        info!("记录进行中任务: job_id={}, kind={:?}", job_id, kind);
        Ok(breadcrumb)
    }

    /// 根据最新状态更新面包屑；终态时删除
    pub fn record(&self, status: &JobStatus) -> Result<()> {
        let mut breadcrumb = match self.pending()? {
            Some(b) if b.job_id == status.job_id => b,
            _ => return Ok(()),
        };

        if status.is_terminal() {
            self.prefs.remove(keys::ACTIVE_JOB)?;
            info!(
                "任务已结束，清除面包屑: job_id={}, phase={}",
                status.job_id,
                status.phase.as_str()
            );
            return Ok(());
        }

        if breadcrumb.last_phase != status.phase {
            breadcrumb.last_phase = status.phase;
            breadcrumb.updated_at = self.clock.now_millis();
            self.prefs.set_json(keys::ACTIVE_JOB, &breadcrumb)?;
            debug!("面包屑阶段更新: job_id={}, phase={}", status.job_id, status.phase.as_str());
        }
        Ok(())
    }

    /// 待恢复的任务
    pub fn pending(&self) -> Result<Option<ActiveJobBreadcrumb>> {
        self.prefs.get_json(keys::ACTIVE_JOB)
    }

    pub fn clear(&self) -> Result<()> {
        self.prefs.remove(keys::ACTIVE_JOB)
    }
}

/// 本地 / 云端媒体同步模块
///
/// 职责：
/// - 对账：根据本地清单、远端清单、会员等级、同步开关与存储压力得出横幅状态
/// - 横幅忽略（24 小时窗口）
/// - 迁移执行：逐条上传 / 恢复下载，汇总部分成功
/// - 横幅状态机

pub mod banner;
pub mod dismissal;
pub mod migration;
pub mod reconciler;

pub use banner::{reduce, BannerAction, BannerState, SYNC_COMPLETE_CLEAR};
pub use dismissal::{DismissalStore, DEFAULT_DISMISS_WINDOW};
pub use migration::{
    MigrationDirection, MigrationExecutor, MigrationFailure, MigrationOutcome, MigrationProgress,
    MigrationReport,
};
pub use reconciler::{
    decide, DecisionInputs, DecisionThresholds, ReconcileRequest, Reconciler, SyncDecision, SyncState,
    UploadLimits, UserTier,
};

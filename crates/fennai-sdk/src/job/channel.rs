//! 任务状态通道 - 观察单个任务直到终态
//!
//! 行为：
//! - 优先建立推送订阅，每条更新都转发给 `on_update`（重复的同阶段更新也转发）
//! - 订阅建立失败，或推送中途失败一次，则降级为固定间隔轮询，不再回到推送
//! - 超时未到终态时以 `JobWatchTimeout` 调用 `on_error`
//! - 终态只回调一次，之后不再有任何回调
//! - `cancel()` 幂等，返回后保证不会再有回调

use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::ReentrantMutex;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, StudioSDKError};
use crate::job::{JobKind, JobStatus};
use crate::remote::JobStatusSource;

/// 默认轮询间隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub type UpdateCallback = Arc<dyn Fn(JobStatus) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(StudioSDKError) + Send + Sync>;

/// 观察参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub kind: JobKind,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WatchOptions {
    pub fn for_kind(kind: JobKind) -> Self {
        Self {
            kind,
            timeout: kind.default_timeout(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// 回调闸门
///
/// 回调在持锁期间执行，因此同一时刻最多一个回调在途；
/// 关闭操作与回调互斥，关闭返回后不会再有回调。
/// 使用可重入锁，回调内部调用 `cancel()` 不会死锁。
struct CallbackGate {
    closed: ReentrantMutex<Cell<bool>>,
}

impl CallbackGate {
    fn new() -> Self {
        Self {
            closed: ReentrantMutex::new(Cell::new(false)),
        }
    }

    /// 闸门未关闭时执行回调；`close_after` 为 true 时在回调前关闭
    fn emit(&self, close_after: bool, callback: impl FnOnce()) -> bool {
        let closed = self.closed.lock();
        if closed.get() {
            return false;
        }
        if close_after {
            closed.set(true);
        }
        callback();
        true
    }

    fn close(&self) {
        self.closed.lock().set(true);
    }

    fn is_closed(&self) -> bool {
        self.closed.lock().get()
    }
}

/// 取消器，可克隆后传给其他组件
#[derive(Clone)]
pub struct WatchCanceller {
    gate: Arc<CallbackGate>,
    token: CancellationToken,
}

impl WatchCanceller {
    /// 幂等；返回后不会再有回调
    pub fn cancel(&self) {
        self.gate.close();
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 是否指向同一次观察
    pub fn same_watch(&self, other: &WatchCanceller) -> bool {
        Arc::ptr_eq(&self.gate, &other.gate)
    }
}

/// `watch` 返回的句柄
pub struct JobWatchHandle {
    job_id: String,
    canceller: WatchCanceller,
    task: JoinHandle<()>,
}

impl JobWatchHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn cancel(&self) {
        if !self.canceller.gate.is_closed() {
            debug!("取消任务观察: job_id={}", self.job_id);
        }
        self.canceller.cancel();
    }

    /// 仍可能产生回调
    pub fn is_active(&self) -> bool {
        !self.canceller.gate.is_closed()
    }

    pub fn canceller(&self) -> WatchCanceller {
        self.canceller.clone()
    }

    /// 等待观察任务退出
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("任务观察协程异常退出: job_id={}, error={}", self.job_id, e);
        }
    }
}

impl std::fmt::Debug for JobWatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobWatchHandle")
            .field("job_id", &self.job_id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// 任务状态通道
#[derive(Clone)]
pub struct JobStatusChannel {
    source: Arc<dyn JobStatusSource>,
}

impl JobStatusChannel {
    pub fn new(source: Arc<dyn JobStatusSource>) -> Self {
        Self { source }
    }

    /// 开始观察任务，需在 tokio 运行时内调用
    pub fn watch<U, E>(
        &self,
        job_id: impl Into<String>,
        on_update: U,
        on_error: E,
        options: WatchOptions,
    ) -> JobWatchHandle
    where
        U: Fn(JobStatus) + Send + Sync + 'static,
        E: Fn(StudioSDKError) + Send + Sync + 'static,
    {
        let job_id = job_id.into();
        let canceller = WatchCanceller {
            gate: Arc::new(CallbackGate::new()),
            token: CancellationToken::new(),
        };

        let task = WatchTask {
            job_id: job_id.clone(),
            source: self.source.clone(),
            options,
            gate: canceller.gate.clone(),
            token: canceller.token.clone(),
            on_update: Arc::new(on_update),
            on_error: Arc::new(on_error),
        };
        info!(
            "👀 开始观察任务: job_id={}, kind={:?}, timeout={:?}",
            job_id, options.kind, options.timeout
        );
        let task = tokio::spawn(task.run());

        JobWatchHandle {
            job_id,
            canceller,
            task,
        }
    }
}

struct WatchTask {
    job_id: String,
    source: Arc<dyn JobStatusSource>,
    options: WatchOptions,
    gate: Arc<CallbackGate>,
    token: CancellationToken,
    on_update: UpdateCallback,
    on_error: ErrorCallback,
}

impl WatchTask {
    async fn run(self) {
        let deadline = tokio::time::sleep(self.options.timeout);
        tokio::pin!(deadline);

        let subscribed = tokio::select! {
            _ = self.token.cancelled() => return,
            _ = &mut deadline => {
                self.fail_with_timeout();
                return;
            }
            result = self.source.subscribe(&self.job_id, self.options.kind) => result,
        };

        let mut push: Option<BoxStream<'static, Result<JobStatus>>> = match subscribed {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!("推送订阅失败，改为轮询: job_id={}, error={}", self.job_id, e);
                None
            }
        };
        let mut poller: Option<Interval> = match push {
            Some(_) => None,
            None => Some(self.new_poller()),
        };

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = &mut deadline => {
                    self.fail_with_timeout();
                    break;
                }
                item = next_push(&mut push), if push.is_some() => match item {
                    Some(Ok(status)) => {
                        if self.deliver(status) {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("推送通道失败，改为轮询: job_id={}, error={}", self.job_id, e);
                        push = None;
                        poller = Some(self.new_poller());
                    }
                    None => {
                        warn!("推送通道意外关闭，改为轮询: job_id={}", self.job_id);
                        push = None;
                        poller = Some(self.new_poller());
                    }
                },
                _ = next_tick(&mut poller), if poller.is_some() => {
                    let fetched = tokio::select! {
                        biased;
                        _ = self.token.cancelled() => break,
                        _ = &mut deadline => {
                            self.fail_with_timeout();
                            break;
                        }
                        fetched = self.source.fetch(&self.job_id, self.options.kind) => fetched,
                    };
                    match fetched {
                        Ok(Some(status)) => {
                            if self.deliver(status) {
                                break;
                            }
                        }
                        Ok(None) => debug!("任务暂不可见: job_id={}", self.job_id),
                        Err(e) => debug!("轮询失败，等待下次: job_id={}, error={}", self.job_id, e),
                    }
                }
            }
        }

        debug!("任务观察结束: job_id={}", self.job_id);
    }

    /// 转发一次更新，返回是否应结束
    fn deliver(&self, status: JobStatus) -> bool {
        let terminal = status.is_terminal();
        if terminal {
            info!("任务到达终态: job_id={}, phase={}", self.job_id, status.phase.as_str());
        }
        let on_update = &self.on_update;
        let delivered = self.gate.emit(terminal, || on_update(status));
        terminal || !delivered || self.gate.is_closed()
    }

    fn fail_with_timeout(&self) {
        warn!("任务观察超时: job_id={}, timeout={:?}", self.job_id, self.options.timeout);
        let error = StudioSDKError::JobWatchTimeout {
            job_id: self.job_id.clone(),
            timeout_ms: self.options.timeout.as_millis() as u64,
        };
        let on_error = &self.on_error;
        self.gate.emit(true, || on_error(error));
    }

    fn new_poller(&self) -> Interval {
        // 第一次 tick 立即完成
        let mut interval = tokio::time::interval(self.options.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }
}

async fn next_push(push: &mut Option<BoxStream<'static, Result<JobStatus>>>) -> Option<Result<JobStatus>> {
    match push {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(poller: &mut Option<Interval>) {
    match poller {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

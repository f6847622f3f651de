//! 公平调度器 - 编排层
//!
//! ## 职责
//!
//! 把大量并发提交的请求复用到固定数量的工作协程上，同时防止单个调用方饿死其他调用方。
//!
//! ## 核心机制
//!
//! 1. **公平优先级**：`调整后优先级 = 基础优先级 + 惩罚系数 × 该调用方在途请求数`，
//!    数值越小越先执行，相同优先级按提交顺序
//! 2. **固定工作池**：工作协程数量与请求量无关，提交不阻塞，只有执行阶段会等待
//! 3. **全局限速**：每个请求出队后先经过 `RateLimiter`，再交给 `FallbackInvoker`
//! 4. **尽力停止**：停止信号发出后，工作协程完成手头请求后退出，排队中的请求被放弃

use parking_lot::Mutex;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::OrchestrationError;
use crate::infrastructure::Clock;
use crate::models::{InferenceRequest, InvocationResult};
use crate::services::RateLimiter;
use crate::workflow::FallbackInvoker;

/// 单个请求的最终结果
pub type WorkOutcome = Result<InvocationResult, OrchestrationError>;

/// 请求 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WorkItemId(u64);

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 请求生命周期：排队 → 执行中 → 完成 | 失败
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

/// 调度参数
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub worker_count: usize,
    /// 每个在途请求增加的优先级数值
    pub fairness_penalty: f64,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            worker_count: config.worker_count,
            fairness_penalty: config.fairness_penalty,
        }
    }
}

struct WorkItem {
    id: WorkItemId,
    caller_id: String,
    request: InferenceRequest,
    submitted_at: Instant,
    adjusted_priority: f64,
    responder: oneshot::Sender<WorkOutcome>,
}

impl PartialEq for WorkItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for WorkItem {}

impl PartialOrd for WorkItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WorkItem {
    /// `BinaryHeap` 先弹出最大值：优先级数值小的、提交早的排在前面
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .adjusted_priority
            .total_cmp(&self.adjusted_priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// 调度统计（仅用于观测）
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// 因所有模型被限流而失败的请求
    pub throttled_requests: u64,
    pub queue_depth: usize,
    pub active_requests: usize,
    pub active_callers: usize,
    pub in_flight_by_caller: BTreeMap<String, usize>,
    pub avg_wait_secs: f64,
    pub avg_execution_secs: f64,
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    successful: u64,
    failed: u64,
    throttled: u64,
    finished: u64,
    avg_wait_secs: f64,
    avg_execution_secs: f64,
}

impl Counters {
    fn record(&mut self, outcome: &WorkOutcome, wait: Duration, execution: Duration) {
        self.finished += 1;
        match outcome {
            Ok(_) => self.successful += 1,
            Err(e) => {
                self.failed += 1;
                if matches!(e, OrchestrationError::Exhausted { .. }) {
                    self.throttled += 1;
                }
            }
        }

        let n = self.finished as f64;
        self.avg_wait_secs += (wait.as_secs_f64() - self.avg_wait_secs) / n;
        self.avg_execution_secs += (execution.as_secs_f64() - self.avg_execution_secs) / n;
    }
}

struct Shared {
    queue: Mutex<BinaryHeap<WorkItem>>,
    in_flight: Mutex<HashMap<String, usize>>,
    statuses: Mutex<HashMap<WorkItemId, WorkStatus>>,
    counters: Mutex<Counters>,
    active: AtomicUsize,
    next_id: AtomicU64,
    stopped: AtomicBool,
    notify: Notify,
    limiter: Arc<RateLimiter>,
    invoker: Arc<FallbackInvoker>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
}

impl Shared {
    /// 取出优先级最高的请求，队列为空时等待
    async fn next_item(&self) -> WorkItem {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let item = self.queue.lock().pop();
            if let Some(item) = item {
                return item;
            }
            notified.await;
        }
    }

    async fn execute(&self, item: WorkItem, worker_id: usize) {
        let WorkItem {
            id,
            caller_id,
            request,
            submitted_at,
            adjusted_priority,
            responder,
        } = item;

        self.set_status(id, WorkStatus::Running);
        self.limiter.admit(request.estimated_tokens).await;

        let started = self.clock.now();
        let wait = started.saturating_duration_since(submitted_at);
        self.active.fetch_add(1, AtomicOrdering::SeqCst);
        info!(
            "🚀 [工作协程 {}] 处理请求 {} (调用方: {}, 优先级: {:.1}, 等待 {:.2}s)",
            worker_id,
            id,
            caller_id,
            adjusted_priority,
            wait.as_secs_f64()
        );

        let outcome = self.invoker.invoke(&request).await;

        let execution = self.clock.now().saturating_duration_since(started);
        self.active.fetch_sub(1, AtomicOrdering::SeqCst);
        self.release_caller(&caller_id);
        self.counters.lock().record(&outcome, wait, execution);

        let outcome = outcome.map(|mut result| {
            result.queue_wait = wait;
            result
        });
        match &outcome {
            Ok(_) => {
                self.set_status(id, WorkStatus::Completed);
                info!("✅ 请求 {} 完成，耗时 {:.2}s", id, execution.as_secs_f64());
            }
            Err(e) => {
                self.set_status(id, WorkStatus::Failed);
                error!("❌ 请求 {} 失败: {}", id, e);
            }
        }

        if responder.send(outcome).is_err() {
            debug!("调用方已放弃等待请求 {}", id);
        }
    }

    /// 只更新仍有调用方持有的请求
    fn set_status(&self, id: WorkItemId, status: WorkStatus) {
        if let Some(current) = self.statuses.lock().get_mut(&id) {
            *current = status;
        }
    }

    fn release_caller(&self, caller_id: &str) {
        let mut in_flight = self.in_flight.lock();
        if let Some(count) = in_flight.get_mut(caller_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                in_flight.remove(caller_id);
            }
        }
    }
}

/// 提交凭证，用于等待结果
///
/// 丢弃凭证即放弃等待，请求仍会被执行。
pub struct WorkTicket {
    id: WorkItemId,
    receiver: oneshot::Receiver<WorkOutcome>,
    shared: Arc<Shared>,
}

impl WorkTicket {
    pub fn id(&self) -> WorkItemId {
        self.id
    }

    /// 等待请求结束
    pub async fn wait(mut self) -> WorkOutcome {
        match (&mut self.receiver).await {
            Ok(outcome) => outcome,
            Err(_) => Err(OrchestrationError::SchedulerStopped),
        }
    }
}

impl Drop for WorkTicket {
    fn drop(&mut self) {
        self.shared.statuses.lock().remove(&self.id);
    }
}

/// 公平调度器
pub struct FairScheduler {
    shared: Arc<Shared>,
    stop_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl FairScheduler {
    /// 创建调度器（不启动工作协程）
    pub fn new(
        limiter: Arc<RateLimiter>,
        invoker: Arc<FallbackInvoker>,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(BinaryHeap::new()),
                in_flight: Mutex::new(HashMap::new()),
                statuses: Mutex::new(HashMap::new()),
                counters: Mutex::new(Counters::default()),
                active: AtomicUsize::new(0),
                next_id: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
                notify: Notify::new(),
                limiter,
                invoker,
                clock,
                settings,
            }),
            stop_tx,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// 启动工作协程，重复调用无效果
    pub fn start(&self) {
        if self.shared.stopped.load(AtomicOrdering::SeqCst) {
            warn!("⚠️ 调度器已停止，不再启动工作协程");
            return;
        }

        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }

        let worker_count = self.shared.settings.worker_count.max(1);
        for worker_id in 0..worker_count {
            let shared = self.shared.clone();
            let stop_rx = self.stop_tx.subscribe();
            workers.push(tokio::spawn(worker_loop(shared, worker_id, stop_rx)));
        }

        info!("✅ 调度器已启动，共 {} 个工作协程", worker_count);
    }

    /// 提交请求
    ///
    /// 立即返回；调用方的在途请求越多，新请求的优先级越靠后。
    pub fn submit(&self, caller_id: &str, request: InferenceRequest, base_priority: f64) -> WorkTicket {
        let shared = &self.shared;
        let id = WorkItemId(shared.next_id.fetch_add(1, AtomicOrdering::SeqCst));
        let (responder, receiver) = oneshot::channel();
        let ticket = WorkTicket {
            id,
            receiver,
            shared: shared.clone(),
        };

        shared.statuses.lock().insert(id, WorkStatus::Queued);

        // 停止标志在队列锁内检查，与 shutdown 的清空互斥
        let accepted = {
            let mut queue = shared.queue.lock();
            if shared.stopped.load(AtomicOrdering::SeqCst) {
                None
            } else {
                let in_flight = {
                    let mut in_flight = shared.in_flight.lock();
                    let count = in_flight.entry(caller_id.to_string()).or_insert(0);
                    let current = *count;
                    *count += 1;
                    current
                };
                let adjusted_priority = base_priority + shared.settings.fairness_penalty * in_flight as f64;

                queue.push(WorkItem {
                    id,
                    caller_id: caller_id.to_string(),
                    request,
                    submitted_at: shared.clock.now(),
                    adjusted_priority,
                    responder,
                });
                shared.counters.lock().total += 1;
                Some((adjusted_priority, queue.len()))
            }
        };

        let Some((adjusted_priority, queue_depth)) = accepted else {
            shared.statuses.lock().remove(&id);
            warn!("⚠️ 调度器已停止，拒绝请求 {} (调用方: {})", id, caller_id);
            return ticket;
        };
        shared.notify.notify_one();

        info!(
            "📥 请求 {} 已入队 (调用方: {}, 优先级: {:.1}, 队列长度: {})",
            id, caller_id, adjusted_priority, queue_depth
        );

        ticket
    }

    /// 查询请求状态；凭证被丢弃后返回 None
    pub fn status(&self, id: WorkItemId) -> Option<WorkStatus> {
        self.shared.statuses.lock().get(&id).copied()
    }

    pub fn stats(&self) -> SchedulerStats {
        let shared = &self.shared;
        let in_flight_by_caller: BTreeMap<String, usize> = shared
            .in_flight
            .lock()
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(caller, count)| (caller.clone(), *count))
            .collect();
        let queue_depth = shared.queue.lock().len();
        let counters = shared.counters.lock();

        SchedulerStats {
            total_requests: counters.total,
            successful_requests: counters.successful,
            failed_requests: counters.failed,
            throttled_requests: counters.throttled,
            queue_depth,
            active_requests: shared.active.load(AtomicOrdering::SeqCst),
            active_callers: in_flight_by_caller.len(),
            in_flight_by_caller,
            avg_wait_secs: counters.avg_wait_secs,
            avg_execution_secs: counters.avg_execution_secs,
        }
    }

    /// 停止调度器
    ///
    /// 等待工作协程完成手头的请求；仍在排队的请求被放弃，其凭证返回 `SchedulerStopped`。
    pub async fn shutdown(&self) {
        info!("🛑 正在停止调度器...");
        {
            let _queue = self.shared.queue.lock();
            self.shared.stopped.store(true, AtomicOrdering::SeqCst);
        }
        self.stop_tx.send_replace(true);

        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!("工作协程异常退出: {}", e);
            }
        }

        let abandoned: Vec<WorkItem> = self.shared.queue.lock().drain().collect();
        if !abandoned.is_empty() {
            warn!("⚠️ 放弃 {} 个仍在排队的请求", abandoned.len());
        }
        for item in abandoned {
            self.shared.release_caller(&item.caller_id);
            self.shared.set_status(item.id, WorkStatus::Failed);
        }

        info!("✅ 调度器已停止");
    }
}

async fn worker_loop(shared: Arc<Shared>, worker_id: usize, mut stop_rx: watch::Receiver<bool>) {
    debug!("👷 工作协程 {} 已启动", worker_id);

    loop {
        if *stop_rx.borrow() {
            break;
        }

        let item = tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            item = shared.next_item() => item,
        };

        shared.execute(item, worker_id).await;
    }

    debug!("👋 工作协程 {} 已退出", worker_id);
}

//! 冷却跟踪器 - 业务能力层
//!
//! 每个模型一个自适应冷却状态机：可用 → 冷却中 → 可用。
//!
//! - 只有 `record_throttle` 会让模型进入冷却
//! - 冷却到期后在下一次查询时惰性恢复，或由 `reset_all` 强制恢复
//! - 没有终止状态，模型永远不会被永久排除
//!
//! 所有状态由一把锁保护，锁只在读改写期间持有，绝不跨越网络调用。

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::infrastructure::Clock;
use crate::models::{Model, ModelRegistry};
use crate::utils::logging::truncate_text;

/// 统计近期限流次数的窗口
pub const THROTTLE_WINDOW: Duration = Duration::from_secs(60);
/// 冷却时间上限
pub const MAX_COOLDOWN: Duration = Duration::from_secs(60);
/// 限流事件的保留时长（用于汇总）
const HISTORY_RETENTION: Duration = Duration::from_secs(3600);
const SUMMARY_SHORT_WINDOW: Duration = Duration::from_secs(300);

/// 根据近期限流次数计算冷却时间
///
/// - 1 次：基础冷却
/// - 2~3 次：3 倍基础冷却
/// - 4 次及以上：6 倍基础冷却
///
/// 每一档都不超过 [`MAX_COOLDOWN`]。
pub fn cooldown_for(recent_throttles: usize, base_cooldown: Duration) -> Duration {
    let cooldown = match recent_throttles {
        0 | 1 => base_cooldown,
        2..=3 => base_cooldown * 3,
        _ => base_cooldown * 6,
    };
    cooldown.min(MAX_COOLDOWN)
}

/// 模型当前是否可以接收新请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Cooling { remaining: Duration },
}

impl Availability {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Availability::Available => write!(f, "可用"),
            Availability::Cooling { remaining } => {
                write!(f, "冷却中 (剩余 {:.1}s)", remaining.as_secs_f64())
            }
        }
    }
}

#[derive(Debug, Default)]
struct CooldownState {
    /// 最近 60 秒内的限流时间
    recent_throttles: VecDeque<Instant>,
    /// 最近一小时的限流时间
    history: VecDeque<Instant>,
    cooldown_until: Option<Instant>,
    total_throttles: u64,
    successes: u64,
    attempts: u64,
}

impl CooldownState {
    fn prune(&mut self, now: Instant) {
        prune_older_than(&mut self.recent_throttles, now, THROTTLE_WINDOW);
        prune_older_than(&mut self.history, now, HISTORY_RETENTION);
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.cooldown_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }
}

fn prune_older_than(events: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = events.front() {
        if now.duration_since(*oldest) >= window {
            events.pop_front();
        } else {
            break;
        }
    }
}

/// 模型健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Available,
    InCooldown,
}

/// 单个模型的统计
#[derive(Debug, Clone, Serialize)]
pub struct ModelHealth {
    pub id: String,
    pub name: String,
    pub priority: u32,
    pub status: ModelStatus,
    pub total_attempts: u64,
    pub successful_requests: u64,
    /// 百分比，保留一位小数
    pub success_rate: f64,
    pub recent_throttles_60s: usize,
    pub total_throttles: u64,
    pub cooldown_remaining_secs: u64,
}

/// 冷却跟踪器统计（仅用于观测，不参与调度）
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStats {
    pub total_models: usize,
    pub active_cooldowns: usize,
    pub models: Vec<ModelHealth>,
}

impl TrackerStats {
    pub fn model(&self, model_id: &str) -> Option<&ModelHealth> {
        self.models.iter().find(|m| m.id == model_id)
    }
}

/// 限流模式汇总
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThrottleSummary {
    pub model_id: String,
    pub name: String,
    pub last_5_minutes: usize,
    pub last_hour: usize,
    pub all_time: u64,
}

/// 冷却跟踪器
pub struct CooldownTracker {
    registry: Arc<ModelRegistry>,
    states: Mutex<HashMap<String, CooldownState>>,
    clock: Arc<dyn Clock>,
}

impl CooldownTracker {
    pub fn new(registry: Arc<ModelRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            states: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// 查询模型是否可用
    ///
    /// 除了惰性清除已到期的冷却外没有副作用。
    pub fn is_eligible(&self, model_id: &str) -> Availability {
        let now = self.clock.now();
        let mut states = self.states.lock();
        match states.get_mut(model_id) {
            Some(state) => availability_of(state, now),
            None => Availability::Available,
        }
    }

    /// 返回当前可参与候选的模型（按优先级）
    ///
    /// 剩余冷却不超过 `skip_threshold` 的模型也算可用，避免为了不到一两秒的尾巴跳过主模型。
    pub fn eligible_models(&self, skip_threshold: Duration) -> Vec<Model> {
        let now = self.clock.now();
        let mut states = self.states.lock();

        self.registry
            .list_models()
            .iter()
            .filter(|model| match states.get_mut(&model.id) {
                None => true,
                Some(state) => match availability_of(state, now) {
                    Availability::Available => true,
                    Availability::Cooling { remaining } if remaining <= skip_threshold => true,
                    Availability::Cooling { remaining } => {
                        info!(
                            "⏳ {} 冷却中 (剩余 {:.0}s)，本次跳过",
                            model.name,
                            remaining.as_secs_f64()
                        );
                        false
                    }
                },
            })
            .cloned()
            .collect()
    }

    /// 记录一次限流，并按近期频率设置自适应冷却
    ///
    /// 返回本次设置的冷却时间；未知模型返回 None。
    pub fn record_throttle(&self, model_id: &str, error_detail: &str) -> Option<Duration> {
        let model = self.registry.get(model_id)?;
        let now = self.clock.now();

        let (recent, cooldown) = {
            let mut states = self.states.lock();
            let state = states.entry(model_id.to_string()).or_default();

            state.recent_throttles.push_back(now);
            state.history.push_back(now);
            state.total_throttles += 1;
            state.attempts += 1;
            state.prune(now);

            let recent = state.recent_throttles.len();
            let cooldown = cooldown_for(recent, model.base_cooldown());
            state.cooldown_until = Some(now + cooldown);
            (recent, cooldown)
        };

        warn!(
            "🚫 {} 被限流 (近 60s: {} 次)，自适应冷却: {}s",
            model.name,
            recent,
            cooldown.as_secs()
        );
        if !error_detail.is_empty() {
            warn!("   错误: {}", truncate_text(error_detail, 100));
        }

        Some(cooldown)
    }

    /// 记录一次成功，清空近期限流窗口
    pub fn record_success(&self, model_id: &str) {
        let mut states = self.states.lock();
        let state = states.entry(model_id.to_string()).or_default();
        state.successes += 1;
        state.attempts += 1;
        state.recent_throttles.clear();
    }

    /// 记录一次非限流失败（只计入尝试次数）
    pub fn record_failure(&self, model_id: &str) {
        let mut states = self.states.lock();
        states.entry(model_id.to_string()).or_default().attempts += 1;
    }

    /// 清除所有冷却和近期限流记录（运维手动恢复）
    pub fn reset_all(&self) {
        let mut states = self.states.lock();
        for state in states.values_mut() {
            state.cooldown_until = None;
            state.recent_throttles.clear();
        }
        info!("🔄 已重置所有模型的冷却和限流记录");
    }

    pub fn stats(&self) -> TrackerStats {
        let now = self.clock.now();
        let states = self.states.lock();
        let empty = CooldownState::default();

        let models: Vec<ModelHealth> = self
            .registry
            .list_models()
            .iter()
            .map(|model| {
                let state = states.get(&model.id).unwrap_or(&empty);
                let remaining = state.remaining(now);
                let recent = state
                    .recent_throttles
                    .iter()
                    .filter(|t| now.duration_since(**t) < THROTTLE_WINDOW)
                    .count();

                ModelHealth {
                    id: model.id.clone(),
                    name: model.name.clone(),
                    priority: model.priority,
                    status: if remaining.is_some() {
                        ModelStatus::InCooldown
                    } else {
                        ModelStatus::Available
                    },
                    total_attempts: state.attempts,
                    successful_requests: state.successes,
                    success_rate: success_rate(state.successes, state.attempts),
                    recent_throttles_60s: recent,
                    total_throttles: state.total_throttles,
                    cooldown_remaining_secs: remaining
                        .map(|r| r.as_secs_f64().ceil() as u64)
                        .unwrap_or(0),
                }
            })
            .collect();

        TrackerStats {
            total_models: models.len(),
            active_cooldowns: models
                .iter()
                .filter(|m| m.status == ModelStatus::InCooldown)
                .count(),
            models,
        }
    }

    /// 按模型汇总最近 5 分钟 / 1 小时 / 全部的限流次数
    pub fn throttle_summary(&self) -> Vec<ThrottleSummary> {
        let now = self.clock.now();
        let states = self.states.lock();

        self.registry
            .list_models()
            .iter()
            .map(|model| {
                let (last_5_minutes, last_hour, all_time) = match states.get(&model.id) {
                    Some(state) => (
                        count_within(&state.history, now, SUMMARY_SHORT_WINDOW),
                        count_within(&state.history, now, HISTORY_RETENTION),
                        state.total_throttles,
                    ),
                    None => (0, 0, 0),
                };
                ThrottleSummary {
                    model_id: model.id.clone(),
                    name: model.name.clone(),
                    last_5_minutes,
                    last_hour,
                    all_time,
                }
            })
            .collect()
    }
}

fn availability_of(state: &mut CooldownState, now: Instant) -> Availability {
    match state.remaining(now) {
        Some(remaining) => Availability::Cooling { remaining },
        None => {
            state.cooldown_until = None;
            Availability::Available
        }
    }
}

fn count_within(events: &VecDeque<Instant>, now: Instant, window: Duration) -> usize {
    events
        .iter()
        .filter(|t| now.duration_since(**t) < window)
        .count()
}

fn success_rate(successes: u64, attempts: u64) -> f64 {
    if attempts == 0 {
        return 0.0;
    }
    (successes as f64 / attempts as f64 * 1000.0).round() / 10.0
}

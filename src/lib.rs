//! # Review Inference
//!
//! 为文档审阅类工作负载提供的 LLM 推理编排层
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有"时间"这一共享资源，只暴露能力
//! - `Clock` - 当前时间和异步等待，真实实现与手动实现可替换
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，互不依赖
//! - `CooldownTracker` - 每个模型的自适应冷却
//! - `RateLimiter` - 全局滑动窗口准入
//! - `LlmService` - 调用一次兼容 OpenAI 的模型接口
//! - `classifier` - 把错误分类为限流 / 其他
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个请求"的完整处理流程
//! - `FallbackInvoker` - 按优先级在模型之间降级（可用模型 → 调用 → 限流则切换）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/scheduler` - 公平调度器，管理队列和工作协程
//! - `orchestrator/app` - 编排器，组装各层并对外提供入口
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult, ConfigError, InvokeError, OrchestrationError};
pub use infrastructure::{Clock, ManualClock, SystemClock};
pub use models::{Completion, InferenceRequest, InvocationResult, Model, ModelRegistry};
pub use orchestrator::{FairScheduler, Orchestrator, SchedulerStats, WorkStatus, WorkTicket};
pub use services::{CooldownTracker, InferenceBackend, LlmService, RateLimiter, ScriptedBackend};
pub use workflow::{FallbackInvoker, FallbackSettings};

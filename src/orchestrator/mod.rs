//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责请求排队、公平调度和组件生命周期，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `app` - 推理编排器
//! - 组装注册表、冷却跟踪器、限速器、降级调用器和调度器
//! - 对外暴露提交接口和统计接口
//! - 管理停止流程
//!
//! ### `scheduler` - 公平调度器
//! - 按"基础优先级 + 在途惩罚"排队
//! - 固定数量的工作协程消费队列
//! - 每个请求出队后先过限速器再交给降级调用器
//! - 统计排队等待和执行耗时
//!
//! ## 层次关系
//!
//! ```text
//! app::Orchestrator (对外入口)
//!     ↓
//! scheduler::FairScheduler (处理 N 个调用方的请求)
//!     ↓
//! services::RateLimiter (全局准入)
//!     ↓
//! workflow::FallbackInvoker (处理单个请求)
//!     ↓
//! services (能力层：cooldown / llm)
//!     ↓
//! infrastructure (基础设施：Clock)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：app 管组装，scheduler 管排队
//! 2. **资源隔离**：只有编排层持有推理后端和时钟
//! 3. **向下依赖**：编排层 → workflow → services → infrastructure
//! 4. **无业务逻辑**：不判断错误类型，不选择模型

pub mod app;
pub mod scheduler;

// 重新导出主要类型
pub use app::Orchestrator;
pub use scheduler::{FairScheduler, SchedulerSettings, SchedulerStats, WorkItemId, WorkOutcome, WorkStatus, WorkTicket};

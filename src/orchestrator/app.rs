//! 推理编排器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个库的入口，负责组装各层组件并管理它们的生命周期。
//!
//! ## 核心功能
//!
//! 1. **初始化**：加载模型目录，创建冷却跟踪器、限速器、降级调用器和调度器
//! 2. **提交请求**：调用方只需给出调用方 ID、提示词和预估 token
//! 3. **观测**：模型统计、限流汇总、调度统计、限速窗口用量
//! 4. **停止**：停止工作协程，放弃仍在排队的请求
//!
//! ## 设计特点
//!
//! - **资源所有者**：唯一持有推理后端和时钟的模块
//! - **依赖注入**：后端和时钟可替换，测试中使用脚本化后端和手动时钟
//! - **向下委托**：排队交给 FairScheduler，单个请求交给 FallbackInvoker

use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::error::{AppResult, OrchestrationError};
use crate::infrastructure::{Clock, SystemClock};
use crate::models::{InferenceRequest, InvocationResult, ModelRegistry};
use crate::orchestrator::scheduler::{FairScheduler, SchedulerSettings, SchedulerStats, WorkTicket};
use crate::services::{
    CooldownTracker, InferenceBackend, LlmService, RateLimiter, RateUsage, ThrottleSummary, TrackerStats,
};
use crate::utils::logging::log_startup;
use crate::workflow::{FallbackInvoker, FallbackSettings};

/// 推理编排器
pub struct Orchestrator {
    config: Config,
    registry: Arc<ModelRegistry>,
    tracker: Arc<CooldownTracker>,
    limiter: Arc<RateLimiter>,
    scheduler: FairScheduler,
}

impl Orchestrator {
    /// 使用真实 LLM 服务和系统时钟初始化
    pub async fn initialize(config: &Config) -> AppResult<Self> {
        let registry = Arc::new(ModelRegistry::from_config(config).await?);
        let backend: Arc<dyn InferenceBackend> = Arc::new(LlmService::new(config));
        Ok(Self::with_backend(config, registry, backend, Arc::new(SystemClock)))
    }

    /// 使用指定的后端和时钟组装，并启动工作协程
    ///
    /// 必须在 tokio 运行时内调用。
    pub fn with_backend(
        config: &Config,
        registry: Arc<ModelRegistry>,
        backend: Arc<dyn InferenceBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        log_startup(config, &registry);

        let tracker = Arc::new(CooldownTracker::new(registry.clone(), clock.clone()));
        let limiter = Arc::new(RateLimiter::new(
            config.requests_per_minute,
            config.tokens_per_minute,
            clock.clone(),
        ));
        let invoker = Arc::new(FallbackInvoker::new(
            registry.clone(),
            tracker.clone(),
            backend,
            clock.clone(),
            FallbackSettings::from_config(config),
        ));
        let scheduler = FairScheduler::new(
            limiter.clone(),
            invoker,
            clock,
            SchedulerSettings::from_config(config),
        );
        scheduler.start();

        Self {
            config: config.clone(),
            registry,
            tracker,
            limiter,
            scheduler,
        }
    }

    /// 提交请求，立即返回凭证
    ///
    /// `base_priority` 为 None 时使用配置中的默认优先级。
    pub fn submit(&self, caller_id: &str, request: InferenceRequest, base_priority: Option<f64>) -> WorkTicket {
        let priority = base_priority.unwrap_or(self.config.default_priority);
        self.scheduler.submit(caller_id, request, priority)
    }

    /// 提交请求并等待结果
    pub async fn submit_inference_request(
        &self,
        caller_id: &str,
        prompt: &str,
        estimated_tokens: u64,
        base_priority: Option<f64>,
    ) -> Result<InvocationResult, OrchestrationError> {
        self.submit(caller_id, InferenceRequest::new(prompt, estimated_tokens), base_priority)
            .wait()
            .await
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn model_stats(&self) -> TrackerStats {
        self.tracker.stats()
    }

    pub fn throttle_summary(&self) -> Vec<ThrottleSummary> {
        self.tracker.throttle_summary()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    pub fn rate_usage(&self) -> RateUsage {
        self.limiter.usage()
    }

    pub fn scheduler(&self) -> &FairScheduler {
        &self.scheduler
    }

    /// 清空所有模型的冷却状态（运维操作）
    pub fn reset_cooldowns(&self) {
        info!("🔄 手动重置所有模型冷却");
        self.tracker.reset_all();
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvokeError;
    use crate::infrastructure::ManualClock;
    use crate::models::{Completion, Model};
    use crate::services::ScriptedBackend;

    fn orchestrator(backend: ScriptedBackend) -> Orchestrator {
        let config = Config {
            worker_count: 2,
            model_switch_delay_ms: 0,
            all_cooling_delay_ms: 0,
            ..Config::default()
        };
        let registry = Arc::new(
            ModelRegistry::new(vec![Model::primary("p", 1024, 0.5), Model::fallback("f", 1, 1024, 0.5)]).unwrap(),
        );
        Orchestrator::with_backend(&config, registry, Arc::new(backend), Arc::new(ManualClock::new()))
    }

    #[tokio::test]
    async fn test_submit_uses_fallback_and_reports_stats() {
        let backend = ScriptedBackend::new()
            .script("p", [Err(InvokeError::Throttled("Too many requests".to_string()))])
            .script("f", [Ok(Completion::new("done", 40, 10))]);
        let orchestrator = orchestrator(backend);

        let result = orchestrator
            .submit_inference_request("alice", "review this", 40, None)
            .await
            .unwrap();

        assert_eq!(result.model_id, "f");
        assert_eq!(result.total_tokens(), 50);

        let models = orchestrator.model_stats();
        assert_eq!(models.active_cooldowns, 1);
        assert_eq!(orchestrator.throttle_summary()[0].all_time, 1);
        assert_eq!(orchestrator.scheduler_stats().successful_requests, 1);
        assert_eq!(orchestrator.rate_usage().requests_in_window, 1);

        orchestrator.reset_cooldowns();
        assert_eq!(orchestrator.model_stats().active_cooldowns, 0);

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let orchestrator = orchestrator(ScriptedBackend::new());
        orchestrator.shutdown().await;

        let err = orchestrator
            .submit_inference_request("alice", "late", 1, Some(1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::SchedulerStopped));
    }
}

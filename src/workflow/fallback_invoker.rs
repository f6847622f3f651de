//! 模型降级调用 - 流程层
//!
//! 核心职责：定义"一个请求"如何在多个模型之间降级
//!
//! 流程顺序：
//! 1. 取出冷却跟踪器认为可用的模型（全部冷却时短暂等待后使用完整列表）
//! 2. 按优先级逐个调用
//! 3. 成功 → 记录成功并返回
//! 4. 限流 → 记录限流，短暂等待后尝试下一个模型
//! 5. 其他错误 → 立即终止，不再尝试其他模型

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{InvokeError, OrchestrationError};
use crate::infrastructure::Clock;
use crate::models::{AttemptOutcome, AttemptRecord, InferenceRequest, InvocationResult, Model, ModelRegistry};
use crate::services::{CooldownTracker, InferenceBackend};
use crate::utils::logging::truncate_text;

/// 降级流程中的等待参数
#[derive(Debug, Clone, Copy)]
pub struct FallbackSettings {
    /// 限流后切换到下一个模型前的等待
    pub model_switch_delay: Duration,
    /// 所有模型都在冷却时的等待
    pub all_cooling_delay: Duration,
    /// 剩余冷却不超过该值的模型仍参与候选
    pub cooldown_skip_threshold: Duration,
}

impl FallbackSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model_switch_delay: config.model_switch_delay(),
            all_cooling_delay: config.all_cooling_delay(),
            cooldown_skip_threshold: config.cooldown_skip_threshold(),
        }
    }

    /// 不产生任何等待
    pub fn immediate() -> Self {
        Self {
            model_switch_delay: Duration::ZERO,
            all_cooling_delay: Duration::ZERO,
            cooldown_skip_threshold: Duration::ZERO,
        }
    }
}

/// 模型降级调用器
///
/// - 编排单个请求的模型尝试顺序
/// - 决定何时切换模型、何时放弃
/// - 不持有队列，不做限速
pub struct FallbackInvoker {
    registry: Arc<ModelRegistry>,
    tracker: Arc<CooldownTracker>,
    backend: Arc<dyn InferenceBackend>,
    clock: Arc<dyn Clock>,
    settings: FallbackSettings,
}

impl FallbackInvoker {
    pub fn new(
        registry: Arc<ModelRegistry>,
        tracker: Arc<CooldownTracker>,
        backend: Arc<dyn InferenceBackend>,
        clock: Arc<dyn Clock>,
        settings: FallbackSettings,
    ) -> Self {
        Self {
            registry,
            tracker,
            backend,
            clock,
            settings,
        }
    }

    pub async fn invoke(&self, request: &InferenceRequest) -> Result<InvocationResult, OrchestrationError> {
        let candidates = self.candidates().await;
        let mut attempts = Vec::with_capacity(candidates.len());
        let mut last_error = String::new();

        for (idx, model) in candidates.iter().enumerate() {
            info!("🎯 尝试模型: {} (优先级 {})", model.name, model.priority);

            let started = self.clock.now();
            let outcome = self
                .backend
                .invoke(model, model.invocation_params(), request)
                .await;
            let duration = self.clock.now().saturating_duration_since(started);

            match outcome {
                Ok(completion) => {
                    self.tracker.record_success(&model.id);
                    attempts.push(AttemptRecord {
                        model_id: model.id.clone(),
                        outcome: AttemptOutcome::Success,
                        detail: None,
                        duration,
                    });

                    let input_tokens = completion.input_tokens.unwrap_or(request.estimated_tokens);
                    let output_tokens = completion
                        .output_tokens
                        .unwrap_or(completion.text.chars().count() as u64 / 4);

                    info!(
                        "✅ 成功: {} ({:.2}s, {} tokens)",
                        model.name,
                        duration.as_secs_f64(),
                        input_tokens + output_tokens
                    );

                    return Ok(InvocationResult {
                        model_id: model.id.clone(),
                        model_name: model.name.clone(),
                        text: completion.text,
                        input_tokens,
                        output_tokens,
                        duration,
                        queue_wait: Duration::ZERO,
                        attempts,
                    });
                }
                Err(InvokeError::Throttled(detail)) => {
                    self.tracker.record_throttle(&model.id, &detail);
                    attempts.push(AttemptRecord {
                        model_id: model.id.clone(),
                        outcome: AttemptOutcome::Throttled,
                        detail: Some(detail.clone()),
                        duration,
                    });
                    last_error = detail;

                    if idx + 1 < candidates.len() {
                        warn!("↪️ {} 被限流，切换到下一个模型", model.name);
                        self.clock.sleep(self.settings.model_switch_delay).await;
                    }
                }
                Err(InvokeError::Permanent(detail)) => {
                    error!(
                        "❌ {} 返回不可重试错误，不再尝试其他模型: {}",
                        model.name,
                        truncate_text(&detail, 100)
                    );
                    self.tracker.record_failure(&model.id);
                    attempts.push(AttemptRecord {
                        model_id: model.id.clone(),
                        outcome: AttemptOutcome::Failed,
                        detail: Some(detail.clone()),
                        duration,
                    });
                    return Err(OrchestrationError::Permanent {
                        model_id: model.id.clone(),
                        detail,
                        attempts,
                    });
                }
            }
        }

        error!("❌ 所有 {} 个模型均被限流", attempts.len());
        Err(OrchestrationError::Exhausted { attempts, last_error })
    }

    /// 本次请求的候选模型
    ///
    /// 全部冷却时不死等，短暂等待后退回完整列表。
    async fn candidates(&self) -> Vec<Model> {
        let eligible = self
            .tracker
            .eligible_models(self.settings.cooldown_skip_threshold);
        if !eligible.is_empty() {
            return eligible;
        }

        warn!(
            "⚠️ 所有模型都在冷却中，等待 {:.1}s 后尝试全部模型...",
            self.settings.all_cooling_delay.as_secs_f64()
        );
        self.clock.sleep(self.settings.all_cooling_delay).await;
        self.registry.list_models().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ManualClock;
    use crate::models::Completion;
    use crate::services::ScriptedBackend;

    fn model(id: &str, priority: u32) -> Model {
        Model {
            id: id.to_string(),
            name: id.to_uppercase(),
            priority,
            max_tokens: 4096,
            temperature: 0.7,
            base_cooldown_secs: 10,
            supports_extended_reasoning: false,
        }
    }

    fn throttle() -> Result<Completion, InvokeError> {
        Err(InvokeError::Throttled("ThrottlingException: Rate exceeded".to_string()))
    }

    struct Fixture {
        invoker: FallbackInvoker,
        tracker: Arc<CooldownTracker>,
        backend: Arc<ScriptedBackend>,
        clock: ManualClock,
    }

    fn fixture(backend: ScriptedBackend, settings: FallbackSettings) -> Fixture {
        let registry = Arc::new(ModelRegistry::new(vec![model("a", 1), model("b", 2), model("c", 3)]).unwrap());
        let clock = ManualClock::new();
        let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());
        let tracker = Arc::new(CooldownTracker::new(registry.clone(), clock_dyn.clone()));
        let backend = Arc::new(backend);
        let invoker = FallbackInvoker::new(registry, tracker.clone(), backend.clone(), clock_dyn, settings);
        Fixture {
            invoker,
            tracker,
            backend,
            clock,
        }
    }

    #[tokio::test]
    async fn test_cascade_throttle_throttle_success() {
        let backend = ScriptedBackend::new()
            .script("a", [throttle()])
            .script("b", [throttle()])
            .script("c", [Ok(Completion::new("审阅意见", 300, 120))]);
        let f = fixture(backend, FallbackSettings::immediate());

        let result = f.invoker.invoke(&InferenceRequest::new("prompt", 300)).await.unwrap();

        assert_eq!(result.model_id, "c");
        assert_eq!(result.output_tokens, 120);
        assert_eq!(result.throttled_models(), vec!["a", "b"]);
        assert_eq!(result.attempts.len(), 3);

        let stats = f.tracker.stats();
        assert_eq!(stats.model("a").unwrap().total_throttles, 1);
        assert_eq!(stats.model("b").unwrap().total_throttles, 1);
        assert_eq!(stats.model("c").unwrap().successful_requests, 1);
        assert_eq!(stats.model("c").unwrap().total_throttles, 0);
    }

    #[tokio::test]
    async fn test_permanent_error_aborts_without_cascade() {
        let backend = ScriptedBackend::new().script(
            "a",
            [Err(InvokeError::Permanent("ValidationException: malformed".to_string()))],
        );
        let f = fixture(backend, FallbackSettings::immediate());

        let err = f.invoker.invoke(&InferenceRequest::new("prompt", 10)).await.unwrap_err();

        assert!(matches!(&err, OrchestrationError::Permanent { model_id, .. } if model_id == "a"));
        assert_eq!(err.attempts().len(), 1);
        assert_eq!(f.backend.calls().len(), 1);
        assert!(f.tracker.is_eligible("a").is_eligible());
    }

    #[tokio::test]
    async fn test_exhaustion_reports_every_attempt() {
        let backend = ScriptedBackend::new()
            .script("a", [throttle()])
            .script("b", [throttle()])
            .script("c", [Err(InvokeError::Throttled("503 Service Unavailable".to_string()))]);
        let settings = FallbackSettings {
            model_switch_delay: Duration::from_secs(1),
            ..FallbackSettings::immediate()
        };
        let f = fixture(backend, settings);

        let err = f.invoker.invoke(&InferenceRequest::new("prompt", 10)).await.unwrap_err();

        match &err {
            OrchestrationError::Exhausted { attempts, last_error } => {
                let ids: Vec<_> = attempts.iter().map(|a| a.model_id.as_str()).collect();
                assert_eq!(ids, vec!["a", "b", "c"]);
                assert_eq!(last_error, "503 Service Unavailable");
            }
            other => panic!("应为 Exhausted: {:?}", other),
        }
        // 最后一个模型之后不再等待
        assert_eq!(f.clock.sleeps(), vec![Duration::from_secs(1), Duration::from_secs(1)]);
    }

    #[tokio::test]
    async fn test_cooling_models_are_skipped() {
        let f = fixture(ScriptedBackend::new(), FallbackSettings::immediate());
        f.tracker.record_throttle("a", "");

        let result = f.invoker.invoke(&InferenceRequest::new("prompt", 10)).await.unwrap();

        assert_eq!(result.model_id, "b");
        assert_eq!(f.backend.call_count("a"), 0);
    }

    #[tokio::test]
    async fn test_all_cooling_falls_back_to_full_list() {
        let settings = FallbackSettings {
            all_cooling_delay: Duration::from_secs(2),
            ..FallbackSettings::immediate()
        };
        let f = fixture(ScriptedBackend::new(), settings);
        for id in ["a", "b", "c"] {
            f.tracker.record_throttle(id, "");
        }

        let result = f.invoker.invoke(&InferenceRequest::new("prompt", 10)).await.unwrap();

        assert_eq!(result.model_id, "a");
        assert_eq!(f.clock.sleeps(), vec![Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn test_missing_usage_uses_estimates() {
        let backend = ScriptedBackend::new().script("a", [Ok(Completion::text_only("12345678"))]);
        let f = fixture(backend, FallbackSettings::immediate());

        let result = f.invoker.invoke(&InferenceRequest::new("prompt", 777)).await.unwrap();

        assert_eq!(result.input_tokens, 777);
        assert_eq!(result.output_tokens, 2);
        assert_eq!(result.total_tokens(), 779);
    }

    #[tokio::test]
    async fn test_missing_usage_counts_characters_not_bytes() {
        let backend = ScriptedBackend::new().script("a", [Ok(Completion::text_only("论证结构清晰，引用完整"))]);
        let f = fixture(backend, FallbackSettings::immediate());

        let result = f.invoker.invoke(&InferenceRequest::new("prompt", 10)).await.unwrap();

        // 11 个字符（33 字节）
        assert_eq!(result.output_tokens, 2);
    }

    #[tokio::test]
    async fn test_reasoning_model_params_passed_to_backend() {
        let mut reasoning = model("r", 1);
        reasoning.supports_extended_reasoning = true;
        let registry = Arc::new(ModelRegistry::new(vec![reasoning]).unwrap());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let tracker = Arc::new(CooldownTracker::new(registry.clone(), clock.clone()));
        let backend = Arc::new(ScriptedBackend::new());
        let invoker = FallbackInvoker::new(registry, tracker, backend.clone(), clock, FallbackSettings::immediate());

        invoker.invoke(&InferenceRequest::new("think", 5)).await.unwrap();

        let call = &backend.calls()[0];
        assert_eq!(call.params.max_output_tokens, 4096 - 2000);
        assert_eq!(call.params.reasoning_budget, Some(2000));
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 开启扩展推理时预留的 token 数
pub const REASONING_BUDGET_TOKENS: u32 = 2000;

/// 主模型的基础冷却时间（秒）
pub const PRIMARY_BASE_COOLDOWN_SECS: u64 = 10;
/// 备用模型的基础冷却时间（秒）
pub const FALLBACK_BASE_COOLDOWN_SECS: u64 = 5;

/// 模型定义
///
/// 加载后不可变，由 `ModelRegistry` 独占持有。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub name: String,
    /// 越小越先尝试
    pub priority: u32,
    pub max_tokens: u32,
    pub temperature: f32,
    pub base_cooldown_secs: u64,
    #[serde(default)]
    pub supports_extended_reasoning: bool,
}

impl Model {
    /// 创建主模型（优先级 1）
    pub fn primary(id: impl Into<String>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            id: id.into(),
            name: "Primary".to_string(),
            priority: 1,
            max_tokens,
            temperature,
            base_cooldown_secs: PRIMARY_BASE_COOLDOWN_SECS,
            supports_extended_reasoning: false,
        }
    }

    /// 创建备用模型，`ordinal` 从 1 开始，优先级为 `ordinal + 1`
    pub fn fallback(id: impl Into<String>, ordinal: u32, max_tokens: u32, temperature: f32) -> Self {
        Self {
            id: id.into(),
            name: format!("Fallback {}", ordinal),
            priority: ordinal + 1,
            max_tokens,
            temperature,
            base_cooldown_secs: FALLBACK_BASE_COOLDOWN_SECS,
            supports_extended_reasoning: false,
        }
    }

    pub fn base_cooldown(&self) -> Duration {
        Duration::from_secs(self.base_cooldown_secs)
    }

    /// 生成本模型的调用参数
    pub fn invocation_params(&self) -> InvocationParams {
        if self.supports_extended_reasoning {
            InvocationParams {
                max_output_tokens: self.max_tokens.saturating_sub(REASONING_BUDGET_TOKENS),
                temperature: self.temperature,
                reasoning_budget: Some(REASONING_BUDGET_TOKENS),
            }
        } else {
            InvocationParams {
                max_output_tokens: self.max_tokens,
                temperature: self.temperature,
                reasoning_budget: None,
            }
        }
    }
}

/// 一次模型调用的参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvocationParams {
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// 扩展推理预算，None 表示不开启
    pub reasoning_budget: Option<u32>,
}

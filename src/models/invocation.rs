//! 推理请求与结果

use serde::Serialize;
use std::time::Duration;

/// 调用方提交的推理请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRequest {
    pub prompt: String,
    pub system: Option<String>,
    /// 预估 token 消耗，用于限速和缺省 token 统计
    pub estimated_tokens: u64,
}

impl InferenceRequest {
    pub fn new(prompt: impl Into<String>, estimated_tokens: u64) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            estimated_tokens,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// 推理服务的原始返回
///
/// 服务未返回用量时 token 字段为 None。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

impl Completion {
    pub fn new(text: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            text: text.into(),
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
        }
    }

    /// 不带用量信息的返回
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            input_tokens: None,
            output_tokens: None,
        }
    }
}

/// 单次模型尝试的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Throttled,
    Failed,
}

/// 单次模型尝试记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub model_id: String,
    pub outcome: AttemptOutcome,
    pub detail: Option<String>,
    pub duration: Duration,
}

/// 成功的推理结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationResult {
    pub model_id: String,
    pub model_name: String,
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// 成功那次调用的耗时
    pub duration: Duration,
    /// 在队列和限速器中等待的时间（由调度器填写）
    pub queue_wait: Duration,
    /// 包括之前被限流的所有尝试
    pub attempts: Vec<AttemptRecord>,
}

impl InvocationResult {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// 成功之前被限流的模型
    pub fn throttled_models(&self) -> Vec<&str> {
        self.attempts
            .iter()
            .filter(|a| a.outcome == AttemptOutcome::Throttled)
            .map(|a| a.model_id.as_str())
            .collect()
    }
}

//! LLM 服务 - 业务能力层
//!
//! 只负责"调用一次模型"的能力，不关心冷却、限速和模型切换
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点
//! - 兼容 OpenAI API 的服务（如 Bedrock 网关、Azure、Gemini 等）

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
        ReasoningEffort,
    },
    Client,
};
use backoff::ExponentialBackoff;
use futures::future::BoxFuture;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::InvokeError;
use crate::models::{Completion, InferenceRequest, InvocationParams, Model};
use crate::services::classifier::classify;

/// 远程推理能力
///
/// 实现方必须把失败分类为 [`InvokeError::Throttled`] 或 [`InvokeError::Permanent`]。
pub trait InferenceBackend: Send + Sync {
    fn invoke<'a>(
        &'a self,
        model: &'a Model,
        params: InvocationParams,
        request: &'a InferenceRequest,
    ) -> BoxFuture<'a, Result<Completion, InvokeError>>;
}

/// LLM 服务
///
/// 职责：
/// - 调用兼容 OpenAI 的 chat completion 接口
/// - 把错误分类为限流 / 其他
/// - 不做重试，不切换模型
pub struct LlmService {
    client: Client<OpenAIConfig>,
}

impl LlmService {
    /// 创建新的 LLM 服务
    pub fn new(config: &Config) -> Self {
        Self::from_client(build_client(config))
    }

    fn from_client(client: Client<OpenAIConfig>) -> Self {
        Self { client }
    }

    /// 调用一次模型
    ///
    /// # 参数
    /// - `model_id`: 模型 ID
    /// - `params`: 调用参数（token 上限、温度、推理预算）
    /// - `request`: 提示词
    ///
    /// # 返回
    /// 返回文本和 token 用量；服务未返回用量时对应字段为 None
    pub async fn send_to_llm(
        &self,
        model_id: &str,
        params: InvocationParams,
        request: &InferenceRequest,
    ) -> Result<Completion, InvokeError> {
        debug!("调用 LLM API，模型: {}", model_id);
        debug!("用户消息长度: {} 字符", request.prompt.chars().count());
        if let Some(budget) = params.reasoning_budget {
            debug!("🧠 扩展推理已开启 (预算: {} tokens)", budget);
        }

        let chat_request = build_chat_request(model_id, params, request)?;

        let response = self.client.chat().create(chat_request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            classify(e.to_string())
        })?;

        debug!("LLM API 调用成功");

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| InvokeError::Permanent(format!("LLM 返回内容为空 (模型: {})", model_id)))?;

        let usage = response.usage.as_ref();
        Ok(Completion {
            text: text.trim().to_string(),
            input_tokens: usage.map(|u| u64::from(u.prompt_tokens)),
            output_tokens: usage.map(|u| u64::from(u.completion_tokens)),
        })
    }
}

impl InferenceBackend for LlmService {
    fn invoke<'a>(
        &'a self,
        model: &'a Model,
        params: InvocationParams,
        request: &'a InferenceRequest,
    ) -> BoxFuture<'a, Result<Completion, InvokeError>> {
        Box::pin(self.send_to_llm(&model.id, params, request))
    }
}

fn build_client(config: &Config) -> Client<OpenAIConfig> {
    let openai_config = OpenAIConfig::new()
        .with_api_key(&config.llm_api_key)
        .with_api_base(&config.llm_api_base_url);

    Client::with_config(openai_config).with_backoff(single_attempt_backoff())
}

/// 每次调用只发一次请求，429 / 5xx 直接返回给调用方
fn single_attempt_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        max_elapsed_time: Some(Duration::ZERO),
        ..Default::default()
    }
}

/// 扩展推理预算对应的推理强度
fn reasoning_effort_for(budget: u32) -> ReasoningEffort {
    match budget {
        0..=1024 => ReasoningEffort::Low,
        1025..=2048 => ReasoningEffort::Medium,
        _ => ReasoningEffort::High,
    }
}

fn build_chat_request(
    model_id: &str,
    params: InvocationParams,
    request: &InferenceRequest,
) -> Result<CreateChatCompletionRequest, InvokeError> {
    let mut messages = Vec::new();

    if let Some(sys_msg) = &request.system {
        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(sys_msg.as_str())
            .build()
            .map_err(|e| InvokeError::Permanent(e.to_string()))?;
        messages.push(ChatCompletionRequestMessage::System(system_msg));
    }

    let user_msg = ChatCompletionRequestUserMessageArgs::default()
        .content(request.prompt.as_str())
        .build()
        .map_err(|e| InvokeError::Permanent(e.to_string()))?;
    messages.push(ChatCompletionRequestMessage::User(user_msg));

    let mut args = CreateChatCompletionRequestArgs::default();
    args.model(model_id)
        .messages(messages)
        .temperature(params.temperature)
        .max_completion_tokens(params.max_output_tokens);
    if let Some(budget) = params.reasoning_budget {
        args.reasoning_effort(reasoning_effort_for(budget));
    }

    args.build().map_err(|e| InvokeError::Permanent(e.to_string()))
}

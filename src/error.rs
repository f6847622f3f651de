use thiserror::Error;

use crate::models::invocation::AttemptRecord;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 单次模型调用错误
    #[error("模型调用错误: {0}")]
    Invoke(#[from] InvokeError),
    /// 调度层终止错误
    #[error("调度错误: {0}")]
    Orchestration(#[from] OrchestrationError),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 模型目录为空
    #[error("模型目录为空，至少需要一个模型")]
    EmptyCatalogue,
    /// 模型 ID 为空
    #[error("模型 ID 不能为空 (名称: {name})")]
    EmptyModelId { name: String },
    /// 模型 ID 重复
    #[error("模型 ID 重复: {id}")]
    DuplicateModel { id: String },
    /// max_tokens 为 0
    #[error("模型 {id} 的 max_tokens 不能为 0")]
    ZeroMaxTokens { id: String },
    /// temperature 非法
    #[error("模型 {id} 的 temperature 无效: {value}")]
    InvalidTemperature { id: String, value: f32 },
    /// 读取文件失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// 推理服务返回的已分类错误
///
/// 只区分两类：限流/瞬时不可用（可以换模型重试）和其他（直接放弃）。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvokeError {
    /// 限流、请求过多、服务暂时不可用
    #[error("模型被限流: {0}")]
    Throttled(String),
    /// 请求错误、无权限、参数错误等不可重试错误
    #[error("模型调用失败: {0}")]
    Permanent(String),
}

impl InvokeError {
    /// 是否为限流类错误
    pub fn is_throttle(&self) -> bool {
        matches!(self, InvokeError::Throttled(_))
    }

    /// 错误详情
    pub fn detail(&self) -> &str {
        match self {
            InvokeError::Throttled(detail) | InvokeError::Permanent(detail) => detail,
        }
    }
}

/// `submit_inference_request` 的终止错误
///
/// 每个变体都带着完整的尝试记录，调用方可以据此决定稍后重试还是提示用户。
#[derive(Debug, Clone, Error)]
pub enum OrchestrationError {
    /// 不可重试错误，不再尝试其他模型
    #[error("模型 {model_id} 返回不可重试错误: {detail}")]
    Permanent {
        model_id: String,
        detail: String,
        attempts: Vec<AttemptRecord>,
    },
    /// 所有候选模型都被限流
    #[error(
        "所有 {} 个模型均被限流 (已尝试: {}), 最后错误: {last_error}",
        .attempts.len(),
        attempted_models(.attempts)
    )]
    Exhausted {
        attempts: Vec<AttemptRecord>,
        last_error: String,
    },
    /// 调度器已停止，请求被放弃
    #[error("调度器已停止，请求未被执行")]
    SchedulerStopped,
}

impl OrchestrationError {
    /// 尝试记录
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            OrchestrationError::Permanent { attempts, .. }
            | OrchestrationError::Exhausted { attempts, .. } => attempts,
            OrchestrationError::SchedulerStopped => &[],
        }
    }

    /// 是否属于"稍后再试"类错误
    pub fn is_retry_later(&self) -> bool {
        matches!(
            self,
            OrchestrationError::Exhausted { .. } | OrchestrationError::SchedulerStopped
        )
    }
}

fn attempted_models(attempts: &[AttemptRecord]) -> String {
    attempts
        .iter()
        .map(|a| a.model_id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

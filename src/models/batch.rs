use serde::{Deserialize, Serialize};

use crate::models::invocation::InferenceRequest;

/// 批量请求文件
///
/// ```toml
/// [[requests]]
/// caller = "session-1"
/// prompt = "请审阅以下章节……"
/// estimated_tokens = 1200
/// priority = 3
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestBatch {
    #[serde(default)]
    pub requests: Vec<BatchRequest>,
}

/// 批量文件中的单个请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub caller: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default)]
    pub estimated_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
}

impl BatchRequest {
    pub fn to_request(&self) -> InferenceRequest {
        InferenceRequest {
            prompt: self.prompt.clone(),
            system: self.system.clone(),
            estimated_tokens: self.estimated_tokens,
        }
    }
}

//! 脚本化推理后端
//!
//! 按模型预设返回序列的内存实现，用于测试和演练，不访问网络。

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::error::InvokeError;
use crate::infrastructure::ManualClock;
use crate::models::{Completion, InferenceRequest, InvocationParams, Model};
use crate::services::llm_service::InferenceBackend;

/// 一次被记录的调用
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub model_id: String,
    pub prompt: String,
    pub params: InvocationParams,
}

/// 脚本化后端
///
/// 每个模型有一个返回队列，队列耗尽后返回默认成功结果。
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<String, VecDeque<Result<Completion, InvokeError>>>>,
    calls: Mutex<Vec<RecordedCall>>,
    latency: Option<(ManualClock, Duration)>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为模型追加返回序列
    pub fn script(
        self,
        model_id: &str,
        outcomes: impl IntoIterator<Item = Result<Completion, InvokeError>>,
    ) -> Self {
        self.scripts
            .lock()
            .entry(model_id.to_string())
            .or_default()
            .extend(outcomes);
        self
    }

    /// 每次调用让手动时钟前进 `latency`，模拟调用耗时
    pub fn with_latency(mut self, clock: ManualClock, latency: Duration) -> Self {
        self.latency = Some((clock, latency));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, model_id: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.model_id == model_id).count()
    }

    fn next_outcome(&self, model: &Model, request: &InferenceRequest) -> Result<Completion, InvokeError> {
        self.scripts
            .lock()
            .get_mut(&model.id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Ok(Completion::new(
                    format!("[{}] {}", model.id, request.prompt),
                    request.prompt.chars().count() as u64 / 4,
                    16,
                ))
            })
    }
}

impl InferenceBackend for ScriptedBackend {
    fn invoke<'a>(
        &'a self,
        model: &'a Model,
        params: InvocationParams,
        request: &'a InferenceRequest,
    ) -> BoxFuture<'a, Result<Completion, InvokeError>> {
        Box::pin(async move {
            self.calls.lock().push(RecordedCall {
                model_id: model.id.clone(),
                prompt: request.prompt.clone(),
                params,
            });
            if let Some((clock, latency)) = &self.latency {
                clock.advance(*latency);
            }
            tokio::task::yield_now().await;
            self.next_outcome(model, request)
        })
    }
}

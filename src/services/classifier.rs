//! 错误分类
//!
//! 把推理服务的错误文本归为"限流类"或"其他"，决定是换模型还是直接放弃。

use regex::Regex;
use std::sync::LazyLock;

use crate::error::InvokeError;

static THROTTLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)throttl|rate[\s_-]?limit|too[\s_-]?many[\s_-]?requests|\b429\b|\b503\b|service[\s_-]?unavailable|overloaded",
    )
    .expect("throttle pattern is a valid regex")
});

/// 是否为限流/瞬时不可用错误
pub fn is_throttling(detail: &str) -> bool {
    THROTTLE_PATTERN.is_match(detail)
}

/// 按错误文本分类
pub fn classify(detail: impl Into<String>) -> InvokeError {
    let detail = detail.into();
    if is_throttling(&detail) {
        InvokeError::Throttled(detail)
    } else {
        InvokeError::Permanent(detail)
    }
}

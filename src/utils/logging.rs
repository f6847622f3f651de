//! 日志工具模块
//!
//! 提供日志初始化、格式化和输出的辅助函数

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::ModelRegistry;
use crate::orchestrator::SchedulerStats;
use crate::services::{ThrottleSummary, TrackerStats};

/// 初始化日志
///
/// 优先使用 `RUST_LOG`；未设置时根据 `verbose` 选择 debug 或 info。
/// 重复初始化不会报错。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录启动信息
///
/// # 参数
/// - `config`: 配置
/// - `registry`: 模型注册表
pub fn log_startup(config: &Config, registry: &ModelRegistry) {
    info!("{}", "=".repeat(60));
    info!("🚀 推理编排器启动");
    info!("📊 工作协程数: {}", config.worker_count);
    info!(
        "⏱️ 速率上限: {} 次/分钟, {} tokens/分钟",
        format_limit(config.requests_per_minute as u64),
        format_limit(config.tokens_per_minute)
    );
    info!("⚖️ 公平惩罚系数: {}", config.fairness_penalty);
    info!("🤖 已加载 {} 个模型:", registry.len());
    for model in registry.list_models() {
        info!(
            "   {}. {} ({}) - 基础冷却 {}s{}",
            model.priority,
            model.name,
            model.id,
            model.base_cooldown_secs,
            if model.supports_extended_reasoning { " 🧠 扩展推理" } else { "" }
        );
    }
    info!("{}", "=".repeat(60));
}

/// 记录批量请求加载信息
///
/// # 参数
/// - `total`: 请求总数
/// - `callers`: 调用方数量
pub fn log_requests_loaded(total: usize, callers: usize) {
    info!("✓ 找到 {} 个待处理的请求，来自 {} 个调用方", total, callers);
}

/// 打印最终统计信息
///
/// # 参数
/// - `scheduler`: 调度统计
/// - `models`: 模型统计
/// - `throttles`: 限流汇总
pub fn print_final_stats(scheduler: &SchedulerStats, models: &TrackerStats, throttles: &[ThrottleSummary]) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", scheduler.successful_requests, scheduler.total_requests);
    info!(
        "❌ 失败: {} (其中 {} 个因全部模型限流)",
        scheduler.failed_requests, scheduler.throttled_requests
    );
    info!(
        "⏳ 平均排队: {:.2}s, 平均执行: {:.2}s",
        scheduler.avg_wait_secs, scheduler.avg_execution_secs
    );
    info!("{}", "─".repeat(60));
    for model in &models.models {
        info!(
            "🤖 {}: 尝试 {}, 成功率 {:.1}%, 限流 {} 次",
            model.name, model.total_attempts, model.success_rate, model.total_throttles
        );
    }
    for summary in throttles.iter().filter(|s| s.all_time > 0) {
        info!(
            "🚫 {}: 近 5 分钟 {} 次, 近 1 小时 {} 次",
            summary.name, summary.last_5_minutes, summary.last_hour
        );
    }
    info!("{}", "=".repeat(60));
}

fn format_limit(limit: u64) -> String {
    if limit == 0 {
        "不限".to_string()
    } else {
        limit.to_string()
    }
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text_counts_chars() {
        assert_eq!(truncate_text("限流异常", 2), "限流...");
        assert_eq!(truncate_text("short", 10), "short");
    }

    #[test]
    fn test_format_limit() {
        assert_eq!(format_limit(0), "不限");
        assert_eq!(format_limit(30), "30");
    }
}

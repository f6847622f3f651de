use anyhow::{Context, Result};
use futures::future::join_all;
use review_inference::models::load_request_batch;
use review_inference::utils::logging;
use review_inference::{Config, Orchestrator};
use std::collections::HashSet;
use std::path::Path;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::from_env();

    // 初始化日志
    logging::init(config.verbose_logging);

    // 初始化编排器
    let orchestrator = Orchestrator::initialize(&config)
        .await
        .context("初始化编排器失败")?;

    // 加载批量请求
    let requests = load_request_batch(Path::new(&config.request_file)).await?;
    if requests.is_empty() {
        warn!("⚠️ 没有找到待处理的请求，程序结束");
        orchestrator.shutdown().await;
        return Ok(());
    }

    let callers: HashSet<&str> = requests.iter().map(|r| r.caller.as_str()).collect();
    logging::log_requests_loaded(requests.len(), callers.len());

    // 一次性提交，由调度器决定执行顺序
    let tickets: Vec<_> = requests
        .iter()
        .map(|r| (r, orchestrator.submit(&r.caller, r.to_request(), r.priority)))
        .collect();

    let outcomes = join_all(tickets.into_iter().map(|(request, ticket)| async move {
        (request, ticket.wait().await)
    }))
    .await;

    for (request, outcome) in &outcomes {
        match outcome {
            Ok(result) => info!(
                "✓ [{}] {} 完成: {} tokens, 排队 {:.2}s, 执行 {:.2}s",
                request.caller,
                result.model_name,
                result.total_tokens(),
                result.queue_wait.as_secs_f64(),
                result.duration.as_secs_f64()
            ),
            Err(e) if e.is_retry_later() => warn!("⏳ [{}] 稍后重试: {}", request.caller, e),
            Err(e) => error!("❌ [{}] {}", request.caller, e),
        }
    }

    let scheduler_stats = orchestrator.scheduler_stats();
    logging::print_final_stats(
        &scheduler_stats,
        &orchestrator.model_stats(),
        &orchestrator.throttle_summary(),
    );
    println!("{}", serde_json::to_string_pretty(&orchestrator.model_stats())?);

    orchestrator.shutdown().await;

    Ok(())
}

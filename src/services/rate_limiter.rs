//! 全局限速器 - 业务能力层
//!
//! 滑动窗口准入闸门：限制每分钟总调用次数（以及可选的 token 数），与模型无关。
//! 超限时只会延迟请求，从不拒绝。

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::infrastructure::Clock;

/// 滑动窗口长度
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct RateWindow {
    /// (准入时间, 预估 token)
    entries: VecDeque<(Instant, u64)>,
    tokens: u64,
}

impl RateWindow {
    fn prune(&mut self, now: Instant) {
        while let Some((admitted_at, cost)) = self.entries.front().copied() {
            if now.duration_since(admitted_at) >= RATE_WINDOW {
                self.entries.pop_front();
                self.tokens -= cost;
            } else {
                break;
            }
        }
    }

    fn push(&mut self, now: Instant, cost: u64) {
        self.entries.push_back((now, cost));
        self.tokens += cost;
    }
}

/// 当前窗口用量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateUsage {
    pub requests_in_window: usize,
    pub tokens_in_window: u64,
    pub requests_per_minute: usize,
    pub tokens_per_minute: u64,
}

/// 全局限速器
pub struct RateLimiter {
    window: Mutex<RateWindow>,
    /// 0 表示不限制
    requests_per_minute: usize,
    /// 0 表示不限制
    tokens_per_minute: u64,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: usize, tokens_per_minute: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            window: Mutex::new(RateWindow::default()),
            requests_per_minute,
            tokens_per_minute,
            clock,
        }
    }

    /// 等待直到窗口有空余，然后登记本次请求
    ///
    /// 返回实际等待的总时长。
    pub async fn admit(&self, estimated_cost: u64) -> Duration {
        let mut waited = Duration::ZERO;

        loop {
            let wait = {
                let mut window = self.window.lock();
                let now = self.clock.now();
                window.prune(now);

                match self.required_wait(&window, now, estimated_cost) {
                    None => {
                        window.push(now, estimated_cost);
                        debug!(
                            "✓ 准入 (窗口内 {} 次请求, {} tokens)",
                            window.entries.len(),
                            window.tokens
                        );
                        return waited;
                    }
                    Some(wait) => wait,
                }
            };

            info!("⏸️ 已达到速率上限，等待 {:.1}s...", wait.as_secs_f64());
            self.clock.sleep(wait).await;
            waited += wait;
        }
    }

    /// 需要等待多久才能容纳本次请求；None 表示可以立即准入
    fn required_wait(&self, window: &RateWindow, now: Instant, cost: u64) -> Option<Duration> {
        let request_wait = if self.requests_per_minute > 0
            && window.entries.len() >= self.requests_per_minute
        {
            // 需要让最早的若干条移出窗口
            let excess = window.entries.len() + 1 - self.requests_per_minute;
            window
                .entries
                .get(excess - 1)
                .map(|(admitted_at, _)| expiry_wait(*admitted_at, now))
        } else {
            None
        };

        let token_wait = if self.tokens_per_minute > 0
            && !window.entries.is_empty()
            && window.tokens + cost > self.tokens_per_minute
        {
            // 单个超大请求在窗口清空后放行，不会永久阻塞
            let mut remaining = window.tokens;
            let mut wait = None;
            for (admitted_at, entry_cost) in &window.entries {
                remaining -= entry_cost;
                wait = Some(expiry_wait(*admitted_at, now));
                if remaining + cost <= self.tokens_per_minute {
                    break;
                }
            }
            wait
        } else {
            None
        };

        match (request_wait, token_wait) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn usage(&self) -> RateUsage {
        let mut window = self.window.lock();
        window.prune(self.clock.now());
        RateUsage {
            requests_in_window: window.entries.len(),
            tokens_in_window: window.tokens,
            requests_per_minute: self.requests_per_minute,
            tokens_per_minute: self.tokens_per_minute,
        }
    }
}

fn expiry_wait(admitted_at: Instant, now: Instant) -> Duration {
    (admitted_at + RATE_WINDOW).saturating_duration_since(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ManualClock;

    fn limiter(rpm: usize, tpm: u64) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new();
        (RateLimiter::new(rpm, tpm, Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_admits_immediately_below_ceiling() {
        let (limiter, clock) = limiter(3, 0);
        for _ in 0..3 {
            assert_eq!(limiter.admit(100).await, Duration::ZERO);
        }
        assert!(clock.sleeps().is_empty());
        assert_eq!(limiter.usage().requests_in_window, 3);
    }

    #[tokio::test]
    async fn test_request_over_ceiling_waits_for_oldest_to_expire() {
        let (limiter, clock) = limiter(3, 0);
        for _ in 0..3 {
            limiter.admit(0).await;
            clock.advance(Duration::from_secs(10));
        }
        // t = 30s，最早的一条在 t = 60s 移出窗口
        let waited = limiter.admit(0).await;
        assert_eq!(waited, Duration::from_secs(30));
        assert_eq!(clock.elapsed(), Duration::from_secs(60));

        let usage = limiter.usage();
        assert_eq!(usage.requests_in_window, 3);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let (limiter, clock) = limiter(2, 0);
        limiter.admit(0).await;
        limiter.admit(0).await;
        clock.advance(RATE_WINDOW);
        assert_eq!(limiter.admit(0).await, Duration::ZERO);
        assert_eq!(limiter.usage().requests_in_window, 1);
    }

    #[tokio::test]
    async fn test_token_ceiling() {
        let (limiter, clock) = limiter(0, 1000);
        limiter.admit(600).await;
        clock.advance(Duration::from_secs(20));
        limiter.admit(300).await;

        // 600 + 300 + 500 > 1000，需要等第一条移出
        let waited = limiter.admit(500).await;
        assert_eq!(waited, Duration::from_secs(40));
        assert_eq!(limiter.usage().tokens_in_window, 800);
    }

    #[tokio::test]
    async fn test_oversized_request_admitted_once_window_clears() {
        let (limiter, clock) = limiter(0, 100);
        limiter.admit(50).await;
        let waited = limiter.admit(500).await;
        assert_eq!(waited, RATE_WINDOW);
        assert_eq!(clock.elapsed(), RATE_WINDOW);
        assert_eq!(limiter.usage().tokens_in_window, 500);
    }

    #[test]
    fn test_usage_reports_configured_limits() {
        let (limiter, _clock) = limiter(30, 5000);
        tokio_test::block_on(limiter.admit(120));

        let usage = limiter.usage();
        assert_eq!(usage.requests_in_window, 1);
        assert_eq!(usage.tokens_in_window, 120);
        assert_eq!(usage.requests_per_minute, 30);
        assert_eq!(usage.tokens_per_minute, 5000);
    }

    #[tokio::test]
    async fn test_unlimited_when_zero() {
        let (limiter, clock) = limiter(0, 0);
        for _ in 0..100 {
            limiter.admit(10_000).await;
        }
        assert!(clock.sleeps().is_empty());
    }
}

//! 时钟 - 基础设施层
//!
//! 持有"当前时间"和"等待"两种能力，冷却、限速、模型切换都只通过它感知时间

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 时钟能力
///
/// 职责：
/// - 提供单调时间 `now()`
/// - 提供异步等待 `sleep()`
/// - 不认识模型 / 请求
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// 真实时钟，等待基于 tokio 定时器
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// 手动时钟
///
/// `sleep()` 立即把时间向前拨动并返回，测试中不产生真实等待。
/// clone 出来的实例共享同一个时间。
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    state: Arc<Mutex<ManualState>>,
}

#[derive(Debug, Default)]
struct ManualState {
    offset: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Arc::new(Mutex::new(ManualState::default())),
        }
    }

    /// 拨动时间
    pub fn advance(&self, duration: Duration) {
        self.state.lock().offset += duration;
    }

    /// 自创建以来经过的（虚拟）时间
    pub fn elapsed(&self) -> Duration {
        self.state.lock().offset
    }

    /// 所有 `sleep()` 调用的时长，按调用顺序
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().sleeps.clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.state.lock().offset
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        {
            let mut state = self.state.lock();
            state.offset += duration;
            state.sleeps.push(duration);
        }
        // 让出执行权，保持与真实等待相同的调度点
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_sleep_advances_time() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.sleep(Duration::from_secs(5)).await;
        clock.advance(Duration::from_millis(250));

        assert_eq!(clock.now() - start, Duration::from_millis(5250));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5)]);

        let shared = clock.clone();
        shared.advance(Duration::from_secs(1));
        assert_eq!(clock.elapsed(), Duration::from_millis(6250));
    }

    #[tokio::test]
    async fn test_system_clock_sleep() {
        let clock = SystemClock;
        let start = clock.now();
        clock.sleep(Duration::from_millis(5)).await;
        assert!(clock.now() - start >= Duration::from_millis(5));
    }
}

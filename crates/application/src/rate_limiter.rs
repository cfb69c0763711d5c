//! 按来源限流的令牌桶
//!
//! 每个来源（通常是客户端 IP）一个桶，容量等于窗口内允许的请求数，
//! 每隔 `window / capacity` 恢复一个令牌，直到装满。令牌在访问时按流逝时间惰性补充，
//! 因此各个桶相互独立地恢复。长时间不活跃的桶由后台清理任务移除。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use config::RateLimitConfig;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 限流错误类型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded, try again later")]
    Exceeded { key: String, retry_after: Duration },
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
    last_seen: Instant,
}

impl Bucket {
    fn full(capacity: u32, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            last_seen: now,
        }
    }

    fn refill(&mut self, capacity: u32, interval: Duration, now: Instant) {
        if self.tokens >= capacity {
            self.last_refill = now;
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill);
        let earned = (elapsed.as_nanos() / interval.as_nanos().max(1)) as u64;
        if earned == 0 {
            return;
        }
        let tokens = (self.tokens as u64 + earned).min(capacity as u64) as u32;
        self.tokens = tokens;
        if tokens == capacity {
            self.last_refill = now;
        } else {
            // earned < capacity，不会溢出 u32
            self.last_refill += interval * earned as u32;
        }
    }
}

pub struct RateLimiter {
    capacity: u32,
    refill_interval: Duration,
    idle_timeout: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// `capacity` 个请求每 `window`
    pub fn new(capacity: u32, window: Duration, idle_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            refill_interval: window / capacity,
            idle_timeout,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_minute(requests: u32) -> Self {
        Self::new(requests, Duration::from_secs(60), Duration::from_secs(180))
    }

    pub fn from_config(cfg: &RateLimitConfig) -> Self {
        Self::new(
            cfg.requests_per_minute,
            Duration::from_secs(60),
            cfg.idle_timeout(),
        )
    }

    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Bucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 非阻塞；桶为空时直接拒绝
    pub fn allow(&self, key: &str) -> bool {
        self.check(key).is_ok()
    }

    pub fn check(&self, key: &str) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut buckets = self.lock();
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::full(self.capacity, now));

        bucket.refill(self.capacity, self.refill_interval, now);
        bucket.last_seen = now;

        if bucket.tokens == 0 {
            let waited = now.saturating_duration_since(bucket.last_refill);
            tracing::debug!(key, "rate limit exceeded");
            return Err(RateLimitError::Exceeded {
                key: key.to_string(),
                retry_after: self.refill_interval.saturating_sub(waited),
            });
        }
        bucket.tokens -= 1;
        Ok(())
    }

    /// 移除空闲超过阈值的桶，返回移除数量
    pub fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let idle_timeout = self.idle_timeout;
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_seen) <= idle_timeout);
        before - buckets.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.lock().len()
    }

    /// 启动周期清理任务，`shutdown` 取消后退出
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = limiter.sweep_idle();
                        if removed > 0 {
                            tracing::debug!(removed, remaining = limiter.bucket_count(), "清理空闲限流桶");
                        }
                    }
                }
            }
        })
    }
}

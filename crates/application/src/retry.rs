use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// 第 n 次失败后等待 `step * n`
    Linear { step: Duration },
}

impl Backoff {
    pub fn linear(step: Duration) -> Self {
        Backoff::Linear { step }
    }

    pub fn delay_at(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Linear { step } => step.saturating_mul(attempt.max(1)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryConfig {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

/// 按配置重试，`on_retry` 在每次失败且还会重试时被调用（attempt 从 1 开始）
pub async fn retry_async<F, Fut, T, E, R>(config: &RetryConfig, mut op: F, mut on_retry: R) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(u32, &E),
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= config.max_attempts {
                    return Err(e);
                }
                on_retry(attempt, &e);
                sleep(config.backoff.delay_at(attempt)).await;
            }
        }
    }
}

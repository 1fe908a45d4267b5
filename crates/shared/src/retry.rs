//! 指数退避重试
//!
//! 只用于启动阶段的基础设施连接（数据库等）。规则执行本身不做自动重试：
//! 分发遇到系统级错误时整体失败，由调用方以相同的触发上下文重新提交。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::DatabaseConfig;

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 首次执行之外的最大重试次数
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 数据库连接重试策略
    pub fn for_database(config: &DatabaseConfig) -> Self {
        Self {
            max_retries: config.connect_retries,
            initial_delay: Duration::from_millis(config.connect_retry_delay_ms),
            ..Default::default()
        }
    }

    /// 依次给出每次重试前的等待时间，长度即最大重试次数
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let cap = self.max_delay.as_secs_f64();
        (0..self.max_retries).map(move |attempt| {
            let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
            Duration::from_secs_f64(secs.min(cap))
        })
    }
}

/// 按策略重试异步操作
///
/// `is_retryable` 返回 false 的错误立即返回，不消耗重试次数。
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut delays = policy.delays();
    let mut attempt: u32 = 1;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "重试后成功");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) {
            warn!(operation = operation_name, error = %err, "不可重试的错误");
            return Err(err);
        }

        let Some(delay) = delays.next() else {
            warn!(
                operation = operation_name,
                attempts = attempt,
                error = %err,
                "重试次数耗尽"
            );
            return Err(err);
        };

        warn!(
            operation = operation_name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "操作失败，等待后重试"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

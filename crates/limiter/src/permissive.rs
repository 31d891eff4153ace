//! 放行策略
//!
//! 最简单的情形：不限流。作为默认算法和代理管线测试的对照组，
//! 让代理可以在不接 KV 的情况下独立验证。

use crate::clock::Clock;
use crate::result::RateLimitResult;
use crate::RateLimiter;
use async_trait::async_trait;
use floodgate_errors::AppResult;
use std::sync::Arc;
use tracing::info;

/// 永远允许，零 I/O
#[derive(Debug)]
pub struct PermissiveLimiter {
    clock: Arc<dyn Clock>,
}

impl PermissiveLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        info!("creating permissive rate limiter");
        Self { clock }
    }
}

#[async_trait]
impl RateLimiter for PermissiveLimiter {
    async fn check_limit(&self, _account_id: i64, _path: &str) -> AppResult<RateLimitResult> {
        Ok(RateLimitResult {
            allowed: true,
            limit: -1,
            remaining: -1,
            reset_time: self.clock.now(),
            retry_after: None,
        })
    }

    async fn close(&self) -> AppResult<()> {
        // 无本地资源
        Ok(())
    }
}

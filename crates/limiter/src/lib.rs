//! floodgate-limiter - 限流决策引擎
//!
//! 一个决策接口，多个可插拔算法：
//!
//! - **放行策略** ([`PermissiveLimiter`]) -- 永远允许，零 I/O。默认算法，
//!   也是代理管线测试的对照组。
//! - **分桶滑动窗口** ([`BucketedSlidingWindowLimiter`]) -- 共享 KV 中的
//!   定宽时间桶，尾桶按窗口重叠比例加权。每个 (账户, 路径) 的 KV 内存
//!   上界为桶数，写放大 O(1)。
//!
//! 引擎通过两个端口与外界隔离：[`BucketStore`]（KV 访问）与 [`Clock`]
//! （时间源）。测试以内存桩驱动全部算法路径，不需要真实 Redis。
//! 新算法（令牌桶、固定窗口、连续滑动窗口）在工厂注册即可，代理不感知。

mod bucketed;
mod clock;
mod permissive;
mod result;
mod store;

pub use bucketed::BucketedSlidingWindowLimiter;
pub use clock::{Clock, SystemClock};
pub use permissive::PermissiveLimiter;
pub use result::RateLimitResult;
pub use store::BucketStore;

use async_trait::async_trait;
use floodgate_errors::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;

/// 限流器接口
///
/// 所有算法都实现这两个操作。`check_limit` 可能因 KV I/O 阻塞；
/// `close` 幂等，释放实现持有的资源。
#[async_trait]
pub trait RateLimiter: Send + Sync + std::fmt::Debug {
    /// 对一次 (账户, 路径) 请求做出裁决
    ///
    /// `account_id == -1` 是"未认证/豁免"哨兵值：放行策略自然通过，
    /// 分桶策略把它当成普通身份计数，不会崩溃。
    async fn check_limit(&self, account_id: i64, path: &str) -> AppResult<RateLimitResult>;

    /// 幂等关闭
    async fn close(&self) -> AppResult<()>;
}

/// 已定义并实现的限流算法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Permissive,
    BucketedSlidingWindow,
}

impl Algorithm {
    /// 解析算法名：去空白、转小写；空名映射为放行策略
    pub fn parse(name: &str) -> AppResult<Self> {
        match name.trim().to_lowercase().as_str() {
            "" | "allow_all" => Ok(Self::Permissive),
            "bucketed_sliding_window" => Ok(Self::BucketedSlidingWindow),
            _ => Err(AppError::unknown_algorithm(name.trim())),
        }
    }
}

/// 按算法名构造限流器
///
/// 放行策略不使用存储，但工厂签名统一收取端口，调用方不必分支。
pub fn new_rate_limiter(
    name: &str,
    store: Arc<dyn BucketStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
    bucket_count: u32,
    default_limit: i64,
) -> AppResult<Arc<dyn RateLimiter>> {
    match Algorithm::parse(name)? {
        Algorithm::Permissive => Ok(Arc::new(PermissiveLimiter::new(clock))),
        Algorithm::BucketedSlidingWindow => Ok(Arc::new(BucketedSlidingWindowLimiter::new(
            store,
            clock,
            window,
            bucket_count,
            default_limit,
        )?)),
    }
}

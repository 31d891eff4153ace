//! 分桶滑动窗口限流器
//!
//! 用定宽时间桶近似真实滑动窗口：每个 (账户, 路径) 在 KV 中最多
//! `bucket_count` 个计数键，每次检查摊销 O(1) 次写。代价是桶量化
//! 带来的有界误差——最坏多算一个桶宽的流量，即 `limit / bucket_count`。
//!
//! 并发正确性只依赖两点：当前桶自增的单键原子性；以及"先计数后裁决"
//! ——每个并发请求先完成自己的自增再读窗口，自增后的值彼此不同，
//! 读到偏低的并发计数只会少算别人，不会放过自己，超发不可能发生。

use crate::clock::Clock;
use crate::result::RateLimitResult;
use crate::store::BucketStore;
use crate::RateLimiter;
use async_trait::async_trait;
use chrono::DateTime;
use floodgate_errors::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// KV 键命名空间，'rate limiting bucket'
const KEY_PREFIX: &str = "rlbuk";
/// 键中的算法标签
const ALGORITHM_TAG: &str = "bucketed";
const KEY_DELIMITER: char = ':';
/// 时钟漂移容忍：桶结束时刻早于窗口起点不超过这个量才算异常
const STALE_SLACK_MS: i64 = 5;

/// 分桶滑动窗口限流器
#[derive(Debug)]
pub struct BucketedSlidingWindowLimiter {
    store: Arc<dyn BucketStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
    bucket_width: Duration,
    default_limit: i64,
}

impl BucketedSlidingWindowLimiter {
    /// 创建限流器；窗口、桶数或推导出的桶宽不为正时拒绝构造
    pub fn new(
        store: Arc<dyn BucketStore>,
        clock: Arc<dyn Clock>,
        window: Duration,
        bucket_count: u32,
        default_limit: i64,
    ) -> AppResult<Self> {
        let window_ms = window.as_millis() as i64;
        if window_ms <= 0 || bucket_count == 0 {
            return Err(AppError::config_invalid(format!(
                "invalid bucketing configuration - window: {:?}, bucket count: {}",
                window, bucket_count
            )));
        }

        let width_ms = window_ms / i64::from(bucket_count);
        if width_ms <= 0 {
            return Err(AppError::config_invalid(format!(
                "invalid bucketing configuration - window: {:?}, bucket count: {}, bucket width: {}ms",
                window, bucket_count, width_ms
            )));
        }

        info!(
            window_secs = window.as_secs_f64(),
            bucket_count,
            bucket_width_ms = width_ms,
            default_limit,
            "creating bucketed sliding window rate limiter"
        );

        Ok(Self {
            store,
            clock,
            window,
            bucket_width: Duration::from_millis(width_ms as u64),
            default_limit,
        })
    }

    fn bucket_key(&self, account_id: i64, normalized_path: &str, bucket_id: i64) -> String {
        format!(
            "{}{d}{}{d}{}{d}{}{d}{}",
            KEY_PREFIX,
            ALGORITHM_TAG,
            account_id,
            normalized_path,
            bucket_id,
            d = KEY_DELIMITER
        )
    }

    /// 生效上限。目前只有全局默认值；按账户的覆盖查询要在这里接入。
    fn limit_for(&self, _account_id: i64, _path: &str) -> i64 {
        self.default_limit
    }

    /// 对窗口内各桶加权求和
    ///
    /// 只有最老的那个跨越窗口边界的桶按重叠比例折算；当前桶即使尚未
    /// 走完也按 100% 计——入口平滑、出口诚实，不少算刚发生的突发。
    fn weighted_window_count(
        &self,
        keys: &[String],
        values: &[Option<String>],
        window_start_ms: i64,
    ) -> i64 {
        let width_ms = self.bucket_width.as_millis() as i64;
        let mut total = 0.0_f64;

        for (key, value) in keys.iter().zip(values.iter()) {
            let bucket_count: i64 = match value {
                // 不存在的桶计 0
                None => 0,
                Some(raw) => match raw.parse() {
                    Ok(n) => n,
                    Err(_) => {
                        warn!(key = %key, value = %raw, "non-numeric bucket counter, counting as zero");
                        0
                    }
                },
            };

            // 桶号是键的最后一个分隔字段
            let bucket_id: i64 = match key
                .rsplit(KEY_DELIMITER)
                .next()
                .and_then(|field| field.parse().ok())
            {
                Some(id) => id,
                None => {
                    warn!(key = %key, "unparseable bucket id in key, skipping");
                    continue;
                }
            };

            let bucket_start_ms = bucket_id * width_ms;
            let bucket_end_ms = bucket_start_ms + width_ms;

            if bucket_end_ms <= window_start_ms + STALE_SLACK_MS {
                // 整个落在窗口之外的桶本应在枚举阶段就被排除
                warn!(
                    key = %key,
                    bucket_end_ms,
                    window_start_ms,
                    "stale bucket outside window, skipping"
                );
                continue;
            }

            let weight = if bucket_start_ms < window_start_ms {
                // 跨边界的最老桶：按落在窗口内的时间比例折算
                (bucket_end_ms - window_start_ms) as f64 / width_ms as f64
            } else {
                1.0
            };

            total += bucket_count as f64 * weight;
        }

        // 向上取整：宁可多算也不让上限被舍入悄悄突破
        total.ceil() as i64
    }
}

/// 路径进入键之前的归一化：转义分隔符，保证它只出现在字段之间
fn normalize_path(path: &str) -> String {
    // 先转义 %，避免二次转义歧义
    path.replace('%', "%25").replace(KEY_DELIMITER, "%3A")
}

#[async_trait]
impl RateLimiter for BucketedSlidingWindowLimiter {
    async fn check_limit(&self, account_id: i64, path: &str) -> AppResult<RateLimitResult> {
        // 入口取一次时间，之后所有运算共用这个值
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let width_ms = self.bucket_width.as_millis() as i64;
        let window_ms = self.window.as_millis() as i64;

        // 桶号按桶宽的自然精度（毫秒）计算；div_euclid 让负时间也向下取整
        let current_bucket = now_ms.div_euclid(width_ms);
        let window_start_ms = now_ms - window_ms;
        let oldest_bucket = window_start_ms.div_euclid(width_ms);

        let normalized_path = normalize_path(path);
        let keys: Vec<String> = (oldest_bucket..=current_bucket)
            .map(|id| self.bucket_key(account_id, &normalized_path, id))
            .collect();
        let current_key = self.bucket_key(account_id, &normalized_path, current_bucket);

        // 先自增再裁决
        let count = self.store.incr(&current_key).await?;

        if count == 1 {
            // 新建的桶：武装过期。TTL 比窗口宽一个桶，窗口内最老的桶
            // 不会在裁决中途消失。并发请求对同一 TTL 的重复设置是良性的；
            // 设置失败则必须报错，否则这个键永远不会被回收。
            self.store
                .expire(&current_key, self.window + self.bucket_width)
                .await?;
        }

        // 一次管道往返读回整个窗口
        let values = self.store.get_many(&keys).await?;
        let total = self.weighted_window_count(&keys, &values, window_start_ms);

        let limit = self.limit_for(account_id, path);
        let allowed = total <= limit;
        // 当前桶结束时刻
        let reset_ms = (current_bucket + 1) * width_ms;
        let reset_time = DateTime::from_timestamp_millis(reset_ms).unwrap_or(now);
        let retry_after = reset_time - now;
        // 可为负：不退避的客户端会被持续压在零下，直到历史滑出窗口
        let remaining = limit - total;

        if allowed {
            debug!(account_id, path, total, limit, "rate limit check passed");
        } else {
            info!(account_id, path, total, limit, "rate limit exceeded");
        }

        Ok(RateLimitResult {
            allowed,
            limit,
            remaining,
            reset_time,
            retry_after: Some(retry_after),
        })
    }

    async fn close(&self) -> AppResult<()> {
        // 存储句柄由调用方共享持有，这里无本地资源
        Ok(())
    }
}

//! 桶存储的 Redis 实现
//!
//! 每个操作一次管道往返；所有客户端错误在这条边界上
//! 映射为 `KvUnavailable`。

use async_trait::async_trait;
use floodgate_errors::{AppError, AppResult};
use floodgate_limiter::BucketStore;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::debug;

/// Redis 桶存储
///
/// `ConnectionManager` 内部多路复用，clone 后并发调用是安全的；
/// 构造之后没有任何可变状态。
#[derive(Clone)]
pub struct RedisBucketStore {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisBucketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBucketStore").finish_non_exhaustive()
    }
}

impl RedisBucketStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl BucketStore for RedisBucketStore {
    async fn incr(&self, key: &str) -> AppResult<i64> {
        let mut conn = self.conn.clone();

        let (count,): (i64,) = redis::pipe()
            .incr(key, 1)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::kv_unavailable(format!("INCR {} failed: {}", key, e)))?;

        debug!(key = %key, count, "bucket incremented");
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.conn.clone();

        // PEXPIRE：桶宽可以小于一秒，TTL 也要保持毫秒精度
        let _: i64 = conn
            .pexpire(key, ttl.as_millis() as i64)
            .await
            .map_err(|e| AppError::kv_unavailable(format!("PEXPIRE {} failed: {}", key, e)))?;

        Ok(())
    }

    async fn get_many(&self, keys: &[String]) -> AppResult<Vec<Option<String>>> {
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.get(key);
        }

        pipe.query_async(&mut conn)
            .await
            .map_err(|e| AppError::kv_unavailable(format!("bucket window read failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_connection_manager;

    async fn store() -> RedisBucketStore {
        let conn = create_connection_manager("redis://127.0.0.1:6379")
            .await
            .expect("Tests require Redis to be running");
        RedisBucketStore::new(conn)
    }

    #[tokio::test]
    #[ignore] // 需要 Redis 实例
    async fn test_incr_returns_post_increment_value() {
        let store = store().await;
        let key = "floodgate-test:incr";

        let mut conn = store.conn.clone();
        let _: i64 = conn.del(key).await.unwrap();

        assert_eq!(store.incr(key).await.unwrap(), 1);
        assert_eq!(store.incr(key).await.unwrap(), 2);

        let _: i64 = conn.del(key).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // 需要 Redis 实例
    async fn test_expire_arms_ttl() {
        let store = store().await;
        let key = "floodgate-test:expire";

        store.incr(key).await.unwrap();
        store.expire(key, Duration::from_secs(30)).await.unwrap();

        let mut conn = store.conn.clone();
        let ttl_ms: i64 = conn.pttl(key).await.unwrap();
        assert!(ttl_ms > 0 && ttl_ms <= 30_000);

        let _: i64 = conn.del(key).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // 需要 Redis 实例
    async fn test_get_many_reports_missing_keys_as_none() {
        let store = store().await;
        let present = "floodgate-test:present".to_string();
        let missing = "floodgate-test:definitely-missing".to_string();

        store.incr(&present).await.unwrap();

        let values = store
            .get_many(&[present.clone(), missing])
            .await
            .unwrap();
        assert_eq!(values[0].as_deref(), Some("1"));
        assert!(values[1].is_none());

        let mut conn = store.conn.clone();
        let _: i64 = conn.del(&present).await.unwrap();
    }
}

//! 桶存储端口
//!
//! 引擎只依赖这三个操作。实现方负责把底层客户端错误
//! 映射为 `AppError::KvUnavailable`。

use async_trait::async_trait;
use floodgate_errors::AppResult;
use std::time::Duration;

/// KV 桶存储
#[async_trait]
pub trait BucketStore: Send + Sync + std::fmt::Debug {
    /// 原子自增一个计数键，返回自增后的值（管道化单次往返）
    async fn incr(&self, key: &str) -> AppResult<i64>;

    /// 设置键的过期时间
    async fn expire(&self, key: &str, ttl: Duration) -> AppResult<()>;

    /// 批量读取计数键（管道化单次往返）
    ///
    /// 不存在的键返回 `None`；返回向量与 `keys` 一一对应。
    async fn get_many(&self, keys: &[String]) -> AppResult<Vec<Option<String>>>;
}

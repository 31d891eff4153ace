//! floodgate-adapter-redis - Redis 适配器
//!
//! 连接管理与 [`floodgate_limiter::BucketStore`] 端口的 Redis 实现

mod connection;
mod store;

pub use connection::*;
pub use store::*;

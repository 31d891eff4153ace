//! 裁决结果

use chrono::{DateTime, Duration, Utc};

/// 一次限流检查的裁决
///
/// 由限流器构造后不再变更；代理据此分支并写出建议头。
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    /// 是否放行（唯一有约束力的字段）
    pub allowed: bool,
    /// 该 (账户, 路径) 的生效上限；-1 表示无上限（放行策略）
    pub limit: i64,
    /// 窗口内剩余配额。可为负：检查本身会计数，持续冲击的
    /// 客户端会被压到零以下，直到其历史滑出窗口
    pub remaining: i64,
    /// 无新流量时窗口完全排空的时刻（分桶策略为当前桶结束时刻）
    pub reset_time: DateTime<Utc>,
    /// 建议等待时长；None 表示无建议（放行策略）
    pub retry_after: Option<Duration>,
}

impl RateLimitResult {
    /// 是否被限流
    pub fn is_limited(&self) -> bool {
        !self.allowed
    }
}

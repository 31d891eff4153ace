//! 时间源抽象
//!
//! 算法通过该能力取时，而不是直接调用 `Utc::now()`，
//! 测试注入冻结时钟即可得到确定性的窗口计算。

use chrono::{DateTime, Utc};

/// 时间源
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// 当前挂钟时间
    fn now(&self) -> DateTime<Utc>;
}

/// 系统挂钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

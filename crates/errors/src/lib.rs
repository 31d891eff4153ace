//! floodgate-errors - 统一错误处理
//!
//! 网关各组件共享的错误分类，附带 HTTP 状态码映射

use thiserror::Error;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 启动期配置错误，致命
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// 令牌缺失、格式错误、签名无效，或缺少管理员角色
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// 限流检查期间任何 KV I/O 错误 - 代理必须 fail closed
    #[error("KV store unavailable: {0}")]
    KvUnavailable(String),

    /// 反向代理转发失败
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// 工厂无法识别的限流算法名
    #[error("Unknown rate-limiting algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn config_invalid(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn kv_unavailable(msg: impl Into<String>) -> Self {
        Self::KvUnavailable(msg.into())
    }

    pub fn upstream_unavailable(msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(msg.into())
    }

    pub fn unknown_algorithm(msg: impl Into<String>) -> Self {
        Self::UnknownAlgorithm(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// 转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ConfigInvalid(_) => 500,
            Self::Unauthorized(_) => 401,
            Self::KvUnavailable(_) => 500,
            Self::UpstreamUnavailable(_) => 502,
            Self::UnknownAlgorithm(_) => 500,
            Self::Internal(_) => 500,
        }
    }
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;

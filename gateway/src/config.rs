//! Gateway 配置
//!
//! 显式字段、逐项解析；安全关键项没有默认值，校验失败即启动失败

use floodgate_errors::{AppError, AppResult};
use std::env;
use std::time::Duration;
use tracing::info;
use url::Url;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub redis_url: String,
    /// 限流算法名，由工厂解析
    pub algorithm: String,
    /// 每 (账户, 路径) 每窗口的默认配额
    pub default_limit_count: i64,
    /// 窗口宽度
    pub default_period: Duration,
    /// 每窗口桶数
    pub bucket_count: u32,
    pub public_paths: Vec<String>,
    pub admin_paths: Vec<String>,
    pub backend_url: String,
    pub backend_healthcheck_url: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
}

impl GatewayConfig {
    pub fn from_env() -> AppResult<Self> {
        let config = Self {
            host: env::var("GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("GATEWAY_PORT", 8080),
            jwt_secret: env::var("JWT_SECRET").unwrap_or_default(),
            redis_url: env::var("REDIS_URL").unwrap_or_default(),
            algorithm: env::var("RATE_LIMIT_ALGORITHM").unwrap_or_else(|_| "allow_all".to_string()),
            default_limit_count: env_parse("DEFAULT_LIMIT_COUNT", 100),
            default_period: Duration::from_secs(env_parse("DEFAULT_PERIOD_SECS", 3600)),
            bucket_count: env_parse("BUCKET_COUNT", 30),
            public_paths: env_list("PUBLIC_PATHS", &["/health", "/metrics"]),
            admin_paths: env_list("ADMIN_PATHS", &["/admin/*", "/internal/*"]),
            backend_url: env::var("BACKEND_URL").unwrap_or_default(),
            backend_healthcheck_url: env::var("BACKEND_HEALTHCHECK_URL").unwrap_or_default(),
            read_timeout: Duration::from_secs(env_parse("SERVER_READ_TIMEOUT_SECS", 10)),
            write_timeout: Duration::from_secs(env_parse("SERVER_WRITE_TIMEOUT_SECS", 10)),
            idle_timeout: Duration::from_secs(env_parse("SERVER_IDLE_TIMEOUT_SECS", 60)),
        };

        config.validate()?;
        Ok(config)
    }

    /// 配置合法性检查；问题全部收集后一次性报告
    pub fn validate(&self) -> AppResult<()> {
        let mut problems: Vec<String> = Vec::new();

        if self.jwt_secret.trim().is_empty() {
            problems.push("JWT_SECRET must be set".to_string());
        } else if self.jwt_secret.len() < 32 {
            problems.push("JWT_SECRET must be at least 32 characters long".to_string());
        }

        if self.port == 0 {
            problems.push("server port is invalid".to_string());
        }

        if self.redis_url.trim().is_empty() {
            problems.push("REDIS_URL must be set".to_string());
        }

        if self.backend_url.trim().is_empty() {
            problems.push("BACKEND_URL must be set".to_string());
        } else if Url::parse(&self.backend_url).is_err() {
            problems.push(format!("invalid backend URL: {}", self.backend_url));
        }

        if self.backend_healthcheck_url.trim().is_empty() {
            problems.push("BACKEND_HEALTHCHECK_URL must be set".to_string());
        } else if Url::parse(&self.backend_healthcheck_url).is_err() {
            problems.push(format!(
                "invalid backend healthcheck URL: {}",
                self.backend_healthcheck_url
            ));
        }

        if self.default_limit_count <= 0 {
            problems.push("default limit count must be positive".to_string());
        }

        if self.default_period.is_zero() {
            problems.push("default period must be positive".to_string());
        }

        if self.bucket_count == 0 {
            problems.push("bucket count must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(AppError::config_invalid(problems.join("; ")))
        }
    }

    /// 启动时打印配置概要，密钥只打印长度
    pub fn log_summary(&self) {
        info!("#### Configuration Summary ####");
        info!("Server: {}:{}", self.host, self.port);
        info!("Backend URL: {}", self.backend_url);
        info!("Backend healthcheck URL: {}", self.backend_healthcheck_url);
        info!(
            "Rate limiting: algorithm={}, {} requests per {:?} across {} buckets",
            self.algorithm, self.default_limit_count, self.default_period, self.bucket_count
        );
        info!("Public paths: {:?}", self.public_paths);
        info!("Admin paths: {:?}", self.admin_paths);
        info!(
            "Server timeouts - read: {:?}, write: {:?}, idle: {:?}",
            self.read_timeout, self.write_timeout, self.idle_timeout
        );
        info!(
            "JWT secret: [CONFIGURED - {} characters]",
            self.jwt_secret.len()
        );
        info!("#### End Configuration Summary ####");
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

/// 逗号分隔的列表；空值回落到默认
fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

//! Floodgate - 限流反向代理网关
//!
//! 站在上游 HTTP 后端前面：认证调用方，执行按账户的请求配额，
//! 放行的流量转发上游，超额的回 429。

mod auth;
mod classify;
mod config;
mod proxy;
mod routing;

use axum::{Router, routing::get};
use floodgate_adapter_redis::{RedisBucketStore, check_connection, create_connection_manager};
use floodgate_auth_core::TokenService;
use floodgate_limiter::{SystemClock, new_rate_limiter};
use floodgate_telemetry::{init_tracing, init_tracing_json};
use proxy::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// 签发访问令牌时的有效期（秒）
const TOKEN_EXPIRES_IN_SECS: i64 = 3600;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载 .env 文件
    dotenvy::dotenv().ok();

    // 初始化 tracing
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        init_tracing_json("info");
    } else {
        init_tracing("info");
    }

    info!("Starting rate-limiter proxy...");

    let config = config::GatewayConfig::from_env()?;
    config.log_summary();

    // 初始化存储；开始服务前先 PING 一次
    info!("Connecting to Redis");
    let mut redis_conn = create_connection_manager(&config.redis_url).await?;
    check_connection(&mut redis_conn).await?;
    info!("Storage connections initialized successfully");

    let store = Arc::new(RedisBucketStore::new(redis_conn));
    let rate_limiter = new_rate_limiter(
        &config.algorithm,
        store,
        Arc::new(SystemClock),
        config.default_period,
        config.bucket_count,
        config.default_limit_count,
    )?;

    let token_service = TokenService::new(&config.jwt_secret, TOKEN_EXPIRES_IN_SECS);
    let classifier = Arc::new(classify::AuthClassifier::new(
        config.admin_paths.clone(),
        config.public_paths.clone(),
    ));
    let http_client = reqwest::Client::builder().build()?;

    let state = AppState {
        rate_limiter,
        token_service,
        classifier,
        http_client,
        backend_url: config.backend_url.clone(),
        backend_healthcheck_url: config.backend_healthcheck_url.clone(),
    };

    let app = create_app(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(%addr, "HTTP server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn create_app(state: AppState, config: &config::GatewayConfig) -> Router {
    // 健康检查单独注册，其余流量全部进代理决策路径
    Router::new()
        .route("/health", get(routing::health_check))
        .fallback(proxy::proxy_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // 读 + 写预算合成一条请求截止线
        // TODO: 接入 idle_timeout——axum::serve 目前不暴露 keep-alive 空闲回收
        .layer(TimeoutLayer::new(config.read_timeout + config.write_timeout))
}

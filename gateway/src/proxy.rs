//! 代理决策路径
//!
//! 每个请求走一条直线：路径分类 -> 按需认证 -> 限流裁决 ->
//! 转发上游或 429。限流器出错一律 fail closed。

use crate::auth;
use crate::classify::{AuthClassifier, AuthLevel};
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use floodgate_auth_core::TokenService;
use floodgate_limiter::{RateLimitResult, RateLimiter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 限流调用的外层截止时间
const LIMITER_DEADLINE: Duration = Duration::from_secs(600);
/// 转发前缓冲请求体的上限
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
/// 公开路径的豁免账户哨兵
const EXEMPT_ACCOUNT_ID: i64 = -1;

/// 逐跳头不跨代理传递
const HOP_HEADERS: [&str; 7] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// 请求处理共享状态；构造一次，只读共享
#[derive(Clone)]
pub struct AppState {
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub token_service: TokenService,
    pub classifier: Arc<AuthClassifier>,
    pub http_client: reqwest::Client,
    pub backend_url: String,
    pub backend_healthcheck_url: String,
}

/// 捕获除健康检查外所有流量的处理器
pub async fn proxy_handler(State(state): State<AppState>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let auth_level = state.classifier.classify(&path);

    let account_id = match auth_level {
        // 公开路径：不认证，也不消耗配额
        AuthLevel::None => EXEMPT_ACCOUNT_ID,
        AuthLevel::User => match auth::validate_request(&state.token_service, req.headers()) {
            Ok(id) => id,
            Err(e) => {
                warn!(path = %path, error = %e, "authentication failed");
                return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
            }
        },
        AuthLevel::Admin => {
            match auth::validate_admin_request(&state.token_service, req.headers()) {
                Ok(id) => id,
                Err(e) => {
                    warn!(path = %path, error = %e, "admin authentication failed");
                    return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
                }
            }
        }
    };

    let limit_result = if auth_level == AuthLevel::None {
        None
    } else {
        let check = tokio::time::timeout(
            LIMITER_DEADLINE,
            state.rate_limiter.check_limit(account_id, &path),
        )
        .await;

        match check {
            Ok(Ok(result)) => Some(result),
            // 检查失败就拒绝服务，绝不放行
            Ok(Err(e)) => {
                error!(account_id, path = %path, error = %e, "rate limit check failed");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Rate Limiting Unavailable")
                    .into_response();
            }
            Err(_) => {
                error!(account_id, path = %path, "rate limit check exceeded deadline");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Rate Limiting Unavailable")
                    .into_response();
            }
        }
    };

    if let Some(ref result) = limit_result {
        if result.is_limited() {
            info!(account_id, path = %path, "rate limit exceeded");
            let mut response =
                (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response();
            add_rate_limit_headers(&mut response, result);
            return response;
        }
    }

    let mut response = forward_to_backend(&state, req, account_id).await;
    if let Some(ref result) = limit_result {
        add_rate_limit_headers(&mut response, result);
    }
    response
}

/// 把请求转发到唯一配置的上游
async fn forward_to_backend(state: &AppState, req: Request, account_id: i64) -> Response {
    let (parts, body) = req.into_parts();

    let body_bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to buffer request body");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = format!("{}{}", state.backend_url.trim_end_matches('/'), path_and_query);

    let mut headers = parts.headers.clone();
    strip_hop_headers(&mut headers);
    // Host 和 Content-Length 由客户端按目标重新生成
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    headers.insert("X-Forwarded-By", HeaderValue::from_static("rate-limiter-proxy"));
    headers.insert("X-Proxy-Version", HeaderValue::from_static("1.0"));
    if let Ok(value) = HeaderValue::from_str(&account_id.to_string()) {
        headers.insert("X-Account-ID", value);
    }

    debug!(method = %parts.method, target = %target, account_id, "forwarding request to backend");

    let upstream = state
        .http_client
        .request(parts.method, &target)
        .headers(headers)
        .body(body_bytes.to_vec())
        .send()
        .await;

    let upstream = match upstream {
        Ok(response) => response,
        Err(e) => {
            error!(target = %target, error = %e, "proxy error");
            return (StatusCode::BAD_GATEWAY, "Backend Service is not available").into_response();
        }
    };

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    strip_hop_headers(&mut response_headers);

    let response_body = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(target = %target, error = %e, "failed to read backend response");
            return (StatusCode::BAD_GATEWAY, "Backend Service is not available").into_response();
        }
    };

    let mut response = Response::new(Body::from(response_body));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

/// 写出建议头；429 与转发成功的响应都带
fn add_rate_limit_headers(response: &mut Response, result: &RateLimitResult) {
    let headers = response.headers_mut();

    if result.limit > 0 {
        if let Ok(value) = HeaderValue::from_str(&result.limit.to_string()) {
            headers.insert("X-RateLimit-Limit", value);
        }
    }

    if result.remaining >= 0 {
        if let Ok(value) = HeaderValue::from_str(&result.remaining.to_string()) {
            headers.insert("X-RateLimit-Remaining", value);
        }
    }

    if result.is_limited() {
        if let Some(retry_after) = result.retry_after {
            // 整秒向上取整：宁可让客户端多等，不给过早的重试建议
            let secs = (retry_after.num_milliseconds().max(0) + 999) / 1000;
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                headers.insert("Retry-After", value);
            }
        }
    }
}

fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_HEADERS {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing;
    use async_trait::async_trait;
    use axum::Router;
    use axum::routing::get;
    use floodgate_errors::{AppError, AppResult};
    use floodgate_limiter::{PermissiveLimiter, SystemClock};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    const SECRET: &str = "test_secret_at_least_32_characters_long";

    /// 固定拒绝的桩限流器
    #[derive(Debug)]
    struct DenyingLimiter {
        remaining: i64,
        retry_after_ms: i64,
    }

    #[async_trait]
    impl RateLimiter for DenyingLimiter {
        async fn check_limit(&self, _account_id: i64, _path: &str) -> AppResult<RateLimitResult> {
            Ok(RateLimitResult {
                allowed: false,
                limit: 5,
                remaining: self.remaining,
                reset_time: chrono::Utc::now(),
                retry_after: Some(chrono::Duration::milliseconds(self.retry_after_ms)),
            })
        }

        async fn close(&self) -> AppResult<()> {
            Ok(())
        }
    }

    /// 必然失败的桩限流器
    #[derive(Debug)]
    struct FailingLimiter;

    #[async_trait]
    impl RateLimiter for FailingLimiter {
        async fn check_limit(&self, _account_id: i64, _path: &str) -> AppResult<RateLimitResult> {
            Err(AppError::kv_unavailable("injected store failure"))
        }

        async fn close(&self) -> AppResult<()> {
            Ok(())
        }
    }

    /// 记录调用次数的桩，用于断言绕行
    #[derive(Default, Debug)]
    struct CountingLimiter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RateLimiter for CountingLimiter {
        async fn check_limit(&self, _account_id: i64, _path: &str) -> AppResult<RateLimitResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RateLimitResult {
                allowed: false,
                limit: 1,
                remaining: -1,
                reset_time: chrono::Utc::now(),
                retry_after: Some(chrono::Duration::seconds(1)),
            })
        }

        async fn close(&self) -> AppResult<()> {
            Ok(())
        }
    }

    fn test_state(limiter: Arc<dyn RateLimiter>) -> AppState {
        AppState {
            rate_limiter: limiter,
            token_service: TokenService::new(SECRET, 3600),
            classifier: Arc::new(AuthClassifier::new(
                vec!["/admin/*".to_string(), "/internal/*".to_string()],
                vec!["/health".to_string(), "/metrics".to_string()],
            )),
            http_client: reqwest::Client::new(),
            // 折叠端口：转发必然拒绝连接
            backend_url: "http://127.0.0.1:9".to_string(),
            backend_healthcheck_url: "http://127.0.0.1:9/health".to_string(),
        }
    }

    fn test_app(limiter: Arc<dyn RateLimiter>) -> Router {
        Router::new()
            .route("/health", get(routing::health_check))
            .fallback(proxy_handler)
            .with_state(test_state(limiter))
    }

    fn user_token() -> String {
        TokenService::new(SECRET, 3600)
            .generate_token(42, "user-42", "user")
            .unwrap()
    }

    fn admin_token() -> String {
        TokenService::new(SECRET, 3600)
            .generate_token(7, "root", "admin")
            .unwrap()
    }

    fn get_request(path: &str, token: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri(path);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_user_path_without_token_is_401_and_skips_limiter() {
        let limiter = Arc::new(CountingLimiter::default());
        let app = test_app(limiter.clone());

        let response = app.oneshot(get_request("/api/users", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(limiter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_token_is_401() {
        let app = test_app(Arc::new(PermissiveLimiter::new(Arc::new(SystemClock))));

        let response = app
            .oneshot(get_request("/api/users", Some("garbage-token")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_denied_request_gets_429_with_advisory_headers() {
        let app = test_app(Arc::new(DenyingLimiter {
            remaining: -1,
            retry_after_ms: 1500,
        }));

        let token = user_token();
        let response = app
            .oneshot(get_request("/api/users", Some(&token)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["X-RateLimit-Limit"], "5");
        // 负的 remaining 不对外暴露
        assert!(response.headers().get("X-RateLimit-Remaining").is_none());
        // 1.5s 向上取整到 2
        assert_eq!(response.headers()["Retry-After"], "2");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Rate limit exceeded");
    }

    #[tokio::test]
    async fn test_nonnegative_remaining_is_emitted_on_429() {
        let app = test_app(Arc::new(DenyingLimiter {
            remaining: 0,
            retry_after_ms: 900,
        }));

        let token = user_token();
        let response = app
            .oneshot(get_request("/api/users", Some(&token)))
            .await
            .unwrap();

        assert_eq!(response.headers()["X-RateLimit-Remaining"], "0");
        assert_eq!(response.headers()["Retry-After"], "1");
    }

    #[tokio::test]
    async fn test_limiter_failure_fails_closed_with_500() {
        let app = test_app(Arc::new(FailingLimiter));

        let token = user_token();
        let response = app
            .oneshot(get_request("/api/users", Some(&token)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Rate Limiting Unavailable");
    }

    #[tokio::test]
    async fn test_allowed_request_reaches_upstream() {
        // 上游不可达：走到转发这一步就该是 502，而不是 401/429
        let app = test_app(Arc::new(PermissiveLimiter::new(Arc::new(SystemClock))));

        let token = user_token();
        let response = app
            .oneshot(get_request("/api/users", Some(&token)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        // 放行策略 limit = -1，不产生配额头
        assert!(response.headers().get("X-RateLimit-Limit").is_none());
    }

    #[tokio::test]
    async fn test_public_path_bypasses_auth_and_limiter() {
        let limiter = Arc::new(CountingLimiter::default());
        let app = test_app(limiter.clone());

        // /metrics 是公开路径；即使限流器固定拒绝也不能被问到
        let response = app.oneshot(get_request("/metrics", None)).await.unwrap();

        assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(limiter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_admin_path_rejects_user_token() {
        let app = test_app(Arc::new(PermissiveLimiter::new(Arc::new(SystemClock))));

        let token = user_token();
        let response = app
            .oneshot(get_request("/admin/users", Some(&token)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_token_passes_admin_path() {
        let app = test_app(Arc::new(PermissiveLimiter::new(Arc::new(SystemClock))));

        let token = admin_token();
        let response = app
            .oneshot(get_request("/admin/users", Some(&token)))
            .await
            .unwrap();

        // 认证通过，卡在不可达的上游
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_admin_precedence_over_public_paths() {
        // 同一路径同时配成公开与管理员：必须按管理员处理，缺令牌即 401
        let mut state = test_state(Arc::new(PermissiveLimiter::new(Arc::new(SystemClock))));
        state.classifier = Arc::new(AuthClassifier::new(
            vec!["/shared/*".to_string()],
            vec!["/shared/*".to_string()],
        ));
        let app = Router::new().fallback(proxy_handler).with_state(state);

        let response = app.oneshot(get_request("/shared/data", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

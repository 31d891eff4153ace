//! 令牌提取与校验
//!
//! 从 Authorization 头取出 Bearer 令牌，交给 TokenService 验签，
//! 再做声明形状检查。任何失败都折叠成 Unauthorized。

use axum::http::HeaderMap;
use floodgate_auth_core::{Claims, TokenService};
use floodgate_errors::{AppError, AppResult};

/// 校验普通用户令牌，返回账户 ID
pub fn validate_request(token_service: &TokenService, headers: &HeaderMap) -> AppResult<i64> {
    let claims = parse_claims(token_service, headers)?;
    Ok(claims.account_id)
}

/// 校验管理员令牌：普通校验之外还要求 admin 角色
pub fn validate_admin_request(token_service: &TokenService, headers: &HeaderMap) -> AppResult<i64> {
    let claims = parse_claims(token_service, headers)?;

    if !claims.is_admin() {
        return Err(AppError::unauthorized(
            "insufficient privileges: admin role required",
        ));
    }

    Ok(claims.account_id)
}

fn parse_claims(token_service: &TokenService, headers: &HeaderMap) -> AppResult<Claims> {
    let token = bearer_token(headers)?;
    let claims = token_service.validate_token(token)?;

    if claims.account_id <= 0 {
        return Err(AppError::unauthorized("invalid account ID in token"));
    }

    Ok(claims)
}

fn bearer_token(headers: &HeaderMap) -> AppResult<&str> {
    let header = headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("missing required Authorization header"))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::unauthorized("invalid Authorization header format"))?;

    if token.is_empty() {
        return Err(AppError::unauthorized("missing required JWT"));
    }

    Ok(token)
}

//! floodgate-auth-core - 认证核心库
//!
//! JWT Claims 解析与 HMAC 签名校验

use chrono::{Duration, Utc};
use floodgate_errors::{AppError, AppResult};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// JWT Claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// 账户 ID，限流以此为主体
    pub account_id: i64,
    /// Subject (user ID)
    pub sub: String,
    /// 用户角色（如 "admin"、"user"）
    #[serde(default)]
    pub role: String,
    /// Expiration time
    pub exp: i64,
    /// Issued at
    pub iat: i64,
    /// Not before
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
}

impl Claims {
    pub fn new(account_id: i64, sub: &str, role: &str, expires_in_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            account_id,
            sub: sub.to_string(),
            role: role.to_string(),
            exp: (now + Duration::seconds(expires_in_secs)).timestamp(),
            iat: now.timestamp(),
            nbf: Some(now.timestamp()),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// Token 服务
///
/// 持有编解码密钥；构造一次，随处共享
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_expires_in: i64,
}

impl TokenService {
    pub fn new(secret: &str, token_expires_in: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            token_expires_in,
        }
    }

    /// 生成访问令牌
    pub fn generate_token(&self, account_id: i64, sub: &str, role: &str) -> AppResult<String> {
        let claims = Claims::new(account_id, sub, role, self.token_expires_in);

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::internal(format!("Failed to generate token: {}", e)))
    }

    /// 验证令牌
    ///
    /// 仅接受 HMAC 族签名算法；非 HMAC 或签名无效一律拒绝
    pub fn validate_token(&self, token: &str) -> AppResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.leeway = 0; // 不允许时间偏差

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| AppError::unauthorized(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test_secret_at_least_32_characters_long";

    #[test]
    fn test_generate_and_validate_roundtrip() {
        let service = TokenService::new(SECRET, 3600);
        let token = service.generate_token(42, "user-42", "user").unwrap();

        let claims = service.validate_token(&token).unwrap();
        assert_eq!(claims.account_id, 42);
        assert_eq!(claims.sub, "user-42");
        assert_eq!(claims.role, "user");
        assert!(!claims.is_admin());
    }

    #[test]
    fn test_admin_role() {
        let service = TokenService::new(SECRET, 3600);
        let token = service.generate_token(7, "root", "admin").unwrap();

        let claims = service.validate_token(&token).unwrap();
        assert!(claims.is_admin());
    }

    #[test]
    fn test_expired_token_rejected() {
        // 负过期时间生成已经过期的令牌
        let service = TokenService::new(SECRET, -3600);
        let token = service.generate_token(1, "user-1", "user").unwrap();

        let result = service.validate_token(&token);
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let signer = TokenService::new("another_secret_with_32_characters!!", 3600);
        let verifier = TokenService::new(SECRET, 3600);
        let token = signer.generate_token(1, "user-1", "user").unwrap();

        assert!(verifier.validate_token(&token).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let service = TokenService::new(SECRET, 3600);
        assert!(service.validate_token("not.a.jwt").is_err());
        assert!(service.validate_token("").is_err());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let service = TokenService::new(SECRET, 3600);
        let token = service.generate_token(1, "user-1", "user").unwrap();

        // 替换 payload 段，签名应失配
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = jsonwebtoken::encode(
            &Header::default(),
            &Claims::new(999, "intruder", "admin", 3600),
            &EncodingKey::from_secret(b"wrong"),
        )
        .unwrap();
        let forged_payload: Vec<&str> = forged.split('.').collect();
        parts[1] = forged_payload[1];
        let tampered = parts.join(".");

        assert!(service.validate_token(&tampered).is_err());
    }
}

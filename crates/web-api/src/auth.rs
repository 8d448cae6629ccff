//! JWT 认证模块
//!
//! 令牌由外部签发，这里只负责校验；`issue_token` 供本地调试和测试使用。

use application::{ApplicationError, CredentialVerifier};
use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use config::JwtConfig;
use domain::UserId;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 生成 JWT token
    pub fn issue_token(&self, user_id: UserId) -> Result<String, ApiError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.config.expiration_hours);
        let claims = Claims {
            user_id: user_id.into(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|err| {
            ApiError::internal_server_error(format!("token generation failed: {err}"))
        })
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApplicationError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| {
                tracing::debug!(error = %err, "令牌校验失败");
                ApplicationError::Authentication
            })
    }
}

#[async_trait]
impl CredentialVerifier for JwtService {
    async fn verify(&self, token: &str) -> Result<UserId, ApplicationError> {
        self.verify_token(token).map(|claims| UserId::from(claims.user_id))
    }
}

/// 取出 `Authorization: Bearer <token>` 中的令牌
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// 先看查询参数里的 `token`，再看请求头
pub async fn authenticate(
    verifier: &dyn CredentialVerifier,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<UserId, ApiError> {
    let token = query_token
        .filter(|token| !token.is_empty())
        .or_else(|| bearer_token(headers))
        .ok_or_else(|| ApiError::from(ApplicationError::Authentication))?;
    Ok(verifier.verify(token).await?)
}

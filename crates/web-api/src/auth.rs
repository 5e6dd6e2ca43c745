//! JWT 会话凭证校验
//!
//! 共享密钥 HS256。凭证只在连接准入时校验一次，连接存活期间不再复验；
//! 风险由较短的凭证有效期兜底。任何校验失败都只回 Unauthorized，
//! 不区分“签名无效”与“已过期”，避免泄漏探测信息。

use config::JwtConfig;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use domain::UserId;

use crate::error::ApiError;

/// JWT Claims 结构。`sub` 按外部账号系统的惯例是数字 id 的字符串形式。
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
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
    pub fn generate_token(
        &self,
        user_id: UserId,
        username: Option<String>,
    ) -> Result<String, ApiError> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            sub: user_id.to_string(),
            username,
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::unauthorized(format!("Token generation failed: {}", err)))
    }

    /// 验证并解析 JWT token，返回凭证携带的用户标识
    pub fn verify_token(&self, token: &str) -> Result<UserId, ApiError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|_| ApiError::unauthorized("invalid or expired credential"))?;

        claims
            .sub
            .parse::<i64>()
            .map(UserId::new)
            .map_err(|_| ApiError::unauthorized("invalid or expired credential"))
    }
}

//! JWT 认证模块
//!
//! 凭证可以放在 `Authorization: Bearer` 头里，也可以作为 `token` 查询参数
//! （浏览器建立 WebSocket 时无法自定义请求头）。

use axum::{
    extract::{FromRequestParts, Query},
    http::{header, request::Parts, HeaderMap, Uri},
};
use config::JwtConfig;
use domain::{AuthenticatedUser, UserId, UserRole};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub username: String,
    pub role: UserRole,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

impl From<Claims> for AuthenticatedUser {
    fn from(claims: Claims) -> Self {
        AuthenticatedUser {
            user_id: UserId::from(claims.user_id),
            username: claims.username,
            role: claims.role,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
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
    pub fn generate_token(&self, user: &AuthenticatedUser) -> Result<String, ApiError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            user_id: user.user_id.into(),
            username: user.username.clone(),
            role: user.role,
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal_server_error(format!("Token generation failed: {}", err)))
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| ApiError::unauthorized(format!("Invalid token: {}", err)))
    }

    /// 先看请求头，再看 `token` 查询参数
    pub fn authenticate(&self, headers: &HeaderMap, uri: &Uri) -> Result<AuthenticatedUser, ApiError> {
        let token = match headers.get(header::AUTHORIZATION) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|raw| raw.strip_prefix("Bearer "))
                .map(str::to_owned)
                .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?,
            None => Query::<TokenQuery>::try_from_uri(uri)
                .ok()
                .and_then(|Query(query)| query.token)
                .filter(|token| !token.is_empty())
                .ok_or_else(|| ApiError::unauthorized("Missing credentials"))?,
        };

        self.verify_token(&token).map(AuthenticatedUser::from)
    }
}

/// 已认证的调用者
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthenticatedUser);

impl CurrentUser {
    pub fn user_id(&self) -> UserId {
        self.0.user_id
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        match self.0.role {
            UserRole::Admin => Ok(()),
            UserRole::User => Err(ApiError::forbidden("admin role required")),
        }
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        state
            .jwt_service
            .authenticate(&parts.headers, &parts.uri)
            .map(CurrentUser)
    }
}

//! 请求头中的用户身份
use axum::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use std::convert::Infallible;

use super::ApiError;
use crate::core::RegisteredUser;
use crate::AppState;

pub const ACCESS_CODE_HEADER: &str = "x-access-code";
pub const USER_ID_HEADER: &str = "x-user-id";
pub const CLIENT_SESSION_HEADER: &str = "x-client-session";

const ANONYMOUS_CLIENT: &str = "anonymous";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for RegisteredUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(access_code) = header(&parts.headers, ACCESS_CODE_HEADER) else {
            tracing::warn!("未登录用户访问{}", parts.uri.path());
            return Err(ApiError::Unauthorized("Unauthorized".to_string()));
        };
        let user_id = header(&parts.headers, USER_ID_HEADER)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(RegisteredUser {
            user_id,
            access_code: access_code.to_string(),
        })
    }
}

/// 项目问答的客户端标识，用来区分对话记忆
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSession(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for ClientSession
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let client = header(&parts.headers, CLIENT_SESSION_HEADER).unwrap_or(ANONYMOUS_CLIENT);
        Ok(ClientSession(client.to_string()))
    }
}

/// 配置了管理令牌时，管理接口要求`Authorization: Bearer <token>`
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.admin_token.as_deref() {
        let provided = header(request.headers(), AUTHORIZATION.as_str())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        if provided != Some(expected) {
            tracing::warn!("管理接口令牌无效：{}", request.uri().path());
            return Err(ApiError::Unauthorized("Invalid admin token".to_string()));
        }
    }
    Ok(next.run(request).await)
}

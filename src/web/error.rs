use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

use crate::{chat, files, knowledge, storage};

/// 接口返回的错误。响应体形如`{"status":"error","message":"..."}`。
#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest(msg)
            | Self::Unauthorized(msg)
            | Self::NotFound(msg)
            | Self::Internal(msg) => write!(f, "{msg}"),
        }
    }
}
impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Internal(detail) => {
                tracing::error!("请求处理失败：{detail}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = Json(json!({ "status": "error", "message": message }));
        (self.status(), body).into_response()
    }
}

impl From<storage::Error> for ApiError {
    fn from(e: storage::Error) -> Self {
        match e {
            storage::Error::NotFound => Self::NotFound("Resource not found".to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<knowledge::Error> for ApiError {
    fn from(e: knowledge::Error) -> Self {
        match e {
            knowledge::Error::NotFound(what) => Self::NotFound(format!("{what} not found")),
            knowledge::Error::Storage(e) => e.into(),
            knowledge::Error::Files(files::Error::NotFound(key)) => {
                Self::NotFound(format!("File {key} not found"))
            }
            // 上传的文件无法解析
            knowledge::Error::Document(e) => Self::BadRequest(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<chat::Error> for ApiError {
    fn from(e: chat::Error) -> Self {
        match e {
            chat::Error::BadRequest(msg) => Self::BadRequest(msg),
            chat::Error::NotFound(what) => Self::NotFound(format!("{what} not found")),
            chat::Error::Storage(e) => e.into(),
            chat::Error::Knowledge(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::BadRequest(format!("Invalid upload: {e}"))
    }
}

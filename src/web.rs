//! HTTP接口。公开接口位于`/rest/knowledge/api/v1`，管理接口位于`/admin/api`。
use axum::middleware;
use axum::Router;

mod admin;
mod auth;
mod bot;
mod error;
mod project;

pub use auth::{ClientSession, ACCESS_CODE_HEADER, CLIENT_SESSION_HEADER, USER_ID_HEADER};
pub use error::ApiError;

use crate::AppState;

pub const API_PREFIX: &str = "/rest/knowledge/api/v1";
pub const ADMIN_PREFIX: &str = "/admin/api";

pub fn router(state: AppState) -> Router {
    let public = Router::new().merge(bot::routes()).merge(project::routes());
    let admin = admin::routes().route_layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_admin,
    ));
    Router::new()
        .nest(API_PREFIX, public)
        .nest(ADMIN_PREFIX, admin)
        .with_state(state)
}

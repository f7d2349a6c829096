//! 机器人对话接口。对话内容以SSE事件推送。
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::ApiError;
use crate::chat::{RequestData, SessionTranscript};
use crate::core::RegisteredUser;
use crate::storage::model;
use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatStarted {
    session_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SseParams {
    session_id: Option<String>,
}

async fn post_chat(
    State(state): State<AppState>,
    user: RegisteredUser,
    Json(data): Json<RequestData>,
) -> Result<Json<ChatStarted>, ApiError> {
    let session_id = state.chat.run(&user, data).await?;
    Ok(Json(ChatStarted { session_id }))
}

async fn chat_events(
    State(state): State<AppState>,
    _user: RegisteredUser,
    Query(params): Query<SseParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let session_id = params
        .session_id
        .ok_or_else(|| ApiError::BadRequest("sessionId missing".to_string()))?;
    let rx = state
        .chat
        .take_stream(&session_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Chat session {session_id} not found")))?;
    tracing::debug!("SSE subscribed for {session_id}");

    let stream = UnboundedReceiverStream::new(rx)
        .map(|event| Ok(Event::default().event(event.name).data(event.data)));
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

async fn list_bots(State(state): State<AppState>) -> Result<Json<Vec<model::Bot>>, ApiError> {
    Ok(Json(state.chat.list_bots()?))
}

async fn list_sessions(
    State(state): State<AppState>,
    user: RegisteredUser,
) -> Result<Json<Vec<model::BotSession>>, ApiError> {
    Ok(Json(state.chat.list_sessions(&user)?))
}

async fn get_session(
    State(state): State<AppState>,
    user: RegisteredUser,
    Path(session_id): Path<String>,
) -> Result<Json<SessionTranscript>, ApiError> {
    Ok(Json(state.chat.session_transcript(&user, &session_id).await?))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/bots", get(list_bots))
        .route("/bots/chat", post(post_chat))
        .route("/bots/chat/sse", get(chat_events))
        .route("/bots/sessions", get(list_sessions))
        .route("/bots/sessions/:session_id", get(get_session))
}

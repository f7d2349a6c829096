//! 项目问答接口。回答以纯文本流返回。
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::Router;
use futures::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::auth::ClientSession;
use super::ApiError;
use crate::chat::ModelOverrides;
use crate::AppState;

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct AnswerParams {
    question: Option<String>,
    project_id: Option<i32>,
}

async fn answer(
    State(state): State<AppState>,
    ClientSession(client): ClientSession,
    Query(params): Query<AnswerParams>,
    Query(overrides): Query<ModelOverrides>,
) -> Result<Response, ApiError> {
    let question = params.question.filter(|q| !q.trim().is_empty());
    let (Some(question), Some(project_id)) = (question, params.project_id) else {
        return Ok((StatusCode::BAD_REQUEST, "Question or projectId missing").into_response());
    };
    let prepared = state
        .chat
        .prepare_answer(&client, &question, project_id, &overrides)
        .await?;

    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let chat = state.chat.clone();
    tokio::spawn(async move {
        if let Err(e) = chat.stream_answer(prepared, tx).await {
            tracing::error!("项目{project_id}回答失败：{e}");
        }
    });

    let body = UnboundedReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response())
}

async fn reset_memory(
    State(state): State<AppState>,
    ClientSession(client): ClientSession,
    Path(project_id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    state.chat.reset(&client, project_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/projects/answer", get(answer))
        .route("/projects/:id/memory", delete(reset_memory))
}

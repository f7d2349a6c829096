//! 管理接口：各实体的增删改查，以及文件上传与向量化
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ApiError;
use crate::files;
use crate::storage::{self, model};
use crate::AppState;

/// 可按主键读取的实体
pub trait Resource: Serialize + Sized + Send + 'static {
    const NAME: &'static str;

    fn list(agent: &storage::Agent) -> Result<Vec<Self>, storage::Error>;
    fn list_by_ids(agent: &storage::Agent, ids: &[i32]) -> Result<Vec<Self>, storage::Error>;
    fn find(agent: &storage::Agent, id: i32) -> Result<Option<Self>, storage::Error>;
}

/// 可新增与更新的实体
pub trait Editable: Resource {
    type New: DeserializeOwned + Send + 'static;

    fn create(agent: &storage::Agent, item: &Self::New) -> Result<Self, storage::Error>;
    fn update(agent: &storage::Agent, id: i32, item: &Self::New) -> Result<Self, storage::Error>;

    /// 写入前检查提交的内容
    fn validate(_item: &Self::New) -> Result<(), ApiError> {
        Ok(())
    }
}

macro_rules! resource {
    ($model:ident, $name:literal, list: $list:ident, list_by_ids: $by_ids:ident, find: $find:ident) => {
        impl Resource for model::$model {
            const NAME: &'static str = $name;

            fn list(agent: &storage::Agent) -> Result<Vec<Self>, storage::Error> {
                agent.$list()
            }

            fn list_by_ids(agent: &storage::Agent, ids: &[i32]) -> Result<Vec<Self>, storage::Error> {
                agent.$by_ids(ids)
            }

            fn find(agent: &storage::Agent, id: i32) -> Result<Option<Self>, storage::Error> {
                agent.$find(id)
            }
        }
    };
    (
        $model:ident, $new:ident, $name:literal,
        list: $list:ident, list_by_ids: $by_ids:ident, find: $find:ident,
        create: $create:ident, update: $update:ident
        $(, validate: $validate:path)?
    ) => {
        resource!($model, $name, list: $list, list_by_ids: $by_ids, find: $find);

        impl Editable for model::$model {
            type New = model::$new;

            fn create(agent: &storage::Agent, item: &Self::New) -> Result<Self, storage::Error> {
                agent.$create(item)
            }

            fn update(agent: &storage::Agent, id: i32, item: &Self::New) -> Result<Self, storage::Error> {
                agent.$update(id, item)
            }

            $(
                fn validate(item: &Self::New) -> Result<(), ApiError> {
                    $validate(&item.file_key)
                }
            )?
        }
    };
}

resource!(Bot, NewBot, "Bot",
    list: list_bots, list_by_ids: list_bots_by_ids, find: find_bot,
    create: create_bot, update: update_bot);
resource!(BotSession, NewBotSession, "Bot session",
    list: list_bot_sessions, list_by_ids: list_bot_sessions_by_ids, find: find_bot_session,
    create: create_bot_session, update: update_bot_session);
resource!(Dataset, NewDataset, "Dataset",
    list: list_datasets, list_by_ids: list_datasets_by_ids, find: find_dataset,
    create: create_dataset, update: update_dataset);
resource!(DatasetFile, NewDatasetFile, "Dataset file",
    list: list_dataset_files, list_by_ids: list_dataset_files_by_ids, find: find_dataset_file,
    create: create_dataset_file, update: update_dataset_file, validate: check_file_key);
resource!(Project, NewProject, "Project",
    list: list_projects, list_by_ids: list_projects_by_ids, find: find_project,
    create: create_project, update: update_project);
resource!(Document, NewDocument, "Document",
    list: list_documents, list_by_ids: list_documents_by_ids, find: find_document,
    create: create_document, update: update_document, validate: check_file_key);
resource!(Embedding, "Embedding",
    list: list_embeddings, list_by_ids: list_embeddings_by_ids, find: find_embedding);
resource!(ToolSet, NewToolSet, "Toolset",
    list: list_toolsets, list_by_ids: list_toolsets_by_ids, find: find_toolset,
    create: create_toolset, update: update_toolset);
resource!(ToolSetAbility, NewToolSetAbility, "Toolset ability",
    list: list_abilities, list_by_ids: list_abilities_by_ids, find: find_ability,
    create: create_ability, update: update_ability);
resource!(Model, NewModel, "Model",
    list: list_models, list_by_ids: list_models_by_ids, find: find_model,
    create: create_model, update: update_model);
resource!(FineTuning, NewFineTuning, "Fine tuning",
    list: list_fine_tunings, list_by_ids: list_fine_tunings_by_ids, find: find_fine_tuning,
    create: create_fine_tuning, update: update_fine_tuning);
resource!(Tag, NewTag, "Tag",
    list: list_tags, list_by_ids: list_tags_by_ids, find: find_tag,
    create: create_tag, update: update_tag);

// 记录只能引用文件存储生成的键
fn check_file_key(key: &str) -> Result<(), ApiError> {
    match files::is_valid_key(key) {
        true => Ok(()),
        false => Err(ApiError::BadRequest(format!("Invalid file key {key}"))),
    }
}

/// `?ids=1,2,3`
#[derive(Deserialize, Debug, Default)]
pub struct IdsQuery {
    ids: Option<String>,
}

impl IdsQuery {
    fn parse(&self) -> Result<Option<Vec<i32>>, ApiError> {
        let Some(ids) = self.ids.as_deref().filter(|s| !s.trim().is_empty()) else {
            return Ok(None);
        };
        ids.split(',')
            .map(|s| {
                s.trim()
                    .parse::<i32>()
                    .map_err(|_| ApiError::BadRequest(format!("Invalid id {s}")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

async fn list<R: Resource>(
    State(state): State<AppState>,
    Query(query): Query<IdsQuery>,
) -> Result<Json<Vec<R>>, ApiError> {
    let items = match query.parse()? {
        Some(ids) => R::list_by_ids(&state.agent, &ids)?,
        None => R::list(&state.agent)?,
    };
    Ok(Json(items))
}

async fn fetch<R: Resource>(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<R>, ApiError> {
    R::find(&state.agent, id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("{} {id} not found", R::NAME)))
}

async fn create<R: Editable>(
    State(state): State<AppState>,
    Json(item): Json<R::New>,
) -> Result<(StatusCode, Json<R>), ApiError> {
    R::validate(&item)?;
    let created = R::create(&state.agent, &item)?;
    tracing::info!("{} created", R::NAME);
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update<R: Editable>(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(item): Json<R::New>,
) -> Result<Json<R>, ApiError> {
    R::validate(&item)?;
    R::update(&state.agent, id, &item)
        .map(Json)
        .map_err(|e| match e {
            storage::Error::NotFound => ApiError::NotFound(format!("{} {id} not found", R::NAME)),
            other => other.into(),
        })
}

async fn create_bot(
    State(state): State<AppState>,
    Json(item): Json<model::NewBot>,
) -> Result<(StatusCode, Json<model::Bot>), ApiError> {
    let created = state.knowledge.create_bot(&item)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn delete_bot(State(state): State<AppState>, Path(id): Path<i32>) -> Result<StatusCode, ApiError> {
    state.agent.remove_bot(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_bot_session(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    state.agent.remove_bot_session(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_dataset(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    state.knowledge.remove_dataset(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_dataset_file(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    state.knowledge.remove_dataset_file(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    state.knowledge.remove_project(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    state.knowledge.remove_document(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_embedding(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    state.agent.remove_embedding(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_toolset(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    state.agent.remove_toolset(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_ability(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    state.agent.remove_ability(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_model(State(state): State<AppState>, Path(id): Path<i32>) -> Result<StatusCode, ApiError> {
    state.agent.remove_model(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_fine_tuning(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    state.agent.remove_fine_tuning(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_tag(State(state): State<AppState>, Path(id): Path<i32>) -> Result<StatusCode, ApiError> {
    state.agent.remove_tag(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// 上传表单中的文件
struct Upload {
    file_name: String,
    bytes: Vec<u8>,
    description: String,
}

// 读取`file`字段，可选的`description`字段作为文件说明
async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    let mut file = None;
    let mut description = String::new();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| "unknown".to_string());
                let bytes = field.bytes().await?;
                file = Some((file_name, bytes.to_vec()));
            }
            Some("description") => description = field.text().await?,
            _ => (),
        }
    }
    let (file_name, bytes) =
        file.ok_or_else(|| ApiError::BadRequest("Missing file field".to_string()))?;
    Ok(Upload {
        file_name,
        bytes,
        description,
    })
}

// 以附件形式返回存储的文件
fn attachment(file_name: &str, bytes: Vec<u8>) -> Response {
    let file_name: String = file_name
        .chars()
        .map(|c| match c {
            ' '..='~' if c != '"' && c != '\\' => c,
            _ => '_',
        })
        .collect();
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    )
        .into_response()
}

async fn download_document(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Response, ApiError> {
    let (document, bytes) = state.knowledge.document_file(id).await?;
    Ok(attachment(&document.name, bytes))
}

async fn download_dataset_file(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Response, ApiError> {
    let (file, bytes) = state.knowledge.dataset_file(id).await?;
    Ok(attachment(&file.name, bytes))
}

async fn list_dataset_files(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<model::DatasetFile>>, ApiError> {
    Ok(Json(state.agent.list_dataset_files_by_dataset(id)?))
}

async fn upload_dataset_file(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<model::DatasetFile>), ApiError> {
    let upload = read_upload(multipart).await?;
    let file = state
        .knowledge
        .add_dataset_file(id, &upload.file_name, &upload.description, upload.bytes)
        .await?;
    Ok((StatusCode::CREATED, Json(file)))
}

async fn list_toolset_abilities(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<model::ToolSetAbility>>, ApiError> {
    Ok(Json(state.agent.list_abilities_by_toolset(id)?))
}

async fn list_project_documents(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<model::Document>>, ApiError> {
    Ok(Json(state.agent.list_documents_by_project(id)?))
}

async fn upload_document(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<model::Document>), ApiError> {
    let upload = read_upload(multipart).await?;
    let document = state
        .knowledge
        .add_document(id, &upload.file_name, &upload.bytes)
        .await?;
    Ok((StatusCode::CREATED, Json(document)))
}

async fn embed_project(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let embedded = state.knowledge.embed_project(id).await?;
    Ok(Json(json!({ "status": "ok", "embeddedDocuments": embedded })))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/bots", get(list::<model::Bot>).post(create_bot))
        .route(
            "/bots/:id",
            get(fetch::<model::Bot>)
                .put(update::<model::Bot>)
                .delete(delete_bot),
        )
        .route(
            "/bot-sessions",
            get(list::<model::BotSession>).post(create::<model::BotSession>),
        )
        .route(
            "/bot-sessions/:id",
            get(fetch::<model::BotSession>)
                .put(update::<model::BotSession>)
                .delete(delete_bot_session),
        )
        .route(
            "/datasets",
            get(list::<model::Dataset>).post(create::<model::Dataset>),
        )
        .route(
            "/datasets/:id",
            get(fetch::<model::Dataset>)
                .put(update::<model::Dataset>)
                .delete(delete_dataset),
        )
        .route(
            "/datasets/:id/files",
            get(list_dataset_files).post(upload_dataset_file),
        )
        .route(
            "/dataset-files",
            get(list::<model::DatasetFile>).post(create::<model::DatasetFile>),
        )
        .route(
            "/dataset-files/:id",
            get(fetch::<model::DatasetFile>)
                .put(update::<model::DatasetFile>)
                .delete(delete_dataset_file),
        )
        .route("/dataset-files/:id/file", get(download_dataset_file))
        .route(
            "/projects",
            get(list::<model::Project>).post(create::<model::Project>),
        )
        .route(
            "/projects/:id",
            get(fetch::<model::Project>)
                .put(update::<model::Project>)
                .delete(delete_project),
        )
        .route(
            "/projects/:id/documents",
            get(list_project_documents).post(upload_document),
        )
        .route("/projects/:id/embeddings", post(embed_project))
        .route(
            "/documents",
            get(list::<model::Document>).post(create::<model::Document>),
        )
        .route(
            "/documents/:id",
            get(fetch::<model::Document>)
                .put(update::<model::Document>)
                .delete(delete_document),
        )
        .route("/documents/:id/file", get(download_document))
        .route("/embeddings", get(list::<model::Embedding>))
        .route(
            "/embeddings/:id",
            get(fetch::<model::Embedding>).delete(delete_embedding),
        )
        .route(
            "/toolsets",
            get(list::<model::ToolSet>).post(create::<model::ToolSet>),
        )
        .route(
            "/toolsets/:id",
            get(fetch::<model::ToolSet>)
                .put(update::<model::ToolSet>)
                .delete(delete_toolset),
        )
        .route("/toolsets/:id/abilities", get(list_toolset_abilities))
        .route(
            "/toolset-abilities",
            get(list::<model::ToolSetAbility>).post(create::<model::ToolSetAbility>),
        )
        .route(
            "/toolset-abilities/:id",
            get(fetch::<model::ToolSetAbility>)
                .put(update::<model::ToolSetAbility>)
                .delete(delete_ability),
        )
        .route("/models", get(list::<model::Model>).post(create::<model::Model>))
        .route(
            "/models/:id",
            get(fetch::<model::Model>)
                .put(update::<model::Model>)
                .delete(delete_model),
        )
        .route(
            "/fine-tunings",
            get(list::<model::FineTuning>).post(create::<model::FineTuning>),
        )
        .route(
            "/fine-tunings/:id",
            get(fetch::<model::FineTuning>)
                .put(update::<model::FineTuning>)
                .delete(delete_fine_tuning),
        )
        .route("/tags", get(list::<model::Tag>).post(create::<model::Tag>))
        .route(
            "/tags/:id",
            get(fetch::<model::Tag>)
                .put(update::<model::Tag>)
                .delete(delete_tag),
        )
}

//! 数据表对应的实体类型。
//! 每个实体有两种形态：带主键的查询结果`X`，以及用于新增与更新的`NewX`。
use super::schema;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

// 机器人：引用数据集、工具集与语言模型的对话角色
#[derive(Queryable, Selectable, Serialize, Deserialize, PartialEq, Debug, Clone)]
#[diesel(table_name = schema::knowledge_bot)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct Bot {
    #[diesel(column_name = id_bots)]
    pub id: i32,
    pub name: String,
    pub description: String,
    pub story: String,
    pub dataset_id: i32,
    pub toolset_id: i32,
    pub model_id: String,
    pub type_id: String,
}

#[derive(Insertable, AsChangeset, Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
#[diesel(table_name = schema::knowledge_bot)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase", default)]
pub struct NewBot {
    pub name: String,
    pub description: String,
    pub story: String,
    pub dataset_id: i32,
    pub toolset_id: i32,
    pub model_id: String,
    pub type_id: String,
}

// 机器人会话。content字段保存序列化后的会话消息列表。
#[derive(Queryable, Selectable, Serialize, Deserialize, PartialEq, Debug, Clone)]
#[diesel(table_name = schema::knowledge_bot_session)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct BotSession {
    #[diesel(column_name = id_bot_session)]
    pub id: i32,
    pub user_id: i32,
    pub creation_date: NaiveDateTime,
    pub content: String,
    pub bot_id: i32,
    #[diesel(column_name = user_access_code)]
    pub access_code: String,
    pub session_id: String,
}

#[derive(Insertable, AsChangeset, Serialize, Deserialize, PartialEq, Debug, Clone)]
#[diesel(table_name = schema::knowledge_bot_session)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct NewBotSession {
    pub user_id: i32,
    pub creation_date: NaiveDateTime,
    pub content: String,
    pub bot_id: i32,
    #[diesel(column_name = user_access_code)]
    pub access_code: String,
    pub session_id: String,
}

// 数据集，包含检索参数与提示词指令
#[derive(Queryable, Selectable, Serialize, Deserialize, PartialEq, Debug, Clone)]
#[diesel(table_name = schema::knowledge_dataset)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    #[diesel(column_name = id_dataset)]
    pub id: i32,
    pub name: String,
    pub description: String,
    pub record_max_tokens: i32,
    pub search_max_record: i32,
    pub search_max_tokens: i32,
    pub match_instruction: String,
    pub mismatch_instruction: String,
}

#[derive(Insertable, AsChangeset, Serialize, Deserialize, PartialEq, Debug, Clone)]
#[diesel(table_name = schema::knowledge_dataset)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase", default)]
pub struct NewDataset {
    pub name: String,
    pub description: String,
    pub record_max_tokens: i32,
    pub search_max_record: i32,
    pub search_max_tokens: i32,
    pub match_instruction: String,
    pub mismatch_instruction: String,
}

impl Default for NewDataset {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            record_max_tokens: 300,
            search_max_record: 10,
            search_max_tokens: 2000,
            match_instruction: String::new(),
            mismatch_instruction: String::new(),
        }
    }
}

// 数据集中的一个文件
#[derive(Queryable, Selectable, Serialize, Deserialize, PartialEq, Debug, Clone)]
#[diesel(table_name = schema::knowledge_dataset_file)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct DatasetFile {
    #[diesel(column_name = id_dataset_files)]
    pub id: i32,
    pub name: String,
    pub description: String,
    pub dataset_id: i32,
    pub file_key: String,
}

#[derive(Insertable, AsChangeset, Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
#[diesel(table_name = schema::knowledge_dataset_file)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase", default)]
pub struct NewDatasetFile {
    pub name: String,
    pub description: String,
    pub dataset_id: i32,
    pub file_key: String,
}

// 项目。model_id指向knowledge_model，prompt_system_id指向一组FineTuning消息。
#[derive(Queryable, Selectable, Serialize, Deserialize, PartialEq, Debug, Clone)]
#[diesel(table_name = schema::knowledge_project)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[diesel(column_name = id_project)]
    pub id: i32,
    pub title: String,
    pub description: String,
    pub model_id: i32,
    pub prompt_system_id: i32,
}

#[derive(Insertable, AsChangeset, Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
#[diesel(table_name = schema::knowledge_project)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase", default)]
pub struct NewProject {
    pub title: String,
    pub description: String,
    pub model_id: i32,
    pub prompt_system_id: i32,
}

// 项目文档
#[derive(Queryable, Selectable, Serialize, Deserialize, PartialEq, Debug, Clone)]
#[diesel(table_name = schema::knowledge_document)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[diesel(column_name = id_document)]
    pub id: i32,
    #[diesel(column_name = document_name)]
    pub name: String,
    pub file_key: String,
    pub project_id: i32,
    pub is_embedding: bool,
}

#[derive(Insertable, AsChangeset, Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
#[diesel(table_name = schema::knowledge_document)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase", default)]
pub struct NewDocument {
    #[diesel(column_name = document_name)]
    pub name: String,
    pub file_key: String,
    pub project_id: i32,
    pub is_embedding: bool,
}

// 文本片段的向量表示。vectors形如`[0.1, 0.2]`。
#[derive(Queryable, Selectable, Serialize, Deserialize, PartialEq, Debug, Clone)]
#[diesel(table_name = schema::knowledge_embedding)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct Embedding {
    #[diesel(column_name = id_embedding)]
    pub id: i32,
    pub file_id: String,
    pub project_id: i32,
    pub vectors: String,
    pub text_segment: String,
}

#[derive(Insertable, AsChangeset, Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
#[diesel(table_name = schema::knowledge_embedding)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase", default)]
pub struct NewEmbedding {
    pub file_id: String,
    pub project_id: i32,
    pub vectors: String,
    pub text_segment: String,
}

// 工具集
#[derive(Queryable, Selectable, Serialize, Deserialize, PartialEq, Debug, Clone)]
#[diesel(table_name = schema::knowledge_toolset)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct ToolSet {
    #[diesel(column_name = id_tool_set)]
    pub id: i32,
    pub name: String,
    pub description: String,
}

#[derive(Insertable, AsChangeset, Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
#[diesel(table_name = schema::knowledge_toolset)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase", default)]
pub struct NewToolSet {
    pub name: String,
    pub description: String,
}

// 工具集中的一项能力
#[derive(Queryable, Selectable, Serialize, Deserialize, PartialEq, Debug, Clone)]
#[diesel(table_name = schema::knowledge_toolset_ability)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct ToolSetAbility {
    #[diesel(column_name = id_tool_set_ability)]
    pub id: i32,
    pub name: String,
    pub description: String,
    pub instruction: String,
    pub toolset_id: i32,
}

#[derive(Insertable, AsChangeset, Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
#[diesel(table_name = schema::knowledge_toolset_ability)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase", default)]
pub struct NewToolSetAbility {
    pub name: String,
    pub description: String,
    pub instruction: String,
    pub toolset_id: i32,
}

// 语言模型服务的访问凭据
#[derive(Queryable, Selectable, Serialize, Deserialize, PartialEq, Debug, Clone)]
#[diesel(table_name = schema::knowledge_model)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[diesel(column_name = id_model)]
    pub id: i32,
    pub api_key: String,
    pub url: String,
}

#[derive(Insertable, AsChangeset, Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
#[diesel(table_name = schema::knowledge_model)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase", default)]
pub struct NewModel {
    pub api_key: String,
    pub url: String,
}

// 预置的对话消息。同一conversation_id下的消息按ordering排列。
#[derive(Queryable, Selectable, Serialize, Deserialize, PartialEq, Debug, Clone)]
#[diesel(table_name = schema::knowledge_fine_tuning)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct FineTuning {
    #[diesel(column_name = id_fine_tuning)]
    pub id: i32,
    pub project_id: i32,
    pub role: String,
    pub content: String,
    pub ordering: i32,
    pub conversation_id: i32,
}

#[derive(Insertable, AsChangeset, Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
#[diesel(table_name = schema::knowledge_fine_tuning)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase", default)]
pub struct NewFineTuning {
    pub project_id: i32,
    pub role: String,
    pub content: String,
    pub ordering: i32,
    pub conversation_id: i32,
}

// 标签
#[derive(Queryable, Selectable, Serialize, Deserialize, PartialEq, Debug, Clone)]
#[diesel(table_name = schema::knowledge_tag)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    #[diesel(column_name = id_tags)]
    pub id: i32,
    #[diesel(column_name = tag_name)]
    pub name: String,
}

#[derive(Insertable, AsChangeset, Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
#[diesel(table_name = schema::knowledge_tag)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase", default)]
pub struct NewTag {
    #[diesel(column_name = tag_name)]
    pub name: String,
}

use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

pub mod chat;
pub mod config;
pub mod core;
pub mod document;
pub mod files;
pub mod knowledge;
pub mod memory;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod storage;
pub mod vector;
pub mod web;

use crate::chat::{ChatService, ChatSettings};
use crate::config::Config;
use crate::core::{BoxError, Credentials, VectorStore};
use crate::files::FileStore;
use crate::knowledge::KnowledgeService;
use crate::memory::{InMemoryChatMemoryStore, PersistentChatMemoryStore};
use crate::provider::openai;
use crate::vector::{ElasticStore, MemoryStore};

/// 各接口共享的服务
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<storage::Agent>,
    pub knowledge: Arc<KnowledgeService>,
    pub chat: Arc<ChatService>,
    pub admin_token: Option<String>,
}

impl AppState {
    /// 按配置组装数据库、文件存储、模型供应商与向量库
    pub fn from_config(config: &Config) -> Result<Self, BoxError> {
        let agent = Arc::new(storage::Agent::new(&config.database_url)?);
        let files = Arc::new(FileStore::new(&config.file_store_path)?);
        let timeout = Duration::from_secs(config.request_timeout_secs);

        let provider = Arc::new(openai::Agent::new(openai::Config {
            credentials: Credentials {
                api_key: config.openai_api_key.clone(),
                url: config.openai_url.clone(),
            },
            embedding_model: config.embedding_model.clone(),
            timeout,
        })?);
        if config.openai_api_key.is_empty() {
            tracing::warn!("未设置KNOWLEDGE_OPENAI_API_KEY，只有配置了凭据的项目可以使用AI服务");
        }

        let dataset_store: Arc<dyn VectorStore> = match &config.elastic_url {
            Some(url) => {
                tracing::info!("Dataset vectors stored in Elasticsearch at {url}");
                Arc::new(ElasticStore::new(
                    url,
                    config.elastic_username.clone(),
                    config.elastic_password.clone(),
                    timeout,
                )?)
            }
            None => {
                tracing::info!("Dataset vectors kept in memory");
                Arc::new(MemoryStore::new())
            }
        };
        let tokenizer = tiktoken_rs::cl100k_base().map_err(|e| e.to_string())?;

        let knowledge = Arc::new(KnowledgeService::new(
            agent.clone(),
            files,
            provider.clone(),
            dataset_store,
            Arc::new(MemoryStore::new()),
            Arc::new(tokenizer),
        ));
        let chat = Arc::new(ChatService::new(
            agent.clone(),
            knowledge.clone(),
            provider,
            Arc::new(PersistentChatMemoryStore::new(agent.clone())),
            Arc::new(InMemoryChatMemoryStore::new()),
            ChatSettings::from(config),
        ));
        Ok(Self {
            agent,
            knowledge,
            chat,
            admin_token: config.admin_token.clone().filter(|t| !t.is_empty()),
        })
    }
}

pub fn app(state: AppState) -> Router {
    web::router(state).layer(TraceLayer::new_for_http())
}

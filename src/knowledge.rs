//! 知识库的文件导入流程：保存文件、解析、切分、向量化、写入向量库
use std::fmt;
use std::sync::Arc;

use tiktoken_rs::CoreBPE;

use crate::core::{
    BoxError, EmbeddingEntry, EmbeddingMatch, EmbeddingModel, TextSegment, VectorStore,
    META_FILE_KEY, META_FILE_NAME,
};
use crate::document::{self, DocumentType, LineSplitter, DEFAULT_OVERLAP_TOKENS};
use crate::files::{self, FileStore};
use crate::prompt;
use crate::storage::{self, model};
use crate::vector::{self, MemoryStore};

/// 片段的token上限未配置时使用的默认值
pub const DEFAULT_RECORD_MAX_TOKENS: usize = 300;

pub const META_EMBEDDING_ID: &str = "embedding_id";

// 随机器人创建的数据集的检索参数
const BOT_DATASET_RECORD_MAX_TOKENS: i32 = 200;
const BOT_DATASET_SEARCH_MAX_RECORD: i32 = 10;
const BOT_DATASET_SEARCH_MAX_TOKENS: i32 = 2000;

#[derive(Debug)]
pub enum Error {
    NotFound(String),
    Storage(storage::Error),
    Files(files::Error),
    Document(document::Error),
    Embedding(String),
    Vector(String),
    Task(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "{what} not found"),
            Self::Storage(e) => write!(f, "{e}"),
            Self::Files(e) => write!(f, "{e}"),
            Self::Document(e) => write!(f, "{e}"),
            Self::Embedding(msg) => write!(f, "向量化失败：{msg}"),
            Self::Vector(msg) => write!(f, "向量库操作失败：{msg}"),
            Self::Task(msg) => write!(f, "Background task failed: {msg}"),
        }
    }
}
impl std::error::Error for Error {}

impl From<storage::Error> for Error {
    fn from(e: storage::Error) -> Self {
        Self::Storage(e)
    }
}

impl From<files::Error> for Error {
    fn from(e: files::Error) -> Self {
        Self::Files(e)
    }
}

impl From<document::Error> for Error {
    fn from(e: document::Error) -> Self {
        Self::Document(e)
    }
}

fn vector_error(e: BoxError) -> Error {
    Error::Vector(e.to_string())
}

/// 知识库服务
pub struct KnowledgeService {
    agent: Arc<storage::Agent>,
    files: Arc<FileStore>,
    embedder: Arc<dyn EmbeddingModel>,
    dataset_store: Arc<dyn VectorStore>,
    project_store: Arc<MemoryStore>,
    tokenizer: Arc<CoreBPE>,
}

impl KnowledgeService {
    pub fn new(
        agent: Arc<storage::Agent>,
        files: Arc<FileStore>,
        embedder: Arc<dyn EmbeddingModel>,
        dataset_store: Arc<dyn VectorStore>,
        project_store: Arc<MemoryStore>,
        tokenizer: Arc<CoreBPE>,
    ) -> Self {
        Self {
            agent,
            files,
            embedder,
            dataset_store,
            project_store,
            tokenizer,
        }
    }

    pub fn tokenizer(&self) -> &CoreBPE {
        &self.tokenizer
    }

    pub fn embedder(&self) -> &dyn EmbeddingModel {
        self.embedder.as_ref()
    }

    /// 新增机器人。未指定数据集或工具集时，以机器人名称创建一个空的数据集或工具集。
    pub fn create_bot(&self, bot: &model::NewBot) -> Result<model::Bot, Error> {
        let dataset = (bot.dataset_id == 0).then(|| model::NewDataset {
            name: format!("{} dataset", bot.name),
            description: format!("{} dataset", bot.description),
            record_max_tokens: BOT_DATASET_RECORD_MAX_TOKENS,
            search_max_record: BOT_DATASET_SEARCH_MAX_RECORD,
            search_max_tokens: BOT_DATASET_SEARCH_MAX_TOKENS,
            match_instruction: prompt::DEFAULT_MATCH_INSTRUCTION.to_string(),
            mismatch_instruction: prompt::DEFAULT_MISMATCH_INSTRUCTION.to_string(),
        });
        let toolset = (bot.toolset_id == 0).then(|| model::NewToolSet {
            name: format!("{} toolset", bot.name),
            description: String::new(),
        });
        let created = self
            .agent
            .create_bot_with(bot, dataset.as_ref(), toolset.as_ref())?;
        tracing::info!(
            "Bot {} created with dataset {} and toolset {}",
            created.id,
            created.dataset_id,
            created.toolset_id
        );
        Ok(created)
    }

    // 在阻塞线程中解析并切分文档
    async fn parse_and_split(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        max_tokens: usize,
    ) -> Result<Vec<String>, Error> {
        let doc_type = DocumentType::from_file_name(file_name);
        let splitter = LineSplitter::with_tokenizer(
            self.tokenizer.clone(),
            max_tokens,
            DEFAULT_OVERLAP_TOKENS,
        );
        let segments = tokio::task::spawn_blocking(move || {
            document::parse(&bytes, doc_type).map(|text| splitter.split(&text))
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))??;
        tracing::debug!("{file_name} parsed as {doc_type:?} into {} segments", segments.len());
        Ok(segments)
    }

    async fn embed_segments(&self, segments: &[String]) -> Result<Vec<Vec<f32>>, Error> {
        let vectors = self
            .embedder
            .embed_all(segments)
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;
        if vectors.len() != segments.len() {
            return Err(Error::Embedding(format!(
                "{} segments but {} vectors",
                segments.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    /// 向数据集添加文件，并写入数据集的向量索引。
    /// 导入失败时撤销文件与记录。
    pub async fn add_dataset_file(
        &self,
        dataset_id: i32,
        name: &str,
        description: &str,
        bytes: Vec<u8>,
    ) -> Result<model::DatasetFile, Error> {
        let dataset = self
            .agent
            .find_dataset(dataset_id)?
            .ok_or_else(|| Error::NotFound(format!("Dataset {dataset_id}")))?;

        let file_key = self.files.store(&bytes).await?;
        let file = self.agent.create_dataset_file(&model::NewDatasetFile {
            name: name.to_string(),
            description: description.to_string(),
            dataset_id,
            file_key: file_key.clone(),
        });
        let file = match file {
            Ok(f) => f,
            Err(e) => {
                self.discard_file(&file_key).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.ingest_dataset_file(&dataset, &file, bytes).await {
            tracing::error!("数据集{dataset_id}导入文件{name}失败：{e}");
            self.agent.remove_dataset_file(file.id)?;
            self.discard_file(&file_key).await;
            self.discard_vectors(
                self.dataset_store.remove_file(&vector::dataset_index(dataset_id), &file_key).await,
                &file_key,
            );
            return Err(e);
        }
        tracing::info!("File {name} added to dataset {dataset_id}");
        Ok(file)
    }

    async fn ingest_dataset_file(
        &self,
        dataset: &model::Dataset,
        file: &model::DatasetFile,
        bytes: Vec<u8>,
    ) -> Result<usize, Error> {
        let max_tokens = match dataset.record_max_tokens {
            n if n > 0 => n as usize,
            _ => DEFAULT_RECORD_MAX_TOKENS,
        };
        let segments = self.parse_and_split(bytes, &file.name, max_tokens).await?;
        if segments.is_empty() {
            tracing::warn!("文件{}没有可导入的内容", file.name);
            return Ok(0);
        }
        let vectors = self.embed_segments(&segments).await?;
        let entries: Vec<EmbeddingEntry> = segments
            .into_iter()
            .zip(vectors)
            .map(|(text, vector)| EmbeddingEntry {
                id: uuid::Uuid::new_v4().to_string(),
                vector,
                segment: TextSegment::new(text)
                    .with_metadata(META_FILE_NAME, file.name.as_str())
                    .with_metadata(META_FILE_KEY, file.file_key.as_str()),
            })
            .collect();
        let count = entries.len();
        self.dataset_store
            .add_all(&vector::dataset_index(dataset.id), entries)
            .await
            .map_err(vector_error)?;
        Ok(count)
    }

    // 记录删除后清理存储的文件，失败只记录日志
    async fn discard_file(&self, key: &str) {
        if let Err(e) = self.files.delete(key).await {
            tracing::error!("清理文件{key}失败：{e}");
        }
    }

    fn discard_vectors(&self, result: Result<(), BoxError>, target: &str) {
        if let Err(e) = result {
            tracing::error!("清理{target}的向量失败：{e}");
        }
    }

    /// 读取数据集文件的原始内容
    pub async fn dataset_file(&self, id: i32) -> Result<(model::DatasetFile, Vec<u8>), Error> {
        let file = self
            .agent
            .find_dataset_file(id)?
            .ok_or_else(|| Error::NotFound(format!("Dataset file {id}")))?;
        let bytes = self.files.read(&file.file_key).await?;
        Ok((file, bytes))
    }

    /// 删除数据集文件，连同其文件与向量
    pub async fn remove_dataset_file(&self, id: i32) -> Result<(), Error> {
        let file = self.agent.remove_dataset_file(id)?;
        self.discard_file(&file.file_key).await;
        self.discard_vectors(
            self.dataset_store
                .remove_file(&vector::dataset_index(file.dataset_id), &file.file_key)
                .await,
            &file.file_key,
        );
        Ok(())
    }

    /// 删除数据集，连同其全部文件与向量索引
    pub async fn remove_dataset(&self, id: i32) -> Result<(), Error> {
        let files = self.agent.remove_dataset(id)?;
        for file in &files {
            self.discard_file(&file.file_key).await;
        }
        let index = vector::dataset_index(id);
        self.discard_vectors(self.dataset_store.drop_index(&index).await, &index);
        tracing::info!("Dataset {id} removed with {} files", files.len());
        Ok(())
    }

    /// 在数据集中检索
    pub async fn search_dataset(
        &self,
        dataset_id: i32,
        query: &[f32],
        max_results: usize,
        min_score: f64,
    ) -> Result<Vec<EmbeddingMatch>, Error> {
        self.dataset_store
            .find_relevant(&vector::dataset_index(dataset_id), query, max_results, min_score)
            .await
            .map_err(vector_error)
    }

    /// 上传项目文档，此时不做向量化
    pub async fn add_document(
        &self,
        project_id: i32,
        name: &str,
        bytes: &[u8],
    ) -> Result<model::Document, Error> {
        if self.agent.find_project(project_id)?.is_none() {
            return Err(Error::NotFound(format!("Project {project_id}")));
        }
        let file_key = self.files.store(bytes).await?;
        let document = self.agent.create_document(&model::NewDocument {
            name: name.to_string(),
            file_key: file_key.clone(),
            project_id,
            is_embedding: false,
        });
        match document {
            Ok(d) => Ok(d),
            Err(e) => {
                self.discard_file(&file_key).await;
                Err(e.into())
            }
        }
    }

    /// 读取文档的原始文件，返回文档记录与文件内容
    pub async fn document_file(&self, id: i32) -> Result<(model::Document, Vec<u8>), Error> {
        let document = self
            .agent
            .find_document(id)?
            .ok_or_else(|| Error::NotFound(format!("Document {id}")))?;
        let bytes = self.files.read(&document.file_key).await?;
        Ok((document, bytes))
    }

    pub async fn remove_document(&self, id: i32) -> Result<(), Error> {
        let document = self.agent.remove_document(id)?;
        self.discard_file(&document.file_key).await;
        self.discard_vectors(
            self.project_store
                .remove_file(&vector::project_index(document.project_id), &document.file_key)
                .await,
            &document.file_key,
        );
        Ok(())
    }

    pub async fn remove_project(&self, id: i32) -> Result<(), Error> {
        let documents = self.agent.remove_project(id)?;
        for document in &documents {
            self.discard_file(&document.file_key).await;
        }
        let index = vector::project_index(id);
        self.discard_vectors(self.project_store.drop_index(&index).await, &index);
        Ok(())
    }

    /// 向量化项目的全部文档，返回成功处理的文档数。
    /// 已有向量记录的文档直接复用，单个文档失败不影响其余文档。
    pub async fn embed_project(&self, project_id: i32) -> Result<usize, Error> {
        if self.agent.find_project(project_id)?.is_none() {
            return Err(Error::NotFound(format!("Project {project_id}")));
        }
        let documents = self.agent.list_documents_by_project(project_id)?;
        let mut embedded = 0;
        for document in &documents {
            match self.embed_document(document).await {
                Ok(count) => {
                    tracing::debug!("Document {} loaded with {count} segments", document.name);
                    embedded += 1;
                }
                Err(e) => tracing::error!("文档{}向量化失败：{e}", document.name),
            }
        }
        tracing::info!(
            "Project {project_id}: {embedded} of {} documents embedded",
            documents.len()
        );
        Ok(embedded)
    }

    async fn embed_document(&self, document: &model::Document) -> Result<usize, Error> {
        let mut rows = self.agent.list_embeddings_by_file(&document.file_key)?;
        if rows.is_empty() {
            let bytes = self.files.read(&document.file_key).await?;
            let segments = self
                .parse_and_split(bytes, &document.name, DEFAULT_RECORD_MAX_TOKENS)
                .await?;
            let vectors = self.embed_segments(&segments).await?;
            let new_rows: Vec<model::NewEmbedding> = segments
                .into_iter()
                .zip(vectors)
                .map(|(text, vector)| model::NewEmbedding {
                    file_id: document.file_key.clone(),
                    project_id: document.project_id,
                    vectors: vector::vector_to_string(&vector),
                    text_segment: text,
                })
                .collect();
            self.agent.create_embeddings(&new_rows)?;
            rows = self.agent.list_embeddings_by_file(&document.file_key)?;
        }

        let entries = rows
            .iter()
            .map(|row| embedding_entry(row, &document.name))
            .collect::<Result<Vec<_>, _>>()?;
        let count = entries.len();
        self.project_store
            .add_all(&vector::project_index(document.project_id), entries)
            .await
            .map_err(vector_error)?;
        self.agent.set_document_embedded(document.id, true)?;
        Ok(count)
    }

    /// 进程重启后项目索引为空，从向量记录重新加载
    pub async fn ensure_project_index(&self, project_id: i32) -> Result<(), Error> {
        let index = vector::project_index(project_id);
        if self.project_store.len(&index).await > 0 {
            return Ok(());
        }
        let documents = self.agent.list_documents_by_project(project_id)?;
        let mut entries = Vec::new();
        for row in self.agent.list_embeddings_by_project(project_id)? {
            let name = documents
                .iter()
                .find(|d| d.file_key == row.file_id)
                .map(|d| d.name.as_str())
                .unwrap_or_default();
            entries.push(embedding_entry(&row, name)?);
        }
        if !entries.is_empty() {
            tracing::info!("Reloaded {} embeddings for project {project_id}", entries.len());
            self.project_store
                .add_all(&index, entries)
                .await
                .map_err(vector_error)?;
        }
        Ok(())
    }

    pub async fn search_project(
        &self,
        project_id: i32,
        query: &[f32],
        max_results: usize,
        min_score: f64,
    ) -> Result<Vec<EmbeddingMatch>, Error> {
        self.project_store
            .find_relevant(&vector::project_index(project_id), query, max_results, min_score)
            .await
            .map_err(vector_error)
    }
}

fn embedding_entry(row: &model::Embedding, file_name: &str) -> Result<EmbeddingEntry, Error> {
    let vector =
        vector::vector_from_string(&row.vectors).map_err(|e| Error::Vector(e.to_string()))?;
    Ok(EmbeddingEntry {
        id: row.id.to_string(),
        vector,
        segment: TextSegment::new(row.text_segment.as_str())
            .with_metadata(META_FILE_NAME, file_name)
            .with_metadata(META_FILE_KEY, row.file_id.as_str())
            .with_metadata(META_EMBEDDING_ID, row.id.to_string()),
    })
}

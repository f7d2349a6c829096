/// 定义了系统运行所需的核心实体类型以及组合模块需要遵循的行为协议
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use tokio::sync::mpsc;

pub type BoxError = Box<dyn Error + Send + Sync>;

/// 已登录的用户
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct RegisteredUser {
    pub user_id: i32,
    pub access_code: String,
}

/// 消息角色
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum Role {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
}

impl TryFrom<&str> for Role {
    type Error = &'static str;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" | "ai" => Ok(Role::Assistant),
            _ => Err("Unknown chat role"),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        write!(f, "{s}")
    }
}

/// 一条带角色的对话消息
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// 文本片段及其元数据，例如来源文件名与文件键
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct TextSegment {
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

impl TextSegment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }
}

pub const META_FILE_NAME: &str = "file_name";
pub const META_FILE_KEY: &str = "file_key";

/// 待写入向量库的一条记录
#[derive(Debug, PartialEq, Clone)]
pub struct EmbeddingEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub segment: TextSegment,
}

/// 一条检索结果。score为相关度，取值范围[0, 1]。
#[derive(Debug, PartialEq, Clone)]
pub struct EmbeddingMatch {
    pub score: f64,
    pub id: String,
    pub segment: TextSegment,
}

/// 访问语言模型服务所需的凭据
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub url: String,
}

/// 模型参数
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ModelParams {
    pub model_name: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

impl ModelParams {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: 300,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
        }
    }
}

/// 一次对话请求
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub params: ModelParams,
    pub messages: Vec<ChatMessage>,
    /// 为空时使用服务的默认凭据
    pub credentials: Option<Credentials>,
}

/// 流式对话模型
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// 生成回复。增量文本逐条发送至sink，成功时返回完整回复。
    async fn stream(
        &self,
        request: &ChatRequest,
        sink: mpsc::UnboundedSender<String>,
    ) -> Result<String, BoxError>;
}

/// 文本向量化模型
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BoxError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BoxError> {
        let mut vectors = self.embed_all(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| BoxError::from("No embedding returned"))
    }
}

/// 向量库。每个索引相互隔离。
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add_all(&self, index: &str, entries: Vec<EmbeddingEntry>) -> Result<(), BoxError>;

    /// 按相关度降序返回不低于min_score的结果
    async fn find_relevant(
        &self,
        index: &str,
        query: &[f32],
        max_results: usize,
        min_score: f64,
    ) -> Result<Vec<EmbeddingMatch>, BoxError>;

    /// 删除某个文件的全部片段
    async fn remove_file(&self, index: &str, file_key: &str) -> Result<(), BoxError>;

    async fn drop_index(&self, index: &str) -> Result<(), BoxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serde() {
        let msg = ChatMessage::assistant("hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hello"}"#);
        assert_eq!(Role::try_from("AI"), Ok(Role::Assistant));
        assert!(Role::try_from("tool").is_err());
    }

    #[test]
    fn test_default_params() {
        let p = ModelParams::new("gpt-4");
        assert_eq!(p.temperature, 0.0);
        assert_eq!(p.top_p, 1.0);
        assert_eq!(p.max_tokens, 300);
    }
}

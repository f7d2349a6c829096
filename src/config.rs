//! 服务配置。从`KNOWLEDGE_`前缀的环境变量读取。
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_file_store_path")]
    pub file_store_path: String,

    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_openai_url")]
    pub openai_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    // 未设置时数据集使用进程内向量库
    pub elastic_url: Option<String>,
    pub elastic_username: Option<String>,
    pub elastic_password: Option<String>,

    pub admin_token: Option<String>,

    #[serde(default = "default_memory_max_messages")]
    pub memory_max_messages: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    #[serde(default = "default_project_max_results")]
    pub project_max_results: usize,
    #[serde(default = "default_stream_ttl_secs")]
    pub stream_ttl_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    pub log_dir: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8088".to_string()
}

fn default_database_url() -> String {
    "knowledge.db".to_string()
}

fn default_file_store_path() -> String {
    "files".to_string()
}

fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}

fn default_memory_max_messages() -> usize {
    5
}

fn default_min_similarity() -> f64 {
    0.5
}

fn default_project_max_results() -> usize {
    10
}

fn default_stream_ttl_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("KNOWLEDGE_").from_env::<Config>()
    }

    /// 从任意键值对读取，键名不带前缀
    pub fn from_pairs<I>(pairs: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(pairs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            database_url: default_database_url(),
            file_store_path: default_file_store_path(),
            openai_api_key: String::new(),
            openai_url: default_openai_url(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            elastic_url: None,
            elastic_username: None,
            elastic_password: None,
            admin_token: None,
            memory_max_messages: default_memory_max_messages(),
            min_similarity: default_min_similarity(),
            project_max_results: default_project_max_results(),
            stream_ttl_secs: default_stream_ttl_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            log_dir: None,
        }
    }
}

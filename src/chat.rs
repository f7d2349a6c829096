//! 对话服务：机器人对话任务与项目问答
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::core::{ChatMessage, ChatModel, ChatRequest, Credentials, ModelParams, RegisteredUser, Role};
use crate::knowledge::{self, KnowledgeService};
use crate::memory::{self, ChatMemoryStore, MessageWindow};
use crate::pipeline::{Pipeline, StreamEvent, STEP_CHAT};
use crate::prompt::{self, PromptVariables};
use crate::storage::{self, model};

mod registry;
pub use registry::StreamRegistry;

/// 对话任务中唯一的步骤
const CHAT_STEP_ID: i32 = 1;

/// 数据集未设置检索条数时使用的默认值
pub const DEFAULT_SEARCH_MAX_RECORD: usize = 10;

#[derive(Debug)]
pub enum Error {
    BadRequest(String),
    NotFound(String),
    Storage(storage::Error),
    Knowledge(knowledge::Error),
    Memory(memory::Error),
    Prompt(prompt::Error),
    Model(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest(msg) => write!(f, "{msg}"),
            Self::NotFound(what) => write!(f, "{what} not found"),
            Self::Storage(e) => write!(f, "{e}"),
            Self::Knowledge(e) => write!(f, "{e}"),
            Self::Memory(e) => write!(f, "{e}"),
            Self::Prompt(e) => write!(f, "{e}"),
            Self::Model(msg) => write!(f, "AI回复失败：{msg}"),
        }
    }
}
impl std::error::Error for Error {}

impl From<storage::Error> for Error {
    fn from(e: storage::Error) -> Self {
        Self::Storage(e)
    }
}

impl From<knowledge::Error> for Error {
    fn from(e: knowledge::Error) -> Self {
        Self::Knowledge(e)
    }
}

impl From<memory::Error> for Error {
    fn from(e: memory::Error) -> Self {
        Self::Memory(e)
    }
}

impl From<prompt::Error> for Error {
    fn from(e: prompt::Error) -> Self {
        Self::Prompt(e)
    }
}

/// 前端提交的对话请求。
/// 前端可能以数字形式发送botId，因此各字段同时接受字符串与数字。
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    #[serde(default, deserialize_with = "lenient_string")]
    pub action: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub question: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub bot_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub bot_session_id: Option<String>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Integer(i64),
        Float(f64),
        Flag(bool),
    }
    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Integer(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
        Raw::Flag(b) => b.to_string(),
    }))
}

/// 项目问答时可覆盖的模型参数
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelOverrides {
    pub model_name: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
}

impl ModelOverrides {
    pub fn apply(&self, default_model: &str) -> ModelParams {
        let mut params = ModelParams::new(self.model_name.as_deref().unwrap_or(default_model));
        if let Some(v) = self.temperature {
            params.temperature = v;
        }
        if let Some(v) = self.top_p {
            params.top_p = v;
        }
        if let Some(v) = self.max_tokens {
            params.max_tokens = v;
        }
        if let Some(v) = self.presence_penalty {
            params.presence_penalty = v;
        }
        if let Some(v) = self.frequency_penalty {
            params.frequency_penalty = v;
        }
        params
    }
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub default_model: String,
    pub memory_max_messages: usize,
    pub min_similarity: f64,
    pub project_max_results: usize,
    pub stream_ttl: Duration,
}

impl From<&Config> for ChatSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_model: config.chat_model.clone(),
            memory_max_messages: config.memory_max_messages,
            min_similarity: config.min_similarity,
            project_max_results: config.project_max_results,
            stream_ttl: Duration::from_secs(config.stream_ttl_secs),
        }
    }
}

/// 已准备好的项目问答，可直接交给模型生成
#[derive(Debug)]
pub struct PreparedAnswer {
    memory_id: String,
    question: String,
    window: MessageWindow,
    request: ChatRequest,
}

impl PreparedAnswer {
    pub fn request(&self) -> &ChatRequest {
        &self.request
    }
}

/// 一个会话及其对话内容
#[derive(Serialize, Debug)]
pub struct SessionTranscript {
    #[serde(flatten)]
    pub session: model::BotSession,
    pub messages: Vec<ChatMessage>,
}

pub struct ChatService {
    agent: Arc<storage::Agent>,
    knowledge: Arc<KnowledgeService>,
    chat_model: Arc<dyn ChatModel>,
    bot_memory: Arc<dyn ChatMemoryStore>,
    project_memory: Arc<dyn ChatMemoryStore>,
    streams: StreamRegistry,
    settings: ChatSettings,
}

impl ChatService {
    pub fn new(
        agent: Arc<storage::Agent>,
        knowledge: Arc<KnowledgeService>,
        chat_model: Arc<dyn ChatModel>,
        bot_memory: Arc<dyn ChatMemoryStore>,
        project_memory: Arc<dyn ChatMemoryStore>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            agent,
            knowledge,
            chat_model,
            bot_memory,
            project_memory,
            streams: StreamRegistry::new(settings.stream_ttl),
            settings,
        }
    }

    /// 启动一次机器人对话，返回订阅事件流所用的会话标识
    pub async fn run(
        self: &Arc<Self>,
        user: &RegisteredUser,
        data: RequestData,
    ) -> Result<String, Error> {
        let question = data
            .question
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| Error::BadRequest("Question is missing".to_string()))?
            .to_string();
        let bot_id: i32 = data
            .bot_id
            .as_deref()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| Error::BadRequest("botId is missing or invalid".to_string()))?;
        let bot = self
            .agent
            .find_bot(bot_id)?
            .ok_or_else(|| Error::NotFound(format!("Bot {bot_id}")))?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let memory_id =
            self.resolve_memory(user, bot.id, data.bot_session_id.as_deref(), &session_id)?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.register(&session_id, rx).await;

        tracing::info!("Chat {session_id} started with bot {bot_id}, memory {memory_id}");
        let service = self.clone();
        tokio::spawn(async move {
            service
                .chat_job(bot, question, memory_id, Pipeline::new(tx))
                .await;
        });
        Ok(session_id)
    }

    /// 取走会话的事件流，每个流只能订阅一次
    pub async fn take_stream(&self, session_id: &str) -> Option<mpsc::UnboundedReceiver<StreamEvent>> {
        self.streams.take(session_id).await
    }

    // 沿用用户自己的会话，否则新建
    fn resolve_memory(
        &self,
        user: &RegisteredUser,
        bot_id: i32,
        requested: Option<&str>,
        session_id: &str,
    ) -> Result<String, Error> {
        if let Some(requested) = requested.map(str::trim).filter(|s| !s.is_empty()) {
            match self.agent.find_bot_session_for_user(requested, &user.access_code)? {
                Some(session) if session.bot_id == bot_id => return Ok(session.session_id),
                _ => tracing::warn!("会话{requested}不属于当前用户或机器人，新建会话"),
            }
        }
        self.agent.create_bot_session(&model::NewBotSession {
            user_id: user.user_id,
            creation_date: chrono::Utc::now().naive_utc(),
            content: "[]".to_string(),
            bot_id,
            access_code: user.access_code.clone(),
            session_id: session_id.to_string(),
        })?;
        Ok(session_id.to_string())
    }

    async fn chat_job(
        &self,
        bot: model::Bot,
        question: String,
        memory_id: String,
        mut pipeline: Pipeline,
    ) {
        pipeline.init_step(CHAT_STEP_ID, STEP_CHAT);
        match self.chat(&bot, &question, &memory_id, &mut pipeline).await {
            Ok(answer) => {
                tracing::debug!("Bot {} answered with {} chars", bot.id, answer.len());
                pipeline.complete_step(CHAT_STEP_ID);
            }
            Err(e) => {
                tracing::error!("机器人{}回复失败：{e}", bot.id);
                pipeline.fail_step(CHAT_STEP_ID, &e.to_string());
            }
        }
        pipeline.close();
    }

    async fn chat(
        &self,
        bot: &model::Bot,
        question: &str,
        memory_id: &str,
        pipeline: &mut Pipeline,
    ) -> Result<String, Error> {
        let system = self.system_message(bot)?;
        let user_prompt = self.bot_prompt(bot, question).await?;

        let history = self.bot_memory.get(memory_id).await?;
        let mut window = MessageWindow::from_messages(self.settings.memory_max_messages, history);
        if !system.trim().is_empty() {
            window.add(ChatMessage::system(system));
        }

        let mut outgoing = window.clone();
        outgoing.add(ChatMessage::user(user_prompt));
        let model_name = match bot.model_id.trim() {
            "" => self.settings.default_model.as_str(),
            name => name,
        };
        let request = ChatRequest {
            params: ModelParams::new(model_name),
            messages: outgoing.into_messages(),
            credentials: None,
        };

        let answer = self.relay(&request, pipeline).await?;

        window.add(ChatMessage::user(question));
        window.add(ChatMessage::assistant(answer.as_str()));
        self.bot_memory.update(memory_id, window.messages()).await?;
        Ok(answer)
    }

    // 机器人设定加上工具集中各项能力的指令
    fn system_message(&self, bot: &model::Bot) -> Result<String, Error> {
        let mut system = bot.story.trim().to_string();
        if bot.toolset_id > 0 {
            for ability in self.agent.list_abilities_by_toolset(bot.toolset_id)? {
                let instruction = ability.instruction.trim();
                if instruction.is_empty() {
                    continue;
                }
                if !system.is_empty() {
                    system.push_str("\n\n");
                }
                system.push_str(instruction);
            }
        }
        Ok(system)
    }

    // 有数据集时检索相关内容并套用数据集的指令模板
    async fn bot_prompt(&self, bot: &model::Bot, question: &str) -> Result<String, Error> {
        if bot.dataset_id <= 0 {
            return Ok(question.to_string());
        }
        let Some(dataset) = self.agent.find_dataset(bot.dataset_id)? else {
            tracing::warn!("机器人{}引用的数据集{}不存在", bot.id, bot.dataset_id);
            return Ok(question.to_string());
        };

        let query = self
            .knowledge
            .embedder()
            .embed(question)
            .await
            .map_err(|e| knowledge::Error::Embedding(e.to_string()))?;
        let max_results = match dataset.search_max_record {
            n if n > 0 => n as usize,
            _ => DEFAULT_SEARCH_MAX_RECORD,
        };
        let matches = self
            .knowledge
            .search_dataset(dataset.id, &query, max_results, self.settings.min_similarity)
            .await?;
        tracing::debug!("Dataset {} returned {} matches", dataset.id, matches.len());

        let cap = match dataset.search_max_tokens {
            n if n > 0 => Some((n as usize, self.knowledge.tokenizer())),
            _ => None,
        };
        let variables = PromptVariables::from_matches(question, &matches, cap);
        Ok(prompt::render_instruction(
            &dataset.match_instruction,
            &dataset.mismatch_instruction,
            &variables,
        )?)
    }

    // 把模型的增量输出累积到对话步骤
    async fn relay(&self, request: &ChatRequest, pipeline: &mut Pipeline) -> Result<String, Error> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let producer = self.chat_model.stream(request, tx);
        let consumer = async {
            let mut text = String::new();
            while let Some(token) = rx.recv().await {
                text.push_str(&token);
                pipeline.update_step(CHAT_STEP_ID, &text);
            }
        };
        let (result, ()) = tokio::join!(producer, consumer);
        result.map_err(|e| Error::Model(e.to_string()))
    }

    fn project_memory_id(client: &str, project_id: i32) -> String {
        format!("{client}:{project_id}")
    }

    /// 为项目问答准备模型请求：检索项目文档，拼接预置对话与历史消息
    pub async fn prepare_answer(
        &self,
        client: &str,
        question: &str,
        project_id: i32,
        overrides: &ModelOverrides,
    ) -> Result<PreparedAnswer, Error> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::BadRequest("Question or projectId missing".to_string()));
        }
        let project = self
            .agent
            .find_project(project_id)?
            .ok_or_else(|| Error::NotFound(format!("Project {project_id}")))?;
        let credentials = self.project_credentials(&project)?;

        self.knowledge.ensure_project_index(project_id).await?;
        let query = self
            .knowledge
            .embedder()
            .embed(question)
            .await
            .map_err(|e| knowledge::Error::Embedding(e.to_string()))?;
        let matches = self
            .knowledge
            .search_project(
                project_id,
                &query,
                self.settings.project_max_results,
                self.settings.min_similarity,
            )
            .await?;
        let variables = PromptVariables::from_matches(question, &matches, None);
        let user_prompt = prompt::render_instruction("", "", &variables)?;

        let mut messages = self.fine_tuning_messages(&project)?;
        let memory_id = Self::project_memory_id(client, project_id);
        let history = self.project_memory.get(&memory_id).await?;
        let window = MessageWindow::from_messages(self.settings.memory_max_messages, history);
        messages.extend_from_slice(window.messages());
        messages.push(ChatMessage::user(user_prompt));

        tracing::debug!(
            "Project {project_id} answer prepared with {} matches and {} messages",
            matches.len(),
            messages.len()
        );
        Ok(PreparedAnswer {
            memory_id,
            question: question.to_string(),
            window,
            request: ChatRequest {
                params: overrides.apply(&self.settings.default_model),
                messages,
                credentials,
            },
        })
    }

    /// 生成项目问答。增量文本发送至sink，完成后写入对话记忆。
    pub async fn stream_answer(
        &self,
        prepared: PreparedAnswer,
        sink: mpsc::UnboundedSender<String>,
    ) -> Result<String, Error> {
        let PreparedAnswer {
            memory_id,
            question,
            mut window,
            request,
        } = prepared;
        let answer = self
            .chat_model
            .stream(&request, sink)
            .await
            .map_err(|e| Error::Model(e.to_string()))?;
        window.add(ChatMessage::user(question));
        window.add(ChatMessage::assistant(answer.as_str()));
        self.project_memory.update(&memory_id, window.messages()).await?;
        Ok(answer)
    }

    /// 清空某客户端在项目中的对话记忆
    pub async fn reset(&self, client: &str, project_id: i32) -> Result<(), Error> {
        let memory_id = Self::project_memory_id(client, project_id);
        self.project_memory.delete(&memory_id).await?;
        tracing::info!("Chat memory {memory_id} reset");
        Ok(())
    }

    // 项目引用的模型凭据。未配置时使用默认凭据。
    fn project_credentials(&self, project: &model::Project) -> Result<Option<Credentials>, Error> {
        if project.model_id <= 0 {
            return Ok(None);
        }
        match self.agent.find_model(project.model_id)? {
            Some(m) if !m.api_key.is_empty() => Ok(Some(Credentials {
                api_key: m.api_key,
                url: m.url,
            })),
            _ => {
                tracing::warn!("项目{}的模型{}不可用，使用默认凭据", project.id, project.model_id);
                Ok(None)
            }
        }
    }

    fn fine_tuning_messages(&self, project: &model::Project) -> Result<Vec<ChatMessage>, Error> {
        if project.prompt_system_id <= 0 {
            return Ok(Vec::new());
        }
        let rows = self
            .agent
            .list_fine_tunings_by_conversation(project.prompt_system_id)?;
        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            match Role::try_from(row.role.as_str()) {
                Ok(role) => messages.push(ChatMessage {
                    role,
                    content: row.content,
                }),
                Err(e) => tracing::warn!("忽略预置消息{}：{e} ({})", row.id, row.role),
            }
        }
        Ok(messages)
    }

    pub fn list_bots(&self) -> Result<Vec<model::Bot>, Error> {
        Ok(self.agent.list_bots()?)
    }

    pub fn list_sessions(&self, user: &RegisteredUser) -> Result<Vec<model::BotSession>, Error> {
        Ok(self.agent.list_bot_sessions_by_access_code(&user.access_code)?)
    }

    /// 用户的一个会话，不含系统消息
    pub async fn session_transcript(
        &self,
        user: &RegisteredUser,
        session_id: &str,
    ) -> Result<SessionTranscript, Error> {
        let session = self
            .agent
            .find_bot_session_for_user(session_id, &user.access_code)?
            .ok_or_else(|| Error::NotFound(format!("Session {session_id}")))?;
        let messages = self
            .bot_memory
            .get(session_id)
            .await?
            .into_iter()
            .filter(|m| m.role != Role::System)
            .collect();
        Ok(SessionTranscript { session, messages })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::BoxError;
    use crate::knowledge::tests::service as knowledge_service;
    use crate::memory::{InMemoryChatMemoryStore, PersistentChatMemoryStore};
    use crate::pipeline::{CLOSE, EVENT_MESSAGE, EVENT_PIPELINE};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 逐个发送预设token的模型，并记录收到的请求
    pub struct StubModel {
        tokens: Vec<&'static str>,
        fail: bool,
        pub requests: Mutex<Vec<ChatRequest>>,
    }

    impl StubModel {
        pub fn new(tokens: Vec<&'static str>) -> Self {
            Self {
                tokens,
                fail: false,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            Self {
                tokens: vec!["partial"],
                fail: true,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for StubModel {
        async fn stream(
            &self,
            request: &ChatRequest,
            sink: mpsc::UnboundedSender<String>,
        ) -> Result<String, BoxError> {
            self.requests.lock().unwrap().push(request.clone());
            for token in &self.tokens {
                let _ = sink.send(token.to_string());
            }
            match self.fail {
                true => Err("model unavailable".into()),
                false => Ok(self.tokens.concat()),
            }
        }
    }

    // 关键词向量互相正交，相关度为0.5，阈值需高于此值
    pub fn settings() -> ChatSettings {
        ChatSettings {
            min_similarity: 0.75,
            ..ChatSettings::from(&Config::default())
        }
    }

    pub struct Fixture {
        pub chat: Arc<ChatService>,
        pub agent: Arc<storage::Agent>,
        pub knowledge: Arc<KnowledgeService>,
        pub model: Arc<StubModel>,
    }

    pub fn fixture(dir: &std::path::Path, model: StubModel) -> Fixture {
        let (knowledge, agent) = knowledge_service(dir);
        let knowledge = Arc::new(knowledge);
        let model = Arc::new(model);
        let chat = Arc::new(ChatService::new(
            agent.clone(),
            knowledge.clone(),
            model.clone(),
            Arc::new(PersistentChatMemoryStore::new(agent.clone())),
            Arc::new(InMemoryChatMemoryStore::new()),
            settings(),
        ));
        Fixture {
            chat,
            agent,
            knowledge,
            model,
        }
    }

    fn user() -> RegisteredUser {
        RegisteredUser {
            user_id: 7,
            access_code: "alice".to_string(),
        }
    }

    fn ask(question: &str, bot_id: i32, session: Option<&str>) -> RequestData {
        RequestData {
            action: None,
            question: Some(question.to_string()),
            bot_id: Some(bot_id.to_string()),
            bot_session_id: session.map(str::to_string),
        }
    }

    async fn collect(chat: &ChatService, session_id: &str) -> Vec<StreamEvent> {
        let mut rx = chat.take_stream(session_id).await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn last_step(events: &[StreamEvent]) -> serde_json::Value {
        let data = &events
            .iter()
            .rev()
            .find(|e| e.name == EVENT_PIPELINE)
            .unwrap()
            .data;
        serde_json::from_str::<serde_json::Value>(data).unwrap()["1"].clone()
    }

    #[tokio::test]
    async fn test_bot_chat_relays_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(dir.path(), StubModel::new(vec!["Hel", "lo"]));
        let toolset = f
            .agent
            .create_toolset(&model::NewToolSet::default())
            .unwrap();
        f.agent
            .create_ability(&model::NewToolSetAbility {
                instruction: "Always answer politely.".to_string(),
                toolset_id: toolset.id,
                ..Default::default()
            })
            .unwrap();
        let bot = f
            .agent
            .create_bot(&model::NewBot {
                story: "You are a gardener.".to_string(),
                toolset_id: toolset.id,
                model_id: "gpt-4".to_string(),
                ..Default::default()
            })
            .unwrap();

        let session_id = f.chat.run(&user(), ask("hi", bot.id, None)).await.unwrap();
        let events = collect(&f.chat, &session_id).await;

        let last = events.last().unwrap();
        assert_eq!(last.name, EVENT_MESSAGE);
        assert_eq!(last.data, CLOSE);
        let step = last_step(&events);
        assert_eq!(step["status"], "completed");
        assert_eq!(step["message"], "Hello");
        assert_eq!(step["container"], "chat");

        let requests = f.model.requests.lock().unwrap();
        assert_eq!(requests[0].params.model_name, "gpt-4");
        assert_eq!(
            requests[0].messages[0],
            ChatMessage::system("You are a gardener.\n\nAlways answer politely.")
        );
        assert_eq!(requests[0].messages.last().unwrap(), &ChatMessage::user("hi"));

        let session = f
            .agent
            .find_bot_session_by_session_id(&session_id)
            .unwrap()
            .unwrap();
        assert_eq!(session.user_id, 7);
        assert_eq!(session.access_code, "alice");
        assert!(session.content.contains("Hello"));
    }

    #[tokio::test]
    async fn test_failed_model_fails_step() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(dir.path(), StubModel::failing());
        let bot = f.agent.create_bot(&model::NewBot::default()).unwrap();

        let session_id = f.chat.run(&user(), ask("hi", bot.id, None)).await.unwrap();
        let events = collect(&f.chat, &session_id).await;

        assert_eq!(events.last().unwrap().data, CLOSE);
        let step = last_step(&events);
        assert_eq!(step["status"], "failed");
        assert!(step["message"].as_str().unwrap().contains("model unavailable"));

        let session = f
            .agent
            .find_bot_session_by_session_id(&session_id)
            .unwrap()
            .unwrap();
        assert_eq!(session.content, "[]");
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(dir.path(), StubModel::new(vec!["ok"]));

        let missing = f.chat.run(&user(), ask("  ", 1, None)).await;
        assert!(matches!(missing, Err(Error::BadRequest(_))));

        let mut bad_id = ask("hi", 1, None);
        bad_id.bot_id = Some("abc".to_string());
        assert!(matches!(
            f.chat.run(&user(), bad_id).await,
            Err(Error::BadRequest(_))
        ));

        let unknown = f.chat.run(&user(), ask("hi", 42, None)).await;
        assert!(matches!(unknown, Err(Error::NotFound(_))));
        assert!(f.agent.list_bot_sessions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_reused() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(dir.path(), StubModel::new(vec!["pong"]));
        let bot = f.agent.create_bot(&model::NewBot::default()).unwrap();

        let first = f.chat.run(&user(), ask("ping", bot.id, None)).await.unwrap();
        collect(&f.chat, &first).await;
        let second = f
            .chat
            .run(&user(), ask("again", bot.id, Some(&first)))
            .await
            .unwrap();
        collect(&f.chat, &second).await;

        assert_ne!(first, second);
        assert_eq!(f.agent.list_bot_sessions().unwrap().len(), 1);
        let requests = f.model.requests.lock().unwrap();
        assert_eq!(
            requests[1].messages,
            vec![
                ChatMessage::user("ping"),
                ChatMessage::assistant("pong"),
                ChatMessage::user("again"),
            ]
        );
        drop(requests);

        // 其他用户不能沿用该会话
        let stranger = RegisteredUser {
            user_id: 8,
            access_code: "bob".to_string(),
        };
        let third = f
            .chat
            .run(&stranger, ask("hello", bot.id, Some(&first)))
            .await
            .unwrap();
        collect(&f.chat, &third).await;
        assert_eq!(f.agent.list_bot_sessions().unwrap().len(), 2);

        let transcript = f.chat.session_transcript(&user(), &first).await.unwrap();
        assert_eq!(transcript.messages.len(), 4);
        assert!(f.chat.session_transcript(&stranger, &first).await.is_err());
    }

    #[tokio::test]
    async fn test_dataset_context_in_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(dir.path(), StubModel::new(vec!["ok"]));
        let dataset = f
            .agent
            .create_dataset(&model::NewDataset {
                match_instruction: "Facts: {{informations}} Q: {{question}} ({{file_names_sources}})"
                    .to_string(),
                mismatch_instruction: "Nothing known about {{question}}".to_string(),
                ..Default::default()
            })
            .unwrap();
        f.knowledge
            .add_dataset_file(dataset.id, "fruit.txt", "", b"apple trees bloom in spring".to_vec())
            .await
            .unwrap();
        let bot = f
            .agent
            .create_bot(&model::NewBot {
                dataset_id: dataset.id,
                ..Default::default()
            })
            .unwrap();

        let s1 = f.chat.run(&user(), ask("apple?", bot.id, None)).await.unwrap();
        collect(&f.chat, &s1).await;
        let s2 = f.chat.run(&user(), ask("pears?", bot.id, None)).await.unwrap();
        collect(&f.chat, &s2).await;

        let requests = f.model.requests.lock().unwrap();
        assert_eq!(
            requests[0].messages.last().unwrap().content,
            "Facts: apple trees bloom in spring Q: apple? (fruit.txt)"
        );
        assert_eq!(
            requests[1].messages.last().unwrap().content,
            "Nothing known about pears?"
        );
        drop(requests);

        // 记忆中保存原始问题
        let transcript = f.chat.session_transcript(&user(), &s1).await.unwrap();
        assert_eq!(transcript.messages[0], ChatMessage::user("apple?"));
    }

    #[tokio::test]
    async fn test_match_larger_than_context_cap() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(dir.path(), StubModel::new(vec!["ok"]));
        let dataset = f
            .agent
            .create_dataset(&model::NewDataset {
                search_max_tokens: 2,
                match_instruction: "Facts: {{informations}}".to_string(),
                mismatch_instruction: "Nothing known".to_string(),
                ..Default::default()
            })
            .unwrap();
        f.knowledge
            .add_dataset_file(dataset.id, "fruit.txt", "", b"apple trees bloom in spring".to_vec())
            .await
            .unwrap();
        let bot = f
            .agent
            .create_bot(&model::NewBot {
                dataset_id: dataset.id,
                ..Default::default()
            })
            .unwrap();

        let session = f.chat.run(&user(), ask("apple?", bot.id, None)).await.unwrap();
        collect(&f.chat, &session).await;

        let requests = f.model.requests.lock().unwrap();
        let prompt = &requests[0].messages.last().unwrap().content;
        assert!(prompt.starts_with("Facts: apple"), "{prompt}");
        assert!(!prompt.contains("spring"));
    }

    #[tokio::test]
    async fn test_project_answer_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(dir.path(), StubModel::new(vec!["An ", "apple."]));
        let llm = f
            .agent
            .create_model(&model::NewModel {
                api_key: "sk-project".to_string(),
                url: "http://llm.local/v1".to_string(),
            })
            .unwrap();
        let project = f
            .agent
            .create_project(&model::NewProject {
                model_id: llm.id,
                prompt_system_id: 3,
                ..Default::default()
            })
            .unwrap();
        f.agent
            .create_fine_tuning(&model::NewFineTuning {
                project_id: project.id,
                role: "system".to_string(),
                content: "You are a librarian.".to_string(),
                ordering: 1,
                conversation_id: 3,
            })
            .unwrap();
        f.knowledge
            .add_document(project.id, "fruit.txt", b"apple pie recipe")
            .await
            .unwrap();
        f.knowledge.embed_project(project.id).await.unwrap();

        let overrides = ModelOverrides {
            temperature: Some(0.7),
            ..Default::default()
        };
        let prepared = f
            .chat
            .prepare_answer("c1", "apple?", project.id, &overrides)
            .await
            .unwrap();
        let request = prepared.request().clone();
        assert_eq!(request.messages[0], ChatMessage::system("You are a librarian."));
        assert!(request.messages[1].content.contains("apple pie recipe"));
        assert_eq!(request.params.temperature, 0.7);
        assert_eq!(request.params.max_tokens, 300);
        assert_eq!(request.credentials.as_ref().unwrap().api_key, "sk-project");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let answer = f.chat.stream_answer(prepared, tx).await.unwrap();
        let mut streamed = String::new();
        while let Some(token) = rx.recv().await {
            streamed.push_str(&token);
        }
        assert_eq!(answer, "An apple.");
        assert_eq!(streamed, answer);

        let again = f
            .chat
            .prepare_answer("c1", "more?", project.id, &ModelOverrides::default())
            .await
            .unwrap();
        assert_eq!(again.request().messages.len(), 4);
        // 不同客户端互不影响
        let other = f
            .chat
            .prepare_answer("c2", "more?", project.id, &ModelOverrides::default())
            .await
            .unwrap();
        assert_eq!(other.request().messages.len(), 2);

        f.chat.reset("c1", project.id).await.unwrap();
        let reset = f
            .chat
            .prepare_answer("c1", "more?", project.id, &ModelOverrides::default())
            .await
            .unwrap();
        assert_eq!(reset.request().messages.len(), 2);
    }

    #[tokio::test]
    async fn test_project_answer_errors() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(dir.path(), StubModel::new(vec!["ok"]));
        let defaults = ModelOverrides::default();
        assert!(matches!(
            f.chat.prepare_answer("c", "q", 5, &defaults).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            f.chat.prepare_answer("c", " ", 5, &defaults).await,
            Err(Error::BadRequest(_))
        ));
    }

    #[test]
    fn test_request_data_accepts_numbers() {
        let data: RequestData =
            serde_json::from_str(r#"{"action":"chat","question":"hi","botId":3}"#).unwrap();
        assert_eq!(data.bot_id.as_deref(), Some("3"));
        assert_eq!(data.bot_session_id, None);
        let data: RequestData =
            serde_json::from_str(r#"{"question":"hi","botId":"4","botSessionId":null}"#).unwrap();
        assert_eq!(data.bot_id.as_deref(), Some("4"));
    }

    #[test]
    fn test_overrides_apply() {
        let overrides = ModelOverrides {
            model_name: Some("gpt-4".to_string()),
            max_tokens: Some(50),
            ..Default::default()
        };
        let params = overrides.apply("gpt-3.5-turbo");
        assert_eq!(params.model_name, "gpt-4");
        assert_eq!(params.max_tokens, 50);
        assert_eq!(params.top_p, 1.0);
        assert_eq!(ModelOverrides::default().apply("m").model_name, "m");
    }
}

//! 对话记忆：固定窗口的消息列表，以及保存它的两种存储
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::{ChatMessage, Role};
use crate::storage;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Storage(storage::Error),
    Corrupted(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "Chat memory storage error: {e}"),
            Self::Corrupted(msg) => write!(f, "会话内容无法解析：{msg}"),
        }
    }
}
impl std::error::Error for Error {}

impl From<storage::Error> for Error {
    fn from(e: storage::Error) -> Self {
        Self::Storage(e)
    }
}

/// 保留最近若干条消息的窗口。
/// 系统消息始终保留且最多一条，溢出时淘汰最早的非系统消息。
#[derive(Debug, Clone, PartialEq)]
pub struct MessageWindow {
    max_messages: usize,
    messages: Vec<ChatMessage>,
}

impl MessageWindow {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages: max_messages.max(1),
            messages: Vec::new(),
        }
    }

    pub fn from_messages(max_messages: usize, messages: Vec<ChatMessage>) -> Self {
        let mut window = Self::new(max_messages);
        for m in messages {
            window.add(m);
        }
        window
    }

    pub fn add(&mut self, message: ChatMessage) {
        if message.role == Role::System {
            if let Some(pos) = self.messages.iter().position(|m| m.role == Role::System) {
                if self.messages[pos] == message {
                    return;
                }
                self.messages.remove(pos);
            }
            self.messages.insert(0, message);
        } else {
            self.messages.push(message);
        }
        self.evict();
    }

    fn evict(&mut self) {
        while self.messages.len() > self.max_messages {
            match self.messages.iter().position(|m| m.role != Role::System) {
                Some(pos) => {
                    self.messages.remove(pos);
                }
                None => break,
            }
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }
}

/// 以会话标识为键保存消息列表
#[async_trait]
pub trait ChatMemoryStore: Send + Sync {
    async fn get(&self, memory_id: &str) -> Result<Vec<ChatMessage>, Error>;
    async fn update(&self, memory_id: &str, messages: &[ChatMessage]) -> Result<(), Error>;
    async fn delete(&self, memory_id: &str) -> Result<(), Error>;
}

/// 保存在BotSession记录中的对话记忆
pub struct PersistentChatMemoryStore {
    agent: Arc<storage::Agent>,
}

impl PersistentChatMemoryStore {
    pub fn new(agent: Arc<storage::Agent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl ChatMemoryStore for PersistentChatMemoryStore {
    async fn get(&self, memory_id: &str) -> Result<Vec<ChatMessage>, Error> {
        let Some(session) = self.agent.find_bot_session_by_session_id(memory_id)? else {
            tracing::debug!("No bot session {memory_id}, starting with empty memory");
            return Ok(Vec::new());
        };
        if session.content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&session.content).map_err(|e| Error::Corrupted(e.to_string()))
    }

    async fn update(&self, memory_id: &str, messages: &[ChatMessage]) -> Result<(), Error> {
        let content =
            serde_json::to_string(messages).map_err(|e| Error::Corrupted(e.to_string()))?;
        self.agent.update_bot_session_content(memory_id, &content)?;
        Ok(())
    }

    /// 清空消息，保留会话记录本身
    async fn delete(&self, memory_id: &str) -> Result<(), Error> {
        match self.agent.update_bot_session_content(memory_id, "[]") {
            Ok(()) | Err(storage::Error::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 进程内的对话记忆
#[derive(Default)]
pub struct InMemoryChatMemoryStore {
    memories: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryChatMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatMemoryStore for InMemoryChatMemoryStore {
    async fn get(&self, memory_id: &str) -> Result<Vec<ChatMessage>, Error> {
        Ok(self
            .memories
            .read()
            .await
            .get(memory_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update(&self, memory_id: &str, messages: &[ChatMessage]) -> Result<(), Error> {
        self.memories
            .write()
            .await
            .insert(memory_id.to_string(), messages.to_vec());
        Ok(())
    }

    async fn delete(&self, memory_id: &str) -> Result<(), Error> {
        self.memories.write().await.remove(memory_id);
        Ok(())
    }
}

//! OpenAI作为API供应商
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use super::Error;
use crate::core::{
    BoxError, ChatMessage, ChatModel, ChatRequest, Credentials, EmbeddingModel,
};

// 单次向量化请求最多包含的文本数
const EMBEDDING_BATCH: usize = 64;

// 发送给OpenAI的对话请求
//   {"model": "gpt-3.5-turbo",
//    "messages": [{"role": "system", "content": "You are a helpful assistant."}, ...],
//    "stream": true}
#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    presence_penalty: f32,
    frequency_penalty: f32,
    stream: bool,
}

// 流式返回中的一条数据
// data: {"id":"chatcmpl-1","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]}
#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// 流式返回中一行的解析结果
#[derive(Debug, PartialEq)]
enum StreamLine {
    Token(String),
    Done,
    Skip,
}

fn parse_line(line: &str) -> Result<StreamLine, Error> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(StreamLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(StreamLine::Done);
    }
    let chunk: CompletionChunk =
        serde_json::from_str(data).map_err(|e| Error::Decode(format!("{e}: {data}")))?;
    if let Some(err) = chunk.error {
        return Err(Error::Api(err.message));
    }
    let token = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect::<String>();
    match token.is_empty() {
        true => Ok(StreamLine::Skip),
        false => Ok(StreamLine::Token(token)),
    }
}

// AI供应商服务所需要的参数
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub embedding_model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Agent {
    config: Config,
    client: reqwest::Client,
}

impl Agent {
    pub fn new(config: Config) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Request(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn endpoint(url: &str, path: &str) -> String {
        format!("{}/{path}", url.trim_end_matches('/'))
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        credentials: &Credentials,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, Error> {
        let response = self
            .client
            .post(Self::endpoint(&credentials.url, path))
            .bearer_auth(&credentials.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("AI服务返回错误{status}");
            return Err(Error::Status(status.as_u16(), body));
        }
        Ok(response)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Error> {
        let request = EmbeddingRequest {
            model: &self.config.embedding_model,
            input: texts,
        };
        let mut response: EmbeddingResponse = self
            .post(&self.config.credentials, "embeddings", &request)
            .await?
            .json()
            .await
            .map_err(|e| Error::Decode(e.to_string()))?;
        if response.data.len() != texts.len() {
            return Err(Error::Decode(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }
        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl ChatModel for Agent {
    async fn stream(
        &self,
        request: &ChatRequest,
        sink: mpsc::UnboundedSender<String>,
    ) -> Result<String, BoxError> {
        let credentials = request
            .credentials
            .as_ref()
            .unwrap_or(&self.config.credentials);
        let params = &request.params;
        let body = CompletionRequest {
            model: &params.model_name,
            messages: &request.messages,
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
            stream: true,
        };

        tracing::debug!("Ask AI for response with {} messages..", request.messages.len());
        let response = self.post(credentials, "chat/completions", &body).await?;

        let mut stream = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();
        let mut full_text = String::new();
        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Request(e.to_string()))?;
            pending.extend_from_slice(&chunk);

            // 只处理完整的行，剩余部分等待后续数据
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                match parse_line(&String::from_utf8_lossy(&line))? {
                    StreamLine::Token(token) => {
                        full_text.push_str(&token);
                        let _ = sink.send(token);
                    }
                    StreamLine::Done => break 'outer,
                    StreamLine::Skip => (),
                }
            }
        }
        tracing::debug!("AI response finished with {} chars", full_text.len());
        Ok(full_text)
    }
}

#[async_trait]
impl EmbeddingModel for Agent {
    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BoxError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBEDDING_BATCH) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token_line() {
        let line = r#"data: {"id":"c1","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        assert_eq!(parse_line(line).unwrap(), StreamLine::Token("Hel".to_string()));
    }

    #[test]
    fn test_parse_control_lines() {
        assert_eq!(parse_line("data: [DONE]").unwrap(), StreamLine::Done);
        assert_eq!(parse_line("").unwrap(), StreamLine::Skip);
        assert_eq!(parse_line(": keep-alive").unwrap(), StreamLine::Skip);
        // 只有角色没有内容
        let line = r#"data: {"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_line(line).unwrap(), StreamLine::Skip);
    }

    #[test]
    fn test_parse_error_line() {
        let line = r#"data: {"error":{"message":"quota exceeded","type":"insufficient_quota"}}"#;
        assert_eq!(
            parse_line(line),
            Err(Error::Api("quota exceeded".to_string()))
        );
        assert!(matches!(parse_line("data: {oops"), Err(Error::Decode(_))));
    }

    #[test]
    fn test_request_serialization() {
        let messages = vec![ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let body = CompletionRequest {
            model: "gpt-4",
            messages: &messages,
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: 300,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            stream: true,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["model"], "gpt-4");
        assert_eq!(v["messages"][0]["role"], "system");
        assert_eq!(v["stream"], true);
        assert_eq!(v["max_tokens"], 300);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let agent = Agent::new(Config {
            credentials: Credentials {
                api_key: "sk-test".to_string(),
                url: "http://127.0.0.1:9/v1".to_string(),
            },
            embedding_model: "text-embedding-ada-002".to_string(),
            timeout: Duration::from_millis(500),
        })
        .unwrap();
        assert!(agent.embed("hello").await.is_err());
    }
}

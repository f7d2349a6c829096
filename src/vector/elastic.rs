//! Elasticsearch向量库。每个数据集对应一个索引。
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

use super::Error;
use crate::core::{BoxError, EmbeddingEntry, EmbeddingMatch, TextSegment, VectorStore};

const FILE_KEY_FIELD: &str = "metadata.file_key";
const SCORE_SCRIPT: &str = "(cosineSimilarity(params.query_vector, 'vector') + 1.0) / 2";

pub struct ElasticStore {
    client: reqwest::Client,
    url: String,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
struct Document {
    text: String,
    vector: Vec<f32>,
    metadata: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: f64,
    #[serde(rename = "_source")]
    source: Source,
}

#[derive(Deserialize)]
struct Source {
    text: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct BulkResponse {
    errors: bool,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorCause,
}

#[derive(Deserialize)]
struct ErrorCause {
    #[serde(rename = "type")]
    kind: String,
}

// 并发创建同一索引时，后到的请求返回400 resource_already_exists_exception
fn index_already_exists(status: StatusCode, body: &str) -> bool {
    status == StatusCode::BAD_REQUEST
        && serde_json::from_str::<ErrorResponse>(body)
            .is_ok_and(|e| e.error.kind == "resource_already_exists_exception")
}

impl ElasticStore {
    pub fn new(
        url: &str,
        username: Option<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            username,
            password,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, format!("{}/{path}", self.url));
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_ref()),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
        builder.send().await.map_err(|e| Error::Http(e.to_string()))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, Error> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Status(status.as_u16(), body))
    }

    // 索引不存在时按向量维度创建
    async fn ensure_index(&self, index: &str, dims: usize) -> Result<(), Error> {
        let response = self.send(self.request(reqwest::Method::HEAD, index)).await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(Error::Status(response.status().as_u16(), String::new()));
        }
        let mapping = json!({
            "mappings": {
                "properties": {
                    "text": { "type": "text" },
                    "vector": { "type": "dense_vector", "dims": dims },
                    "metadata": {
                        "properties": {
                            "file_name": { "type": "keyword" },
                            "file_key": { "type": "keyword" }
                        }
                    }
                }
            }
        });
        let response = self
            .send(self.request(reqwest::Method::PUT, index).json(&mapping))
            .await?;
        let status = response.status();
        if status.is_success() {
            tracing::info!("Created Elasticsearch index {index} with {dims} dims");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if index_already_exists(status, &body) {
            tracing::debug!("Index {index} created concurrently");
            return Ok(());
        }
        Err(Error::Status(status.as_u16(), body))
    }
}

#[async_trait]
impl VectorStore for ElasticStore {
    async fn add_all(&self, index: &str, entries: Vec<EmbeddingEntry>) -> Result<(), BoxError> {
        let Some(first) = entries.first() else {
            return Ok(());
        };
        self.ensure_index(index, first.vector.len()).await?;

        let mut body = String::new();
        for entry in entries {
            let action = json!({ "index": { "_index": index, "_id": entry.id } });
            let doc = Document {
                text: entry.segment.text,
                vector: entry.vector,
                metadata: entry.segment.metadata,
            };
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&serde_json::to_string(&doc).map_err(|e| Error::Decode(e.to_string()))?);
            body.push('\n');
        }
        let response = self
            .send(
                self.request(reqwest::Method::POST, "_bulk?refresh=true")
                    .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                    .body(body),
            )
            .await?;
        let result: BulkResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Decode(e.to_string()))?;
        if result.errors {
            tracing::error!("部分向量写入索引{index}失败");
            return Err(Error::Status(200, "bulk request reported errors".to_string()).into());
        }
        Ok(())
    }

    async fn find_relevant(
        &self,
        index: &str,
        query: &[f32],
        max_results: usize,
        min_score: f64,
    ) -> Result<Vec<EmbeddingMatch>, BoxError> {
        let search = json!({
            "size": max_results,
            "min_score": min_score,
            "query": {
                "script_score": {
                    "query": { "match_all": {} },
                    "script": {
                        "source": SCORE_SCRIPT,
                        "params": { "query_vector": query }
                    }
                }
            }
        });
        let response = self
            .send(
                self.request(reqwest::Method::POST, &format!("{index}/_search"))
                    .json(&search),
            )
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("Index {index} does not exist yet");
            return Ok(Vec::new());
        }
        let result: SearchResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Decode(e.to_string()))?;
        let mut matches: Vec<EmbeddingMatch> = result
            .hits
            .hits
            .into_iter()
            .map(|hit| EmbeddingMatch {
                score: hit.score,
                id: hit.id,
                segment: TextSegment {
                    text: hit.source.text,
                    metadata: hit.source.metadata,
                },
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(matches)
    }

    async fn remove_file(&self, index: &str, file_key: &str) -> Result<(), BoxError> {
        let query = json!({
            "query": { "term": { FILE_KEY_FIELD: file_key } }
        });
        let response = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("{index}/_delete_by_query?refresh=true"),
                )
                .json(&query),
            )
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }

    async fn drop_index(&self, index: &str) -> Result<(), BoxError> {
        let response = self.send(self.request(reqwest::Method::DELETE, index)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await?;
        tracing::info!("Dropped Elasticsearch index {index}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_response_decoding() {
        let body = r#"{
            "took": 3,
            "hits": {
                "total": {"value": 1, "relation": "eq"},
                "hits": [{
                    "_index": "knowledge-embeddings-1",
                    "_id": "abc",
                    "_score": 0.93,
                    "_source": {
                        "text": "hello",
                        "vector": [0.1, 0.2],
                        "metadata": {"file_name": "a.txt", "file_key": "k"}
                    }
                }]
            }
        }"#;
        let result: SearchResponse = serde_json::from_str(body).unwrap();
        let hit = &result.hits.hits[0];
        assert_eq!(hit.id, "abc");
        assert_eq!(hit.score, 0.93);
        assert_eq!(hit.source.metadata["file_name"], "a.txt");
    }

    #[test]
    fn test_index_already_exists() {
        let body = r#"{
            "error": {
                "root_cause": [{"type": "resource_already_exists_exception", "reason": "index already exists"}],
                "type": "resource_already_exists_exception",
                "reason": "index [knowledge-embeddings-1/abc] already exists",
                "index": "knowledge-embeddings-1"
            },
            "status": 400
        }"#;
        assert!(index_already_exists(StatusCode::BAD_REQUEST, body));
        assert!(!index_already_exists(StatusCode::INTERNAL_SERVER_ERROR, body));
        let other = r#"{"error": {"type": "mapper_parsing_exception"}, "status": 400}"#;
        assert!(!index_already_exists(StatusCode::BAD_REQUEST, other));
        assert!(!index_already_exists(StatusCode::BAD_REQUEST, "not json"));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let store = ElasticStore::new(
            "http://127.0.0.1:9",
            None,
            None,
            Duration::from_millis(500),
        )
        .unwrap();
        assert!(store.find_relevant("idx", &[1.0], 3, 0.5).await.is_err());
    }
}

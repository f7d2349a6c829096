use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::relevance_score;
use crate::core::{BoxError, EmbeddingEntry, EmbeddingMatch, VectorStore, META_FILE_KEY};

/// 进程内向量库，按索引名隔离
#[derive(Default)]
pub struct MemoryStore {
    indices: RwLock<HashMap<String, Vec<EmbeddingEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, index: &str) -> usize {
        self.indices
            .read()
            .await
            .get(index)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn add_all(&self, index: &str, entries: Vec<EmbeddingEntry>) -> Result<(), BoxError> {
        let mut indices = self.indices.write().await;
        let stored = indices.entry(index.to_string()).or_default();
        for entry in entries {
            // 相同id覆盖旧记录
            match stored.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry,
                None => stored.push(entry),
            }
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
        let indices = self.indices.read().await;
        let Some(entries) = indices.get(index) else {
            return Ok(Vec::new());
        };
        let mut matches: Vec<EmbeddingMatch> = entries
            .iter()
            .map(|e| (relevance_score(query, &e.vector), e))
            .filter(|(score, _)| *score >= min_score)
            .map(|(score, e)| EmbeddingMatch {
                score,
                id: e.id.clone(),
                segment: e.segment.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(max_results);
        Ok(matches)
    }

    async fn remove_file(&self, index: &str, file_key: &str) -> Result<(), BoxError> {
        if let Some(entries) = self.indices.write().await.get_mut(index) {
            entries.retain(|e| e.segment.metadata(META_FILE_KEY) != Some(file_key));
        }
        Ok(())
    }

    async fn drop_index(&self, index: &str) -> Result<(), BoxError> {
        self.indices.write().await.remove(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TextSegment;

    fn entry(id: &str, vector: Vec<f32>, file_key: &str) -> EmbeddingEntry {
        EmbeddingEntry {
            id: id.to_string(),
            vector,
            segment: TextSegment::new(format!("text {id}")).with_metadata(META_FILE_KEY, file_key),
        }
    }

    #[tokio::test]
    async fn test_ordering_and_threshold() {
        let store = MemoryStore::new();
        store
            .add_all(
                "idx",
                vec![
                    entry("far", vec![-1.0, 0.0], "f"),
                    entry("close", vec![0.9, 0.1], "f"),
                    entry("exact", vec![1.0, 0.0], "f"),
                    entry("side", vec![0.0, 1.0], "f"),
                ],
            )
            .await
            .unwrap();

        let found = store.find_relevant("idx", &[1.0, 0.0], 10, 0.5).await.unwrap();
        let ids: Vec<&str> = found.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "close", "side"]);
        assert!(found.windows(2).all(|w| w[0].score >= w[1].score));

        let top = store.find_relevant("idx", &[1.0, 0.0], 1, 0.0).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].id, "exact");
    }

    #[tokio::test]
    async fn test_index_isolation() {
        let store = MemoryStore::new();
        store
            .add_all("a", vec![entry("1", vec![1.0, 0.0], "k")])
            .await
            .unwrap();
        assert!(store
            .find_relevant("b", &[1.0, 0.0], 10, 0.0)
            .await
            .unwrap()
            .is_empty());
        store.drop_index("a").await.unwrap();
        assert_eq!(store.len("a").await, 0);
    }

    #[tokio::test]
    async fn test_remove_file() {
        let store = MemoryStore::new();
        store
            .add_all(
                "idx",
                vec![
                    entry("1", vec![1.0, 0.0], "keep"),
                    entry("2", vec![1.0, 0.0], "drop"),
                    entry("3", vec![0.0, 1.0], "drop"),
                ],
            )
            .await
            .unwrap();
        store.remove_file("idx", "drop").await.unwrap();
        assert_eq!(store.len("idx").await, 1);

        // 重复写入相同id不会产生重复记录
        store
            .add_all("idx", vec![entry("1", vec![0.0, 1.0], "keep")])
            .await
            .unwrap();
        assert_eq!(store.len("idx").await, 1);
    }
}

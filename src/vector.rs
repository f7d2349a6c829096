//! 向量库实现与向量工具函数
use std::fmt;

mod elastic;
mod memory;

pub use elastic::ElasticStore;
pub use memory::MemoryStore;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Http(String),
    Status(u16, String),
    Decode(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(msg) => write!(f, "Vector store request failed: {msg}"),
            Self::Status(code, body) => write!(f, "Vector store returned {code}: {body}"),
            Self::Decode(msg) => write!(f, "向量数据解析失败：{msg}"),
        }
    }
}
impl std::error::Error for Error {}

/// 数据集对应的索引名
pub fn dataset_index(dataset_id: i32) -> String {
    format!("knowledge-embeddings-{dataset_id}")
}

/// 项目对应的索引名
pub fn project_index(project_id: i32) -> String {
    format!("knowledge-project-{project_id}")
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// 相关度，将余弦相似度映射到[0, 1]
pub fn relevance_score(a: &[f32], b: &[f32]) -> f64 {
    (cosine_similarity(a, b) + 1.0) / 2.0
}

/// 序列化为`[a, b, c]`
pub fn vector_to_string(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

pub fn vector_from_string(s: &str) -> Result<Vec<f32>, Error> {
    let inner = s
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| Error::Decode(format!("not a vector: {s}")))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f32>()
                .map_err(|e| Error::Decode(format!("{v}: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relevance() {
        assert!((relevance_score(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!((relevance_score(&[1.0, 0.0], &[0.0, 1.0]) - 0.5).abs() < 1e-9);
        assert!(relevance_score(&[1.0, 0.0], &[-1.0, 0.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_vector_string() {
        let v = vec![0.25, -1.5, 3.0];
        let s = vector_to_string(&v);
        assert_eq!(s, "[0.25, -1.5, 3]");
        assert_eq!(vector_from_string(&s).unwrap(), v);
        assert_eq!(vector_from_string("[]").unwrap(), Vec::<f32>::new());
        assert!(vector_from_string("0.1, 0.2").is_err());
        assert!(vector_from_string("[0.1, abc]").is_err());
    }

    #[test]
    fn test_index_names() {
        assert_eq!(dataset_index(4), "knowledge-embeddings-4");
        assert_eq!(project_index(4), "knowledge-project-4");
    }
}

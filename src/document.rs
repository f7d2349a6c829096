//! 文档解析与切分
use std::fmt;

mod parser;
mod splitter;

pub use parser::parse;
pub use splitter::LineSplitter;

/// 相邻片段之间默认重叠的token数
pub const DEFAULT_OVERLAP_TOKENS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentType {
    Pdf,
    Word,
    PowerPoint,
    Excel,
    Text,
}

impl DocumentType {
    /// 按扩展名判断文档类型，无法识别的一律按文本处理
    pub fn from_file_name(name: &str) -> Self {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Self::Pdf,
            "docx" => Self::Word,
            "pptx" => Self::PowerPoint,
            "xlsx" => Self::Excel,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Pdf(String),
    Office(String),
    Tokenizer(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pdf(msg) => write!(f, "PDF解析失败：{msg}"),
            Self::Office(msg) => write!(f, "Office文档解析失败：{msg}"),
            Self::Tokenizer(msg) => write!(f, "Tokenizer error: {msg}"),
        }
    }
}
impl std::error::Error for Error {}

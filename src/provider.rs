//! 语言模型与向量化服务的供应商
use std::fmt;

pub mod openai;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Request(String),
    Status(u16, String),
    Decode(String),
    Api(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(msg) => write!(f, "发送AI请求失败。{msg}"),
            Self::Status(code, body) => write!(f, "AI服务返回错误{code}：{body}"),
            Self::Decode(msg) => write!(f, "接收AI返回失败。{msg}"),
            Self::Api(msg) => write!(f, "AI服务报告错误：{msg}"),
        }
    }
}
impl std::error::Error for Error {}

//! 推理模型协作者抽象
//!
//! 内核只依赖 `converse(message, prior_turns) -> text` 这一能力；远端 API 客户端、重试与超时策略
//! 都属于实现方。任何 LlmError 对当前 run 都是致命的。

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::Message;

/// 模型调用失败类型（网络 / 超时 / 鉴权 / 其它）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("LLM error: {0}")]
    Other(String),
}

/// LLM 客户端 trait：把当前消息与此前的对话轮次交给模型，返回原始文本
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn converse(&self, message: &str, history: &[Message]) -> Result<String, LlmError>;
}

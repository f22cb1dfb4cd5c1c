//! 脚本化 LLM 客户端（用于测试与本地演示，无需 API）
//!
//! 按顺序返回预置回复；脚本耗尽后返回 LlmError::Other。`repeating` 则永远返回同一条回复。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message};

/// 单次调用的记录：当前消息与历史条数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub message: String,
    pub history_len: usize,
}

/// 脚本客户端：回复队列 + 调用记录
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    repeat: Option<String>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlm {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            repeat: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 永远返回同一条回复（模拟从不 finish 的模型）
    pub fn repeating(reply: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            repeat: Some(reply.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 追加一次失败回复
    pub fn then_fail(self, err: LlmError) -> Self {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Err(err));
        }
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn converse(&self, message: &str, history: &[Message]) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                message: message.to_string(),
                history_len: history.len(),
            });
        }
        let next = self
            .replies
            .lock()
            .map_err(|_| LlmError::Other("script lock poisoned".to_string()))?
            .pop_front();
        match (next, &self.repeat) {
            (Some(reply), _) => reply,
            (None, Some(text)) => Ok(text.clone()),
            (None, None) => Err(LlmError::Other("script exhausted".to_string())),
        }
    }
}

//! 错误恢复引擎
//!
//! 根据失败类型返回 RecoveryAction，供 ReAct 循环决定是重试、回写观察还是终止。

use crate::core::{ParseError, RecoveryAction, ToolError};
use crate::llm::LlmError;

/// 循环内可能出现的失败
#[derive(Debug, Clone, Copy)]
pub enum LoopFailure<'a> {
    Parse(&'a ParseError),
    Tool(&'a ToolError),
    Llm(&'a LlmError),
}

/// 语义化错误恢复：解析失败 → 纠正提示重试；工具失败 → 作为观察回写；模型失败 → 终止
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, failure: LoopFailure<'_>) -> RecoveryAction {
        match failure {
            LoopFailure::Parse(ParseError::MissingField(field)) => {
                RecoveryAction::RetryWithPrompt(format!(
                    "Parse error: missing required field '{field}'. \
                     Respond with exactly one JSON object: \
                     {{\"thought\": \"...\", \"action\": \"tool_name\", \"action_input\": {{...}}}}."
                ))
            }
            LoopFailure::Parse(e) => RecoveryAction::RetryWithPrompt(format!(
                "Parse error: {e}. Please respond with valid JSON format: \
                 {{\"thought\": \"...\", \"action\": \"tool_name\", \"action_input\": {{...}}}}."
            )),
            LoopFailure::Tool(ToolError::Blocked { score, .. }) => RecoveryAction::Observe(format!(
                "Error: the action was blocked by the safety gate (risk score {score}/10). \
                 Do not retry it; choose a narrower, non-destructive alternative."
            )),
            LoopFailure::Tool(ToolError::NotConfirmed { score }) => {
                RecoveryAction::Observe(format!(
                    "Error: the action needs user confirmation (risk score {score}/10) and was declined. \
                     Suggest an alternative or finish and explain what needs approval."
                ))
            }
            LoopFailure::Tool(e) => RecoveryAction::Observe(format!("Error: {e}")),
            LoopFailure::Llm(_) => RecoveryAction::Abort,
        }
    }
}

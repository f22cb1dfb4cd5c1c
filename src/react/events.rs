//! ReAct 过程事件：供调用方实时展示步骤、思考、工具调用与观察

use serde::Serialize;
use serde_json::Value;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 步数更新（从 1 开始）
    StepUpdate { step: usize, max_steps: usize },
    /// 正在调用模型
    Thinking,
    /// 调用工具（附风险评分）
    ToolCall {
        tool: String,
        args: Value,
        risk_score: u8,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        tool: String,
        operation_id: Option<String>,
        preview: String,
    },
    ToolFailure { tool: String, reason: String },
    /// 恢复动作（RetryWithPrompt / Observe / Abort）
    Recovery { action: String, detail: String },
    Finished { result: Value },
    Error { text: String },
}

//! 工具执行结果：结构化观察

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ToolError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationError {
    pub kind: String,
    pub message: String,
}

/// 回写给模型的观察；成功带 data，失败带 error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ObservationError>,
}

impl Observation {
    pub fn ok(operation_id: Option<String>, data: Value) -> Self {
        Self {
            success: true,
            operation_id,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(operation_id: Option<String>, err: &ToolError) -> Self {
        Self {
            success: false,
            operation_id,
            data: None,
            error: Some(ObservationError {
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
        }
    }

    /// 拼入对话的文本形式
    pub fn to_prompt_text(&self) -> String {
        let body = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("Observation: {body}")
    }
}

/// 执行器返回值：op id（只有写账本的动作才有）+ 结果
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub op_id: Option<String>,
    pub result: Result<Value, ToolError>,
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_observation(self) -> Observation {
        match self.result {
            Ok(data) => Observation::ok(self.op_id, data),
            Err(e) => Observation::failed(self.op_id, &e),
        }
    }
}

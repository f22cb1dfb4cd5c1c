//! 状态定义：Agent 阶段与 ReAct 步骤
//!
//! AgentPhase 通过 watch 通道对外投影；Step 是单次 run 的审计轨迹，随 RunReport 返回。

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::tools::Observation;

/// Agent 阶段：Idle → Thinking → (Executing → Observing → Thinking)* → Completed | Failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Idle,
    Thinking,
    Executing,
    Observing,
    Completed,
    Failed,
}

impl AgentPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentPhase::Completed | AgentPhase::Failed)
    }
}

/// 单步记录：思考、动作、参数与观察
#[derive(Clone, Debug, Serialize)]
pub struct Step {
    pub ordinal: usize,
    pub thought: String,
    pub action: String,
    pub parameters: Map<String, Value>,
    pub observation: Option<Observation>,
    pub timestamp: DateTime<Utc>,
}

/// 一次 run 的结果：会话、阶段、步骤轨迹与最终结果（或终止原因）
#[derive(Debug)]
pub struct RunReport {
    pub session_id: String,
    pub phase: AgentPhase,
    pub steps: Vec<Step>,
    /// 实际消耗的迭代次数（含解析失败的重试）
    pub iterations: usize,
    pub outcome: Result<Value, AgentError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// 本次 run 产生的所有账本操作 ID（按步骤顺序）
    pub fn operation_ids(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|s| s.observation.as_ref()?.operation_id.clone())
            .collect()
    }
}

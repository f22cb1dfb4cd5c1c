//! ReAct 主循环
//!
//! Think (LLM) -> 解析 -> 风险闸门 -> Act (Executor) -> Observe -> 下一轮；`finish` 结束，超过 max_steps 失败。
//! 解析失败交给 RecoveryEngine 生成纠正提示后重试（占用步数，不写账本）；工具失败作为观察回写，循环继续；
//! 模型调用失败终止本次 run。
//! 可选 event_tx 推送过程事件，可选 phase_tx 投影 AgentPhase。

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::core::{AgentError, AgentPhase, LoopFailure, RecoveryAction, RecoveryEngine, Step, ToolError};
use crate::llm::{Conversation, LlmClient, Message};
use crate::react::confirm::{ConfirmationHandler, ConfirmationRequest};
use crate::react::events::ReactEvent;
use crate::react::parser::{parse_response, ParsedResponse};
use crate::react::prompts;
use crate::risk::{RiskScorer, Verdict};
use crate::tools::{Action, FileExecutor, ToolOutcome, FINISH};

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 单次 run 的协作者与参数
pub struct ReactSession<'a> {
    pub llm: &'a dyn LlmClient,
    pub executor: &'a FileExecutor,
    pub scorer: &'a RiskScorer,
    pub recovery: &'a RecoveryEngine,
    pub confirmation: &'a dyn ConfirmationHandler,
    pub max_steps: usize,
    /// 可选：事件推送通道
    pub event_tx: Option<&'a mpsc::UnboundedSender<ReactEvent>>,
    /// 可选：阶段投影
    pub phase_tx: Option<&'a watch::Sender<AgentPhase>>,
}

impl ReactSession<'_> {
    fn emit(&self, ev: ReactEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }

    fn set_phase(&self, phase: AgentPhase) {
        if let Some(tx) = self.phase_tx {
            tx.send_replace(phase);
        }
    }
}

/// 每次 run 重置的状态：对话、步骤轨迹、序号游标
#[derive(Debug)]
pub struct RunState {
    pub conversation: Conversation,
    pub steps: Vec<Step>,
    /// 下一条账本记录的序号；只有追加成功才前进
    pub next_seq: u64,
    pub iterations: usize,
}

impl RunState {
    pub fn new(next_seq: u64) -> Self {
        Self {
            conversation: Conversation::new(),
            steps: Vec::new(),
            next_seq,
            iterations: 0,
        }
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > OBSERVATION_PREVIEW_CHARS {
        let head: String = text.chars().take(OBSERVATION_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

/// 执行 ReAct 循环直到 finish、步数耗尽或模型失败
pub async fn react_loop(
    session: &ReactSession<'_>,
    state: &mut RunState,
    session_id: &str,
    task: &str,
) -> Result<Value, AgentError> {
    state.conversation.push(Message::system(prompts::system_prompt()));
    state.conversation.push(Message::user(prompts::task_prompt(task)));

    loop {
        if state.iterations >= session.max_steps {
            let err = AgentError::StepBudgetExceeded {
                max_steps: session.max_steps,
            };
            tracing::warn!(session_id, max_steps = session.max_steps, "step budget exhausted");
            session.set_phase(AgentPhase::Failed);
            session.emit(ReactEvent::Error {
                text: err.to_string(),
            });
            return Err(err);
        }
        state.iterations += 1;
        let step = state.iterations;
        session.emit(ReactEvent::StepUpdate {
            step,
            max_steps: session.max_steps,
        });
        session.set_phase(AgentPhase::Thinking);
        session.emit(ReactEvent::Thinking);

        let reply = {
            let (current, history) = match state.conversation.split_last() {
                Some((m, h)) => (m.content.as_str(), h),
                None => (task, &[][..]),
            };
            session.llm.converse(current, history).await
        };
        let reply = match reply {
            Ok(r) => r,
            Err(e) => {
                if let RecoveryAction::RetryWithPrompt(prompt) | RecoveryAction::Observe(prompt) =
                    session.recovery.handle(LoopFailure::Llm(&e))
                {
                    tracing::warn!(session_id, step, error = %e, "llm call failed; retrying");
                    session.emit(ReactEvent::Recovery {
                        action: "RetryWithPrompt".to_string(),
                        detail: prompt.clone(),
                    });
                    state.conversation.push(Message::user(prompt));
                    continue;
                }
                tracing::error!(session_id, step, error = %e, "llm call failed");
                session.set_phase(AgentPhase::Failed);
                session.emit(ReactEvent::Recovery {
                    action: "Abort".to_string(),
                    detail: e.to_string(),
                });
                session.emit(ReactEvent::Error {
                    text: e.to_string(),
                });
                return Err(AgentError::Llm { step, source: e });
            }
        };
        state.conversation.push(Message::assistant(reply.clone()));

        let parsed = match parse_response(&reply) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(session_id, step, error = %e, "unparseable response");
                let prompt = match session.recovery.handle(LoopFailure::Parse(&e)) {
                    RecoveryAction::RetryWithPrompt(p) | RecoveryAction::Observe(p) => p,
                    RecoveryAction::Abort => e.to_string(),
                };
                session.emit(ReactEvent::Recovery {
                    action: "RetryWithPrompt".to_string(),
                    detail: prompt.clone(),
                });
                state.conversation.push(Message::user(prompt));
                continue;
            }
        };

        if parsed.action == FINISH {
            let result = Value::Object(parsed.parameters.clone());
            state.steps.push(Step {
                ordinal: step,
                thought: parsed.thought,
                action: parsed.action,
                parameters: parsed.parameters,
                observation: None,
                timestamp: Utc::now(),
            });
            tracing::info!(session_id, steps = step, "task finished");
            session.set_phase(AgentPhase::Completed);
            session.emit(ReactEvent::Finished {
                result: result.clone(),
            });
            return Ok(result);
        }

        let outcome = dispatch(session, state, session_id, &parsed).await;
        session.set_phase(AgentPhase::Observing);

        let hint = match &outcome.result {
            Err(e) => {
                session.emit(ReactEvent::ToolFailure {
                    tool: parsed.action.clone(),
                    reason: e.to_string(),
                });
                match session.recovery.handle(LoopFailure::Tool(e)) {
                    RecoveryAction::Observe(h) | RecoveryAction::RetryWithPrompt(h) => Some(h),
                    RecoveryAction::Abort => None,
                }
            }
            Ok(_) => None,
        };
        let observation = outcome.into_observation();
        let mut feedback = observation.to_prompt_text();
        if let Some(h) = hint {
            feedback.push('\n');
            feedback.push_str(&h);
        }
        session.emit(ReactEvent::Observation {
            tool: parsed.action.clone(),
            operation_id: observation.operation_id.clone(),
            preview: preview(&feedback),
        });

        state.steps.push(Step {
            ordinal: step,
            thought: parsed.thought,
            action: parsed.action,
            parameters: parsed.parameters,
            observation: Some(observation),
            timestamp: Utc::now(),
        });
        state.conversation.push(Message::user(feedback));
    }
}

/// 解析动作 → 风险闸门 → 执行；所有失败都以 ToolOutcome 返回
async fn dispatch(
    session: &ReactSession<'_>,
    state: &mut RunState,
    session_id: &str,
    parsed: &ParsedResponse,
) -> ToolOutcome {
    let refused = |e: ToolError| ToolOutcome {
        op_id: None,
        result: Err(e),
    };
    let action = match Action::from_parsed(&parsed.action, &parsed.parameters) {
        Ok(a) => a,
        Err(e) => return refused(e),
    };

    let description = action.describe();
    let assessment = session.scorer.assess(&description);
    session.emit(ReactEvent::ToolCall {
        tool: action.name().to_string(),
        args: Value::Object(parsed.parameters.clone()),
        risk_score: assessment.score,
    });
    tracing::debug!(
        session_id,
        tool = action.name(),
        score = assessment.score,
        verdict = %assessment.verdict,
        "risk assessed"
    );

    match assessment.verdict {
        Verdict::Blocked => {
            let reason = assessment
                .matched_rule
                .clone()
                .unwrap_or_else(|| format!("{description} is too dangerous"));
            tracing::warn!(session_id, score = assessment.score, %reason, "action blocked");
            return refused(ToolError::Blocked {
                score: assessment.score,
                reason,
            });
        }
        Verdict::ConfirmRequired => {
            let request = ConfirmationRequest {
                session_id: session_id.to_string(),
                tool: action.name().to_string(),
                description,
                score: assessment.score,
            };
            if !session.confirmation.confirm(&request).await {
                return refused(ToolError::NotConfirmed {
                    score: assessment.score,
                });
            }
        }
        Verdict::Safe | Verdict::Caution => {}
    }

    session.set_phase(AgentPhase::Executing);
    let outcome = session
        .executor
        .execute(&action, session_id, state.next_seq)
        .await;
    if outcome.op_id.is_some() {
        state.next_seq += 1;
    }
    outcome
}

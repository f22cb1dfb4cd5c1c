//! Agent 编排器
//!
//! 持有共享组件，对外提供 `run` / `run_in_session` / 回滚 / 过期备份清理。
//! 同一实例上的并发 run 由异步互斥锁串行化（排队而非拒绝）；当前阶段通过 watch 通道投影，
//! 可选的事件通道推送 ReAct 过程。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex};

use crate::core::builder::AgentComponents;
use crate::core::session::SessionGuard;
use crate::core::{AgentError, AgentPhase, LedgerError, RecoveryEngine, RollbackError, RunReport};
use crate::ledger::Ledger;
use crate::llm::LlmClient;
use crate::react::{react_loop, ConfirmationHandler, ReactEvent, ReactSession, RunState};
use crate::risk::RiskScorer;
use crate::rollback::{Reverted, RollbackEngine, RollbackSummary};
use crate::tools::FileExecutor;

pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    ledger: Arc<dyn Ledger>,
    scorer: Arc<RiskScorer>,
    executor: FileExecutor,
    rollback: RollbackEngine,
    recovery: RecoveryEngine,
    confirmation: Arc<dyn ConfirmationHandler>,
    agent_id: String,
    max_steps: usize,
    /// 串行化同一实例上的 run
    run_lock: Mutex<()>,
    phase_tx: watch::Sender<AgentPhase>,
    event_tx: Option<mpsc::UnboundedSender<ReactEvent>>,
}

impl Orchestrator {
    pub fn new(components: AgentComponents) -> Self {
        let AgentComponents {
            llm,
            ledger,
            backups,
            scorer,
            workspace,
            confirmation,
            agent_id,
            max_steps,
        } = components;
        let executor = FileExecutor::new(
            workspace,
            Arc::clone(&ledger),
            Arc::clone(&backups),
            Arc::clone(&scorer),
        );
        let rollback = RollbackEngine::new(Arc::clone(&ledger), backups);
        let (phase_tx, _) = watch::channel(AgentPhase::Idle);
        Self {
            llm,
            ledger,
            scorer,
            executor,
            rollback,
            recovery: RecoveryEngine::new(),
            confirmation,
            agent_id,
            max_steps,
            run_lock: Mutex::new(()),
            phase_tx,
            event_tx: None,
        }
    }

    pub fn with_event_sender(mut self, tx: mpsc::UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 订阅阶段变化
    pub fn subscribe_phase(&self) -> watch::Receiver<AgentPhase> {
        self.phase_tx.subscribe()
    }

    pub fn phase(&self) -> AgentPhase {
        *self.phase_tx.borrow()
    }

    /// 供调用方查询 OperationRecord / SessionRecord
    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn executor(&self) -> &FileExecutor {
        &self.executor
    }

    fn react_session(&self) -> ReactSession<'_> {
        ReactSession {
            llm: self.llm.as_ref(),
            executor: &self.executor,
            scorer: self.scorer.as_ref(),
            recovery: &self.recovery,
            confirmation: self.confirmation.as_ref(),
            max_steps: self.max_steps,
            event_tx: self.event_tx.as_ref(),
            phase_tx: Some(&self.phase_tx),
        }
    }

    /// 新开会话执行任务；会话在任何退出路径上恰好收尾一次
    ///
    /// 仅当会话无法打开时返回 Err；任务本身的失败记录在 `RunReport::outcome`。
    pub async fn run(&self, task: &str) -> Result<RunReport, AgentError> {
        let _running = self.run_lock.lock().await;
        self.phase_tx.send_replace(AgentPhase::Idle);

        let session_id = self.ledger.open_session(&self.agent_id, task)?;
        let guard = SessionGuard::new(Arc::clone(&self.ledger), session_id.clone());
        tracing::info!(session_id = %session_id, task, "run started");

        let mut state = RunState::new(1);
        let outcome = react_loop(&self.react_session(), &mut state, &session_id, task).await;

        match guard.finish(outcome.is_ok()) {
            Ok(_) => {}
            Err(e) => tracing::error!(session_id = %session_id, error = %e, "failed to finalize session"),
        }
        Ok(self.report(session_id, state, outcome))
    }

    /// 在已有会话中继续执行；序号接在会话最大序号之后，会话不由本次 run 收尾
    pub async fn run_in_session(&self, session_id: &str, task: &str) -> Result<RunReport, AgentError> {
        let _running = self.run_lock.lock().await;
        self.phase_tx.send_replace(AgentPhase::Idle);

        self.ledger.get_session(session_id)?;
        let next_seq = self.ledger.max_sequence(session_id)? + 1;
        tracing::info!(session_id, next_seq, task, "run resumed in session");

        let mut state = RunState::new(next_seq);
        let outcome = react_loop(&self.react_session(), &mut state, session_id, task).await;
        Ok(self.report(session_id.to_string(), state, outcome))
    }

    fn report(
        &self,
        session_id: String,
        state: RunState,
        outcome: Result<serde_json::Value, AgentError>,
    ) -> RunReport {
        let phase = self.phase();
        tracing::info!(
            session_id = %session_id,
            phase = ?phase,
            iterations = state.iterations,
            steps = state.steps.len(),
            ok = outcome.is_ok(),
            "run finished"
        );
        RunReport {
            session_id,
            phase,
            steps: state.steps,
            iterations: state.iterations,
            outcome,
        }
    }

    pub async fn rollback_operation(&self, op_id: &str) -> Result<Reverted, RollbackError> {
        let engine = self.rollback.clone();
        let id = op_id.to_string();
        tokio::task::spawn_blocking(move || engine.rollback_operation(&id))
            .await
            .map_err(|e| RollbackError::Io {
                op_id: op_id.to_string(),
                message: format!("rollback task failed: {e}"),
            })?
    }

    pub async fn rollback_session(&self, session_id: &str) -> Result<RollbackSummary, RollbackError> {
        let engine = self.rollback.clone();
        let id = session_id.to_string();
        tokio::task::spawn_blocking(move || engine.rollback_session(&id))
            .await
            .map_err(|e| RollbackError::Io {
                op_id: session_id.to_string(),
                message: format!("rollback task failed: {e}"),
            })?
    }

    pub async fn cleanup_expired_backups(&self, now: DateTime<Utc>) -> Result<usize, LedgerError> {
        let engine = self.rollback.clone();
        tokio::task::spawn_blocking(move || engine.cleanup_expired_backups(now))
            .await
            .map_err(|e| LedgerError::Storage(format!("cleanup task failed: {e}")))?
    }
}

//! Agent 构建器：按配置组装账本、回收站、评分器、执行器与编排器
//!
//! 共享组件只构造一次，以 Arc 注入执行器、回滚引擎与编排器；未显式提供的部分按配置创建。

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::backup::BackupStore;
use crate::config::AppConfig;
use crate::core::{LedgerError, Orchestrator};
use crate::ledger::{Ledger, SqliteLedger};
use crate::llm::LlmClient;
use crate::react::{AutoApprove, AutoDeny, ConfirmationHandler, ReactEvent};
use crate::risk::RiskScorer;
use crate::tools::Workspace;

/// 组装完成的组件，可直接交给 Orchestrator
pub struct AgentComponents {
    pub llm: Arc<dyn LlmClient>,
    pub ledger: Arc<dyn Ledger>,
    pub backups: Arc<BackupStore>,
    pub scorer: Arc<RiskScorer>,
    pub workspace: Workspace,
    pub confirmation: Arc<dyn ConfirmationHandler>,
    pub agent_id: String,
    pub max_steps: usize,
}

pub struct AgentBuilder {
    config: AppConfig,
    llm: Arc<dyn LlmClient>,
    workspace: Option<PathBuf>,
    ledger: Option<Arc<dyn Ledger>>,
    recycle_bin: Option<PathBuf>,
    confirmation: Option<Arc<dyn ConfirmationHandler>>,
    event_tx: Option<mpsc::UnboundedSender<ReactEvent>>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            config,
            llm,
            workspace: None,
            ledger: None,
            recycle_bin: None,
            confirmation: None,
            event_tx: None,
        }
    }

    /// 覆盖配置中的沙箱根目录
    pub fn with_workspace(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace = Some(root.into());
        self
    }

    /// 使用现成的账本（如多个编排器共享同一账本，或测试用 MemoryLedger）
    pub fn with_ledger(mut self, ledger: Arc<dyn Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_recycle_bin(mut self, dir: impl Into<PathBuf>) -> Self {
        self.recycle_bin = Some(dir.into());
        self
    }

    pub fn with_confirmation(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = Some(handler);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.config.agent.max_steps = max_steps;
        self
    }

    /// 设置事件推送通道
    pub fn with_event_sender(mut self, tx: mpsc::UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn build_ledger(&self) -> Result<Arc<dyn Ledger>, LedgerError> {
        if let Some(ledger) = &self.ledger {
            return Ok(Arc::clone(ledger));
        }
        let path = self.config.ledger_path();
        tracing::info!(path = %path.display(), "opening operation ledger");
        Ok(Arc::new(SqliteLedger::open(&path)?))
    }

    fn build_workspace(&self) -> Workspace {
        let root = self
            .workspace
            .clone()
            .unwrap_or_else(|| self.config.workspace_root());
        if let Err(e) = std::fs::create_dir_all(&root) {
            tracing::warn!(root = %root.display(), error = %e, "could not create workspace root");
        }
        Workspace::new(root)
    }

    fn build_confirmation(&self) -> Arc<dyn ConfirmationHandler> {
        match &self.confirmation {
            Some(handler) => Arc::clone(handler),
            None if self.config.risk.auto_approve_confirm => Arc::new(AutoApprove),
            None => Arc::new(AutoDeny),
        }
    }

    pub fn build_components(&self) -> Result<AgentComponents, LedgerError> {
        let recycle_bin = self
            .recycle_bin
            .clone()
            .unwrap_or_else(|| self.config.recycle_bin());
        Ok(AgentComponents {
            llm: Arc::clone(&self.llm),
            ledger: self.build_ledger()?,
            backups: Arc::new(BackupStore::new(recycle_bin, self.config.retention())),
            scorer: Arc::new(RiskScorer::new()),
            workspace: self.build_workspace(),
            confirmation: self.build_confirmation(),
            agent_id: self.config.agent.agent_id.clone(),
            max_steps: self.config.agent.max_steps,
        })
    }

    pub fn build(self) -> Result<Orchestrator, LedgerError> {
        let components = self.build_components()?;
        let orchestrator = Orchestrator::new(components);
        Ok(match self.event_tx {
            Some(tx) => orchestrator.with_event_sender(tx),
            None => orchestrator,
        })
    }
}

/// 便捷函数：加载配置（失败时用默认值）并创建 AgentBuilder
pub fn create_agent_builder(config_path: Option<PathBuf>, llm: Arc<dyn LlmClient>) -> AgentBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    AgentBuilder::new(config, llm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;

    #[test]
    fn test_builder_uses_config_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.app.data_dir = dir.path().join("data");
        config.app.workspace_root = Some(dir.path().join("ws"));
        config.agent.max_steps = 5;

        let components = AgentBuilder::new(config, Arc::new(ScriptedLlm::new(Vec::<String>::new())))
            .build_components()
            .unwrap();
        assert_eq!(components.max_steps, 5);
        assert!(dir.path().join("ws").is_dir());
        assert!(dir.path().join("data/operations.db").exists());
        assert_eq!(components.backups.root(), dir.path().join("data/recycle_bin"));
        assert_eq!(components.backups.retention(), chrono::Duration::days(30));
    }
}

//! 操作账本（预写日志）
//!
//! 任何文件变更前先持久化一条 Pending 记录；之后按状态机迁移：
//! Pending → Executing → Success | Failed，Success → RolledBack。
//! 每次迁移都是带前置状态条件的单条更新（compare-and-set）。
//!
//! 两种实现：`SqliteLedger`（持久化）与 `MemoryLedger`（进程内）。

pub mod memory;
pub mod record;
pub mod sqlite;

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::core::LedgerError;

pub use memory::MemoryLedger;
pub use record::{
    OperationRecord, OperationStatus, OperationType, SessionCounts, SessionRecord, SessionStatus,
    UnknownVariant,
};
pub use sqlite::SqliteLedger;

/// 追加一条操作意图所需的字段
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOperation {
    pub session_id: String,
    pub op_type: OperationType,
    pub source_path: Option<PathBuf>,
    pub dest_path: Option<PathBuf>,
    pub sequence_number: u64,
    pub size_hint: Option<u64>,
}

/// 成功完成时写回的结果元数据
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Completion {
    pub backup_path: Option<PathBuf>,
    pub backup_expires_at: Option<DateTime<Utc>>,
    pub size: u64,
    pub hash: Option<String>,
    pub is_directory: bool,
    pub extension: Option<String>,
    pub duration_ms: u64,
    pub space_impact_bytes: i64,
    pub created_dirs: Vec<PathBuf>,
}

/// 账本抽象；实现需保证单条记录的状态迁移是原子的
pub trait Ledger: Send + Sync {
    /// 追加 Pending 记录并落盘，返回 op id
    fn append(&self, op: NewOperation) -> Result<String, LedgerError>;

    /// Pending → Executing
    fn begin_execution(&self, op_id: &str) -> Result<(), LedgerError>;

    /// Executing → Success；Delete / Modify 必须带备份路径
    fn complete_success(&self, op_id: &str, completion: Completion) -> Result<(), LedgerError>;

    /// Pending | Executing → Failed
    fn complete_failure(&self, op_id: &str, error: &str) -> Result<(), LedgerError>;

    /// Success → RolledBack；已是 RolledBack 时返回 Ok(false)
    fn mark_rolled_back(&self, op_id: &str) -> Result<bool, LedgerError>;

    fn get(&self, op_id: &str) -> Result<OperationRecord, LedgerError>;

    /// 按序号升序
    fn list_for_session(&self, session_id: &str) -> Result<Vec<OperationRecord>, LedgerError>;

    /// 会话内 Success 记录，按序号降序（回滚顺序）
    fn successful_for_session_desc(
        &self,
        session_id: &str,
    ) -> Result<Vec<OperationRecord>, LedgerError>;

    /// 会话内最大序号；无记录为 0
    fn max_sequence(&self, session_id: &str) -> Result<u64, LedgerError>;

    /// 备份已过期且路径仍在记录中的操作
    fn expired_backups(&self, now: DateTime<Utc>) -> Result<Vec<OperationRecord>, LedgerError>;

    fn clear_backup(&self, op_id: &str) -> Result<(), LedgerError>;

    fn open_session(&self, agent_id: &str, task: &str) -> Result<String, LedgerError>;

    /// 仅第一次调用生效；返回是否生效
    fn finalize_session(&self, session_id: &str, success: bool) -> Result<bool, LedgerError>;

    /// 已结束的会话 → RolledBack；`rolled_back` 为会话内 RolledBack 记录总数。
    /// 仍在运行的会话返回 `SessionStillRunning`
    fn mark_session_rolled_back(&self, session_id: &str, rolled_back: u64)
        -> Result<(), LedgerError>;

    fn get_session(&self, session_id: &str) -> Result<SessionRecord, LedgerError>;

    /// 最近的会话，按创建时间降序
    fn recent_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>, LedgerError>;
}

pub fn new_operation_id() -> String {
    format!("op-{}", uuid::Uuid::new_v4().simple())
}

pub fn new_session_id() -> String {
    format!("sess-{}", uuid::Uuid::new_v4().simple())
}

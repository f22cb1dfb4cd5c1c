//! 错误分类与恢复动作
//!
//! 每个组件一个 thiserror 枚举：解析（ParseError）、工具（ToolError）、账本（LedgerError）、
//! 备份（BackupError）、回滚（RollbackError），以及终止整次运行的 AgentError。
//! 与 RecoveryEngine 配合：根据失败类型决定 RetryWithPrompt / Observe / Abort。

use std::path::PathBuf;

use thiserror::Error;

use crate::ledger::OperationStatus;
use crate::llm::LlmError;

/// 模型输出无法解析为 {thought, action, parameters}
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Missing required field: '{0}'")]
    MissingField(&'static str),

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl ParseError {
    /// 出错字段名（Malformed 无具体字段）
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ParseError::MissingField(f) => Some(f),
            ParseError::InvalidField { field, .. } => Some(field),
            ParseError::Malformed(_) => None,
        }
    }
}

/// 账本写入或状态迁移失败；意图未落盘时禁止执行变更
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Ledger storage error: {0}")]
    Storage(String),

    #[error("Operation not found: {0}")]
    NotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {0} is still running")]
    SessionStillRunning(String),

    #[error("Duplicate sequence number {seq} in session {session_id}")]
    DuplicateSequence { session_id: String, seq: u64 },

    #[error("Invalid transition for {op_id}: {from} -> {to}")]
    InvalidTransition {
        op_id: String,
        from: OperationStatus,
        to: OperationStatus,
    },

    #[error("Operation {0} cannot reach success without a backup")]
    MissingBackup(String),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}

/// 删除/覆盖前的快照失败；原文件保持不动
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackupError {
    #[error("Backup source not found: {0}")]
    SourceMissing(PathBuf),

    #[error("Snapshot of {path} is incomplete: {reason}")]
    Incomplete { path: PathBuf, reason: String },

    #[error("Backup not found: {0}")]
    Missing(PathBuf),

    #[error("Backup I/O error: {0}")]
    Io(String),
}

/// 工具执行失败：作为失败的 Step 回写给模型，循环继续
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {name}. Available tools: {available}")]
    ToolNotFound { name: String, available: String },

    #[error("Invalid parameters for {tool}: {reason}")]
    InvalidParameters { tool: String, reason: String },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("I/O failure: {0}")]
    IoFailure(String),

    #[error("Operation intent could not be recorded: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Backup failed, original left untouched: {0}")]
    Backup(#[from] BackupError),

    #[error("Blocked by risk gate (score {score}): {reason}")]
    Blocked { score: u8, reason: String },

    #[error("Action requires confirmation (score {score}) and was not approved")]
    NotConfirmed { score: u8 },
}

impl ToolError {
    /// 分类名，写入 Observation 供模型与调用方区分
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::ToolNotFound { .. } => "tool_not_found",
            ToolError::InvalidParameters { .. } => "invalid_parameters",
            ToolError::PathNotFound(_) => "path_not_found",
            ToolError::AlreadyExists(_) => "already_exists",
            ToolError::PermissionDenied(_) => "permission_denied",
            ToolError::IoFailure(_) => "io_failure",
            ToolError::Ledger(_) => "ledger_error",
            ToolError::Backup(_) => "backup_error",
            ToolError::Blocked { .. } => "blocked",
            ToolError::NotConfirmed { .. } => "not_confirmed",
        }
    }

    /// 包装 OS 错误：NotFound / PermissionDenied 单独归类，其余保留原始信息
    pub fn from_io(path: &std::path::Path, e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => ToolError::PathNotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => {
                ToolError::PermissionDenied(format!("{}: {}", path.display(), e))
            }
            _ => ToolError::IoFailure(format!("{}: {}", path.display(), e)),
        }
    }
}

/// 单个操作回滚失败；整会话回滚时只记录，不中止
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RollbackError {
    #[error("Operation not found for rollback: {0}")]
    NotFound(String),

    #[error("Operation {op_id} is {status}; only successful operations can be rolled back")]
    NotRollbackable {
        op_id: String,
        status: OperationStatus,
    },

    #[error("Backup for {op_id} is missing or unreadable: {detail}")]
    BackupMissing { op_id: String, detail: String },

    #[error("Destination of {op_id} no longer exists: {path}")]
    DestinationMissing { op_id: String, path: PathBuf },

    #[error("Cannot restore {op_id}: {path} is occupied")]
    TargetOccupied { op_id: String, path: PathBuf },

    #[error("Rollback of {op_id} failed: {message}")]
    Io { op_id: String, message: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// 终止整次 run 的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("Step budget exhausted: no finish after {max_steps} steps")]
    StepBudgetExceeded { max_steps: usize },

    #[error("LLM error at step {step}: {source}")]
    Llm { step: usize, source: LlmError },

    #[error("Session bookkeeping failed: {0}")]
    Ledger(#[from] LedgerError),
}

/// 恢复引擎根据失败类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 将纠正提示注入下一轮，让 LLM 重试（解析失败）
    RetryWithPrompt(String),
    /// 把失败作为 Observation 回写，继续推理（工具失败）
    Observe(String),
    /// 终止当前任务
    Abort,
}

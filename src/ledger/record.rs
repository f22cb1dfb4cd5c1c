//! 账本记录类型：操作记录、会话记录及其状态机

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 数据库中出现未知枚举值
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: UnknownVariant| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

/// 文件操作类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Delete,
    Move,
    Copy,
    Rename,
    Modify,
}

text_enum!(OperationType, "operation type", {
    Create => "create",
    Delete => "delete",
    Move => "move",
    Copy => "copy",
    Rename => "rename",
    Modify => "modify",
});

impl OperationType {
    /// 成功前必须持有备份的类型
    pub fn requires_backup(self) -> bool {
        matches!(self, OperationType::Delete | OperationType::Modify)
    }

    /// 空间影响（字节）：正数为释放，负数为占用
    pub fn space_impact(self, size: u64, previous_size: Option<u64>) -> i64 {
        let size = i64::try_from(size).unwrap_or(i64::MAX);
        match self {
            OperationType::Create | OperationType::Copy => -size,
            OperationType::Delete => size,
            OperationType::Move | OperationType::Rename => 0,
            OperationType::Modify => {
                let old = previous_size
                    .and_then(|s| i64::try_from(s).ok())
                    .unwrap_or(0);
                old - size
            }
        }
    }
}

/// 操作生命周期状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Executing,
    Success,
    Failed,
    RolledBack,
}

text_enum!(OperationStatus, "operation status", {
    Pending => "pending",
    Executing => "executing",
    Success => "success",
    Failed => "failed",
    RolledBack => "rolled_back",
});

impl OperationStatus {
    /// 允许迁入 `to` 的前置状态
    pub fn allowed_sources(to: OperationStatus) -> &'static [OperationStatus] {
        match to {
            OperationStatus::Pending => &[],
            OperationStatus::Executing => &[OperationStatus::Pending],
            OperationStatus::Success => &[OperationStatus::Executing],
            OperationStatus::Failed => &[OperationStatus::Pending, OperationStatus::Executing],
            OperationStatus::RolledBack => &[OperationStatus::Success],
        }
    }

    pub fn can_transition_to(self, to: OperationStatus) -> bool {
        Self::allowed_sources(to).contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Success | OperationStatus::Failed | OperationStatus::RolledBack
        )
    }
}

/// 会话状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    RolledBack,
}

text_enum!(SessionStatus, "session status", {
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    RolledBack => "rolled_back",
});

/// 单条文件操作记录
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    pub session_id: String,
    pub op_type: OperationType,
    pub status: OperationStatus,
    pub source_path: Option<PathBuf>,
    pub dest_path: Option<PathBuf>,
    pub backup_path: Option<PathBuf>,
    pub backup_expires_at: Option<DateTime<Utc>>,
    pub size: Option<u64>,
    pub hash: Option<String>,
    pub is_directory: bool,
    pub extension: Option<String>,
    pub duration_ms: Option<u64>,
    pub space_impact_bytes: Option<i64>,
    pub error_message: Option<String>,
    pub sequence_number: u64,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub rolled_back_at: Option<DateTime<Utc>>,
    /// 执行时为目标新建的父目录（由浅到深），回滚时一并清理
    #[serde(default)]
    pub created_dirs: Vec<PathBuf>,
}

/// 一次任务的会话及聚合统计
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub agent_id: String,
    pub task_description: String,
    pub status: SessionStatus,
    pub total_operations: u64,
    pub success_count: u64,
    pub failed_count: u64,
    pub rolled_back_count: u64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// 会话内操作的聚合计数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionCounts {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub rolled_back: u64,
}

impl SessionCounts {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a OperationRecord>) -> Self {
        records
            .into_iter()
            .fold(SessionCounts::default(), |mut acc, r| {
                acc.total += 1;
                match r.status {
                    OperationStatus::Success => acc.success += 1,
                    OperationStatus::Failed => acc.failed += 1,
                    OperationStatus::RolledBack => acc.rolled_back += 1,
                    OperationStatus::Pending | OperationStatus::Executing => {}
                }
                acc
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use OperationStatus::*;
        assert!(Pending.can_transition_to(Executing));
        assert!(Pending.can_transition_to(Failed));
        assert!(Executing.can_transition_to(Success));
        assert!(Executing.can_transition_to(Failed));
        assert!(Success.can_transition_to(RolledBack));

        assert!(!Pending.can_transition_to(Success));
        assert!(!Failed.can_transition_to(RolledBack));
        assert!(!RolledBack.can_transition_to(RolledBack));
        assert!(!Success.can_transition_to(Executing));
    }

    #[test]
    fn test_text_roundtrip_uses_snake_case() {
        assert_eq!(OperationStatus::RolledBack.as_str(), "rolled_back");
        assert_eq!("rolled_back".parse::<OperationStatus>(), Ok(OperationStatus::RolledBack));
        assert_eq!("modify".parse::<OperationType>(), Ok(OperationType::Modify));
        assert!("exploded".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_space_impact_signs() {
        assert_eq!(OperationType::Create.space_impact(10, None), -10);
        assert_eq!(OperationType::Copy.space_impact(10, None), -10);
        assert_eq!(OperationType::Delete.space_impact(10, None), 10);
        assert_eq!(OperationType::Move.space_impact(10, None), 0);
        assert_eq!(OperationType::Modify.space_impact(4, Some(10)), 6);
        assert_eq!(OperationType::Modify.space_impact(12, Some(10)), -2);
    }

    #[test]
    fn test_only_delete_and_modify_require_backup() {
        assert!(OperationType::Delete.requires_backup());
        assert!(OperationType::Modify.requires_backup());
        assert!(!OperationType::Create.requires_backup());
        assert!(!OperationType::Rename.requires_backup());
    }
}

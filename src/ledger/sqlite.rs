//! SQLite 账本实现
//!
//! 单连接 + Mutex；WAL 模式。`(session_id, sequence_number)` 唯一索引保证会话内序号不重复，
//! 状态迁移用 `UPDATE ... WHERE status IN (...)` 实现条件更新。

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use super::{
    new_operation_id, new_session_id, Completion, Ledger, NewOperation, OperationRecord,
    OperationStatus, OperationType, SessionCounts, SessionRecord, SessionStatus,
};
use crate::core::LedgerError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS file_operation_sessions (
    session_id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL,
    task_description TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'running',
    total_operations INTEGER NOT NULL DEFAULT 0,
    success_count INTEGER NOT NULL DEFAULT 0,
    failed_count INTEGER NOT NULL DEFAULT 0,
    rolled_back_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS file_operations (
    operation_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    operation_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    source_path TEXT,
    destination_path TEXT,
    backup_path TEXT,
    backup_expires_at TEXT,
    file_size INTEGER,
    file_hash TEXT,
    is_directory INTEGER NOT NULL DEFAULT 0,
    file_extension TEXT,
    duration_ms INTEGER,
    space_impact_bytes INTEGER,
    error_message TEXT,
    sequence_number INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    executed_at TEXT,
    rolled_back_at TEXT,
    created_dirs TEXT NOT NULL DEFAULT '[]'
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_operations_session_seq
    ON file_operations(session_id, sequence_number);
CREATE INDEX IF NOT EXISTS idx_operations_backup_expiry
    ON file_operations(backup_expires_at);
CREATE INDEX IF NOT EXISTS idx_sessions_created
    ON file_operation_sessions(created_at);
"#;

const OPERATION_COLUMNS: &str = "operation_id, session_id, operation_type, status, source_path, \
     destination_path, backup_path, backup_expires_at, file_size, file_hash, is_directory, \
     file_extension, duration_ms, space_impact_bytes, error_message, sequence_number, \
     created_at, executed_at, rolled_back_at, created_dirs";

const SESSION_COLUMNS: &str = "session_id, agent_id, task_description, status, total_operations, \
     success_count, failed_count, rolled_back_count, created_at, completed_at";

/// SQLite 账本
#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    /// 打开（必要时创建）数据库文件
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                LedgerError::Storage(format!("create ledger dir {}: {}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA)?;
        ensure_column(&conn, "file_operations", "created_dirs", "TEXT NOT NULL DEFAULT '[]'")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::Storage("ledger lock poisoned".to_string()))
    }

    fn current_status(
        conn: &Connection,
        op_id: &str,
    ) -> Result<Option<OperationStatus>, LedgerError> {
        Ok(conn
            .query_row(
                "SELECT status FROM file_operations WHERE operation_id = ?1",
                params![op_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// 条件迁移：只在当前状态属于合法前置状态时更新；否则报告实际状态
    fn transition(
        conn: &Connection,
        op_id: &str,
        to: OperationStatus,
        set_clause: &str,
        extra: &[&dyn rusqlite::ToSql],
    ) -> Result<(), LedgerError> {
        let sources = OperationStatus::allowed_sources(to);
        let placeholders = (0..sources.len())
            .map(|i| format!("?{}", i + 3 + extra.len()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE file_operations SET status = ?1{set_clause} \
             WHERE operation_id = ?2 AND status IN ({placeholders})"
        );
        let mut values: Vec<&dyn rusqlite::ToSql> = vec![&to, &op_id];
        values.extend_from_slice(extra);
        for s in sources {
            values.push(s);
        }
        let changed = conn.execute(&sql, values.as_slice())?;
        if changed == 1 {
            return Ok(());
        }
        match Self::current_status(conn, op_id)? {
            None => Err(LedgerError::NotFound(op_id.to_string())),
            Some(from) => Err(LedgerError::InvalidTransition {
                op_id: op_id.to_string(),
                from,
                to,
            }),
        }
    }

    fn query_operations(
        &self,
        where_clause: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<OperationRecord>, LedgerError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {OPERATION_COLUMNS} FROM file_operations {where_clause}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args, operation_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

/// 旧库缺列时补上
fn ensure_column(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<(), LedgerError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(());
        }
    }
    conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))?;
    tracing::info!(table, column, "ledger schema migrated");
    Ok(())
}

fn path_to_sql(p: &Option<PathBuf>) -> Option<String> {
    p.as_ref().map(|p| p.to_string_lossy().into_owned())
}

fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<OperationRecord> {
    let size: Option<i64> = row.get(8)?;
    let duration: Option<i64> = row.get(12)?;
    let seq: i64 = row.get(15)?;
    let dirs: String = row.get(19)?;
    let created_dirs: Vec<PathBuf> = serde_json::from_str(&dirs)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(19, Type::Text, Box::new(e)))?;
    Ok(OperationRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        op_type: row.get(2)?,
        status: row.get(3)?,
        source_path: row.get::<_, Option<String>>(4)?.map(PathBuf::from),
        dest_path: row.get::<_, Option<String>>(5)?.map(PathBuf::from),
        backup_path: row.get::<_, Option<String>>(6)?.map(PathBuf::from),
        backup_expires_at: row.get(7)?,
        size: size.map(|s| s.max(0) as u64),
        hash: row.get(9)?,
        is_directory: row.get(10)?,
        extension: row.get(11)?,
        duration_ms: duration.map(|d| d.max(0) as u64),
        space_impact_bytes: row.get(13)?,
        error_message: row.get(14)?,
        sequence_number: seq.max(0) as u64,
        created_at: row.get(16)?,
        executed_at: row.get(17)?,
        rolled_back_at: row.get(18)?,
        created_dirs,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    let count = |idx: usize| -> rusqlite::Result<u64> { Ok(row.get::<_, i64>(idx)?.max(0) as u64) };
    Ok(SessionRecord {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        task_description: row.get(2)?,
        status: row.get(3)?,
        total_operations: count(4)?,
        success_count: count(5)?,
        failed_count: count(6)?,
        rolled_back_count: count(7)?,
        created_at: row.get(8)?,
        completed_at: row.get(9)?,
    })
}

impl Ledger for SqliteLedger {
    fn append(&self, op: NewOperation) -> Result<String, LedgerError> {
        let id = new_operation_id();
        let conn = self.lock()?;
        let result = conn.execute(
            "INSERT INTO file_operations (operation_id, session_id, operation_type, status, \
             source_path, destination_path, file_size, sequence_number, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                op.session_id,
                op.op_type,
                OperationStatus::Pending,
                path_to_sql(&op.source_path),
                path_to_sql(&op.dest_path),
                op.size_hint.map(|s| s as i64),
                op.sequence_number as i64,
                Utc::now(),
            ],
        );
        match result {
            Ok(_) => {
                tracing::debug!(op_id = %id, session_id = %op.session_id, seq = op.sequence_number, "operation intent recorded");
                Ok(id)
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(LedgerError::DuplicateSequence {
                    session_id: op.session_id,
                    seq: op.sequence_number,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn begin_execution(&self, op_id: &str) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        let now = Utc::now();
        Self::transition(
            &conn,
            op_id,
            OperationStatus::Executing,
            ", executed_at = ?3",
            &[&now],
        )
    }

    fn complete_success(&self, op_id: &str, c: Completion) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        let op_type: Option<OperationType> = conn
            .query_row(
                "SELECT operation_type FROM file_operations WHERE operation_id = ?1",
                params![op_id],
                |row| row.get(0),
            )
            .optional()?;
        let op_type = op_type.ok_or_else(|| LedgerError::NotFound(op_id.to_string()))?;
        if op_type.requires_backup() && c.backup_path.is_none() {
            return Err(LedgerError::MissingBackup(op_id.to_string()));
        }

        let backup = path_to_sql(&c.backup_path);
        let size = c.size as i64;
        let duration = c.duration_ms as i64;
        let dirs = serde_json::to_string(&c.created_dirs)
            .map_err(|e| LedgerError::Storage(format!("encode created dirs: {e}")))?;
        Self::transition(
            &conn,
            op_id,
            OperationStatus::Success,
            ", backup_path = ?3, backup_expires_at = ?4, file_size = ?5, file_hash = ?6, \
             is_directory = ?7, file_extension = ?8, duration_ms = ?9, space_impact_bytes = ?10, \
             created_dirs = ?11",
            &[
                &backup,
                &c.backup_expires_at,
                &size,
                &c.hash,
                &c.is_directory,
                &c.extension,
                &duration,
                &c.space_impact_bytes,
                &dirs,
            ],
        )
    }

    fn complete_failure(&self, op_id: &str, error: &str) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        Self::transition(
            &conn,
            op_id,
            OperationStatus::Failed,
            ", error_message = ?3",
            &[&error],
        )
    }

    fn mark_rolled_back(&self, op_id: &str) -> Result<bool, LedgerError> {
        let conn = self.lock()?;
        let now = Utc::now();
        match Self::transition(
            &conn,
            op_id,
            OperationStatus::RolledBack,
            ", rolled_back_at = ?3",
            &[&now],
        ) {
            Ok(()) => Ok(true),
            Err(LedgerError::InvalidTransition {
                from: OperationStatus::RolledBack,
                ..
            }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn get(&self, op_id: &str) -> Result<OperationRecord, LedgerError> {
        self.query_operations("WHERE operation_id = ?1", &[&op_id])?
            .pop()
            .ok_or_else(|| LedgerError::NotFound(op_id.to_string()))
    }

    fn list_for_session(&self, session_id: &str) -> Result<Vec<OperationRecord>, LedgerError> {
        self.query_operations(
            "WHERE session_id = ?1 ORDER BY sequence_number ASC",
            &[&session_id],
        )
    }

    fn successful_for_session_desc(
        &self,
        session_id: &str,
    ) -> Result<Vec<OperationRecord>, LedgerError> {
        self.query_operations(
            "WHERE session_id = ?1 AND status = ?2 ORDER BY sequence_number DESC",
            &[&session_id, &OperationStatus::Success],
        )
    }

    fn max_sequence(&self, session_id: &str) -> Result<u64, LedgerError> {
        let conn = self.lock()?;
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_number), 0) FROM file_operations WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(max.max(0) as u64)
    }

    fn expired_backups(&self, now: DateTime<Utc>) -> Result<Vec<OperationRecord>, LedgerError> {
        self.query_operations(
            "WHERE backup_path IS NOT NULL AND backup_expires_at IS NOT NULL \
             AND backup_expires_at < ?1 ORDER BY backup_expires_at ASC",
            &[&now],
        )
    }

    fn clear_backup(&self, op_id: &str) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE file_operations SET backup_path = NULL WHERE operation_id = ?1",
            params![op_id],
        )?;
        if changed == 0 {
            return Err(LedgerError::NotFound(op_id.to_string()));
        }
        Ok(())
    }

    fn open_session(&self, agent_id: &str, task: &str) -> Result<String, LedgerError> {
        let id = new_session_id();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO file_operation_sessions (session_id, agent_id, task_description, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, agent_id, task, SessionStatus::Running, Utc::now()],
        )?;
        tracing::info!(session_id = %id, agent_id, "session opened");
        Ok(id)
    }

    fn finalize_session(&self, session_id: &str, success: bool) -> Result<bool, LedgerError> {
        let records = self.list_for_session(session_id)?;
        let counts = SessionCounts::from_records(&records);
        let status = if success {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        };

        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE file_operation_sessions SET status = ?1, total_operations = ?2, \
             success_count = ?3, failed_count = ?4, rolled_back_count = ?5, completed_at = ?6 \
             WHERE session_id = ?7 AND status = ?8",
            params![
                status,
                counts.total as i64,
                counts.success as i64,
                counts.failed as i64,
                counts.rolled_back as i64,
                Utc::now(),
                session_id,
                SessionStatus::Running,
            ],
        )?;
        if changed == 1 {
            tracing::info!(session_id, status = %status, total = counts.total, "session finalized");
            return Ok(true);
        }
        let exists: Option<String> = conn
            .query_row(
                "SELECT session_id FROM file_operation_sessions WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        match exists {
            Some(_) => Ok(false),
            None => Err(LedgerError::SessionNotFound(session_id.to_string())),
        }
    }

    fn mark_session_rolled_back(
        &self,
        session_id: &str,
        rolled_back: u64,
    ) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE file_operation_sessions SET status = ?1, rolled_back_count = ?2, \
             completed_at = COALESCE(completed_at, ?3) WHERE session_id = ?4 AND status <> ?5",
            params![
                SessionStatus::RolledBack,
                rolled_back as i64,
                Utc::now(),
                session_id,
                SessionStatus::Running,
            ],
        )?;
        if changed == 1 {
            return Ok(());
        }
        let status: Option<SessionStatus> = conn
            .query_row(
                "SELECT status FROM file_operation_sessions WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        match status {
            Some(_) => Err(LedgerError::SessionStillRunning(session_id.to_string())),
            None => Err(LedgerError::SessionNotFound(session_id.to_string())),
        }
    }

    fn get_session(&self, session_id: &str) -> Result<SessionRecord, LedgerError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {SESSION_COLUMNS} FROM file_operation_sessions WHERE session_id = ?1");
        let record = conn
            .query_row(&sql, params![session_id], session_from_row)
            .optional()?;
        record.ok_or_else(|| LedgerError::SessionNotFound(session_id.to_string()))
    }

    fn recent_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>, LedgerError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM file_operation_sessions \
             ORDER BY created_at DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], session_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

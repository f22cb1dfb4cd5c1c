//! 进程内账本：语义与 SQLite 实现一致，不落盘

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{
    new_operation_id, new_session_id, Completion, Ledger, NewOperation, OperationRecord,
    OperationStatus, SessionCounts, SessionRecord, SessionStatus,
};
use crate::core::LedgerError;

#[derive(Debug, Default)]
struct State {
    operations: HashMap<String, OperationRecord>,
    sessions: HashMap<String, SessionRecord>,
}

/// 内存账本
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Storage("ledger lock poisoned".to_string()))
    }

    fn transition<F>(&self, op_id: &str, to: OperationStatus, apply: F) -> Result<(), LedgerError>
    where
        F: FnOnce(&mut OperationRecord) -> Result<(), LedgerError>,
    {
        let mut state = self.lock()?;
        let record = state
            .operations
            .get_mut(op_id)
            .ok_or_else(|| LedgerError::NotFound(op_id.to_string()))?;
        if !record.status.can_transition_to(to) {
            return Err(LedgerError::InvalidTransition {
                op_id: op_id.to_string(),
                from: record.status,
                to,
            });
        }
        apply(record)?;
        record.status = to;
        Ok(())
    }

    fn select<P>(&self, mut pred: P) -> Result<Vec<OperationRecord>, LedgerError>
    where
        P: FnMut(&OperationRecord) -> bool,
    {
        let state = self.lock()?;
        Ok(state
            .operations
            .values()
            .filter(|r| pred(r))
            .cloned()
            .collect())
    }
}

impl Ledger for MemoryLedger {
    fn append(&self, op: NewOperation) -> Result<String, LedgerError> {
        let mut state = self.lock()?;
        let duplicate = state.operations.values().any(|r| {
            r.session_id == op.session_id && r.sequence_number == op.sequence_number
        });
        if duplicate {
            return Err(LedgerError::DuplicateSequence {
                session_id: op.session_id,
                seq: op.sequence_number,
            });
        }
        let id = new_operation_id();
        state.operations.insert(
            id.clone(),
            OperationRecord {
                id: id.clone(),
                session_id: op.session_id,
                op_type: op.op_type,
                status: OperationStatus::Pending,
                source_path: op.source_path,
                dest_path: op.dest_path,
                backup_path: None,
                backup_expires_at: None,
                size: op.size_hint,
                hash: None,
                is_directory: false,
                extension: None,
                duration_ms: None,
                space_impact_bytes: None,
                error_message: None,
                sequence_number: op.sequence_number,
                created_at: Utc::now(),
                executed_at: None,
                rolled_back_at: None,
                created_dirs: Vec::new(),
            },
        );
        Ok(id)
    }

    fn begin_execution(&self, op_id: &str) -> Result<(), LedgerError> {
        self.transition(op_id, OperationStatus::Executing, |r| {
            r.executed_at = Some(Utc::now());
            Ok(())
        })
    }

    fn complete_success(&self, op_id: &str, c: Completion) -> Result<(), LedgerError> {
        self.transition(op_id, OperationStatus::Success, |r| {
            if r.op_type.requires_backup() && c.backup_path.is_none() {
                return Err(LedgerError::MissingBackup(r.id.clone()));
            }
            r.backup_path = c.backup_path;
            r.backup_expires_at = c.backup_expires_at;
            r.size = Some(c.size);
            r.hash = c.hash;
            r.is_directory = c.is_directory;
            r.extension = c.extension;
            r.duration_ms = Some(c.duration_ms);
            r.space_impact_bytes = Some(c.space_impact_bytes);
            r.created_dirs = c.created_dirs;
            Ok(())
        })
    }

    fn complete_failure(&self, op_id: &str, error: &str) -> Result<(), LedgerError> {
        self.transition(op_id, OperationStatus::Failed, |r| {
            r.error_message = Some(error.to_string());
            Ok(())
        })
    }

    fn mark_rolled_back(&self, op_id: &str) -> Result<bool, LedgerError> {
        match self.transition(op_id, OperationStatus::RolledBack, |r| {
            r.rolled_back_at = Some(Utc::now());
            Ok(())
        }) {
            Ok(()) => Ok(true),
            Err(LedgerError::InvalidTransition {
                from: OperationStatus::RolledBack,
                ..
            }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn get(&self, op_id: &str) -> Result<OperationRecord, LedgerError> {
        self.lock()?
            .operations
            .get(op_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(op_id.to_string()))
    }

    fn list_for_session(&self, session_id: &str) -> Result<Vec<OperationRecord>, LedgerError> {
        let mut records = self.select(|r| r.session_id == session_id)?;
        records.sort_by_key(|r| r.sequence_number);
        Ok(records)
    }

    fn successful_for_session_desc(
        &self,
        session_id: &str,
    ) -> Result<Vec<OperationRecord>, LedgerError> {
        let mut records = self
            .select(|r| r.session_id == session_id && r.status == OperationStatus::Success)?;
        records.sort_by(|a, b| b.sequence_number.cmp(&a.sequence_number));
        Ok(records)
    }

    fn max_sequence(&self, session_id: &str) -> Result<u64, LedgerError> {
        Ok(self
            .lock()?
            .operations
            .values()
            .filter(|r| r.session_id == session_id)
            .map(|r| r.sequence_number)
            .max()
            .unwrap_or(0))
    }

    fn expired_backups(&self, now: DateTime<Utc>) -> Result<Vec<OperationRecord>, LedgerError> {
        let mut records = self.select(|r| {
            r.backup_path.is_some() && r.backup_expires_at.map_or(false, |at| at < now)
        })?;
        records.sort_by_key(|r| r.backup_expires_at);
        Ok(records)
    }

    fn clear_backup(&self, op_id: &str) -> Result<(), LedgerError> {
        let mut state = self.lock()?;
        let record = state
            .operations
            .get_mut(op_id)
            .ok_or_else(|| LedgerError::NotFound(op_id.to_string()))?;
        record.backup_path = None;
        Ok(())
    }

    fn open_session(&self, agent_id: &str, task: &str) -> Result<String, LedgerError> {
        let id = new_session_id();
        self.lock()?.sessions.insert(
            id.clone(),
            SessionRecord {
                id: id.clone(),
                agent_id: agent_id.to_string(),
                task_description: task.to_string(),
                status: SessionStatus::Running,
                total_operations: 0,
                success_count: 0,
                failed_count: 0,
                rolled_back_count: 0,
                created_at: Utc::now(),
                completed_at: None,
            },
        );
        tracing::info!(session_id = %id, agent_id, "session opened");
        Ok(id)
    }

    fn finalize_session(&self, session_id: &str, success: bool) -> Result<bool, LedgerError> {
        let mut state = self.lock()?;
        let counts = SessionCounts::from_records(
            state
                .operations
                .values()
                .filter(|r| r.session_id == session_id),
        );
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| LedgerError::SessionNotFound(session_id.to_string()))?;
        if session.status != SessionStatus::Running {
            return Ok(false);
        }
        session.status = if success {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        };
        session.total_operations = counts.total;
        session.success_count = counts.success;
        session.failed_count = counts.failed;
        session.rolled_back_count = counts.rolled_back;
        session.completed_at = Some(Utc::now());
        Ok(true)
    }

    fn mark_session_rolled_back(
        &self,
        session_id: &str,
        rolled_back: u64,
    ) -> Result<(), LedgerError> {
        let mut state = self.lock()?;
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| LedgerError::SessionNotFound(session_id.to_string()))?;
        if session.status == SessionStatus::Running {
            return Err(LedgerError::SessionStillRunning(session_id.to_string()));
        }
        session.status = SessionStatus::RolledBack;
        session.rolled_back_count = rolled_back;
        session.completed_at.get_or_insert_with(Utc::now);
        Ok(())
    }

    fn get_session(&self, session_id: &str) -> Result<SessionRecord, LedgerError> {
        self.lock()?
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| LedgerError::SessionNotFound(session_id.to_string()))
    }

    fn recent_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>, LedgerError> {
        let mut sessions: Vec<SessionRecord> = self.lock()?.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions.truncate(limit);
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::contract;

    #[test]
    fn test_memory_lifecycle() {
        contract::append_then_lifecycle(&MemoryLedger::new());
    }

    #[test]
    fn test_memory_duplicate_sequence() {
        contract::duplicate_sequence_rejected(&MemoryLedger::new());
    }

    #[test]
    fn test_memory_invalid_transitions() {
        contract::invalid_transitions_rejected(&MemoryLedger::new());
    }

    #[test]
    fn test_memory_delete_requires_backup() {
        contract::delete_requires_backup(&MemoryLedger::new());
    }

    #[test]
    fn test_memory_session_queries() {
        contract::session_queries(&MemoryLedger::new());
    }

    #[test]
    fn test_memory_running_session_not_rolled_back() {
        contract::running_session_not_rolled_back(&MemoryLedger::new());
    }

    #[test]
    fn test_memory_expired_backups() {
        contract::expired_backup_sweep(&MemoryLedger::new());
    }
}

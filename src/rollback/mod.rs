//! 回滚引擎
//!
//! 按操作类型逆转已成功的变更：
//! - Delete → 从回收站恢复到原路径（原路径被重新占用时拒绝）
//! - Modify → 用写入前的快照覆盖
//! - Create / Copy → 删除产物（已不存在视为成功）
//! - Move / Rename → 从目的地移回源路径
//!
//! 只有 Success 记录可回滚；已 RolledBack 的记录再次回滚不触碰文件系统。
//! 同一操作的回滚按 op id 串行；执行时新建的父目录随产物一并清理（非空则保留）。
//! 会话回滚要求会话已结束。
//! 文件系统操作为同步调用，异步调用方应放入 spawn_blocking。

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backup::BackupStore;
use crate::core::{BackupError, LedgerError, RollbackError};
use crate::fsutil;
use crate::ledger::{Ledger, OperationRecord, OperationStatus, OperationType, SessionStatus};

/// 单个操作的回滚结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reverted {
    /// 本次完成了逆操作
    Applied,
    /// 早已回滚，未做任何事
    AlreadyRolledBack,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackDetail {
    pub op_id: String,
    pub sequence_number: u64,
    pub op_type: OperationType,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 整会话回滚汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RollbackSummary {
    pub session_id: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub details: Vec<RollbackDetail>,
}

/// 进行中的回滚：op id → 串行锁
type OpLocks = Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>;

#[derive(Clone)]
pub struct RollbackEngine {
    ledger: Arc<dyn Ledger>,
    backups: Arc<BackupStore>,
    locks: OpLocks,
}

impl RollbackEngine {
    pub fn new(ledger: Arc<dyn Ledger>, backups: Arc<BackupStore>) -> Self {
        Self {
            ledger,
            backups,
            locks: OpLocks::default(),
        }
    }

    /// 回滚单个操作；同一 op 的并发调用只有一个执行逆操作，其余得到 AlreadyRolledBack
    pub fn rollback_operation(&self, op_id: &str) -> Result<Reverted, RollbackError> {
        let slot = self.acquire_slot(op_id);
        let result = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            self.rollback_exclusive(op_id)
        };
        self.release_slot(op_id, slot);
        result
    }

    fn acquire_slot(&self, op_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(op_id.to_string()).or_default())
    }

    fn release_slot(&self, op_id: &str, slot: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // 表内一份 + 手上一份：没有其他等待者
        if Arc::strong_count(&slot) == 2 {
            locks.remove(op_id);
        }
    }

    fn rollback_exclusive(&self, op_id: &str) -> Result<Reverted, RollbackError> {
        let record = self.ledger.get(op_id).map_err(|e| match e {
            LedgerError::NotFound(id) => RollbackError::NotFound(id),
            other => RollbackError::Ledger(other),
        })?;

        match record.status {
            OperationStatus::RolledBack => {
                tracing::debug!(op_id, "already rolled back");
                return Ok(Reverted::AlreadyRolledBack);
            }
            OperationStatus::Success => {}
            status => {
                return Err(RollbackError::NotRollbackable {
                    op_id: op_id.to_string(),
                    status,
                })
            }
        }

        self.revert(&record)?;
        if !self.ledger.mark_rolled_back(op_id)? {
            tracing::warn!(op_id, "record was rolled back concurrently");
        }
        tracing::info!(op_id, op_type = %record.op_type, seq = record.sequence_number, "operation rolled back");
        Ok(Reverted::Applied)
    }

    /// 逆序回滚会话内全部成功操作；单个失败只记录，继续下一个
    pub fn rollback_session(&self, session_id: &str) -> Result<RollbackSummary, RollbackError> {
        let session = self.ledger.get_session(session_id)?;
        if session.status == SessionStatus::Running {
            return Err(LedgerError::SessionStillRunning(session_id.to_string()).into());
        }
        let records = self.ledger.successful_for_session_desc(session_id)?;

        let mut summary = RollbackSummary {
            session_id: session_id.to_string(),
            total: records.len(),
            ..RollbackSummary::default()
        };
        for record in &records {
            let result = self.rollback_operation(&record.id);
            if let Err(e) = &result {
                tracing::warn!(session_id, op_id = %record.id, error = %e, "rollback step failed");
            }
            summary.details.push(RollbackDetail {
                op_id: record.id.clone(),
                sequence_number: record.sequence_number,
                op_type: record.op_type,
                success: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            });
        }
        summary.succeeded = summary.details.iter().filter(|d| d.success).count();
        summary.failed = summary.total - summary.succeeded;

        // 计数包含此前单独回滚过的操作
        let rolled_back = self
            .ledger
            .list_for_session(session_id)?
            .iter()
            .filter(|r| r.status == OperationStatus::RolledBack)
            .count();
        self.ledger
            .mark_session_rolled_back(session_id, rolled_back as u64)?;
        tracing::info!(
            session_id,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "session rolled back"
        );
        Ok(summary)
    }

    /// 清理过期备份，返回清理数量；单个失败记日志后跳过
    pub fn cleanup_expired_backups(&self, now: DateTime<Utc>) -> Result<usize, LedgerError> {
        let mut removed = 0;
        for record in self.ledger.expired_backups(now)? {
            let Some(backup) = record.backup_path.as_deref() else {
                continue;
            };
            if let Err(e) = self.backups.discard(backup) {
                tracing::warn!(op_id = %record.id, error = %e, "failed to discard expired backup");
                continue;
            }
            if let Err(e) = self.ledger.clear_backup(&record.id) {
                tracing::warn!(op_id = %record.id, error = %e, "failed to clear backup reference");
                continue;
            }
            removed += 1;
        }
        if removed > 0 {
            tracing::info!(removed, "expired backups cleaned");
        }
        Ok(removed)
    }

    fn revert(&self, record: &OperationRecord) -> Result<(), RollbackError> {
        let op_id = record.id.as_str();
        match record.op_type {
            OperationType::Delete => {
                let original = required(record, record.source_path.as_deref())?;
                if fsutil::path_exists(original) {
                    return Err(RollbackError::TargetOccupied {
                        op_id: op_id.to_string(),
                        path: original.to_path_buf(),
                    });
                }
                self.restore(record, original)
            }
            OperationType::Modify => {
                let original = required(record, record.source_path.as_deref())?;
                self.restore(record, original)
            }
            OperationType::Create => {
                remove_artifact(op_id, record.source_path.as_deref())?;
                fsutil::remove_created_dirs(&record.created_dirs);
                Ok(())
            }
            OperationType::Copy => {
                remove_artifact(op_id, record.dest_path.as_deref())?;
                fsutil::remove_created_dirs(&record.created_dirs);
                Ok(())
            }
            OperationType::Move | OperationType::Rename => {
                let source = required(record, record.source_path.as_deref())?;
                let dest = required(record, record.dest_path.as_deref())?;
                if !fsutil::path_exists(dest) {
                    return Err(RollbackError::DestinationMissing {
                        op_id: op_id.to_string(),
                        path: dest.to_path_buf(),
                    });
                }
                if fsutil::path_exists(source) {
                    return Err(RollbackError::TargetOccupied {
                        op_id: op_id.to_string(),
                        path: source.to_path_buf(),
                    });
                }
                fsutil::move_path(dest, source).map_err(|e| io_error(op_id, e))?;
                fsutil::remove_created_dirs(&record.created_dirs);
                Ok(())
            }
        }
    }

    fn restore(&self, record: &OperationRecord, original: &Path) -> Result<(), RollbackError> {
        let backup = record
            .backup_path
            .as_deref()
            .ok_or_else(|| RollbackError::BackupMissing {
                op_id: record.id.clone(),
                detail: "no backup recorded".to_string(),
            })?;
        self.backups
            .restore(backup, original)
            .map_err(|e| match e {
                BackupError::Missing(_) | BackupError::Incomplete { .. } => {
                    RollbackError::BackupMissing {
                        op_id: record.id.clone(),
                        detail: e.to_string(),
                    }
                }
                other => RollbackError::Io {
                    op_id: record.id.clone(),
                    message: other.to_string(),
                },
            })
    }
}

fn required<'a>(record: &OperationRecord, path: Option<&'a Path>) -> Result<&'a Path, RollbackError> {
    path.ok_or_else(|| RollbackError::Io {
        op_id: record.id.clone(),
        message: "record has no path to restore".to_string(),
    })
}

fn remove_artifact(op_id: &str, path: Option<&Path>) -> Result<(), RollbackError> {
    let Some(path) = path else {
        return Ok(());
    };
    match fsutil::remove_path(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(op_id, e)),
    }
}

fn io_error(op_id: &str, e: io::Error) -> RollbackError {
    RollbackError::Io {
        op_id: op_id.to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::risk::RiskScorer;
    use crate::tools::{
        Action, CopyFileParams, DeleteFileParams, FileExecutor, MoveFileParams, Workspace,
        WriteFileParams,
    };
    use std::fs;
    use std::path::PathBuf;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        ledger: Arc<MemoryLedger>,
        executor: FileExecutor,
        engine: RollbackEngine,
        session: String,
        seq: u64,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let ws_dir = dir.path().join("ws");
            fs::create_dir_all(&ws_dir).unwrap();
            let ledger = Arc::new(MemoryLedger::new());
            let backups = Arc::new(BackupStore::new(
                dir.path().join("bin"),
                chrono::Duration::days(30),
            ));
            let executor = FileExecutor::new(
                Workspace::new(&ws_dir),
                ledger.clone(),
                backups.clone(),
                Arc::new(RiskScorer::new()),
            );
            let engine = RollbackEngine::new(ledger.clone(), backups);
            let session = ledger.open_session("test", "rollback").unwrap();
            let root = executor.workspace().root().to_path_buf();
            Self {
                _dir: dir,
                root,
                ledger,
                executor,
                engine,
                session,
                seq: 0,
            }
        }

        async fn run(&mut self, action: Action) -> String {
            self.seq += 1;
            let out = self.executor.execute(&action, &self.session, self.seq).await;
            assert!(out.is_success(), "{:?}", out.result);
            out.op_id.unwrap()
        }
    }

    fn write(path: &str, content: &str) -> Action {
        Action::WriteFile(WriteFileParams {
            path: path.into(),
            content: content.into(),
        })
    }

    fn delete(path: &str) -> Action {
        Action::DeleteFile(DeleteFileParams {
            path: path.into(),
            recursive: true,
        })
    }

    #[tokio::test]
    async fn test_delete_rollback_restores_bytes_and_is_idempotent() {
        let mut f = Fixture::new();
        fs::write(f.root.join("f.txt"), "hello").unwrap();
        let op = f.run(delete("f.txt")).await;
        assert!(!f.root.join("f.txt").exists());

        assert_eq!(f.engine.rollback_operation(&op).unwrap(), Reverted::Applied);
        assert_eq!(fs::read_to_string(f.root.join("f.txt")).unwrap(), "hello");
        assert_eq!(f.ledger.get(&op).unwrap().status, OperationStatus::RolledBack);

        // 第二次不碰文件系统：删掉文件后再调用也不会被恢复
        fs::remove_file(f.root.join("f.txt")).unwrap();
        assert_eq!(
            f.engine.rollback_operation(&op).unwrap(),
            Reverted::AlreadyRolledBack
        );
        assert!(!f.root.join("f.txt").exists());
    }

    #[tokio::test]
    async fn test_delete_directory_rollback() {
        let mut f = Fixture::new();
        fs::create_dir_all(f.root.join("d/sub")).unwrap();
        fs::write(f.root.join("d/sub/x.txt"), "x").unwrap();
        let op = f.run(delete("d")).await;
        f.engine.rollback_operation(&op).unwrap();
        assert_eq!(fs::read_to_string(f.root.join("d/sub/x.txt")).unwrap(), "x");
    }

    #[tokio::test]
    async fn test_delete_rollback_refuses_occupied_path() {
        let mut f = Fixture::new();
        fs::write(f.root.join("f.txt"), "old").unwrap();
        let op = f.run(delete("f.txt")).await;
        fs::write(f.root.join("f.txt"), "newer").unwrap();

        let err = f.engine.rollback_operation(&op).unwrap_err();
        assert!(matches!(err, RollbackError::TargetOccupied { .. }));
        assert_eq!(fs::read_to_string(f.root.join("f.txt")).unwrap(), "newer");
        assert_eq!(f.ledger.get(&op).unwrap().status, OperationStatus::Success);
    }

    #[tokio::test]
    async fn test_modify_rollback_restores_previous_content() {
        let mut f = Fixture::new();
        fs::write(f.root.join("cfg.toml"), "a = 1\n").unwrap();
        let op = f.run(write("cfg.toml", "a = 2\nb = 3\n")).await;
        f.engine.rollback_operation(&op).unwrap();
        assert_eq!(fs::read_to_string(f.root.join("cfg.toml")).unwrap(), "a = 1\n");
    }

    #[tokio::test]
    async fn test_create_and_copy_rollback_remove_artifacts() {
        let mut f = Fixture::new();
        let created = f.run(write("new/file.txt", "n")).await;
        let copied = f
            .run(Action::CopyFile(CopyFileParams {
                source: "new/file.txt".into(),
                destination: "copy.txt".into(),
            }))
            .await;

        f.engine.rollback_operation(&copied).unwrap();
        assert!(!f.root.join("copy.txt").exists());
        assert!(f.root.join("new/file.txt").exists());

        // 产物已被手动删除也视为成功
        fs::remove_file(f.root.join("new/file.txt")).unwrap();
        assert_eq!(f.engine.rollback_operation(&created).unwrap(), Reverted::Applied);
    }

    #[tokio::test]
    async fn test_move_rollback_and_missing_destination() {
        let mut f = Fixture::new();
        fs::write(f.root.join("a.txt"), "a").unwrap();
        fs::write(f.root.join("b.txt"), "b").unwrap();
        let mv = |src: &str, dst: &str| {
            Action::MoveFile(MoveFileParams {
                source: src.into(),
                destination: dst.into(),
            })
        };
        let moved = f.run(mv("a.txt", "archive/a.txt")).await;
        let renamed = f.run(mv("b.txt", "c.txt")).await;

        f.engine.rollback_operation(&moved).unwrap();
        assert_eq!(fs::read_to_string(f.root.join("a.txt")).unwrap(), "a");
        assert!(!f.root.join("archive/a.txt").exists());

        fs::remove_file(f.root.join("c.txt")).unwrap();
        let err = f.engine.rollback_operation(&renamed).unwrap_err();
        assert!(matches!(err, RollbackError::DestinationMissing { .. }));
    }

    #[tokio::test]
    async fn test_non_success_records_are_not_rollbackable() {
        let f = Fixture::new();
        let out = f
            .executor
            .execute(
                &Action::DeleteFile(DeleteFileParams {
                    path: "missing-later.txt".into(),
                    recursive: false,
                }),
                &f.session,
                1,
            )
            .await;
        // 目标不存在：校验阶段拒绝，不落账本
        assert_eq!(out.op_id, None);

        let id = f
            .ledger
            .append(crate::ledger::NewOperation {
                session_id: f.session.clone(),
                op_type: OperationType::Create,
                source_path: Some(f.root.join("x")),
                dest_path: None,
                sequence_number: 1,
                size_hint: None,
            })
            .unwrap();
        f.ledger.complete_failure(&id, "boom").unwrap();
        assert!(matches!(
            f.engine.rollback_operation(&id),
            Err(RollbackError::NotRollbackable {
                status: OperationStatus::Failed,
                ..
            })
        ));
        assert!(matches!(
            f.engine.rollback_operation("op-unknown"),
            Err(RollbackError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_session_rollback_runs_in_reverse_order() {
        let mut f = Fixture::new();
        f.run(write("one.txt", "1")).await;
        f.run(write("two.txt", "2")).await;
        f.run(write("three.txt", "3")).await;
        f.ledger.finalize_session(&f.session, true).unwrap();

        let summary = f.engine.rollback_session(&f.session).unwrap();
        assert_eq!((summary.total, summary.succeeded, summary.failed), (3, 3, 0));
        let seqs: Vec<u64> = summary.details.iter().map(|d| d.sequence_number).collect();
        assert_eq!(seqs, vec![3, 2, 1]);
        assert_eq!(fs::read_dir(&f.root).unwrap().count(), 0);

        let session = f.ledger.get_session(&f.session).unwrap();
        assert_eq!(session.status, crate::ledger::SessionStatus::RolledBack);
        assert_eq!(session.rolled_back_count, 3);
    }

    #[tokio::test]
    async fn test_session_rollback_continues_past_failures() {
        let mut f = Fixture::new();
        fs::write(f.root.join("keep.txt"), "k").unwrap();
        f.run(write("a.txt", "a")).await;
        f.run(delete("keep.txt")).await;
        fs::write(f.root.join("keep.txt"), "occupied").unwrap();
        f.ledger.finalize_session(&f.session, false).unwrap();

        let summary = f.engine.rollback_session(&f.session).unwrap();
        assert_eq!((summary.total, summary.succeeded, summary.failed), (2, 1, 1));
        assert!(summary.details[0].error.is_some());
        assert!(!f.root.join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_running_session_is_not_rolled_back() {
        let mut f = Fixture::new();
        f.run(write("live.txt", "l")).await;

        assert!(matches!(
            f.engine.rollback_session(&f.session),
            Err(RollbackError::Ledger(LedgerError::SessionStillRunning(_)))
        ));
        assert!(f.root.join("live.txt").exists());
        assert_eq!(
            f.ledger.get_session(&f.session).unwrap().status,
            SessionStatus::Running
        );
        // 结束后正常收尾，计数包含单独回滚过的操作
        let extra = f.run(write("extra.txt", "e")).await;
        f.engine.rollback_operation(&extra).unwrap();
        f.ledger.finalize_session(&f.session, true).unwrap();
        let summary = f.engine.rollback_session(&f.session).unwrap();
        assert_eq!((summary.total, summary.succeeded), (1, 1));
        assert_eq!(f.ledger.get_session(&f.session).unwrap().rolled_back_count, 2);
    }

    #[tokio::test]
    async fn test_concurrent_rollback_reverts_once() {
        let mut f = Fixture::new();
        fs::write(f.root.join("once.txt"), "original").unwrap();
        let op = f.run(delete("once.txt")).await;

        let barrier = std::sync::Barrier::new(2);
        let results: Vec<Reverted> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        f.engine.rollback_operation(&op)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap().unwrap())
                .collect()
        });

        assert!(results.contains(&Reverted::Applied));
        assert!(results.contains(&Reverted::AlreadyRolledBack));
        assert_eq!(fs::read_to_string(f.root.join("once.txt")).unwrap(), "original");
        assert!(f.engine.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_removes_created_parents_only() {
        let mut f = Fixture::new();
        fs::create_dir_all(f.root.join("kept")).unwrap();
        let deep = f.run(write("new/deep/file.txt", "d")).await;
        let shallow = f.run(write("kept/inner/file.txt", "k")).await;
        assert_eq!(
            f.ledger.get(&deep).unwrap().created_dirs,
            vec![f.root.join("new"), f.root.join("new/deep")]
        );

        f.engine.rollback_operation(&deep).unwrap();
        f.engine.rollback_operation(&shallow).unwrap();
        assert!(!f.root.join("new").exists());
        assert!(!f.root.join("kept/inner").exists());
        assert!(f.root.join("kept").is_dir());
    }

    #[tokio::test]
    async fn test_move_rollback_removes_created_destination_dirs() {
        let mut f = Fixture::new();
        fs::write(f.root.join("m.txt"), "m").unwrap();
        let op = f
            .run(Action::MoveFile(MoveFileParams {
                source: "m.txt".into(),
                destination: "a/b/m.txt".into(),
            }))
            .await;
        f.engine.rollback_operation(&op).unwrap();
        assert_eq!(fs::read_to_string(f.root.join("m.txt")).unwrap(), "m");
        assert!(!f.root.join("a").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_delete_rollback_restores_link() {
        let mut f = Fixture::new();
        fs::create_dir_all(f.root.join("real")).unwrap();
        fs::write(f.root.join("real/data.txt"), "payload").unwrap();
        std::os::unix::fs::symlink(f.root.join("real"), f.root.join("dir-link")).unwrap();
        std::os::unix::fs::symlink("real/data.txt", f.root.join("file-link")).unwrap();

        let dir_op = f.run(delete("dir-link")).await;
        let file_op = f.run(delete("file-link")).await;
        // 目标本身未被触碰
        assert_eq!(fs::read_to_string(f.root.join("real/data.txt")).unwrap(), "payload");
        let rec = f.ledger.get(&dir_op).unwrap();
        assert!(!rec.is_directory);
        assert_eq!(rec.hash, None);

        f.engine.rollback_operation(&file_op).unwrap();
        f.engine.rollback_operation(&dir_op).unwrap();
        assert_eq!(fs::read_link(f.root.join("dir-link")).unwrap(), f.root.join("real"));
        assert_eq!(
            fs::read_link(f.root.join("file-link")).unwrap(),
            PathBuf::from("real/data.txt")
        );
        assert_eq!(fs::read_to_string(f.root.join("file-link")).unwrap(), "payload");
    }

    #[tokio::test]
    async fn test_cleanup_expired_backups() {
        let mut f = Fixture::new();
        fs::write(f.root.join("old.log"), "log").unwrap();
        let op = f.run(delete("old.log")).await;
        let backup = f.ledger.get(&op).unwrap().backup_path.unwrap();

        assert_eq!(f.engine.cleanup_expired_backups(Utc::now()).unwrap(), 0);
        let later = Utc::now() + chrono::Duration::days(31);
        assert_eq!(f.engine.cleanup_expired_backups(later).unwrap(), 1);
        assert!(!backup.exists());
        assert!(f.ledger.get(&op).unwrap().backup_path.is_none());
        assert_eq!(f.engine.cleanup_expired_backups(later).unwrap(), 0);
    }
}

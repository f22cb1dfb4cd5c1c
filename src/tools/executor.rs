//! 工具执行器
//!
//! 持有工作区、账本、备份存储与风险评分器。变更类动作遵循预写顺序：
//! 校验路径 → 追加 Pending 记录 → Executing → （删除 / 覆盖先快照）→ 执行 → Success / Failed。
//! 只读动作不经过账本。文件系统操作全部在 spawn_blocking 中执行；每次调用输出结构化审计日志（JSON）。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use super::action::Action;
use super::observation::ToolOutcome;
use super::search;
use super::workspace::Workspace;
use crate::backup::{BackupStore, Snapshot};
use crate::core::ToolError;
use crate::fsutil;
use crate::ledger::{Completion, Ledger, NewOperation, OperationType};
use crate::risk::RiskScorer;

/// 已校验、可执行的变更
#[derive(Debug, Clone)]
enum Mutation {
    Write {
        path: PathBuf,
        content: String,
        previous_size: Option<u64>,
    },
    Delete {
        path: PathBuf,
    },
    Move {
        source: PathBuf,
        dest: PathBuf,
    },
    Copy {
        source: PathBuf,
        dest: PathBuf,
    },
}

/// 变更完成后的元数据
#[derive(Debug, Default)]
struct Applied {
    backup: Option<Snapshot>,
    size: u64,
    hash: Option<String>,
    is_directory: bool,
    previous_size: Option<u64>,
    created_dirs: Vec<PathBuf>,
}

struct Plan {
    op_type: OperationType,
    source: Option<PathBuf>,
    dest: Option<PathBuf>,
    size_hint: Option<u64>,
    mutation: Mutation,
}

impl Plan {
    /// 结果所在路径（用于扩展名）
    fn result_path(&self) -> Option<&Path> {
        self.dest.as_deref().or(self.source.as_deref())
    }
}

/// 文件操作执行器
pub struct FileExecutor {
    workspace: Workspace,
    ledger: Arc<dyn Ledger>,
    backups: Arc<BackupStore>,
    scorer: Arc<RiskScorer>,
}

impl FileExecutor {
    pub fn new(
        workspace: Workspace,
        ledger: Arc<dyn Ledger>,
        backups: Arc<BackupStore>,
        scorer: Arc<RiskScorer>,
    ) -> Self {
        Self {
            workspace,
            ledger,
            backups,
            scorer,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// 执行动作；变更类动作以 `seq` 作为会话内序号写入账本
    pub async fn execute(&self, action: &Action, session_id: &str, seq: u64) -> ToolOutcome {
        let start = Instant::now();
        let outcome = match action {
            Action::Finish(_) => ToolOutcome {
                op_id: None,
                result: Err(ToolError::InvalidParameters {
                    tool: action.name().to_string(),
                    reason: "finish is not an executable tool".to_string(),
                }),
            },
            a if a.is_mutating() => self.run_mutation(a, session_id, seq).await,
            a => ToolOutcome {
                op_id: None,
                result: self.run_read_only(a).await,
            },
        };

        let description = action.describe();
        let audit = json!({
            "event": "tool_audit",
            "tool": action.name(),
            "action": description,
            "risk_score": self.scorer.score(&description),
            "session_id": session_id,
            "op_id": outcome.op_id,
            "ok": outcome.is_success(),
            "error_kind": outcome.result.as_ref().err().map(|e| e.kind()),
            "duration_ms": start.elapsed().as_millis() as u64,
        });
        tracing::info!(audit = %audit, "tool");
        outcome
    }

    async fn run_read_only(&self, action: &Action) -> Result<Value, ToolError> {
        let ws = self.workspace.clone();
        let action = action.clone();
        blocking(move || match &action {
            Action::ReadFile(p) => search::read_file(&ws, p),
            Action::ListDirectory(p) => search::list_directory(&ws, p),
            Action::SearchFiles(p) => search::search_files(&ws, p),
            other => Err(ToolError::InvalidParameters {
                tool: other.name().to_string(),
                reason: "not a read-only tool".to_string(),
            }),
        })
        .await
    }

    /// 解析并校验路径，决定记录类型；此阶段失败不写账本
    fn plan(&self, action: &Action) -> Result<Plan, ToolError> {
        match action {
            Action::WriteFile(p) => {
                let path = self.workspace.resolve(&p.path)?;
                // 不经由链接写入：覆盖目标与快照必须是同一个文件
                let existing = match fs::symlink_metadata(&path) {
                    Ok(m) if m.file_type().is_symlink() => {
                        return Err(ToolError::InvalidParameters {
                            tool: action.name().to_string(),
                            reason: format!("{} is a symbolic link", p.path),
                        })
                    }
                    Ok(m) if m.is_dir() => {
                        return Err(ToolError::InvalidParameters {
                            tool: action.name().to_string(),
                            reason: format!("{} is a directory", p.path),
                        })
                    }
                    Ok(m) => Some(m.len()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                    Err(e) => return Err(ToolError::from_io(&path, e)),
                };
                Ok(Plan {
                    op_type: if existing.is_some() {
                        OperationType::Modify
                    } else {
                        OperationType::Create
                    },
                    source: Some(path.clone()),
                    dest: None,
                    size_hint: Some(p.content.len() as u64),
                    mutation: Mutation::Write {
                        path,
                        content: p.content.clone(),
                        previous_size: existing,
                    },
                })
            }
            Action::DeleteFile(p) => {
                let path = self.workspace.resolve(&p.path)?;
                self.refuse_root(&path, &p.path)?;
                let meta = fs::symlink_metadata(&path).map_err(|e| ToolError::from_io(&path, e))?;
                if meta.is_dir() && !p.recursive {
                    return Err(ToolError::InvalidParameters {
                        tool: action.name().to_string(),
                        reason: format!("{} is a directory; set recursive=true", p.path),
                    });
                }
                Ok(Plan {
                    op_type: OperationType::Delete,
                    source: Some(path.clone()),
                    dest: None,
                    size_hint: meta.is_file().then(|| meta.len()),
                    mutation: Mutation::Delete { path },
                })
            }
            Action::MoveFile(p) => {
                let (source, dest) = self.resolve_pair(action.name(), &p.source, &p.destination)?;
                let op_type = if source.parent() == dest.parent() {
                    OperationType::Rename
                } else {
                    OperationType::Move
                };
                Ok(Plan {
                    op_type,
                    source: Some(source.clone()),
                    dest: Some(dest.clone()),
                    size_hint: None,
                    mutation: Mutation::Move { source, dest },
                })
            }
            Action::CopyFile(p) => {
                let (source, dest) = self.resolve_pair(action.name(), &p.source, &p.destination)?;
                Ok(Plan {
                    op_type: OperationType::Copy,
                    source: Some(source.clone()),
                    dest: Some(dest.clone()),
                    size_hint: None,
                    mutation: Mutation::Copy { source, dest },
                })
            }
            other => Err(ToolError::InvalidParameters {
                tool: other.name().to_string(),
                reason: "not a mutating tool".to_string(),
            }),
        }
    }

    fn refuse_root(&self, path: &Path, raw: &str) -> Result<(), ToolError> {
        if path == self.workspace.root() {
            return Err(ToolError::PermissionDenied(format!(
                "refusing to operate on the workspace root: {raw}"
            )));
        }
        Ok(())
    }

    fn resolve_pair(
        &self,
        tool: &str,
        source: &str,
        dest: &str,
    ) -> Result<(PathBuf, PathBuf), ToolError> {
        let src = self.workspace.resolve(source)?;
        let dst = self.workspace.resolve(dest)?;
        self.refuse_root(&src, source)?;
        if !fsutil::path_exists(&src) {
            return Err(ToolError::PathNotFound(src));
        }
        if fsutil::path_exists(&dst) {
            return Err(ToolError::AlreadyExists(dst));
        }
        if dst.starts_with(&src) {
            return Err(ToolError::InvalidParameters {
                tool: tool.to_string(),
                reason: format!("{dest} is inside {source}"),
            });
        }
        Ok((src, dst))
    }

    async fn run_mutation(&self, action: &Action, session_id: &str, seq: u64) -> ToolOutcome {
        let plan = match self.plan(action) {
            Ok(p) => p,
            Err(e) => {
                return ToolOutcome {
                    op_id: None,
                    result: Err(e),
                }
            }
        };

        // 预写：意图落盘前不做任何变更
        let op_id = match self.ledger.append(NewOperation {
            session_id: session_id.to_string(),
            op_type: plan.op_type,
            source_path: plan.source.clone(),
            dest_path: plan.dest.clone(),
            sequence_number: seq,
            size_hint: plan.size_hint,
        }) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(session_id, seq, error = %e, "ledger append failed; mutation skipped");
                return ToolOutcome {
                    op_id: None,
                    result: Err(ToolError::Ledger(e)),
                };
            }
        };

        let result = self.apply_recorded(&op_id, plan).await;
        ToolOutcome {
            op_id: Some(op_id),
            result,
        }
    }

    async fn apply_recorded(&self, op_id: &str, plan: Plan) -> Result<Value, ToolError> {
        if let Err(e) = self.ledger.begin_execution(op_id) {
            tracing::warn!(op_id, error = %e, "could not mark operation executing");
            if let Err(le) = self.ledger.complete_failure(op_id, &e.to_string()) {
                tracing::warn!(op_id, error = %le, "could not record failure");
            }
            return Err(ToolError::Ledger(e));
        }

        let started = Instant::now();
        let extension = plan.result_path().and_then(fsutil::extension_of);
        let op_type = plan.op_type;
        let backups = Arc::clone(&self.backups);
        let id = op_id.to_string();
        let mutation = plan.mutation.clone();
        let applied = blocking(move || apply(&backups, &id, mutation)).await;

        let applied = match applied {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(op_id, op_type = %op_type, error = %e, "operation failed");
                if let Err(le) = self.ledger.complete_failure(op_id, &e.to_string()) {
                    tracing::error!(op_id, error = %le, "could not record failure");
                }
                return Err(e);
            }
        };

        let completion = Completion {
            backup_path: applied.backup.as_ref().map(|s| s.path.clone()),
            backup_expires_at: applied.backup.as_ref().map(|s| s.expires_at),
            size: applied.size,
            hash: applied.hash.clone(),
            is_directory: applied.is_directory,
            extension,
            duration_ms: started.elapsed().as_millis() as u64,
            space_impact_bytes: op_type.space_impact(applied.size, applied.previous_size),
            created_dirs: applied.created_dirs.clone(),
        };
        let space_impact = completion.space_impact_bytes;
        if let Err(e) = self.ledger.complete_success(op_id, completion) {
            tracing::error!(op_id, error = %e, "mutation applied but success could not be recorded");
            return Err(ToolError::Ledger(e));
        }
        tracing::info!(op_id, op_type = %op_type, size = applied.size, "operation succeeded");

        let rel = |p: &Option<PathBuf>| p.as_ref().map(|p| self.workspace.relative(p));
        Ok(json!({
            "operation_id": op_id,
            "operation_type": op_type.as_str(),
            "source": rel(&plan.source),
            "destination": rel(&plan.dest),
            "size": applied.size,
            "is_directory": applied.is_directory,
            "backed_up": applied.backup.is_some(),
            "space_impact_bytes": space_impact,
        }))
    }
}

async fn blocking<T, F>(f: F) -> Result<T, ToolError>
where
    F: FnOnce() -> Result<T, ToolError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ToolError::IoFailure(format!("filesystem task failed: {e}")))?
}

/// 只对普通文件计算哈希
fn file_hash(path: &Path) -> Option<String> {
    match fs::symlink_metadata(path) {
        Ok(m) if m.is_file() => fsutil::sha256_file(path).ok(),
        _ => None,
    }
}

fn is_dir_entry(path: &Path) -> bool {
    fs::symlink_metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

fn create_parents(path: &Path) -> Result<Vec<PathBuf>, ToolError> {
    fsutil::create_parents(path).map_err(|e| ToolError::from_io(path, e))
}

fn apply(backups: &BackupStore, op_id: &str, mutation: Mutation) -> Result<Applied, ToolError> {
    match mutation {
        Mutation::Write {
            path,
            content,
            previous_size,
        } => {
            // 覆盖前快照；失败即中止，原文件不动
            let backup = match previous_size {
                Some(_) => Some(backups.snapshot(op_id, &path)?),
                None => None,
            };
            let created_dirs = create_parents(&path)?;
            if let Err(e) = fs::write(&path, content.as_bytes()) {
                fsutil::remove_created_dirs(&created_dirs);
                return Err(ToolError::from_io(&path, e));
            }
            Ok(Applied {
                backup,
                size: content.len() as u64,
                hash: file_hash(&path),
                is_directory: false,
                previous_size,
                created_dirs,
            })
        }
        Mutation::Delete { path } => {
            let is_directory = fs::symlink_metadata(&path)
                .map_err(|e| ToolError::from_io(&path, e))?
                .is_dir();
            let stats = fsutil::tree_stats(&path).map_err(|e| ToolError::from_io(&path, e))?;
            let hash = file_hash(&path);
            let backup = backups.snapshot(op_id, &path)?;
            fsutil::remove_path(&path).map_err(|e| ToolError::from_io(&path, e))?;
            Ok(Applied {
                backup: Some(backup),
                size: stats.bytes,
                hash,
                is_directory,
                ..Applied::default()
            })
        }
        Mutation::Move { source, dest } => {
            if fsutil::path_exists(&dest) {
                return Err(ToolError::AlreadyExists(dest));
            }
            let created_dirs =
                fsutil::move_path(&source, &dest).map_err(|e| ToolError::from_io(&source, e))?;
            let stats = fsutil::tree_stats(&dest).map_err(|e| ToolError::from_io(&dest, e))?;
            Ok(Applied {
                size: stats.bytes,
                hash: file_hash(&dest),
                is_directory: is_dir_entry(&dest),
                created_dirs,
                ..Applied::default()
            })
        }
        Mutation::Copy { source, dest } => {
            if fsutil::path_exists(&dest) {
                return Err(ToolError::AlreadyExists(dest));
            }
            let created_dirs = create_parents(&dest)?;
            if let Err(e) = fsutil::copy_verified(&source, &dest) {
                fsutil::remove_created_dirs(&created_dirs);
                return Err(ToolError::from_io(&dest, e));
            }
            let stats = fsutil::tree_stats(&dest).map_err(|e| ToolError::from_io(&dest, e))?;
            Ok(Applied {
                size: stats.bytes,
                hash: file_hash(&dest),
                is_directory: is_dir_entry(&dest),
                created_dirs,
                ..Applied::default()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LedgerError;
    use crate::ledger::{MemoryLedger, OperationRecord, OperationStatus, SessionRecord};
    use crate::tools::action::{
        CopyFileParams, DeleteFileParams, MoveFileParams, ReadFileParams, WriteFileParams,
    };

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        ledger: Arc<MemoryLedger>,
        executor: FileExecutor,
        session: String,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("ws");
        fs::create_dir_all(&root).unwrap();
        let ledger = Arc::new(MemoryLedger::new());
        let backups = Arc::new(BackupStore::new(
            dir.path().join("bin"),
            chrono::Duration::days(30),
        ));
        let executor = FileExecutor::new(
            Workspace::new(&root),
            ledger.clone(),
            backups,
            Arc::new(RiskScorer::new()),
        );
        let session = ledger.open_session("test", "task").unwrap();
        let root = executor.workspace().root().to_path_buf();
        Fixture {
            _dir: dir,
            root,
            ledger,
            executor,
            session,
        }
    }

    fn write(path: &str, content: &str) -> Action {
        Action::WriteFile(WriteFileParams {
            path: path.into(),
            content: content.into(),
        })
    }

    #[tokio::test]
    async fn test_write_new_file_records_create() {
        let f = fixture();
        let out = f.executor.execute(&write("a/b.txt", "hi"), &f.session, 1).await;
        assert!(out.is_success(), "{:?}", out.result);
        assert_eq!(fs::read_to_string(f.root.join("a/b.txt")).unwrap(), "hi");

        let rec = f.ledger.get(out.op_id.as_deref().unwrap()).unwrap();
        assert_eq!(rec.op_type, OperationType::Create);
        assert_eq!(rec.status, OperationStatus::Success);
        assert_eq!(rec.sequence_number, 1);
        assert_eq!(rec.space_impact_bytes, Some(-2));
        assert_eq!(rec.extension.as_deref(), Some("txt"));
        assert!(rec.hash.is_some());
    }

    #[tokio::test]
    async fn test_overwrite_records_modify_with_backup() {
        let f = fixture();
        fs::write(f.root.join("c.txt"), "old content").unwrap();
        let out = f.executor.execute(&write("c.txt", "new"), &f.session, 1).await;
        assert!(out.is_success());

        let rec = f.ledger.get(out.op_id.as_deref().unwrap()).unwrap();
        assert_eq!(rec.op_type, OperationType::Modify);
        let backup = rec.backup_path.unwrap();
        assert_eq!(fs::read_to_string(backup).unwrap(), "old content");
        assert_eq!(rec.space_impact_bytes, Some(8));
    }

    #[tokio::test]
    async fn test_delete_backs_up_then_removes() {
        let f = fixture();
        fs::write(f.root.join("f.txt"), "hello").unwrap();
        let action = Action::DeleteFile(DeleteFileParams {
            path: "f.txt".into(),
            recursive: false,
        });
        let out = f.executor.execute(&action, &f.session, 1).await;
        assert!(out.is_success());
        assert!(!f.root.join("f.txt").exists());

        let rec = f.ledger.get(out.op_id.as_deref().unwrap()).unwrap();
        assert_eq!(rec.op_type, OperationType::Delete);
        assert_eq!(rec.space_impact_bytes, Some(5));
        assert_eq!(fs::read_to_string(rec.backup_path.unwrap()).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_delete_directory_requires_recursive() {
        let f = fixture();
        fs::create_dir_all(f.root.join("d")).unwrap();
        let out = f
            .executor
            .execute(
                &Action::DeleteFile(DeleteFileParams {
                    path: "d".into(),
                    recursive: false,
                }),
                &f.session,
                1,
            )
            .await;
        assert_eq!(out.op_id, None);
        assert_eq!(out.result.unwrap_err().kind(), "invalid_parameters");
        assert!(f.root.join("d").exists());
    }

    #[tokio::test]
    async fn test_snapshot_failure_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("ws");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("keep.txt"), "precious").unwrap();
        // 回收站路径被普通文件占用，快照必然失败
        let blocker = dir.path().join("bin");
        fs::write(&blocker, "not a directory").unwrap();

        let ledger = Arc::new(MemoryLedger::new());
        let executor = FileExecutor::new(
            Workspace::new(&root),
            ledger.clone(),
            Arc::new(BackupStore::new(blocker, chrono::Duration::days(30))),
            Arc::new(RiskScorer::new()),
        );
        let session = ledger.open_session("test", "task").unwrap();
        let out = executor
            .execute(
                &Action::DeleteFile(DeleteFileParams {
                    path: "keep.txt".into(),
                    recursive: false,
                }),
                &session,
                1,
            )
            .await;

        assert_eq!(out.result.as_ref().unwrap_err().kind(), "backup_error");
        assert_eq!(fs::read_to_string(root.join("keep.txt")).unwrap(), "precious");
        let rec = ledger.get(out.op_id.as_deref().unwrap()).unwrap();
        assert_eq!(rec.status, OperationStatus::Failed);
        assert!(rec.error_message.is_some());
    }

    #[tokio::test]
    async fn test_move_within_directory_is_rename() {
        let f = fixture();
        fs::write(f.root.join("old.txt"), "x").unwrap();
        let out = f
            .executor
            .execute(
                &Action::MoveFile(MoveFileParams {
                    source: "old.txt".into(),
                    destination: "new.txt".into(),
                }),
                &f.session,
                1,
            )
            .await;
        let rec = f.ledger.get(out.op_id.as_deref().unwrap()).unwrap();
        assert_eq!(rec.op_type, OperationType::Rename);
        assert!(f.root.join("new.txt").exists());
        assert!(!f.root.join("old.txt").exists());
    }

    #[tokio::test]
    async fn test_move_refuses_existing_destination() {
        let f = fixture();
        fs::write(f.root.join("a.txt"), "a").unwrap();
        fs::create_dir_all(f.root.join("archive")).unwrap();
        fs::write(f.root.join("archive/a.txt"), "b").unwrap();
        let out = f
            .executor
            .execute(
                &Action::MoveFile(MoveFileParams {
                    source: "a.txt".into(),
                    destination: "archive/a.txt".into(),
                }),
                &f.session,
                1,
            )
            .await;
        assert_eq!(out.result.unwrap_err().kind(), "already_exists");
        assert_eq!(fs::read_to_string(f.root.join("archive/a.txt")).unwrap(), "b");
    }

    #[tokio::test]
    async fn test_copy_directory_records_copy() {
        let f = fixture();
        fs::create_dir_all(f.root.join("src_dir/inner")).unwrap();
        fs::write(f.root.join("src_dir/inner/x.md"), "12345").unwrap();
        let out = f
            .executor
            .execute(
                &Action::CopyFile(CopyFileParams {
                    source: "src_dir".into(),
                    destination: "backup/src_dir".into(),
                }),
                &f.session,
                1,
            )
            .await;
        let rec = f.ledger.get(out.op_id.as_deref().unwrap()).unwrap();
        assert_eq!(rec.op_type, OperationType::Copy);
        assert!(rec.is_directory);
        assert_eq!(rec.size, Some(5));
        assert!(f.root.join("backup/src_dir/inner/x.md").exists());
        assert!(f.root.join("src_dir/inner/x.md").exists());
    }

    #[tokio::test]
    async fn test_path_escape_writes_no_record() {
        let f = fixture();
        let out = f
            .executor
            .execute(&write("../escape.txt", "x"), &f.session, 1)
            .await;
        assert_eq!(out.op_id, None);
        assert_eq!(out.result.unwrap_err().kind(), "permission_denied");
        assert!(f.ledger.list_for_session(&f.session).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_sequence_blocks_mutation() {
        let f = fixture();
        assert!(f.executor.execute(&write("one.txt", "1"), &f.session, 1).await.is_success());
        let out = f.executor.execute(&write("two.txt", "2"), &f.session, 1).await;
        assert_eq!(out.op_id, None);
        assert_eq!(out.result.unwrap_err().kind(), "ledger_error");
        assert!(!f.root.join("two.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_copy_leaves_no_partial_tree() {
        let f = fixture();
        fs::create_dir_all(f.root.join("d")).unwrap();
        fs::write(f.root.join("d/a.txt"), "a").unwrap();
        let _listener = std::os::unix::net::UnixListener::bind(f.root.join("d/sock")).unwrap();

        let out = f
            .executor
            .execute(
                &Action::CopyFile(CopyFileParams {
                    source: "d".into(),
                    destination: "out/e".into(),
                }),
                &f.session,
                1,
            )
            .await;
        assert!(out.result.is_err());
        let rec = f.ledger.get(out.op_id.as_deref().unwrap()).unwrap();
        assert_eq!(rec.status, OperationStatus::Failed);
        assert!(!f.root.join("out/e").exists());
        assert!(!f.root.join("out").exists());
    }

    #[tokio::test]
    async fn test_copy_records_created_parents() {
        let f = fixture();
        fs::write(f.root.join("s.txt"), "s").unwrap();
        let out = f
            .executor
            .execute(
                &Action::CopyFile(CopyFileParams {
                    source: "s.txt".into(),
                    destination: "x/y/s.txt".into(),
                }),
                &f.session,
                1,
            )
            .await;
        let rec = f.ledger.get(out.op_id.as_deref().unwrap()).unwrap();
        assert_eq!(rec.created_dirs, vec![f.root.join("x"), f.root.join("x/y")]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_through_symlink_is_rejected() {
        let f = fixture();
        fs::write(f.root.join("target.txt"), "keep").unwrap();
        std::os::unix::fs::symlink(f.root.join("target.txt"), f.root.join("alias.txt")).unwrap();

        let out = f.executor.execute(&write("alias.txt", "clobber"), &f.session, 1).await;
        assert_eq!(out.op_id, None);
        assert_eq!(out.result.unwrap_err().kind(), "invalid_parameters");
        assert_eq!(fs::read_to_string(f.root.join("target.txt")).unwrap(), "keep");
        assert!(f.ledger.list_for_session(&f.session).unwrap().is_empty());
    }

    /// 追加成功但拒绝任何状态迁移的账本
    struct StuckLedger(MemoryLedger);

    impl Ledger for StuckLedger {
        fn append(&self, op: NewOperation) -> Result<String, LedgerError> {
            self.0.append(op)
        }
        fn begin_execution(&self, _: &str) -> Result<(), LedgerError> {
            Err(LedgerError::Storage("disk full".into()))
        }
        fn complete_success(&self, _: &str, _: Completion) -> Result<(), LedgerError> {
            Err(LedgerError::Storage("disk full".into()))
        }
        fn complete_failure(&self, _: &str, _: &str) -> Result<(), LedgerError> {
            Err(LedgerError::Storage("disk full".into()))
        }
        fn mark_rolled_back(&self, id: &str) -> Result<bool, LedgerError> {
            self.0.mark_rolled_back(id)
        }
        fn get(&self, id: &str) -> Result<OperationRecord, LedgerError> {
            self.0.get(id)
        }
        fn list_for_session(&self, id: &str) -> Result<Vec<OperationRecord>, LedgerError> {
            self.0.list_for_session(id)
        }
        fn successful_for_session_desc(
            &self,
            id: &str,
        ) -> Result<Vec<OperationRecord>, LedgerError> {
            self.0.successful_for_session_desc(id)
        }
        fn max_sequence(&self, id: &str) -> Result<u64, LedgerError> {
            self.0.max_sequence(id)
        }
        fn expired_backups(
            &self,
            now: chrono::DateTime<chrono::Utc>,
        ) -> Result<Vec<OperationRecord>, LedgerError> {
            self.0.expired_backups(now)
        }
        fn clear_backup(&self, id: &str) -> Result<(), LedgerError> {
            self.0.clear_backup(id)
        }
        fn open_session(&self, agent: &str, task: &str) -> Result<String, LedgerError> {
            self.0.open_session(agent, task)
        }
        fn finalize_session(&self, id: &str, ok: bool) -> Result<bool, LedgerError> {
            self.0.finalize_session(id, ok)
        }
        fn mark_session_rolled_back(&self, id: &str, n: u64) -> Result<(), LedgerError> {
            self.0.mark_session_rolled_back(id, n)
        }
        fn get_session(&self, id: &str) -> Result<SessionRecord, LedgerError> {
            self.0.get_session(id)
        }
        fn recent_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>, LedgerError> {
            self.0.recent_sessions(limit)
        }
    }

    #[tokio::test]
    async fn test_unrecordable_execution_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("ws");
        fs::create_dir_all(&root).unwrap();
        let ledger = Arc::new(StuckLedger(MemoryLedger::new()));
        let executor = FileExecutor::new(
            Workspace::new(&root),
            ledger.clone(),
            Arc::new(BackupStore::new(dir.path().join("bin"), chrono::Duration::days(30))),
            Arc::new(RiskScorer::new()),
        );
        let session = ledger.open_session("test", "task").unwrap();

        let out = executor.execute(&write("w.txt", "w"), &session, 1).await;
        assert_eq!(out.result.unwrap_err().kind(), "ledger_error");
        // 两次迁移都失败：记录停在 Pending，文件未写
        let rec = ledger.get(out.op_id.as_deref().unwrap()).unwrap();
        assert_eq!(rec.status, OperationStatus::Pending);
        assert!(!root.join("w.txt").exists());
    }

    #[tokio::test]
    async fn test_read_only_bypasses_ledger() {
        let f = fixture();
        fs::write(f.root.join("r.txt"), "a\nb\n").unwrap();
        let out = f
            .executor
            .execute(
                &Action::ReadFile(ReadFileParams {
                    path: "r.txt".into(),
                    offset: 1,
                    limit: 10,
                }),
                &f.session,
                1,
            )
            .await;
        assert_eq!(out.op_id, None);
        assert_eq!(out.result.unwrap()["total_lines"], 2);
        assert!(f.ledger.list_for_session(&f.session).unwrap().is_empty());
    }
}

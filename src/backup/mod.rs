//! 回收站式备份存储
//!
//! 删除或覆盖前把目标复制到 `<bin>/<op_id>/<name>`，复制后校验完整性再返回；
//! 任何一步失败都会清理半成品并报错，原件保持不动。符号链接按链接本身备份，不跟随。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};

use crate::core::BackupError;
use crate::fsutil;

/// 一次成功快照的位置与过期时间
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub path: PathBuf,
    pub expires_at: DateTime<Utc>,
}

/// 回收站目录 + 保留期
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
    retention: Duration,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            root: root.into(),
            retention,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// 复制 `path` 到回收站并校验；返回快照位置
    pub fn snapshot(&self, op_id: &str, path: &Path) -> Result<Snapshot, BackupError> {
        if !fsutil::path_exists(path) {
            return Err(BackupError::SourceMissing(path.to_path_buf()));
        }
        let name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "root".into());
        let slot = self.root.join(op_id);
        let target = slot.join(name);

        let incomplete = |reason: String| BackupError::Incomplete {
            path: path.to_path_buf(),
            reason,
        };

        if let Err(e) = fs::create_dir_all(&slot).and_then(|_| fsutil::copy_tree(path, &target)) {
            let _ = fs::remove_dir_all(&slot);
            return Err(incomplete(e.to_string()));
        }
        match fsutil::verify_copy(path, &target) {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                let _ = fs::remove_dir_all(&slot);
                return Err(incomplete(reason));
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&slot);
                return Err(incomplete(e.to_string()));
            }
        }

        tracing::debug!(op_id, backup = %target.display(), "snapshot verified");
        Ok(Snapshot {
            path: target,
            expires_at: Utc::now() + self.retention,
        })
    }

    /// 从快照恢复到 `dest`；`dest` 若已存在会被替换（调用方负责判断是否允许）
    pub fn restore(&self, backup: &Path, dest: &Path) -> Result<(), BackupError> {
        if !fsutil::path_exists(backup) {
            return Err(BackupError::Missing(backup.to_path_buf()));
        }
        let io_err = |e: io::Error| BackupError::Io(format!("{}: {}", dest.display(), e));

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        match fsutil::remove_path(dest) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(e)),
        }
        fsutil::copy_tree(backup, dest).map_err(io_err)?;
        match fsutil::verify_copy(backup, dest).map_err(io_err)? {
            Ok(()) => Ok(()),
            Err(reason) => Err(BackupError::Incomplete {
                path: dest.to_path_buf(),
                reason,
            }),
        }
    }

    /// 删除快照（连同其 op 目录）；已不存在视为成功
    pub fn discard(&self, backup: &Path) -> Result<(), BackupError> {
        let target = match backup.parent() {
            Some(slot) if slot.parent() == Some(self.root.as_path()) => slot,
            _ => backup,
        };
        match fsutil::remove_path(target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackupError::Io(format!("{}: {}", target.display(), e))),
        }
    }
}

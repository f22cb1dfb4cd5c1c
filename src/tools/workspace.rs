//! 工作区沙箱
//!
//! Workspace 绑定根目录，所有路径经 resolve 校验必须落在根下（禁止 ../ 或符号链接逃逸）。
//! 目标可以尚不存在（写入 / 移动目的地）：先做词法归一，再对最深的已存在祖先做 canonicalize。

use std::path::{Component, Path, PathBuf};

use crate::core::ToolError;

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 解析为根下的绝对路径；逃逸返回 PermissionDenied
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let trimmed = path.trim();
        let candidate = Path::new(trimmed);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let normalized = normalize(&joined)
            .ok_or_else(|| ToolError::PermissionDenied(format!("path escapes workspace: {path}")))?;
        if !normalized.starts_with(&self.root) {
            return Err(ToolError::PermissionDenied(format!(
                "path escapes workspace: {path}"
            )));
        }

        // 符号链接：最深的已存在祖先解析后仍须在根下
        let mut existing = normalized.as_path();
        while !existing.exists() {
            match existing.parent() {
                Some(p) => existing = p,
                None => break,
            }
        }
        if let Ok(real) = existing.canonicalize() {
            if !real.starts_with(&self.root) {
                return Err(ToolError::PermissionDenied(format!(
                    "path escapes workspace via link: {path}"
                )));
            }
        }
        Ok(normalized)
    }

    /// 根下相对路径（用于观察结果与风险描述）
    pub fn relative(&self, abs: &Path) -> String {
        match abs.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => abs.to_string_lossy().into_owned(),
        }
    }
}

/// 词法归一：去掉 `.`，`..` 弹出上一级；越过根返回 None
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Prefix(_) | Component::RootDir => out.push(comp.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    Some(out)
}

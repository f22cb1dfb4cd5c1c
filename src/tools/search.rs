//! 只读工具：读文件、列目录、搜索内容（同步实现，执行器放入 spawn_blocking）

use std::fs;
use std::path::Path;

use regex::Regex;
use serde_json::{json, Value};
use walkdir::WalkDir;

use super::action::{ListDirectoryParams, ReadFileParams, SearchFilesParams};
use super::workspace::Workspace;
use crate::core::ToolError;

/// 上下文窗口（匹配前后各 50 字符）
const CONTEXT_CHARS: usize = 50;
/// 最多返回的文件数
const MAX_FILES: usize = 50;

pub fn read_file(ws: &Workspace, params: &ReadFileParams) -> Result<Value, ToolError> {
    let path = ws.resolve(&params.path)?;
    let meta = fs::metadata(&path).map_err(|e| ToolError::from_io(&path, e))?;
    if !meta.is_file() {
        return Err(ToolError::InvalidParameters {
            tool: "read_file".to_string(),
            reason: format!("not a file: {}", params.path),
        });
    }
    let bytes = fs::read(&path).map_err(|e| ToolError::from_io(&path, e))?;
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let total = lines.len();

    let offset = params.offset.max(1);
    let start = (offset - 1).min(total);
    let end = start.saturating_add(params.limit).min(total);
    let content: String = lines[start..end]
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{}: {}", offset + i, line))
        .collect();

    Ok(json!({
        "path": ws.relative(&path),
        "content": content,
        "total_lines": total,
        "start_line": offset,
        "end_line": end,
        "has_more": end < total,
        "file_size": meta.len(),
    }))
}

fn entry_json(ws: &Workspace, base: &Path, path: &Path, is_dir: bool, size: Option<u64>) -> Value {
    let rel = path.strip_prefix(base).unwrap_or(path);
    json!({
        "name": path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        "path": rel.to_string_lossy().replace('\\', "/"),
        "workspace_path": ws.relative(path),
        "type": if is_dir { "directory" } else { "file" },
        "size": size,
    })
}

pub fn list_directory(ws: &Workspace, params: &ListDirectoryParams) -> Result<Value, ToolError> {
    let base = ws.resolve(&params.path)?;
    let meta = fs::metadata(&base).map_err(|e| ToolError::from_io(&base, e))?;
    if !meta.is_dir() {
        return Err(ToolError::InvalidParameters {
            tool: "list_directory".to_string(),
            reason: format!("not a directory: {}", params.path),
        });
    }

    let mut entries: Vec<(bool, String, Value)> = Vec::new();
    let walker = WalkDir::new(&base)
        .min_depth(1)
        .max_depth(if params.recursive { usize::MAX } else { 1 });
    for entry in walker {
        let entry = entry.map_err(|e| ToolError::IoFailure(e.to_string()))?;
        let is_dir = entry.file_type().is_dir();
        let size = if is_dir {
            None
        } else {
            entry.metadata().ok().map(|m| m.len())
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        entries.push((is_dir, name, entry_json(ws, &base, entry.path(), is_dir, size)));
    }
    entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    let entries: Vec<Value> = entries.into_iter().map(|(_, _, v)| v).collect();
    Ok(json!({
        "directory": ws.relative(&base),
        "total_count": entries.len(),
        "entries": entries,
    }))
}

/// 截取 [start, end) 前后各 CONTEXT_CHARS 个字符（按字符边界）
fn context_around(content: &str, start: usize, end: usize) -> String {
    let before = content[..start]
        .char_indices()
        .rev()
        .nth(CONTEXT_CHARS - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let after = content[end..]
        .char_indices()
        .nth(CONTEXT_CHARS)
        .map(|(i, _)| end + i)
        .unwrap_or(content.len());
    content[before..after].to_string()
}

pub fn search_files(ws: &Workspace, params: &SearchFilesParams) -> Result<Value, ToolError> {
    let base = ws.resolve(&params.path)?;
    if !base.exists() {
        return Err(ToolError::PathNotFound(base));
    }
    let invalid = |reason: String| ToolError::InvalidParameters {
        tool: "search_files".to_string(),
        reason,
    };
    if params.pattern.is_empty() {
        return Err(invalid("pattern must not be empty".to_string()));
    }
    let matcher = if params.use_regex {
        Regex::new(&params.pattern).map_err(|e| invalid(format!("invalid regex: {e}")))?
    } else {
        Regex::new(&regex::escape(&params.pattern)).map_err(|e| invalid(e.to_string()))?
    };
    let name_glob = glob::Pattern::new(&params.file_pattern)
        .map_err(|e| invalid(format!("invalid file_pattern: {e}")))?;

    let mut searched = 0usize;
    let mut results: Vec<(usize, Value)> = Vec::new();
    for entry in WalkDir::new(&base).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !name_glob.matches(&name) {
            continue;
        }
        searched += 1;
        // 非 UTF-8（多为二进制）跳过
        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };
        let matches: Vec<Value> = matcher
            .find_iter(&content)
            .map(|m| {
                json!({
                    "start": m.start(),
                    "end": m.end(),
                    "matched": m.as_str(),
                    "context": context_around(&content, m.start(), m.end()),
                })
            })
            .collect();
        if matches.is_empty() {
            continue;
        }
        let rel = entry.path().strip_prefix(&base).unwrap_or(entry.path());
        let count = matches.len();
        results.push((
            count,
            json!({
                "file": rel.to_string_lossy().replace('\\', "/"),
                "match_count": count,
                "matches": matches,
            }),
        ));
    }

    results.sort_by(|a, b| b.0.cmp(&a.0));
    let files_matched = results.len();
    let total_matches: usize = results.iter().map(|(c, _)| c).sum();
    let matches: Vec<Value> = results.into_iter().take(MAX_FILES).map(|(_, v)| v).collect();

    Ok(json!({
        "pattern": params.pattern,
        "path": ws.relative(&base),
        "files_searched": searched,
        "files_matched": files_matched,
        "total_matches": total_matches,
        "matches": matches,
    }))
}

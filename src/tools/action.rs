//! 动作集合：封闭的带类型参数的枚举
//!
//! 模型给出的 `(action, parameters)` 经 `Action::from_parsed` 转为具体变体；
//! 未知动作名 → ToolNotFound，参数反序列化失败 → InvalidParameters。

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::ToolError;

fn default_offset() -> usize {
    1
}

fn default_limit() -> usize {
    2000
}

fn default_dot() -> String {
    ".".to_string()
}

fn default_star() -> String {
    "*".to_string()
}

/// 读取文件（带行号）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReadFileParams {
    /// 相对工作区的文件路径
    pub path: String,
    /// 起始行号（1-based）
    #[serde(default = "default_offset")]
    pub offset: usize,
    /// 最多读取行数
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// 写入文件；父目录不存在时自动创建，已存在的文件会先备份
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WriteFileParams {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ListDirectoryParams {
    #[serde(default = "default_dot")]
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
}

/// 删除文件或目录（目录需 recursive=true）；删除前备份到回收站
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeleteFileParams {
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
}

/// 移动或重命名；目的地已存在时拒绝
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MoveFileParams {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CopyFileParams {
    pub source: String,
    pub destination: String,
}

/// 搜索文件内容，返回 ±50 字符上下文
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SearchFilesParams {
    /// 要查找的文本或正则
    pub pattern: String,
    #[serde(default = "default_dot")]
    pub path: String,
    /// 文件名 glob，如 `*.md`
    #[serde(default = "default_star")]
    pub file_pattern: String,
    #[serde(default)]
    pub use_regex: bool,
}

/// 模型可调用的全部动作
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ReadFile(ReadFileParams),
    WriteFile(WriteFileParams),
    ListDirectory(ListDirectoryParams),
    DeleteFile(DeleteFileParams),
    MoveFile(MoveFileParams),
    CopyFile(CopyFileParams),
    SearchFiles(SearchFilesParams),
    /// 终止哨兵：参数即最终结果，不交给执行器
    Finish(Map<String, Value>),
}

/// 可分发给执行器的动作名（不含 finish）
pub const TOOL_NAMES: &[&str] = &[
    "read_file",
    "write_file",
    "list_directory",
    "delete_file",
    "move_file",
    "copy_file",
    "search_files",
];

pub const FINISH: &str = "finish";

fn params<T: DeserializeOwned>(tool: &str, parameters: &Map<String, Value>) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(parameters.clone())).map_err(|e| {
        ToolError::InvalidParameters {
            tool: tool.to_string(),
            reason: e.to_string(),
        }
    })
}

impl Action {
    pub fn from_parsed(name: &str, parameters: &Map<String, Value>) -> Result<Self, ToolError> {
        let name = name.trim().to_lowercase();
        let action = match name.as_str() {
            "read_file" => Action::ReadFile(params(&name, parameters)?),
            "write_file" => Action::WriteFile(params(&name, parameters)?),
            "list_directory" => Action::ListDirectory(params(&name, parameters)?),
            "delete_file" => Action::DeleteFile(params(&name, parameters)?),
            "move_file" => Action::MoveFile(params(&name, parameters)?),
            "copy_file" => Action::CopyFile(params(&name, parameters)?),
            "search_files" => Action::SearchFiles(params(&name, parameters)?),
            FINISH => Action::Finish(parameters.clone()),
            _ => {
                return Err(ToolError::ToolNotFound {
                    name,
                    available: TOOL_NAMES.join(", "),
                })
            }
        };
        Ok(action)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::ReadFile(_) => "read_file",
            Action::WriteFile(_) => "write_file",
            Action::ListDirectory(_) => "list_directory",
            Action::DeleteFile(_) => "delete_file",
            Action::MoveFile(_) => "move_file",
            Action::CopyFile(_) => "copy_file",
            Action::SearchFiles(_) => "search_files",
            Action::Finish(_) => FINISH,
        }
    }

    /// 会改动文件系统（需要走账本）
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Action::WriteFile(_) | Action::DeleteFile(_) | Action::MoveFile(_) | Action::CopyFile(_)
        )
    }

    /// 渲染为类 shell 命令行，供风险评分使用
    pub fn describe(&self) -> String {
        match self {
            Action::ReadFile(p) => format!("cat {}", p.path),
            Action::WriteFile(p) => format!("write {}", p.path),
            Action::ListDirectory(p) if p.recursive => format!("ls -R {}", p.path),
            Action::ListDirectory(p) => format!("ls {}", p.path),
            Action::DeleteFile(p) if p.recursive => format!("rm -r {}", p.path),
            Action::DeleteFile(p) => format!("rm {}", p.path),
            Action::MoveFile(p) => format!("mv {} {}", p.source, p.destination),
            Action::CopyFile(p) => format!("cp {} {}", p.source, p.destination),
            // 搜索内容不是路径，只描述范围
            Action::SearchFiles(p) => format!("grep -r {}", p.path),
            Action::Finish(_) => FINISH.to_string(),
        }
    }
}

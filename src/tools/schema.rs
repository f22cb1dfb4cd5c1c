//! 动作参数 JSON Schema 生成（schemars）
//!
//! 用于把「合法响应格式」与每个动作的参数结构注入 system prompt，减少 LLM 输出格式错误。

use schemars::{schema_for, JsonSchema};
use serde_json::{Map, Value};

use super::action::{
    CopyFileParams, DeleteFileParams, ListDirectoryParams, MoveFileParams, ReadFileParams,
    SearchFilesParams, WriteFileParams,
};

/// 响应格式：与 ReAct 解析的 `{"thought", "action", "action_input"}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ResponseFormat {
    /// 当前推理
    pub thought: String,
    /// 动作名，如 read_file、delete_file、finish
    pub action: String,
    /// 动作参数，依动作不同而不同
    pub action_input: Map<String, Value>,
}

/// 单个动作的描述与参数 Schema
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

fn spec<T: JsonSchema>(name: &'static str, description: &'static str) -> ToolSpec {
    ToolSpec {
        name,
        description,
        parameters: serde_json::to_value(schema_for!(T)).unwrap_or(Value::Null),
    }
}

/// 全部可分发动作的目录
pub fn tool_catalogue() -> Vec<ToolSpec> {
    vec![
        spec::<ReadFileParams>("read_file", "Read a text file with line numbers."),
        spec::<WriteFileParams>(
            "write_file",
            "Create or overwrite a file. Existing content is backed up first.",
        ),
        spec::<ListDirectoryParams>("list_directory", "List directory entries, directories first."),
        spec::<DeleteFileParams>(
            "delete_file",
            "Delete a file or directory (recursive=true for directories). A backup is kept.",
        ),
        spec::<MoveFileParams>("move_file", "Move or rename. Fails if the destination exists."),
        spec::<CopyFileParams>("copy_file", "Copy a file or directory to a new destination."),
        spec::<SearchFilesParams>("search_files", "Search file contents for text or a regex."),
    ]
}

/// 返回响应格式的 JSON Schema 字符串，可拼入 system prompt
pub fn response_schema_json() -> String {
    let schema = schema_for!(ResponseFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

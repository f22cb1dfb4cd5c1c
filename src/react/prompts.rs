//! Prompt 模板：system prompt（工具目录 + 响应格式）与任务 prompt

use chrono::Local;
use serde_json::Value;

use crate::tools::{response_schema_json, tool_catalogue, ToolSpec};

const INTRO: &str = "You are a file management assistant. You organize, analyze and manage files \
inside a sandboxed workspace. Every mutation is recorded and can be rolled back.";

const RULES: &str = "Rules:
- Respond with exactly one JSON object per turn: {\"thought\": \"...\", \"action\": \"tool_name\", \"action_input\": {...}}.
- Paths are relative to the workspace root; paths outside it are refused.
- Deleted and overwritten files are backed up automatically.
- Destructive actions are risk-scored; high-risk actions need confirmation and catastrophic ones are blocked.
- When the task is complete, use action \"finish\" with action_input {\"result\": \"summary of what was done\"}.";

/// 参数列表：`name: type`，必填项标 `*`
fn parameter_summary(spec: &ToolSpec) -> String {
    let required: Vec<&str> = spec.parameters["required"]
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let Some(props) = spec.parameters["properties"].as_object() else {
        return String::new();
    };
    props
        .iter()
        .map(|(name, schema)| {
            let ty = schema["type"].as_str().unwrap_or("any");
            let mark = if required.contains(&name.as_str()) { "*" } else { "" };
            format!("{name}{mark}: {ty}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn tools_section() -> String {
    let lines: Vec<String> = tool_catalogue()
        .iter()
        .map(|spec| {
            format!(
                "- {}({}): {}",
                spec.name,
                parameter_summary(spec),
                spec.description
            )
        })
        .collect();
    format!("Available tools:\n{}\n- finish(result: any): End the task and report the result.", lines.join("\n"))
}

pub fn system_prompt() -> String {
    format!(
        "{INTRO}\n\n{}\n\nResponse JSON schema:\n{}\n\n{RULES}",
        tools_section(),
        response_schema_json()
    )
}

pub fn task_prompt(task: &str) -> String {
    format!(
        "Task: {task}\n\nCurrent time: {}\n\n\
         Analyze what needs to be done, use the tools step by step, and finish with a summary.",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

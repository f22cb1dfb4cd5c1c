//! 模型输出解析：{thought, action, parameters}
//!
//! 策略依次为：
//! 1. 提取 ``` 围栏（```json 或裸 ```）内容做严格 JSON 解析；
//! 2. 无围栏时对整段去空白文本做严格解析；
//! 3. 严格解析失败，退回启发式：最外层 `{...}`，再退到锚定模式
//!    （`thought:` / `I think` / `action:` / `use the X tool` / `action_input: {...}`）。
//!
//! thought 先于 action 校验；parameters 可省略，`action_input` / `actionInput` 视为别名。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::ParseError;

/// 解析结果；action 已去空白并转小写
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedResponse {
    pub thought: String,
    pub action: String,
    pub parameters: Map<String, Value>,
}

const PARAMETER_KEYS: &[&str] = &["parameters", "action_input", "actionInput"];

struct Patterns {
    fence: Regex,
    thought: [Regex; 2],
    action: [Regex; 2],
    input: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Result<Patterns, regex::Error>> = OnceLock::new();
    let compiled = PATTERNS.get_or_init(|| {
        Ok(Patterns {
            fence: Regex::new(r"(?is)```(?:json)?[ \t]*\n?(.*?)\n?```")?,
            thought: [
                Regex::new(
                    r#"(?is)(?:thought|thinking|reasoning)["']?\s*[:=]\s*["']?(.*?)(?:["']?\s*[,}\n]|action)"#,
                )?,
                Regex::new(r"(?is)(?:I think|I need to|Let me|First,?|Next,?)\s*(.*?)(?:\n\n|\n[A-Z]|$)")?,
            ],
            action: [
                Regex::new(r#"(?i)action["']?\s*[:=]\s*["']?(\w+)["']?"#)?,
                Regex::new(r"(?i)(?:use|call|execute)\s+(?:the\s+)?(\w+)\s+(?:tool|function)")?,
            ],
            input: Regex::new(r#"(?i)(?:action_input|actionInput|parameters)["']?\s*[:=]\s*"#)?,
        })
    });
    match compiled {
        Ok(p) => Some(p),
        Err(e) => {
            tracing::error!(error = %e, "parser patterns failed to compile; heuristics disabled");
            None
        }
    }
}

pub fn parse_response(text: &str) -> Result<ParsedResponse, ParseError> {
    let fenced = patterns()
        .and_then(|p| p.fence.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim());
    let candidate = fenced.unwrap_or_else(|| text.trim());

    match serde_json::from_str::<Value>(candidate) {
        Ok(value) => from_value(value),
        Err(strict) => {
            let recovered = heuristic(text);
            if recovered.is_empty() {
                return Err(ParseError::Malformed(format!(
                    "response is not valid JSON ({strict}) and no fields could be recovered"
                )));
            }
            tracing::debug!(fields = recovered.len(), "parsed response heuristically");
            validate(recovered)
        }
    }
}

fn from_value(value: Value) -> Result<ParsedResponse, ParseError> {
    match value {
        Value::Object(map) => validate(map),
        other => Err(ParseError::Malformed(format!(
            "expected a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn required_string(map: &mut Map<String, Value>, field: &'static str) -> Result<String, ParseError> {
    match map.remove(field) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ParseError::InvalidField {
            field,
            reason: format!("expected a string, got {}", type_name(&other)),
        }),
        None => Err(ParseError::MissingField(field)),
    }
}

fn validate(mut map: Map<String, Value>) -> Result<ParsedResponse, ParseError> {
    let thought = required_string(&mut map, "thought")?;
    let action = required_string(&mut map, "action")?.trim().to_lowercase();
    if action.is_empty() {
        return Err(ParseError::InvalidField {
            field: "action",
            reason: "must not be empty".to_string(),
        });
    }

    let raw = PARAMETER_KEYS.iter().find_map(|k| map.remove(*k));
    let parameters = match raw {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(m)) => m,
        Some(other) => {
            return Err(ParseError::InvalidField {
                field: "parameters",
                reason: format!("expected an object, got {}", type_name(&other)),
            })
        }
    };

    Ok(ParsedResponse {
        thought,
        action,
        parameters,
    })
}

/// 从 `start`（指向 `{`）开始截取括号配平的对象文本；跳过字符串内的括号
fn balanced_object(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[start..start + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn heuristic(text: &str) -> Map<String, Value> {
    // 夹在说明文字中的 JSON 对象
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&text[start..=end]) {
                if map.contains_key("thought") || map.contains_key("action") {
                    return map;
                }
            }
        }
    }

    let mut found = Map::new();
    let Some(p) = patterns() else {
        return found;
    };

    let first_capture = |regexes: &[Regex]| {
        regexes.iter().find_map(|re| {
            re.captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty())
        })
    };
    if let Some(thought) = first_capture(&p.thought) {
        found.insert("thought".to_string(), Value::String(thought));
    }
    if let Some(action) = first_capture(&p.action) {
        found.insert("action".to_string(), Value::String(action.to_lowercase()));
    }
    if let Some(m) = p.input.find(text) {
        let input = text[m.end()..]
            .starts_with('{')
            .then(|| balanced_object(text, m.end()))
            .flatten()
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .filter(Value::is_object);
        if let Some(v) = input {
            found.insert("parameters".to_string(), v);
        }
    }
    found
}

//! 工具调用 JSON Schema 生成（schemars）
//!
//! 将「合法 tool call」的 JSON 结构注入 system prompt，减少本地模型输出格式错误。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};

/// 工具调用格式：与 Planner 解析的 `{"tool": "...", "args": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，如 cat、ls、write_file、shell、fetch
    pub tool: String,
    /// 工具参数，依工具不同而不同
    pub args: HashMap<String, serde_json::Value>,
}

pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

//! Planner：调用 LLM 并解析输出
//!
//! 模型要么输出一个 JSON Tool Call（`{"tool": "cat", "args": {"path": "..."}}`，可包在 ```json 代码块中），
//! 要么直接输出纯文本作为最终回答。parse_llm_output 负责区分两者。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlannerOutput {
    /// 直接回复用户（最终答案）
    Response(String),
    /// 需要执行工具
    ToolCall(ToolCall),
}

/// 提取候选 JSON：```json 代码块，或以 `{` 开头的整段输出（含被 max_tokens 截断、缺少结尾的对象）
fn extract_json(trimmed: &str) -> Option<&str> {
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + "```json".len()..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    if trimmed.starts_with('{') {
        return Some(trimmed);
    }
    None
}

/// 解析 LLM 输出：有效 tool call → ToolCall；不像 JSON → Response；像 JSON 但非法 → JsonParseError
///
/// 回答正文里出现的代码花括号不会被误判为工具调用。
pub fn parse_llm_output(output: &str) -> Result<PlannerOutput, AgentError> {
    let trimmed = output.trim();
    let Some(json_str) = extract_json(trimmed) else {
        return Ok(PlannerOutput::Response(trimmed.to_string()));
    };

    let value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;

    // 合法 JSON 但不是工具调用（例如模型直接给出 JSON 数据作为答案）
    if value.get("tool").is_none() {
        return Ok(PlannerOutput::Response(trimmed.to_string()));
    }

    let parsed: ToolCall = serde_json::from_value(value)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;
    if parsed.tool.trim().is_empty() {
        return Err(AgentError::JsonParseError(format!("empty tool name: {}", json_str)));
    }
    Ok(PlannerOutput::ToolCall(parsed))
}

/// Planner：持有 LLM 与 system prompt，每次 plan 把 system 拼在消息最前
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub async fn plan(&self, messages: &[Message]) -> Result<String, AgentError> {
        let mut full_messages = Vec::with_capacity(messages.len() + 1);
        full_messages.push(Message::system(self.system_prompt.clone()));
        full_messages.extend_from_slice(messages);
        self.llm
            .complete(&full_messages)
            .await
            .map_err(AgentError::LlmError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_response() {
        let out = parse_llm_output("  The answer is 42.  ").unwrap();
        assert_eq!(out, PlannerOutput::Response("The answer is 42.".to_string()));
    }

    #[test]
    fn test_code_with_braces_is_response() {
        let text = "Here is the function:\n\nfn main() { println!(\"hi\"); }";
        assert!(matches!(parse_llm_output(text).unwrap(), PlannerOutput::Response(_)));
    }

    #[test]
    fn test_bare_json_tool_call() {
        let out = parse_llm_output(r#"{"tool": "ls", "args": {"path": "."}}"#).unwrap();
        match out {
            PlannerOutput::ToolCall(tc) => {
                assert_eq!(tc.tool, "ls");
                assert_eq!(tc.args["path"], ".");
            }
            other => panic!("Expected ToolCall, got {other:?}"),
        }
    }

    #[test]
    fn test_fenced_json_tool_call_without_args() {
        let text = "I will list files.\n```json\n{\"tool\": \"ls\"}\n```";
        match parse_llm_output(text).unwrap() {
            PlannerOutput::ToolCall(tc) => {
                assert_eq!(tc.tool, "ls");
                assert!(tc.args.is_null());
            }
            other => panic!("Expected ToolCall, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_json_is_error() {
        let err = parse_llm_output(r#"{"tool": "ls", "args": {"path": }"#).unwrap_err();
        assert!(matches!(err, AgentError::JsonParseError(_)));
    }

    #[test]
    fn test_truncated_tool_call_is_error() {
        for text in [r#"{"tool": "echo", "args":"#, r#"{"tool": "cat", "args": {"path": "src/ma"#, "{"] {
            let err = parse_llm_output(text).unwrap_err();
            assert!(matches!(err, AgentError::JsonParseError(_)), "{text}");
        }
    }

    #[test]
    fn test_json_without_tool_is_response() {
        let out = parse_llm_output(r#"{"result": 3}"#).unwrap();
        assert!(matches!(out, PlannerOutput::Response(_)));
    }

    #[test]
    fn test_empty_tool_name_is_error() {
        let err = parse_llm_output(r#"{"tool": "", "args": {}}"#).unwrap_err();
        assert!(matches!(err, AgentError::JsonParseError(_)));
    }
}

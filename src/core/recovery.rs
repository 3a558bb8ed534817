//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供 ReAct 循环决定是重试还是终止本次运行。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：格式类错误让模型重试，其余错误终止当前 run（会话本身不受影响）
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous output was not valid JSON: {raw}. \
                When calling a tool you must output exactly one JSON object and nothing else, \
                formatted as {{\"tool\": \"<name>\", \"args\": {{...}}}}. \
                To answer the user directly, reply in plain text without any JSON."
            )),
            _ => RecoveryAction::Abort,
        }
    }
}

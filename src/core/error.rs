//! 会话错误类型与恢复动作
//!
//! 初始化失败一律为 ConfigError；单次运行中的错误由 RecoveryEngine 决定重试还是终止本次运行。

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    /// 模型输出像 JSON 但无法解析为工具调用
    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 模型请求了未注册的工具
    #[error("Hallucinated tool: {0}")]
    HallucinatedTool(String),

    /// 推理端点的连接、状态码或响应体错误
    #[error("LLM error: {0}")]
    LlmError(String),

    /// 采样参数、工作目录、HTTP 客户端等初始化问题
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    /// 运行中按下 Ctrl-C
    #[error("Cancelled by user")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 把纠正提示追加到对话，让模型再试一次
    RetryWithPrompt(String),
    /// 结束本次运行，错误交给 REPL 显示
    Abort,
}

//! ReAct 过程事件：供 REPL 以暗色状态行展示思考步数、工具调用与观察

/// 单步过程事件
#[derive(Debug, Clone, PartialEq)]
pub enum ReactEvent {
    /// ReAct 步数更新（从 1 开始）
    StepUpdate { step: usize, max_steps: usize },
    /// 调用工具
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation { tool: String, preview: String },
    /// 工具执行失败（错误文本会作为观察回填给模型）
    ToolFailure { tool: String, reason: String },
    /// 错误恢复动作（RetryWithPrompt 等）
    Recovery { action: String, detail: String },
    /// 本次 run 的 token 增量
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
    },
}

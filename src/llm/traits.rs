//! LLM 客户端抽象：OpenAiClient 走 HTTP，MockLlmClient 用于测试

use async_trait::async_trait;

use crate::memory::Message;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 发送完整消息列表（含 system），返回首个 choice 的文本；错误为可直接展示的描述
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 累计 (prompt, completion, total) token；不统计的实现返回零
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

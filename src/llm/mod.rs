//! LLM 层：客户端抽象与实现（OpenAI 兼容 HTTP / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, SamplingParams, TokenUsage};
pub use traits::LlmClient;

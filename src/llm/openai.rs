//! OpenAI 兼容 API 客户端
//!
//! 直接以 reqwest 调用 `{base_url}/chat/completions`。mlx_lm.server 等本地服务除标准字段外
//! 还接受 top_k / min_p / num_ctx，因此请求体由本模块自行定义，而不是使用固定字段的 SDK 类型。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::{ModelSection, MAX_OUTPUT_TOKENS};
use crate::llm::LlmClient;
use crate::memory::Message;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// 采样参数，随每次请求发送
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub min_p: f32,
    pub num_ctx: u32,
    pub max_tokens: u32,
}

impl SamplingParams {
    pub fn from_config(model: &ModelSection) -> Self {
        Self {
            temperature: model.temperature,
            top_k: model.top_k,
            top_p: model.top_p,
            min_p: model.min_p,
            num_ctx: model.num_ctx,
            max_tokens: MAX_OUTPUT_TOKENS,
        }
    }

    /// 校验取值范围；不合法时返回描述
    pub fn validate(&self) -> Result<(), String> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(format!("temperature must be >= 0, got {}", self.temperature));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(format!("top_p must be in (0, 1], got {}", self.top_p));
        }
        if !(0.0..=1.0).contains(&self.min_p) {
            return Err(format!("min_p must be in [0, 1], got {}", self.min_p));
        }
        if self.num_ctx == 0 {
            return Err("num_ctx must be > 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    top_p: f32,
    top_k: u32,
    min_p: f32,
    num_ctx: u32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// OpenAI 兼容客户端：持有 HTTP Client、端点、模型名与采样参数
pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    sampling: SamplingParams,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("sampling", &self.sampling)
            .finish()
    }
}

impl OpenAiClient {
    /// 构建客户端；采样参数不合法或 HTTP Client 构建失败时返回 Err
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<&str>,
        sampling: SamplingParams,
        timeout: Duration,
    ) -> Result<Self, String> {
        sampling.validate()?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("HTTP client: {}", e))?;
        Ok(Self {
            client,
            endpoint: chat_endpoint(base_url),
            model: model.to_string(),
            api_key: api_key.filter(|k| !k.is_empty()).map(String::from),
            sampling,
            usage: TokenUsage::new(),
        })
    }

    pub fn from_config(model: &ModelSection) -> Result<Self, String> {
        Self::new(
            &model.base_url,
            &model.id,
            model.api_key.as_deref(),
            SamplingParams::from_config(model),
            Duration::from_secs(model.request_timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn sampling(&self) -> &SamplingParams {
        &self.sampling
    }
}

/// `http://host:8080/v1` 或 `http://host:8080/v1/` → `http://host:8080/v1/chat/completions`
fn chat_endpoint(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.sampling.temperature,
            top_p: self.sampling.top_p,
            top_k: self.sampling.top_k,
            min_p: self.sampling.min_p,
            num_ctx: self.sampling.num_ctx,
            max_tokens: self.sampling.max_tokens,
            stream: false,
        };

        let start = Instant::now();
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let text: String = text.chars().take(300).collect();
            return Err(format!("HTTP {}: {}", status, text));
        }

        let response: ChatResponse = resp
            .json()
            .await
            .map_err(|e| format!("Invalid response body: {}", e))?;

        if let Some(usage) = &response.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }
        tracing::debug!(
            model = %self.model,
            latency_ms = start.elapsed().as_millis() as u64,
            "chat completion"
        );

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| "Response contained no choices".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampling() -> SamplingParams {
        SamplingParams::from_config(&ModelSection::default())
    }

    #[test]
    fn test_chat_endpoint_trailing_slash() {
        assert_eq!(
            chat_endpoint("http://127.0.0.1:8080/v1/"),
            "http://127.0.0.1:8080/v1/chat/completions"
        );
        assert_eq!(
            chat_endpoint("http://127.0.0.1:8080/v1"),
            "http://127.0.0.1:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_sampling_defaults_are_valid() {
        let s = sampling();
        assert!(s.validate().is_ok());
        assert_eq!(s.max_tokens, MAX_OUTPUT_TOKENS);
    }

    #[test]
    fn test_sampling_rejects_out_of_range() {
        let mut s = sampling();
        s.top_p = 0.0;
        assert!(s.validate().unwrap_err().contains("top_p"));

        let mut s = sampling();
        s.min_p = 1.5;
        assert!(s.validate().unwrap_err().contains("min_p"));

        let mut s = sampling();
        s.temperature = -0.1;
        assert!(s.validate().unwrap_err().contains("temperature"));

        let mut s = sampling();
        s.num_ctx = 0;
        assert!(s.validate().unwrap_err().contains("num_ctx"));
    }

    #[test]
    fn test_request_body_carries_sampling_fields() {
        let messages = vec![Message::system("sys"), Message::user("hi")];
        let s = sampling();
        let body = ChatRequest {
            model: "m",
            messages: &messages,
            temperature: s.temperature,
            top_p: s.top_p,
            top_k: s.top_k,
            min_p: s.min_p,
            num_ctx: s.num_ctx,
            max_tokens: s.max_tokens,
            stream: false,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["top_k"], 20);
        assert_eq!(v["num_ctx"], 32768);
        assert_eq!(v["max_tokens"], 8192);
        assert_eq!(v["messages"][1]["role"], "user");
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}],
                      "usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#;
        let resp: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("hello"));
        assert_eq!(resp.usage.unwrap().completion_tokens, 1);
    }

    #[test]
    fn test_new_rejects_invalid_sampling() {
        let mut s = sampling();
        s.top_p = 2.0;
        let result = OpenAiClient::new("http://localhost:1/v1", "m", None, s, Duration::from_secs(1));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_complete_connection_refused_is_error() {
        // 端口 1 上不会有服务
        let client = OpenAiClient::new(
            "http://127.0.0.1:1/v1",
            "m",
            None,
            sampling(),
            Duration::from_secs(2),
        )
        .unwrap();
        let result = client.complete(&[Message::user("hi")]).await;
        assert!(result.is_err());
    }
}

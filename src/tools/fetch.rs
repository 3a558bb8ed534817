//! Fetch 工具：域名白名单、超时、结果大小限制
//!
//! GET 请求带超时与 User-Agent；HTML 响应经 html2text 提取可读文本；
//! 超过 max_result_chars 时截断并追加 ...[truncated]。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;

use crate::tools::Tool;

const USER_AGENT: &str = concat!("offline-agents/", env!("CARGO_PKG_VERSION"));

pub struct FetchTool {
    client: Client,
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
}

fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    let head: String = s.chars().take(512).collect::<String>().to_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html") || head.contains("<head")
}

/// 用 HTML 转换器提取正文；转换失败时保留原文
fn to_text(body: &str) -> String {
    if !looks_like_html(body) {
        return body.to_string();
    }
    match html2text::from_read(body.as_bytes(), 120) {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => body.to_string(),
        Err(e) => {
            tracing::debug!(error = %e, "html2text failed, returning raw body");
            body.to_string()
        }
    }
}

impl FetchTool {
    pub fn new(
        allowed_domains: Vec<String>,
        timeout_secs: u64,
        max_result_chars: usize,
    ) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| format!("HTTP client: {}", e))?;
        Ok(Self {
            client,
            allowed_domains: allowed_domains.into_iter().map(|s| s.to_lowercase()).collect(),
            max_result_chars,
        })
    }

    /// 解析 URL 并校验 scheme 与 host；返回的 Url 即实际请求的地址
    fn allowed_url(&self, raw: &str) -> Result<Url, String> {
        let url = Url::parse(raw).map_err(|e| format!("Invalid URL: {}", e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("Unsupported scheme: {}", url.scheme()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| "URL has no host".to_string())?
            .to_lowercase();
        if self.allowed_domains.contains(&host) {
            Ok(url)
        } else {
            Err(format!("Domain not in allowlist: {}", host))
        }
    }

    fn truncate(&self, body: String) -> String {
        if body.chars().count() > self.max_result_chars {
            body.chars().take(self.max_result_chars).collect::<String>() + "\n...[truncated]"
        } else {
            body
        }
    }

    async fn fetch(&self, raw: &str) -> Result<String, String> {
        let url = self.allowed_url(raw)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp.text().await.map_err(|e| format!("Read body: {}", e))?;
        let body = body.trim_start_matches('\u{FEFF}');

        Ok(self.truncate(to_text(body)))
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Fetch a web page as readable text (allowlisted documentation domains only)."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Absolute http(s) URL" }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let url = args.get("url").and_then(|v| v.as_str()).unwrap_or("").trim();
        if url.is_empty() {
            return Err("Missing url".to_string());
        }
        tracing::info!(url = %url, "fetch tool execute");
        self.fetch(url).await
    }
}

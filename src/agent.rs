//! 无头 Agent 会话
//!
//! AgentSession::initialize 按顺序完成：校验采样参数 → 构建 HTTP 推理客户端 → 创建工作目录 →
//! 注册基础工具 → 用工具列表与 tool call schema 组装 system prompt。
//! 之后每次 run 对单条用户输入跑一遍 ReAct，失败不会影响会话本身。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::AppConfig;
use crate::core::{AgentError, RecoveryEngine};
use crate::llm::{LlmClient, OpenAiClient, SamplingParams};
use crate::react::{Planner, ReactEvent, ReactSession};
use crate::tools::{base_tools, tool_call_schema_json, ToolExecutor, ToolRegistry};

/// 可选的 system prompt 覆盖文件（相对当前目录）
const SYSTEM_PROMPT_PATHS: &[&str] = &["config/prompts/system.txt", "../config/prompts/system.txt"];

const DEFAULT_SYSTEM_PROMPT: &str = "You are a capable coding and research assistant running fully offline \
on the user's machine. Solve the task step by step. When you need a tool, reply with exactly one JSON \
object and nothing else. When you have the final answer, reply in plain text without JSON.";

/// REPL 与会话之间的接缝：测试中可替换为桩实现
#[async_trait]
pub trait PromptRunner: Send + Sync {
    async fn run(&self, prompt: &str) -> Result<String, AgentError>;

    /// 运行并推送过程事件；默认不产生事件
    async fn run_observed(
        &self,
        prompt: &str,
        events: &UnboundedSender<ReactEvent>,
    ) -> Result<String, AgentError> {
        let _ = events;
        self.run(prompt).await
    }
}

/// 已初始化的智能体会话：Planner、ToolExecutor、Recovery 与运行限制
pub struct AgentSession {
    planner: Planner,
    executor: ToolExecutor,
    recovery: RecoveryEngine,
    workspace: PathBuf,
    max_steps: usize,
    max_context_turns: usize,
}

impl AgentSession {
    /// 从配置初始化会话；任何一步失败都返回 Err
    pub fn initialize(cfg: &AppConfig) -> Result<Self, AgentError> {
        let sampling = SamplingParams::from_config(&cfg.model);
        sampling.validate().map_err(AgentError::ConfigError)?;

        let llm = OpenAiClient::from_config(&cfg.model).map_err(AgentError::ConfigError)?;
        tracing::info!(
            endpoint = %llm.endpoint(),
            model = %cfg.model.id,
            "inference client ready"
        );

        Self::with_llm(cfg, Arc::new(llm))
    }

    /// 使用给定 LLM 客户端构建会话（测试时传入 MockLlmClient）
    pub fn with_llm(cfg: &AppConfig, llm: Arc<dyn LlmClient>) -> Result<Self, AgentError> {
        let workspace = cfg.workspace_root();
        std::fs::create_dir_all(&workspace).map_err(|e| {
            AgentError::ConfigError(format!(
                "cannot create workspace {}: {}",
                workspace.display(),
                e
            ))
        })?;
        let workspace = workspace.canonicalize().unwrap_or(workspace);

        let tools = base_tools(&cfg.tools, &workspace).map_err(AgentError::ConfigError)?;
        let system_prompt = build_system_prompt(&load_base_prompt(), &tools);
        tracing::debug!(tools = ?tools.tool_names(), workspace = %workspace.display(), "tools registered");

        Ok(Self {
            planner: Planner::new(llm, system_prompt),
            executor: ToolExecutor::new(tools, cfg.tools.tool_timeout_secs),
            recovery: RecoveryEngine::new(),
            workspace,
            max_steps: cfg.agent.max_steps,
            max_context_turns: cfg.agent.max_context_turns,
        })
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.executor.tool_names()
    }

    pub fn system_prompt(&self) -> &str {
        self.planner.system_prompt()
    }

    /// 跑一次 ReAct，可选推送过程事件
    pub async fn run_with_events(
        &self,
        prompt: &str,
        event_tx: Option<&UnboundedSender<ReactEvent>>,
    ) -> Result<String, AgentError> {
        let mut session = ReactSession::new(&self.planner, &self.executor, &self.recovery)
            .with_limits(self.max_steps, self.max_context_turns);
        if let Some(tx) = event_tx {
            session = session.with_event_tx(tx);
        }
        let result = session.run(prompt).await?;
        tracing::info!(steps = result.steps, "agent run finished");
        Ok(result.response)
    }
}

#[async_trait]
impl PromptRunner for AgentSession {
    async fn run(&self, prompt: &str) -> Result<String, AgentError> {
        self.run_with_events(prompt, None).await
    }

    async fn run_observed(
        &self,
        prompt: &str,
        events: &UnboundedSender<ReactEvent>,
    ) -> Result<String, AgentError> {
        self.run_with_events(prompt, Some(events)).await
    }
}

fn load_base_prompt() -> String {
    SYSTEM_PROMPT_PATHS
        .iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
}

/// base prompt + 工具清单（含参数 schema）+ tool call 格式
fn build_system_prompt(base: &str, tools: &ToolRegistry) -> String {
    format!(
        "{base}\n\n## Available tools\n{}\n\n## Tool call format\nA tool call must match this JSON schema:\n{}\n\
Example: {{\"tool\": \"ls\", \"args\": {{\"path\": \".\"}}}}",
        tools.to_schema_json(),
        tool_call_schema_json()
    )
}

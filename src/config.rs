//! 应用配置：默认值 → config/default.toml → --config 文件 → 环境变量
//!
//! 加载顺序（后者覆盖前者）：
//! 1. 内置默认值
//! 2. config/default.toml（存在时）
//! 3. 显式传入的配置文件
//! 4. 环境变量 `OFFLINE__*`（双下划线表示嵌套，如 `OFFLINE__SERVER__WAIT_SECS=10`）
//! 5. 兼容的扁平变量：`SMOL_MODEL_ID`、`SMOL_TEMPERATURE`、`SMOL_TOP_K`、`SMOL_TOP_P`、
//!    `SMOL_MIN_P`、`SMOL_NUM_CTX`、`MLX_EXTRA_ARGS`
//!
//! 环境变量只在这里读取一次；各组件只接收 `&AppConfig`。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// 单次生成的最大输出 token 数（固定，不可配置）
pub const MAX_OUTPUT_TOKENS: u32 = 8192;

pub const DEFAULT_MODEL_ID: &str = "mlx-community/Qwen3-Coder-30B-A3B-Instruct-4bit-dwq-v2";

/// 扁平环境变量 → 嵌套配置键
const FLAT_ENV_KEYS: &[(&str, &str)] = &[
    ("SMOL_MODEL_ID", "model.id"),
    ("SMOL_TEMPERATURE", "model.temperature"),
    ("SMOL_TOP_K", "model.top_k"),
    ("SMOL_TOP_P", "model.top_p"),
    ("SMOL_MIN_P", "model.min_p"),
    ("SMOL_NUM_CTX", "model.num_ctx"),
    ("MLX_EXTRA_ARGS", "server.extra_args"),
];

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelSection,
    pub server: ServerSection,
    pub tools: ToolsSection,
    pub agent: AgentSection,
}

/// [model] 段：模型标识、推理端点与采样参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    pub id: String,
    /// OpenAI 兼容端点（mlx_lm.server 默认监听 127.0.0.1:8080）
    pub base_url: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub min_p: f32,
    /// 上下文窗口大小
    pub num_ctx: u32,
    /// 单次 HTTP 请求超时（秒）；本地大模型生成较慢，默认给足
    pub request_timeout_secs: u64,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            id: DEFAULT_MODEL_ID.to_string(),
            base_url: "http://127.0.0.1:8080/v1".to_string(),
            api_key: None,
            temperature: 0.7,
            top_k: 20,
            top_p: 0.8,
            min_p: 0.05,
            num_ctx: 32768,
            request_timeout_secs: 600,
        }
    }
}

/// [server] 段：模型服务子进程
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// 是否在启动时自动拉起服务进程
    pub autostart: bool,
    pub binary: String,
    /// 追加到启动命令末尾的参数（按 shell 规则切分）
    pub extra_args: String,
    /// 等待就绪标记的最长时间（秒）
    pub wait_secs: u64,
    /// 无输出时的轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// SIGTERM 后等待退出的时间（秒），超时则强制 kill
    pub stop_grace_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            autostart: true,
            binary: "mlx_lm.server".to_string(),
            extra_args: String::new(),
            wait_secs: 5,
            poll_interval_ms: 100,
            stop_grace_secs: 3,
        }
    }
}

/// [tools] 段：工作目录、工具超时、Shell 白名单、Fetch 域名
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 沙箱根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub shell: ShellSection,
    pub fetch: FetchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            workspace_root: None,
            tool_timeout_secs: 30,
            shell: ShellSection::default(),
            fetch: FetchSection::default(),
        }
    }
}

/// [tools.shell] 段：允许直接执行的程序名（argv[0]）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub allowed_commands: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: ["ls", "grep", "cat", "head", "tail", "wc", "find"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// [tools.fetch] 段：抓取超时、最大字符数、允许的域名
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub timeout_secs: u64,
    pub max_result_chars: usize,
    pub allowed_domains: Vec<String>,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_result_chars: 8000,
            allowed_domains: [
                "en.wikipedia.org",
                "github.com",
                "raw.githubusercontent.com",
                "gist.github.com",
                "stackoverflow.com",
                "docs.rs",
                "crates.io",
                "doc.rust-lang.org",
                "docs.python.org",
                "pypi.org",
                "developer.mozilla.org",
                "arxiv.org",
                "news.ycombinator.com",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// [agent] 段：ReAct 步数上限与对话保留轮数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_steps: usize,
    pub max_context_turns: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: 20,
            max_context_turns: 20,
        }
    }
}

impl AppConfig {
    /// 工作目录：配置 > 当前目录下的 workspace
    pub fn workspace_root(&self) -> PathBuf {
        self.tools.workspace_root.clone().unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("workspace")
        })
    }
}

/// 从磁盘与进程环境变量加载配置
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, config::ConfigError> {
    let env: HashMap<String, String> = std::env::vars().collect();
    load_config_with_env(config_path, &env)
}

/// 与 load_config 相同，但环境变量来自调用方给定的表（测试时不必修改进程环境）
pub fn load_config_with_env(
    config_path: Option<&Path>,
    env: &HashMap<String, String>,
) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
    }

    let nested: HashMap<String, String> = env
        .iter()
        .filter(|(k, _)| k.starts_with("OFFLINE__"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    builder = builder.add_source(
        config::Environment::with_prefix("OFFLINE")
            .separator("__")
            .try_parsing(true)
            .source(Some(nested)),
    );

    for (var, key) in FLAT_ENV_KEYS {
        builder = builder.set_override_option(*key, env.get(*var).cloned())?;
    }

    builder.build()?.try_deserialize()
}

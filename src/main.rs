//! offline-agents：本地模型服务 + 编码智能体 REPL
//!
//! 入口：解析命令行、初始化日志、加载配置，托管模型服务子进程并运行 REPL。

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use offline_agents::{
    agent::AgentSession,
    app::run_app,
    config::{load_config, AppConfig},
    server::ServerSupervisor,
    ui::{color_enabled, EditorInput, Renderer},
};

#[derive(Debug, Parser)]
#[command(name = "offline-agents", version, about = "Local model server + coding agent REPL")]
struct Cli {
    /// 额外的 TOML 配置文件
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// 覆盖模型 ID
    #[arg(long, value_name = "ID")]
    model: Option<String>,

    /// 不启动本地模型服务（使用已有端点）
    #[arg(long)]
    no_server: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // 日志：默认 warn，可通过 RUST_LOG 覆盖；写 stderr，不与 REPL 输出交错
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut cfg = load_config(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    if let Some(model) = cli.model {
        cfg.model.id = model;
    }
    if cli.no_server {
        cfg.server.autostart = false;
    }

    let supervisor = ServerSupervisor::new(&cfg);
    let mut input = EditorInput::new().context("Failed to initialize line editor")?;
    let mut renderer = Renderer::new(std::io::stdout(), color_enabled());

    let code = run_app(&cfg, &supervisor, AgentSession::initialize, &mut input, &mut renderer).await;
    Ok(ExitCode::from(code))
}

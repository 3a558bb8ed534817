//! offline-agents：离线编码智能体
//!
//! 模块划分：
//! - **agent**: 智能体会话（初始化 + 单次 ReAct 运行）
//! - **app**: 应用流程编排（服务 → 会话 → REPL → 关停）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与恢复策略
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 单次运行的对话记录
//! - **react**: Planner 与 ReAct 主循环
//! - **server**: 本地模型服务子进程监管
//! - **tools**: 工具箱（cat、ls、write_file、shell、fetch）与执行器
//! - **ui**: 行输入、终端渲染与 REPL

pub mod agent;
pub mod app;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod react;
pub mod server;
pub mod tools;
pub mod ui;

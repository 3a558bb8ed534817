//! 工具箱：注册表、执行器与基础工具（cat / ls / write_file / shell / fetch）

pub mod executor;
pub mod fetch;
pub mod filesystem;
pub mod registry;
pub mod schema;
pub mod shell;

pub use executor::ToolExecutor;
pub use fetch::FetchTool;
pub use filesystem::{CatTool, LsTool, SafeFs, WriteFileTool};
pub use registry::{Tool, ToolRegistry};
pub use schema::tool_call_schema_json;
pub use shell::ShellTool;

use crate::config::ToolsSection;

/// 基础工具集：智能体默认具备的能力，不含额外工具
pub fn base_tools(cfg: &ToolsSection, workspace: &std::path::Path) -> Result<ToolRegistry, String> {
    let fs = SafeFs::new(workspace);
    let mut tools = ToolRegistry::new();
    tools.register(CatTool::new(fs.clone()));
    tools.register(LsTool::new(fs.clone()));
    tools.register(WriteFileTool::new(fs.clone()));
    tools.register(ShellTool::new(
        cfg.shell.allowed_commands.clone(),
        cfg.tool_timeout_secs,
        fs.root(),
    ));
    tools.register(FetchTool::new(
        cfg.fetch.allowed_domains.clone(),
        cfg.fetch.timeout_secs,
        cfg.fetch.max_result_chars,
    )?);
    Ok(tools)
}

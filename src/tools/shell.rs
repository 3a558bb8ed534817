//! Shell 工具：白名单命令，禁止危险操作
//!
//! 命令按 shell 词法切分后直接 exec（不经过 sh），argv[0] 必须在白名单中；
//! 管道、重定向、命令串联等操作符一律拒绝。带超时与 tracing 审计。

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::tools::Tool;

/// 禁止的命令/子串（即使白名单中有同名，也不允许带这些参数）
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "rm -r",
    "wget ",
    "curl | sh",
    "chmod 777",
    "chmod +s",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    ":(){ :|:& };:",
    "-exec",
    "-delete",
];

/// 不经过 shell 时无意义的操作符；出现即说明模型想串联命令
const SHELL_OPERATORS: &[&str] = &[";", "&", "&&", "||", "|", ">", ">>", "<", "<<", "2>", "2>&1", "&>"];

/// 单次输出保留的最大字符数
const MAX_OUTPUT_CHARS: usize = 8000;

pub struct ShellTool {
    allowed_commands: HashSet<String>,
    timeout_secs: u64,
    working_dir: PathBuf,
}

impl ShellTool {
    pub fn new(allowed_commands: Vec<String>, timeout_secs: u64, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            allowed_commands: allowed_commands.into_iter().collect(),
            timeout_secs,
            working_dir: working_dir.into(),
        }
    }

    /// 校验并切分命令，返回 argv
    fn parse_command(&self, raw: &str) -> Result<Vec<String>, String> {
        let raw_lower = raw.to_lowercase();
        for forbidden in FORBIDDEN_SUBSTR {
            if raw_lower.contains(forbidden) {
                return Err(format!("Forbidden pattern: {}", forbidden));
            }
        }
        let argv = shlex::split(raw).ok_or_else(|| "Unbalanced quotes in command".to_string())?;
        let Some(program) = argv.first() else {
            return Err("Empty command".to_string());
        };
        if let Some(op) = argv
            .iter()
            .find(|t| SHELL_OPERATORS.contains(&t.as_str()) || t.contains('`') || t.contains("$("))
        {
            return Err(format!(
                "Shell operator '{}' not supported: run one command per call",
                op
            ));
        }
        if self.allowed_commands.contains(program) {
            Ok(argv)
        } else {
            Err(format!("Command '{}' not in allowlist", program))
        }
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() > MAX_OUTPUT_CHARS {
        s.chars().take(MAX_OUTPUT_CHARS).collect::<String>() + "\n...[truncated]"
    } else {
        s.to_string()
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run one allowlisted command in the workspace (e.g. ls -la, grep -rn foo .). No pipes, redirects or chaining."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command line to run (program must be allowlisted)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        let argv = self.parse_command(command)?;

        tracing::info!(command = %command, "shell tool execute");

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(&self.working_dir)
            .kill_on_drop(true);

        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output())
            .await
            .map_err(|_| format!("Command timed out after {}s", self.timeout_secs))?
            .map_err(|e| format!("Execution failed: {}", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(format!(
                "Exit {:?}\nstdout: {}\nstderr: {}",
                output.status.code(),
                truncate(stdout.trim()),
                truncate(stderr.trim())
            ));
        }
        Ok(if stderr.trim().is_empty() {
            truncate(&stdout)
        } else {
            truncate(&format!("{}\nstderr: {}", stdout.trim(), stderr.trim()))
        })
    }
}

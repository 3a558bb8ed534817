//! 终端渲染：crossterm 着色，非 TTY 或设置 NO_COLOR 时输出纯文本
//!
//! 写入任意 `Write`，测试时写入 Vec<u8> 后断言。写终端失败直接忽略。

use std::fmt::Display;
use std::io::{self, Write};

use crossterm::style::Stylize;
use crossterm::tty::IsTty;

use crate::react::ReactEvent;

const RULE_WIDTH: usize = 60;

/// stdout 是终端且未设置 NO_COLOR 时启用颜色
pub fn color_enabled() -> bool {
    let no_color = std::env::var_os("NO_COLOR").map(|v| !v.is_empty()).unwrap_or(false);
    !no_color && io::stdout().is_tty()
}

#[derive(Debug, Clone, Copy)]
enum Tone {
    Heading,
    Dim,
    Prompt,
    Info,
    Success,
    Warn,
    Error,
}

pub struct Renderer<W: Write> {
    out: W,
    color: bool,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn paint(&self, text: &str, tone: Tone) -> String {
        if !self.color {
            return text.to_string();
        }
        match tone {
            Tone::Heading => text.bold().blue().to_string(),
            Tone::Dim => text.dim().to_string(),
            Tone::Prompt => text.cyan().to_string(),
            Tone::Info => text.blue().to_string(),
            Tone::Success => text.green().to_string(),
            Tone::Warn => text.yellow().to_string(),
            Tone::Error => text.red().to_string(),
        }
    }

    fn line(&mut self, text: impl Display) {
        let _ = writeln!(self.out, "{}", text);
        let _ = self.out.flush();
    }

    fn toned(&mut self, text: &str, tone: Tone) {
        let painted = self.paint(text, tone);
        self.line(painted);
    }

    /// 提示符 `> `
    pub fn prompt(&self) -> String {
        self.paint("> ", Tone::Prompt)
    }

    pub fn banner(&mut self, title: &str, model_id: &str) {
        let title = format!(" {} ", title);
        let side = RULE_WIDTH.saturating_sub(title.chars().count()) / 2;
        let rule = format!("{}{}{}", "─".repeat(side), title, "─".repeat(side));
        self.toned(&rule, Tone::Heading);
        let model = if self.color {
            format!("{} {}", "Model:".bold(), model_id)
        } else {
            format!("Model: {}", model_id)
        };
        self.line(model);
    }

    pub fn info(&mut self, text: &str) {
        self.toned(text, Tone::Info);
    }

    pub fn success(&mut self, text: &str) {
        self.toned(text, Tone::Success);
    }

    pub fn warn(&mut self, text: &str) {
        self.toned(text, Tone::Warn);
    }

    pub fn error(&mut self, text: &str) {
        self.toned(text, Tone::Error);
    }

    pub fn heading(&mut self, text: &str) {
        let painted = if self.color {
            text.bold().to_string()
        } else {
            text.to_string()
        };
        self.line(painted);
    }

    /// 服务子进程输出（暗色）
    pub fn server_line(&mut self, text: &str) {
        self.toned(text.trim_end(), Tone::Dim);
    }

    /// 带标签的围栏块
    pub fn agent_output(&mut self, text: &str) {
        let label = if self.color {
            "Agent output:".bold().to_string()
        } else {
            "Agent output:".to_string()
        };
        self.line(label);
        self.line("");
        self.line("```");
        self.line(text.trim_end());
        self.line("```");
    }

    pub fn agent_failure(&mut self, err: &dyn Display) {
        self.error(&format!("Agent run failed: {}", err));
    }

    /// ReAct 过程事件（暗色状态行）
    pub fn event(&mut self, ev: &ReactEvent) {
        let text = match ev {
            ReactEvent::StepUpdate { step, max_steps } => format!("  · step {}/{}", step, max_steps),
            ReactEvent::ToolCall { tool, args } => format!("  → {} {}", tool, args),
            ReactEvent::Observation { tool, preview } => {
                let first = preview.lines().next().unwrap_or("");
                format!("  ← {}: {}", tool, first)
            }
            ReactEvent::ToolFailure { tool, reason } => format!("  ✗ {}: {}", tool, reason),
            ReactEvent::Recovery { action, detail } => format!("  ↻ {}: {}", action, detail),
            ReactEvent::TokenUsage {
                prompt_tokens,
                completion_tokens,
            } => format!(
                "  tokens: {} prompt / {} completion",
                prompt_tokens, completion_tokens
            ),
        };
        self.toned(&text, Tone::Dim);
    }
}

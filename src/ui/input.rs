//! 行输入源：rustyline 编辑器（带会话内历史），测试中用脚本替代

use std::collections::VecDeque;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// 一次读取的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Line(String),
    /// 提示符处按下 Ctrl-C
    Interrupted,
    Eof,
}

pub trait LineSource {
    fn read_line(&mut self, prompt: &str) -> InputEvent;
}

/// 终端输入
pub struct EditorInput {
    editor: DefaultEditor,
}

impl EditorInput {
    pub fn new() -> Result<Self, ReadlineError> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl LineSource for EditorInput {
    fn read_line(&mut self, prompt: &str) -> InputEvent {
        match self.editor.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = self.editor.add_history_entry(line.as_str());
                }
                InputEvent::Line(line)
            }
            Err(ReadlineError::Interrupted) => InputEvent::Interrupted,
            Err(ReadlineError::Eof) => InputEvent::Eof,
            Err(e) => {
                tracing::warn!(error = %e, "readline failed, treating as end of input");
                InputEvent::Eof
            }
        }
    }
}

/// 预置输入序列；读完后返回 Eof
#[derive(Debug, Default)]
pub struct ScriptedInput {
    events: VecDeque<InputEvent>,
    prompts_shown: usize,
}

impl ScriptedInput {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_events(lines.into_iter().map(|l| InputEvent::Line(l.into())))
    }

    pub fn from_events(events: impl IntoIterator<Item = InputEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
            prompts_shown: 0,
        }
    }

    /// 已显示的提示符次数
    pub fn prompts_shown(&self) -> usize {
        self.prompts_shown
    }
}

impl LineSource for ScriptedInput {
    fn read_line(&mut self, _prompt: &str) -> InputEvent {
        self.prompts_shown += 1;
        self.events.pop_front().unwrap_or(InputEvent::Eof)
    }
}

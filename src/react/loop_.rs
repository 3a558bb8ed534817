//! ReAct 主循环
//!
//! Plan -> Act (Tool) -> Observe -> 下一轮 Plan，直到模型给出纯文本答案；
//! 支持 RetryWithPrompt、最大步数限制；可选 event_tx 向 REPL 推送过程事件。

use tokio::sync::mpsc::UnboundedSender;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::memory::{ConversationMemory, Message};
use crate::react::{parse_llm_output, Planner, PlannerOutput, ReactEvent};
use crate::tools::ToolExecutor;

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// ReAct 循环执行结果：最终回复与实际步数
#[derive(Debug)]
pub struct ReactResult {
    pub response: String,
    pub steps: usize,
}

/// 单次 run 的依赖与限制
pub struct ReactSession<'a> {
    pub planner: &'a Planner,
    pub executor: &'a ToolExecutor,
    pub recovery: &'a RecoveryEngine,
    pub max_steps: usize,
    pub max_context_turns: usize,
    pub event_tx: Option<&'a UnboundedSender<ReactEvent>>,
}

impl<'a> ReactSession<'a> {
    pub fn new(planner: &'a Planner, executor: &'a ToolExecutor, recovery: &'a RecoveryEngine) -> Self {
        Self {
            planner,
            executor,
            recovery,
            max_steps: 20,
            max_context_turns: 20,
            event_tx: None,
        }
    }

    pub fn with_limits(mut self, max_steps: usize, max_context_turns: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self.max_context_turns = max_context_turns;
        self
    }

    pub fn with_event_tx(mut self, tx: &'a UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn send(&self, ev: ReactEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }

    fn send_usage(&self, init: (u64, u64, u64)) {
        let (prompt, completion, _) = self.planner.token_usage();
        let (prompt, completion) = (prompt.saturating_sub(init.0), completion.saturating_sub(init.1));
        if prompt > 0 || completion > 0 {
            self.send(ReactEvent::TokenUsage {
                prompt_tokens: prompt,
                completion_tokens: completion,
            });
        }
    }

    /// 用户输入 -> plan -> 解析输出 -> 若 ToolCall 则执行并写回 Observation -> 若 Response 则返回
    ///
    /// 每次 run 使用全新的对话记录。
    pub async fn run(&self, user_input: &str) -> Result<ReactResult, AgentError> {
        let mut memory = ConversationMemory::new(self.max_context_turns);
        memory.push(Message::user(user_input));

        let init_usage = self.planner.token_usage();
        let mut last_output = String::new();

        for step in 1..=self.max_steps {
            self.send(ReactEvent::StepUpdate {
                step,
                max_steps: self.max_steps,
            });

            let output = self.planner.plan(memory.messages()).await?;
            last_output = output.clone();

            match parse_llm_output(&output) {
                Ok(PlannerOutput::Response(resp)) => {
                    self.send_usage(init_usage);
                    return Ok(ReactResult { response: resp, steps: step });
                }
                Ok(PlannerOutput::ToolCall(tc)) => {
                    if !self.executor.has_tool(&tc.tool) {
                        return Err(AgentError::HallucinatedTool(tc.tool));
                    }
                    self.send(ReactEvent::ToolCall {
                        tool: tc.tool.clone(),
                        args: tc.args.clone(),
                    });
                    let observation = match self.executor.execute(&tc.tool, tc.args).await {
                        Ok(r) => r,
                        Err(e) => {
                            self.send(ReactEvent::ToolFailure {
                                tool: tc.tool.clone(),
                                reason: e.to_string(),
                            });
                            format!("Error: {}", e)
                        }
                    };
                    self.send(ReactEvent::Observation {
                        tool: tc.tool.clone(),
                        preview: preview(&observation),
                    });
                    memory.push(Message::assistant(output));
                    memory.push(Message::user(format!(
                        "Observation from {}:\n{}",
                        tc.tool, observation
                    )));
                }
                Err(e) => match self.recovery.handle(&e) {
                    RecoveryAction::RetryWithPrompt(prompt) => {
                        self.send(ReactEvent::Recovery {
                            action: "RetryWithPrompt".to_string(),
                            detail: e.to_string(),
                        });
                        memory.push(Message::assistant(output));
                        memory.push(Message::user(prompt));
                    }
                    RecoveryAction::Abort => return Err(e),
                },
            }
        }

        self.send_usage(init_usage);
        Ok(ReactResult {
            response: format!(
                "Reached the step limit ({}). Last model output:\n{}",
                self.max_steps, last_output
            ),
            steps: self.max_steps,
        })
    }
}

fn preview(s: &str) -> String {
    if s.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!("{}...", s.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>())
    } else {
        s.to_string()
    }
}

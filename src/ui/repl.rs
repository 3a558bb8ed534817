//! REPL 状态机：AwaitingInput → Running → AwaitingInput … → ShuttingDown
//!
//! 空行重新提示；exit / quit（大小写不敏感）、提示符处 Ctrl-C 或 EOF 进入 ShuttingDown；
//! 其余输入原样交给 PromptRunner。运行中按 Ctrl-C 只取消本次运行。单次运行不设超时。
//!
//! SIGINT 由整个 REPL 共用的一个监听任务转成中断事件：运行中用于取消，
//! 读取输入期间到达的中断（非终端 stdin 时 rustyline 收不到 Ctrl-C）在读取返回后按退出处理。

use std::io::Write;

use tokio::sync::mpsc;

use crate::agent::PromptRunner;
use crate::core::AgentError;
use crate::ui::input::{InputEvent, LineSource};
use crate::ui::render::Renderer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplState {
    AwaitingInput,
    Running(String),
    ShuttingDown,
}

/// 单行输入的分类
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    Empty,
    Exit,
    Prompt(String),
}

/// 只在判断空行与退出词时去掉首尾空白，提示词本身原样转发
pub fn classify(line: &str) -> InputAction {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        InputAction::Empty
    } else if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("quit") {
        InputAction::Exit
    } else {
        InputAction::Prompt(line.to_string())
    }
}

/// 监听进程级 Ctrl-C，每次信号发送一个中断事件
pub fn spawn_interrupt_listener() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).is_err() {
                break;
            }
        }
    });
    rx
}

/// 清空积压的中断，返回是否有过中断
fn drain_interrupts(interrupts: &mut mpsc::UnboundedReceiver<()>) -> bool {
    let mut seen = false;
    while interrupts.try_recv().is_ok() {
        seen = true;
    }
    seen
}

/// 本次 REPL 的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplSummary {
    pub runs: usize,
    pub failures: usize,
}

/// 跑到 ShuttingDown 为止；打印 "Shutting down..." 后返回，由调用方停止服务
pub async fn run_repl<W: Write>(
    runner: &dyn PromptRunner,
    input: &mut dyn LineSource,
    renderer: &mut Renderer<W>,
) -> ReplSummary {
    let mut interrupts = spawn_interrupt_listener();
    run_repl_with_interrupts(runner, input, renderer, &mut interrupts).await
}

/// 同 run_repl，中断事件来源由调用方提供
pub async fn run_repl_with_interrupts<W: Write>(
    runner: &dyn PromptRunner,
    input: &mut dyn LineSource,
    renderer: &mut Renderer<W>,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
) -> ReplSummary {
    let mut summary = ReplSummary::default();
    let mut state = ReplState::AwaitingInput;

    loop {
        state = match state {
            ReplState::AwaitingInput => {
                // 上一次运行遗留的多余 Ctrl-C 不算作退出
                drain_interrupts(interrupts);
                let event = input.read_line(&renderer.prompt());
                if drain_interrupts(interrupts) {
                    ReplState::ShuttingDown
                } else {
                    match event {
                        InputEvent::Line(line) => match classify(&line) {
                            InputAction::Empty => ReplState::AwaitingInput,
                            InputAction::Exit => ReplState::ShuttingDown,
                            InputAction::Prompt(p) => ReplState::Running(p),
                        },
                        InputEvent::Interrupted | InputEvent::Eof => ReplState::ShuttingDown,
                    }
                }
            }
            ReplState::Running(prompt) => {
                renderer.info("Running agent...");
                summary.runs += 1;
                match run_one(runner, &prompt, renderer, interrupts).await {
                    Ok(out) => renderer.agent_output(&out),
                    Err(e) => {
                        summary.failures += 1;
                        tracing::warn!(error = %e, "agent run failed");
                        renderer.agent_failure(&e);
                    }
                }
                ReplState::AwaitingInput
            }
            ReplState::ShuttingDown => {
                renderer.warn("Shutting down...");
                return summary;
            }
        };
    }
}

/// 运行一次，期间渲染过程事件；中断取消为 AgentError::Cancelled
async fn run_one<W: Write>(
    runner: &dyn PromptRunner,
    prompt: &str,
    renderer: &mut Renderer<W>,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
) -> Result<String, AgentError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = {
        let run = runner.run_observed(prompt, &tx);
        tokio::pin!(run);
        loop {
            tokio::select! {
                r = &mut run => break r,
                Some(ev) = rx.recv() => renderer.event(&ev),
                Some(()) = interrupts.recv() => break Err(AgentError::Cancelled),
            }
        }
    };
    drop(tx);
    while let Ok(ev) = rx.try_recv() {
        renderer.event(&ev);
    }
    result
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::react::ReactEvent;
    use crate::ui::input::ScriptedInput;

    /// 回显桩：以 "fail" 开头的输入返回错误
    #[derive(Default)]
    struct EchoRunner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PromptRunner for EchoRunner {
        async fn run(&self, prompt: &str) -> Result<String, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if prompt.starts_with("fail") {
                Err(AgentError::LlmError("simulated".to_string()))
            } else {
                Ok(format!("echo: {prompt}"))
            }
        }
    }

    struct EventRunner;

    #[async_trait]
    impl PromptRunner for EventRunner {
        async fn run(&self, _prompt: &str) -> Result<String, AgentError> {
            Ok("done".to_string())
        }

        async fn run_observed(
            &self,
            prompt: &str,
            events: &mpsc::UnboundedSender<ReactEvent>,
        ) -> Result<String, AgentError> {
            let _ = events.send(ReactEvent::StepUpdate { step: 1, max_steps: 5 });
            self.run(prompt).await
        }
    }

    /// 收到 "hang" 时自己触发一次中断，然后永不结束
    struct HangRunner {
        interrupt: mpsc::UnboundedSender<()>,
        seen: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PromptRunner for HangRunner {
        async fn run(&self, prompt: &str) -> Result<String, AgentError> {
            self.seen.lock().unwrap().push(prompt.to_string());
            if prompt == "hang" {
                let _ = self.interrupt.send(());
                std::future::pending::<()>().await;
            }
            Ok(format!("echo: {prompt}"))
        }
    }

    /// 读取期间收到中断（模拟非终端 stdin 上的 Ctrl-C），然后照常返回一行
    struct InterruptedRead {
        interrupt: mpsc::UnboundedSender<()>,
        reads: usize,
    }

    impl LineSource for InterruptedRead {
        fn read_line(&mut self, _prompt: &str) -> InputEvent {
            self.reads += 1;
            let _ = self.interrupt.send(());
            InputEvent::Line("hello".to_string())
        }
    }

    async fn drive_with(
        runner: &dyn PromptRunner,
        input: &mut dyn LineSource,
        interrupts: &mut mpsc::UnboundedReceiver<()>,
    ) -> (ReplSummary, String) {
        let mut renderer = Renderer::new(Vec::new(), false);
        let summary = run_repl_with_interrupts(runner, input, &mut renderer, interrupts).await;
        (summary, String::from_utf8(renderer.into_inner()).unwrap())
    }

    async fn drive(runner: &dyn PromptRunner, input: &mut ScriptedInput) -> (ReplSummary, String) {
        let (_tx, mut rx) = mpsc::unbounded_channel();
        drive_with(runner, input, &mut rx).await
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(""), InputAction::Empty);
        assert_eq!(classify("   \t"), InputAction::Empty);
        assert_eq!(classify("EXIT"), InputAction::Exit);
        assert_eq!(classify("  Quit  "), InputAction::Exit);
        assert_eq!(classify("exit now"), InputAction::Prompt("exit now".into()));
        assert_eq!(classify(" hello "), InputAction::Prompt(" hello ".into()));
        assert_eq!(
            classify("    fn main() {}"),
            InputAction::Prompt("    fn main() {}".into())
        );
    }

    #[tokio::test]
    async fn test_prompt_is_forwarded_verbatim() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = HangRunner {
            interrupt: tx,
            seen: Default::default(),
        };
        let mut input = ScriptedInput::new(["  indented\tcode  ", "exit"]);
        let _ = drive_with(&runner, &mut input, &mut rx).await;
        assert_eq!(*runner.seen.lock().unwrap(), vec!["  indented\tcode  ".to_string()]);
    }

    #[tokio::test]
    async fn test_interrupt_cancels_only_the_run() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = HangRunner {
            interrupt: tx,
            seen: Default::default(),
        };
        let mut input = ScriptedInput::new(["hang", "hello", "exit"]);
        let (summary, out) = drive_with(&runner, &mut input, &mut rx).await;
        assert_eq!(summary, ReplSummary { runs: 2, failures: 1 });
        assert!(out.contains("Agent run failed: Cancelled by user"));
        assert!(out.contains("echo: hello"));
        assert_eq!(input.prompts_shown(), 3);
    }

    #[tokio::test]
    async fn test_interrupt_during_read_shuts_down() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = EchoRunner::default();
        let mut input = InterruptedRead { interrupt: tx, reads: 0 };
        let (summary, out) = drive_with(&runner, &mut input, &mut rx).await;
        assert_eq!(summary.runs, 0);
        assert_eq!(input.reads, 1);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
        assert!(out.ends_with("Shutting down...\n"));
    }

    #[tokio::test]
    async fn test_stale_interrupts_are_ignored_at_prompt() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(()).unwrap();
        tx.send(()).unwrap();
        let runner = EchoRunner::default();
        let mut input = ScriptedInput::new(["hello", "exit"]);
        let (summary, _) = drive_with(&runner, &mut input, &mut rx).await;
        assert_eq!(summary, ReplSummary { runs: 1, failures: 0 });
    }

    #[tokio::test]
    async fn test_exit_words_do_not_invoke_agent() {
        for word in ["exit", "EXIT", "Quit", " quit "] {
            let runner = EchoRunner::default();
            let mut input = ScriptedInput::new([word, "never read"]);
            let (summary, out) = drive(&runner, &mut input).await;
            assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
            assert_eq!(summary.runs, 0);
            assert_eq!(input.prompts_shown(), 1);
            assert!(out.ends_with("Shutting down...\n"));
        }
    }

    #[tokio::test]
    async fn test_empty_lines_reprompt() {
        let runner = EchoRunner::default();
        let mut input = ScriptedInput::new(["", "   ", "exit"]);
        let (summary, _) = drive(&runner, &mut input).await;
        assert_eq!(summary.runs, 0);
        assert_eq!(input.prompts_shown(), 3);
    }

    #[tokio::test]
    async fn test_failure_is_contained() {
        let runner = EchoRunner::default();
        let mut input = ScriptedInput::new(["fail please", "hello"]);
        let (summary, out) = drive(&runner, &mut input).await;
        assert_eq!(summary, ReplSummary { runs: 2, failures: 1 });
        assert!(out.contains("Agent run failed: LLM error: simulated"));
        assert!(out.contains("Agent output:\n\n```\necho: hello\n```"));
        // EOF 之后仍执行关停
        assert!(out.ends_with("Shutting down...\n"));
    }

    #[tokio::test]
    async fn test_interrupt_at_prompt_shuts_down() {
        let runner = EchoRunner::default();
        let mut input = ScriptedInput::from_events([InputEvent::Interrupted, InputEvent::Line("hello".into())]);
        let (summary, _) = drive(&runner, &mut input).await;
        assert_eq!(summary.runs, 0);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_events_are_rendered() {
        let mut input = ScriptedInput::new(["go"]);
        let (_, out) = drive(&EventRunner, &mut input).await;
        assert!(out.contains("step 1/5"));
        assert!(out.contains("done"));
    }
}

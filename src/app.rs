//! 应用流程：横幅 → 启动模型服务 → 初始化会话 → REPL → 关停
//!
//! 服务句柄无论会话初始化是否失败都只 stop 一次。

use std::io::Write;

use crate::agent::PromptRunner;
use crate::config::AppConfig;
use crate::core::AgentError;
use crate::server::{build_launch_command, LaunchReport, ServerControl};
use crate::ui::{run_repl, LineSource, Renderer};

pub const APP_TITLE: &str = "offline-agents REPL";

pub const EXIT_OK: u8 = 0;
/// 会话初始化失败
pub const EXIT_INIT_FAILED: u8 = 1;

/// 编排一次完整运行，返回进程退出码
pub async fn run_app<R, F, W>(
    cfg: &AppConfig,
    server: &dyn ServerControl,
    init: F,
    input: &mut dyn LineSource,
    renderer: &mut Renderer<W>,
) -> u8
where
    R: PromptRunner,
    F: FnOnce(&AppConfig) -> Result<R, AgentError>,
    W: Write + Send,
{
    renderer.banner(APP_TITLE, &cfg.model.id);

    if cfg.server.autostart {
        let command = build_launch_command(&cfg.server.binary, &cfg.model.id, &cfg.server.extra_args)
            .map(|argv| argv.join(" "))
            .unwrap_or_else(|_| cfg.server.binary.clone());
        renderer.warn(&format!("Starting model server: {}", command));
        renderer.success("Waiting for server to become ready...");
    }
    let handle = server.start(&mut |line: &str| renderer.server_line(line)).await;
    match handle.report() {
        LaunchReport::BinaryNotFound(bin) => {
            renderer.error(&format!("{} not found in PATH. Skipping auto-start.", bin))
        }
        LaunchReport::SpawnFailed(e) => renderer.error(&format!("Failed to start model server: {}", e)),
        LaunchReport::TimedOut => {
            renderer.warn("No readiness signal before timeout; continuing while the server loads.")
        }
        LaunchReport::OutputClosed => renderer.warn("Model server output closed; it may have exited."),
        LaunchReport::Ready | LaunchReport::Skipped => {}
    }
    if !handle.is_running() {
        renderer.warn("Proceeding without local server — ensure another model endpoint is available.");
    }

    renderer.success("Initializing model and agent...");
    let session = match init(cfg) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "session initialization failed");
            renderer.error(&format!("Failed to initialize model/agent: {}", e));
            server.stop(handle).await;
            return EXIT_INIT_FAILED;
        }
    };

    renderer.heading("Ready. Type prompts (or 'exit' to quit).");
    let summary = run_repl(&session, input, renderer).await;
    tracing::info!(runs = summary.runs, failures = summary.failures, "repl finished");

    server.stop(handle).await;
    renderer.success("Goodbye!");
    EXIT_OK
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::server::ServerHandle;
    use crate::ui::ScriptedInput;

    #[derive(Default)]
    struct CountingServer {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl ServerControl for CountingServer {
        async fn start(&self, on_line: &mut (dyn for<'a> FnMut(&'a str) + Send)) -> ServerHandle {
            self.starts.fetch_add(1, Ordering::SeqCst);
            on_line("stub server listening");
            ServerHandle::empty(LaunchReport::Skipped)
        }

        async fn stop(&self, _handle: ServerHandle) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Upper;

    #[async_trait]
    impl PromptRunner for Upper {
        async fn run(&self, prompt: &str) -> Result<String, AgentError> {
            Ok(prompt.to_uppercase())
        }
    }

    fn config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.server.autostart = false;
        cfg.model.id = "org/tiny".to_string();
        cfg
    }

    #[tokio::test]
    async fn test_normal_session_exits_zero_and_stops_once() {
        let server = CountingServer::default();
        let mut input = ScriptedInput::new(["hi", "exit"]);
        let mut renderer = Renderer::new(Vec::new(), false);

        let code = run_app(&config(), &server, |_| Ok(Upper), &mut input, &mut renderer).await;
        assert_eq!(code, EXIT_OK);
        assert_eq!(server.starts.load(Ordering::SeqCst), 1);
        assert_eq!(server.stops.load(Ordering::SeqCst), 1);

        let out = String::from_utf8(renderer.into_inner()).unwrap();
        assert!(out.contains("Model: org/tiny"));
        assert!(out.contains("stub server listening"));
        assert!(out.contains("Proceeding without local server"));
        assert!(out.contains("```\nHI\n```"));
        let shutting = out.find("Shutting down...").unwrap();
        let goodbye = out.find("Goodbye!").unwrap();
        assert!(shutting < goodbye);
    }

    #[tokio::test]
    async fn test_init_failure_exits_one_and_stops_once() {
        let server = CountingServer::default();
        let mut input = ScriptedInput::new(["hi"]);
        let mut renderer = Renderer::new(Vec::new(), false);

        let code = run_app(
            &config(),
            &server,
            |_| Err::<Upper, _>(AgentError::ConfigError("bad top_p".into())),
            &mut input,
            &mut renderer,
        )
        .await;
        assert_eq!(code, EXIT_INIT_FAILED);
        assert_eq!(server.stops.load(Ordering::SeqCst), 1);
        assert_eq!(input.prompts_shown(), 0);

        let out = String::from_utf8(renderer.into_inner()).unwrap();
        assert!(out.contains("Failed to initialize model/agent: Config error: bad top_p"));
        assert!(!out.contains("Goodbye!"));
    }
}

//! 模型服务监管
//!
//! start 拼出 `<binary> --model <quoted id> <extra args>`，按 shell 规则切词后启动子进程，
//! stdout / stderr 合并到同一行通道，在就绪窗口内逐行回显；窗口结束后后台任务继续把输出写入 tracing，
//! 避免子进程因管道写满而阻塞。stop 先 SIGTERM，宽限期后强制 kill。
//! start / stop 都不向外抛错：失败写入 LaunchReport 或日志。

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::AppConfig;
use crate::server::readiness::{wait_for_ready, KeywordProbe, ReadinessProbe, WaitOutcome};

/// 监管内部错误；只用于日志与 LaunchReport，不会传出 start / stop
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server binary not found: {0}")]
    BinaryNotFound(String),

    #[error("failed to spawn server: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("invalid launch command: {0}")]
    InvalidCommand(String),

    #[error("failed to signal server: {0}")]
    Signal(String),

    #[error("failed to wait for server: {0}")]
    Wait(#[source] std::io::Error),
}

/// 启动结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchReport {
    /// autostart 关闭
    Skipped,
    BinaryNotFound(String),
    SpawnFailed(String),
    Ready,
    /// 窗口内未见就绪标记，服务可能仍在加载
    TimedOut,
    /// 窗口内输出关闭，子进程大概率已退出
    OutputClosed,
}

/// 停止结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// 空句柄
    NotRunning,
    AlreadyExited(ExitStatus),
    Terminated(ExitStatus),
    /// 宽限期内未退出，已强制 kill
    Killed(ExitStatus),
}

/// 可能为空的子进程句柄；只能被 stop 消费一次
#[derive(Debug)]
pub struct ServerHandle {
    child: Option<Child>,
    pid: Option<u32>,
    started_at: Option<Instant>,
    command: Vec<String>,
    report: LaunchReport,
}

impl ServerHandle {
    /// 未运行任何进程的句柄
    pub fn empty(report: LaunchReport) -> Self {
        Self {
            child: None,
            pid: None,
            started_at: None,
            command: Vec::new(),
            report,
        }
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn report(&self) -> &LaunchReport {
        &self.report
    }
}

/// 拼接并切分启动命令；model id 先做 shell 引用，含空格时仍是单个参数
pub fn build_launch_command(binary: &str, model_id: &str, extra_args: &str) -> Result<Vec<String>, ServerError> {
    let quote = |s: &str| {
        shlex::try_quote(s)
            .map(|q| q.into_owned())
            .map_err(|e| ServerError::InvalidCommand(format!("{}: {:?}", e, s)))
    };
    let line = format!("{} --model {} {}", quote(binary)?, quote(model_id)?, extra_args.trim());
    let argv = shlex::split(&line).ok_or_else(|| ServerError::InvalidCommand(line.clone()))?;
    if argv.is_empty() || argv[0].is_empty() {
        return Err(ServerError::InvalidCommand(line));
    }
    Ok(argv)
}

/// 模型服务监管器
pub struct ServerSupervisor {
    autostart: bool,
    binary: String,
    model_id: String,
    extra_args: String,
    wait: Duration,
    poll_interval: Duration,
    stop_grace: Duration,
    probe: Box<dyn ReadinessProbe>,
}

impl ServerSupervisor {
    pub fn new(cfg: &AppConfig) -> Self {
        Self {
            autostart: cfg.server.autostart,
            binary: cfg.server.binary.clone(),
            model_id: cfg.model.id.clone(),
            extra_args: cfg.server.extra_args.clone(),
            wait: Duration::from_secs(cfg.server.wait_secs),
            poll_interval: Duration::from_millis(cfg.server.poll_interval_ms.max(1)),
            stop_grace: Duration::from_secs(cfg.server.stop_grace_secs),
            probe: Box::new(KeywordProbe::default()),
        }
    }

    /// 替换就绪探测（默认 KeywordProbe）
    pub fn with_probe(mut self, probe: impl ReadinessProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    /// 测试用：以毫秒精度覆盖等待窗口与宽限期
    pub fn with_timings(mut self, wait: Duration, poll_interval: Duration, stop_grace: Duration) -> Self {
        self.wait = wait;
        self.poll_interval = poll_interval;
        self.stop_grace = stop_grace;
        self
    }

    /// 启动服务并等待就绪窗口；从不返回错误
    pub async fn start(&self, on_line: &mut (dyn for<'a> FnMut(&'a str) + Send)) -> ServerHandle {
        if !self.autostart {
            tracing::info!("server autostart disabled");
            return ServerHandle::empty(LaunchReport::Skipped);
        }

        let argv = match build_launch_command(&self.binary, &self.model_id, &self.extra_args) {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(error = %e, "cannot build server command");
                return ServerHandle::empty(LaunchReport::SpawnFailed(e.to_string()));
            }
        };
        let command_line = argv.join(" ");

        let mut child = match spawn(&argv) {
            Ok(c) => c,
            Err(ServerError::BinaryNotFound(bin)) => {
                tracing::warn!(binary = %bin, "server binary not found");
                return ServerHandle::empty(LaunchReport::BinaryNotFound(bin));
            }
            Err(e) => {
                tracing::warn!(command = %command_line, error = %e, "server spawn failed");
                return ServerHandle::empty(LaunchReport::SpawnFailed(e.to_string()));
            }
        };
        let pid = child.id();
        let started_at = Instant::now();
        tracing::info!(pid = ?pid, command = %command_line, "server started");

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(out) = child.stdout.take() {
            forward_lines(out, tx.clone());
        }
        if let Some(err) = child.stderr.take() {
            forward_lines(err, tx.clone());
        }
        drop(tx);

        let outcome = wait_for_ready(&mut rx, self.probe.as_ref(), self.wait, self.poll_interval, on_line).await;
        let report = match outcome {
            WaitOutcome::Ready => LaunchReport::Ready,
            WaitOutcome::TimedOut => LaunchReport::TimedOut,
            WaitOutcome::OutputClosed => LaunchReport::OutputClosed,
        };
        tracing::info!(
            pid = ?pid,
            outcome = ?report,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "server readiness wait finished"
        );
        tokio::spawn(drain(rx));

        ServerHandle {
            child: Some(child),
            pid,
            started_at: Some(started_at),
            command: argv,
            report,
        }
    }

    /// 停止服务；错误仅记录日志
    pub async fn stop(&self, handle: ServerHandle) {
        let pid = handle.pid;
        match self.shutdown(handle).await {
            Ok(StopOutcome::NotRunning) => {}
            Ok(outcome) => tracing::info!(pid = ?pid, outcome = ?outcome, "server stopped"),
            Err(e) => tracing::warn!(pid = ?pid, error = %e, "server shutdown error ignored"),
        }
    }

    /// SIGTERM → 等待宽限期 → kill 并回收
    pub async fn shutdown(&self, handle: ServerHandle) -> Result<StopOutcome, ServerError> {
        let Some(mut child) = handle.child else {
            return Ok(StopOutcome::NotRunning);
        };
        if let Some(status) = child.try_wait().map_err(ServerError::Wait)? {
            return Ok(StopOutcome::AlreadyExited(status));
        }

        request_terminate(&mut child)?;
        match tokio::time::timeout(self.stop_grace, child.wait()).await {
            Ok(status) => status.map(StopOutcome::Terminated).map_err(ServerError::Wait),
            Err(_) => {
                tracing::warn!(pid = ?handle.pid, "server ignored SIGTERM, killing");
                child.kill().await.map_err(ServerError::Wait)?;
                let status = child.wait().await.map_err(ServerError::Wait)?;
                Ok(StopOutcome::Killed(status))
            }
        }
    }
}

fn spawn(argv: &[String]) -> Result<Child, ServerError> {
    Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ServerError::BinaryNotFound(argv[0].clone()),
            _ => ServerError::Spawn(e),
        })
}

#[cfg(unix)]
fn request_terminate(child: &mut Child) -> Result<(), ServerError> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid_t = libc::pid_t::try_from(pid)
        .map_err(|_| ServerError::Signal(format!("pid {pid} exceeds pid_t range")))?;
    let result = unsafe { libc::kill(pid_t, libc::SIGTERM) };
    if result != 0 {
        return Err(ServerError::Signal(format!(
            "SIGTERM to {}: {}",
            pid,
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn request_terminate(child: &mut Child) -> Result<(), ServerError> {
    child.start_kill().map_err(|e| ServerError::Signal(e.to_string()))
}

fn forward_lines<R>(reader: R, tx: UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

async fn drain(mut rx: UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        tracing::debug!(line = %line, "server output");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor_for(binary: &str) -> ServerSupervisor {
        let mut cfg = AppConfig::default();
        cfg.server.autostart = true;
        cfg.server.binary = binary.to_string();
        cfg.model.id = "test-model".to_string();
        ServerSupervisor::new(&cfg).with_timings(
            Duration::from_secs(5),
            Duration::from_millis(20),
            Duration::from_millis(500),
        )
    }

    #[cfg(unix)]
    fn script(dir: &std::path::Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_launch_command_keeps_model_id_as_one_arg() {
        let argv = build_launch_command("mlx_lm.server", "my model/v2", "--port 8081 --log-level 'DEBUG'").unwrap();
        assert_eq!(
            argv,
            vec!["mlx_lm.server", "--model", "my model/v2", "--port", "8081", "--log-level", "DEBUG"]
        );
    }

    #[test]
    fn test_launch_command_without_extra_args() {
        let argv = build_launch_command("mlx_lm.server", "org/model-4bit", "").unwrap();
        assert_eq!(argv, vec!["mlx_lm.server", "--model", "org/model-4bit"]);
    }

    #[test]
    fn test_launch_command_unbalanced_quote_is_error() {
        let err = build_launch_command("mlx_lm.server", "m", "--chat-template 'oops").unwrap_err();
        assert!(matches!(err, ServerError::InvalidCommand(_)));
    }

    #[tokio::test]
    async fn test_autostart_disabled_skips() {
        let mut cfg = AppConfig::default();
        cfg.server.autostart = false;
        let sup = ServerSupervisor::new(&cfg);
        let handle = sup.start(&mut |_: &str| {}).await;
        assert_eq!(handle.report(), &LaunchReport::Skipped);
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_missing_binary_gives_empty_handle() {
        let sup = supervisor_for("definitely-not-a-real-binary-7c1e");
        let handle = sup.start(&mut |_: &str| {}).await;
        assert!(!handle.is_running());
        assert!(matches!(handle.report(), LaunchReport::BinaryNotFound(_)));
        assert_eq!(sup.shutdown(handle).await.unwrap(), StopOutcome::NotRunning);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ready_marker_then_graceful_stop() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(dir.path(), "server.sh", "echo \"loading $2\"\necho 'Server started on 8080'\nexec sleep 30");
        let sup = supervisor_for(&bin);

        let mut lines = Vec::new();
        let handle = sup.start(&mut |l: &str| lines.push(l.to_string())).await;
        assert_eq!(handle.report(), &LaunchReport::Ready);
        assert!(handle.pid().is_some());
        assert_eq!(lines, vec!["loading test-model", "Server started on 8080"]);

        let outcome = sup.shutdown(handle).await.unwrap();
        assert!(matches!(outcome, StopOutcome::Terminated(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exited_process_reports_output_closed() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(dir.path(), "crash.sh", "echo 'error: model not found' >&2\nexit 1");
        let sup = supervisor_for(&bin);

        let mut lines = Vec::new();
        let handle = sup.start(&mut |l: &str| lines.push(l.to_string())).await;
        assert_eq!(handle.report(), &LaunchReport::OutputClosed);
        assert_eq!(lines, vec!["error: model not found"]);

        // 进程已退出：stop 不应报错
        let outcome = sup.shutdown(handle).await.unwrap();
        assert!(matches!(
            outcome,
            StopOutcome::AlreadyExited(_) | StopOutcome::Terminated(_)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_times_out_without_marker() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(dir.path(), "quiet.sh", "exec sleep 30");
        let sup = supervisor_for(&bin).with_timings(
            Duration::from_millis(300),
            Duration::from_millis(20),
            Duration::from_millis(500),
        );

        let start = Instant::now();
        let handle = sup.start(&mut |_: &str| {}).await;
        assert_eq!(handle.report(), &LaunchReport::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(3));
        sup.stop(handle).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_ignored_forces_kill() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(
            dir.path(),
            "stubborn.sh",
            "trap '' TERM\necho listening\nwhile true; do sleep 0.05; done",
        );
        let sup = supervisor_for(&bin);

        let handle = sup.start(&mut |_: &str| {}).await;
        assert_eq!(handle.report(), &LaunchReport::Ready);

        let start = Instant::now();
        let outcome = sup.shutdown(handle).await.unwrap();
        assert!(matches!(outcome, StopOutcome::Killed(_)));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_custom_probe() {
        let mut cfg = AppConfig::default();
        cfg.server.autostart = true;
        let sup = ServerSupervisor::new(&cfg).with_probe(|l: &str| l.contains("Uvicorn running"));
        assert!(sup.probe.is_ready("INFO: Uvicorn running on http://127.0.0.1:8080"));
        assert!(!sup.probe.is_ready("Started server process"));
    }
}

//! 就绪探测：逐行扫描子进程输出，命中即视为就绪
//!
//! 这只是启发式判断；超时后照常返回，调用方继续运行。

use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

/// 默认就绪关键词（大小写不敏感的子串匹配）
pub const DEFAULT_READY_MARKERS: &[&str] = &["running", "listening", "started"];

/// 单行输出 → 是否就绪
pub trait ReadinessProbe: Send + Sync {
    fn is_ready(&self, line: &str) -> bool;
}

impl<F> ReadinessProbe for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_ready(&self, line: &str) -> bool {
        self(line)
    }
}

/// 关键词探测
#[derive(Debug, Clone)]
pub struct KeywordProbe {
    markers: Vec<String>,
}

impl KeywordProbe {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.as_ref().to_lowercase())
                .collect(),
        }
    }
}

impl Default for KeywordProbe {
    fn default() -> Self {
        Self::new(DEFAULT_READY_MARKERS)
    }
}

impl ReadinessProbe for KeywordProbe {
    fn is_ready(&self, line: &str) -> bool {
        let line = line.to_lowercase();
        self.markers.iter().any(|m| line.contains(m.as_str()))
    }
}

/// 等待窗口的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    TimedOut,
    /// 输出流关闭（子进程已退出）
    OutputClosed,
}

/// 非阻塞地读取输出行，无数据时睡眠一个轮询间隔；
/// 命中探测、输出关闭或超时即返回，耗时不超过 timeout + poll_interval
pub async fn wait_for_ready(
    rx: &mut UnboundedReceiver<String>,
    probe: &dyn ReadinessProbe,
    timeout: Duration,
    poll_interval: Duration,
    on_line: &mut (dyn for<'a> FnMut(&'a str) + Send),
) -> WaitOutcome {
    let deadline = Instant::now() + timeout;
    loop {
        if Instant::now() >= deadline {
            return WaitOutcome::TimedOut;
        }
        match rx.try_recv() {
            Ok(line) => {
                on_line(&line);
                if probe.is_ready(&line) {
                    return WaitOutcome::Ready;
                }
            }
            Err(TryRecvError::Empty) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                tokio::time::sleep(poll_interval.min(remaining).max(Duration::from_millis(1))).await;
            }
            Err(TryRecvError::Disconnected) => return WaitOutcome::OutputClosed,
        }
    }
}

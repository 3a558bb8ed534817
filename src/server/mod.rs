//! 本地模型服务子进程：启动、就绪等待、停止

pub mod readiness;
pub mod supervisor;

pub use readiness::{wait_for_ready, KeywordProbe, ReadinessProbe, WaitOutcome, DEFAULT_READY_MARKERS};
pub use supervisor::{
    build_launch_command, LaunchReport, ServerError, ServerHandle, ServerSupervisor, StopOutcome,
};

use async_trait::async_trait;

/// 应用流程与服务监管之间的接缝：测试中可替换为计数桩
#[async_trait]
pub trait ServerControl: Send + Sync {
    /// 启动服务并等待就绪窗口结束；每行输出回调 on_line。从不失败。
    async fn start(&self, on_line: &mut (dyn for<'a> FnMut(&'a str) + Send)) -> ServerHandle;

    /// 停止服务；空句柄为 no-op。从不失败。
    async fn stop(&self, handle: ServerHandle);
}

#[async_trait]
impl ServerControl for ServerSupervisor {
    async fn start(&self, on_line: &mut (dyn for<'a> FnMut(&'a str) + Send)) -> ServerHandle {
        ServerSupervisor::start(self, on_line).await
    }

    async fn stop(&self, handle: ServerHandle) {
        ServerSupervisor::stop(self, handle).await
    }
}

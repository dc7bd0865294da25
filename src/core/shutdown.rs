//! 进程级关闭信号
//!
//! 网关：收到 Ctrl+C / SIGTERM 后停止接受新连接，等待进行中的中继结束。
//! 命令行客户端：关闭信号映射为取消作用域的 cancel_all，使运行以 cancelled 结束而非报错。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::cancel::CancelHandle;

/// 关闭原因（仅用于日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

/// 关闭信号：一个进程级 token，信号处理器触发，网关与客户端各自等待
#[derive(Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 触发关闭；只有第一次调用会记录日志
    pub fn shutdown(&self, reason: ShutdownReason) {
        if !self.token.is_cancelled() {
            tracing::info!("Shutdown requested ({:?})", reason);
            self.token.cancel();
        }
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 关闭时取消该作用域内所有活动的上传 / 流读取
    pub fn cancel_on_shutdown(&self, handle: CancelHandle) {
        let token = self.token();
        tokio::spawn(async move {
            token.cancelled().await;
            if handle.cancel_all() {
                tracing::info!("Active transfers cancelled on shutdown");
            }
        });
    }

    /// 监听 Ctrl+C 与（Unix 下的）SIGTERM
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.shutdown(ShutdownReason::Interrupt);
            }
        });

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    if sigterm.recv().await.is_some() {
                        manager.shutdown(ShutdownReason::Terminate);
                    }
                }
            });
        }
    }
}

//! 错误类型：客户端调用错误与入库运行错误
//!
//! 取消与失败严格区分：取消走 `Cancelled`，不会以 error 状态呈现。

use thiserror::Error;

use super::cancel::SlotKind;

/// 调用中继网关 / 对象存储时的错误
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// 上游返回非 2xx；body 为尽力读取的错误文本
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("cancelled")]
    Cancelled,
}

impl ClientError {
    /// 面向用户的错误文本：上游错误只给出正文，其余用 Display
    pub fn detail(&self) -> String {
        match self {
            ClientError::Upstream { status, body } if body.trim().is_empty() => {
                format!("HTTP {}", status)
            }
            ClientError::Upstream { body, .. } => body.clone(),
            other => other.to_string(),
        }
    }
}

/// 一次入库 / 聊天运行中的错误
#[derive(Error, Debug)]
pub enum IngestError {
    /// 既没有文件也没有 URL（或聊天问题为空），在任何网络调用之前拒绝
    #[error("missing input: {0}")]
    MissingInput(&'static str),

    /// 对应槽位已有活动句柄：上一次运行的资源尚未释放
    #[error("{0:?} slot is already active")]
    Busy(SlotKind),

    /// 同一编排器上已有一轮运行未结束
    #[error("another run is still active")]
    RunInProgress,

    #[error(transparent)]
    Client(ClientError),

    #[error("cancelled")]
    Cancelled,
}

impl From<ClientError> for IngestError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Cancelled => IngestError::Cancelled,
            other => IngestError::Client(other),
        }
    }
}

impl IngestError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IngestError::Cancelled)
    }
}

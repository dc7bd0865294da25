//! 上传进度：把底层字节进度换算为 0–100，与入库进度互不相干

use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TransferState {
    pub percent: u8,
}

/// 单次上传的进度跟踪器；每次上传开始时 reset
#[derive(Debug, Default)]
pub struct TransferTracker {
    state: TransferState,
}

impl TransferTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.state = TransferState::default();
    }

    pub fn snapshot(&self) -> TransferState {
        self.state
    }

    /// 处理一次进度回报；总长未知（或为 0）时不可计算，返回 None 且不改变状态
    ///
    /// 完成后停在最后一次回报的值，不强制置 100。
    pub fn on_progress(&mut self, bytes_sent: u64, bytes_total: Option<u64>) -> Option<TransferState> {
        let total = match bytes_total {
            Some(total) if total > 0 => u128::from(total),
            _ => return None,
        };
        let sent = u128::from(bytes_sent);
        let rounded = (200 * sent + total) / (2 * total);
        self.state.percent = rounded.min(100) as u8;
        Some(self.state)
    }
}

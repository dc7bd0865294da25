//! 进度聚合器：按到达顺序应用帧，维护计数器与阶段，推导 0–100 的完成百分比
//!
//! 完成度以 inserted 计：插入是流水线最后一步。总数优先取后端上报的 total_produced；
//! 尚未上报时退化为三个计数器中的最大值（启发式，inserted 追上前可能偏低）。

use serde::Serialize;

use crate::protocol::{Frame, PhaseKind, PhaseRecord, StatusKind, StatusRecord};

pub const LABEL_PARSING: &str = "parsing";
pub const LABEL_CHUNKING: &str = "chunking";
pub const LABEL_EMBEDDING: &str = "embedding";
pub const LABEL_INSERTING: &str = "inserting";
pub const LABEL_WORKING: &str = "working";
pub const LABEL_ERROR: &str = "error";

/// 运行状态；Cancelled 由编排器在取消时设置
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Complete,
    Error,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Complete | RunStatus::Error | RunStatus::Cancelled)
    }
}

/// 进度快照（不可变副本，供 UI 渲染）
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProgressState {
    pub status: RunStatus,
    pub phase_label: String,
    pub detail: String,
    pub produced: u64,
    pub embedded: u64,
    pub inserted: u64,
    pub total_produced: Option<u64>,
    pub percent: u8,
}

impl ProgressState {
    /// 用于百分比的分母：已知总数，否则三个计数器的最大值
    pub fn effective_total(&self) -> u64 {
        match self.total_produced {
            Some(total) if total > 0 => total,
            _ => self.produced.max(self.embedded).max(self.inserted),
        }
    }
}

/// 聚合器独占 ProgressState，只通过 apply 变更
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    state: ProgressState,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressState {
        self.state.clone()
    }

    /// 应用一帧并返回更新后的快照
    ///
    /// 进入终态（complete / error / cancelled）后后续帧一律忽略，
    /// 因此 error 之后百分比不再变化，complete 之后保持 100。
    pub fn apply(&mut self, frame: &Frame) -> ProgressState {
        if self.state.status.is_terminal() {
            tracing::debug!("Ignoring frame after terminal status {:?}", self.state.status);
            return self.snapshot();
        }
        match frame {
            Frame::Status(record) => self.apply_status(record),
            Frame::Phase(record) => self.apply_phase(record),
            Frame::Unrecognized(value) => {
                tracing::debug!("Ignoring frame without status/phase key: {}", value);
            }
        }
        self.snapshot()
    }

    /// 以失败结束本轮（传输错误等非帧来源的失败）
    pub fn fail(&mut self, detail: impl Into<String>) -> ProgressState {
        self.state.status = RunStatus::Error;
        self.state.phase_label = LABEL_ERROR.to_string();
        self.state.detail = detail.into();
        self.snapshot()
    }

    /// 以取消结束本轮；已到终态时不覆盖
    pub fn cancel(&mut self) -> ProgressState {
        if !self.state.status.is_terminal() {
            self.state.status = RunStatus::Cancelled;
        }
        self.snapshot()
    }

    fn apply_status(&mut self, record: &StatusRecord) {
        let state = &mut self.state;
        match record.status {
            StatusKind::Starting => {
                state.status = RunStatus::Running;
                state.phase_label = LABEL_PARSING.to_string();
                state.detail = match &record.files {
                    Some(files) if !files.is_empty() => format!("files: {}", files.join(", ")),
                    _ => String::new(),
                };
            }
            StatusKind::Complete => {
                state.status = RunStatus::Complete;
                state.phase_label.clear();
                state.percent = 100;
            }
            StatusKind::Error => {
                state.status = RunStatus::Error;
                state.phase_label = LABEL_ERROR.to_string();
                state.detail = record.detail.clone().unwrap_or_default();
            }
            StatusKind::Unknown => {
                tracing::debug!("Ignoring unknown status record");
            }
        }
    }

    fn apply_phase(&mut self, record: &PhaseRecord) {
        if record.phase != PhaseKind::Unknown && self.state.status == RunStatus::Idle {
            self.state.status = RunStatus::Running;
        }
        let state = &mut self.state;
        match record.phase {
            PhaseKind::Parse => {
                state.phase_label = LABEL_PARSING.to_string();
                if let Some(msg) = &record.message {
                    state.detail = msg.clone();
                }
            }
            PhaseKind::Chunk => {
                state.phase_label = LABEL_CHUNKING.to_string();
                if let Some(delta) = record.produced {
                    state.produced = state.produced.saturating_add(delta);
                }
                if let Some(total) = record.total_produced {
                    state.total_produced = Some(total);
                    state.detail = format!("chunks prepared: {}", total);
                }
                self.recompute_percent();
            }
            PhaseKind::Embed => {
                state.phase_label = LABEL_EMBEDDING.to_string();
                if let Some(count) = record.count {
                    state.embedded = state.embedded.saturating_add(count);
                }
                self.recompute_percent();
            }
            PhaseKind::Insert => {
                state.phase_label = LABEL_INSERTING.to_string();
                if let Some(count) = record.count {
                    state.inserted = state.inserted.saturating_add(count);
                }
                self.recompute_percent();
            }
            PhaseKind::Heartbeat => {
                if state.phase_label.is_empty() {
                    state.phase_label = LABEL_WORKING.to_string();
                }
            }
            PhaseKind::Unknown => {
                tracing::debug!("Ignoring unknown phase record");
            }
        }
    }

    /// percent = min(100, round(100 * inserted / total))；总数未知时保持不变
    fn recompute_percent(&mut self) {
        let total = self.state.effective_total();
        if total == 0 {
            return;
        }
        let inserted = u128::from(self.state.inserted);
        let total = u128::from(total);
        let rounded = (200 * inserted + total) / (2 * total);
        self.state.percent = rounded.min(100) as u8;
    }
}

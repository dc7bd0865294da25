//! 进度：入库进度聚合与上传进度跟踪

pub mod aggregator;
pub mod transfer;

pub use aggregator::{ProgressAggregator, ProgressState, RunStatus};
pub use transfer::{TransferState, TransferTracker};

//! 核心：错误类型、取消作用域、进程关闭信号

pub mod cancel;
pub mod error;
pub mod shutdown;

pub use cancel::{CancelHandle, CancellationScope, RunGuard, SlotGuard, SlotKind};
pub use error::{ClientError, IngestError};
pub use shutdown::{ShutdownManager, ShutdownReason};

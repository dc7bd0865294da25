//! ingest-relay - 文档入库流式中继
//!
//! 模块划分：
//! - **protocol**: 事件帧模型与增量解码（字节进、帧出，无 I/O）
//! - **progress**: 入库进度聚合、上传进度跟踪
//! - **core**: 错误类型、双槽取消作用域、进程关闭信号
//! - **client**: Job Backend 抽象（reqwest 实现 + Mock）、入库编排、聊天流
//! - **gateway**: 中继网关（axum），需启用 `gateway` feature
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **observability**: 日志初始化

pub mod client;
pub mod config;
pub mod core;
#[cfg(feature = "gateway")]
pub mod gateway;
pub mod observability;
pub mod progress;
pub mod protocol;

pub use client::{IngestOrchestrator, IngestRequest, IngestSnapshot};
pub use progress::{ProgressState, RunStatus};
pub use protocol::{Frame, FrameDecoder};

//! 线上协议：入库事件帧与增量解码

pub mod decoder;
pub mod frame;
pub mod text;

pub use decoder::FrameDecoder;
pub use frame::{Frame, PhaseKind, PhaseRecord, StatusKind, StatusRecord};
pub use text::TextDecoder;

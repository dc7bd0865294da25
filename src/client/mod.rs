//! 客户端：Job Backend 抽象、入库编排、聊天流消费

pub mod backend;
pub mod chat;
pub mod mock;
pub mod orchestrator;

pub use backend::{
    content_type_for_extension, ByteStream, HttpJobBackend, JobBackend, PresignedTarget, UploadFile, UploadTick,
};
pub use chat::{ChatReply, ChatSession};
pub use mock::MockJobBackend;
pub use orchestrator::{IngestOrchestrator, IngestRequest, IngestSnapshot, IngestSource, RunStage};

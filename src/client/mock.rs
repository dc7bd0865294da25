//! Mock Job Backend（用于测试，无需网络）
//!
//! 预置事件流 / 聊天流的分块内容，记录每次调用；可模拟上游失败与永不结束的流，便于测试取消。

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use super::backend::{ByteStream, JobBackend, PresignedTarget, UploadFile, UploadTick};
use crate::core::ClientError;

/// 模拟上传每块的字节数
const UPLOAD_CHUNK_SIZE: usize = 4;

#[derive(Debug, Default)]
pub struct MockJobBackend {
    ingest_chunks: Vec<Bytes>,
    chat_chunks: Vec<Bytes>,
    ingest_failure: Option<(u16, String)>,
    upload_failure: Option<(u16, String)>,
    /// 流在吐完预置分块后挂起（不结束）
    hold_streams_open: bool,
    /// 上传在第一次进度回报后挂起
    stall_upload: bool,
    calls: Mutex<Vec<String>>,
}

impl MockJobBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ingest_chunks<C: Into<Bytes>>(mut self, chunks: Vec<C>) -> Self {
        self.ingest_chunks = chunks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_chat_chunks<C: Into<Bytes>>(mut self, chunks: Vec<C>) -> Self {
        self.chat_chunks = chunks.into_iter().map(Into::into).collect();
        self
    }

    pub fn failing_ingest(mut self, status: u16, body: &str) -> Self {
        self.ingest_failure = Some((status, body.to_string()));
        self
    }

    pub fn failing_upload(mut self, status: u16, body: &str) -> Self {
        self.upload_failure = Some((status, body.to_string()));
        self
    }

    pub fn holding_streams_open(mut self) -> Self {
        self.hold_streams_open = true;
        self
    }

    pub fn stalling_upload(mut self) -> Self {
        self.stall_upload = true;
        self
    }

    /// 按调用顺序记录的调用摘要
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn stream_of(&self, chunks: &[Bytes]) -> ByteStream {
        let items = stream::iter(chunks.to_vec().into_iter().map(Ok));
        if self.hold_streams_open {
            Box::pin(items.chain(stream::pending()))
        } else {
            Box::pin(items)
        }
    }
}

#[async_trait]
impl JobBackend for MockJobBackend {
    async fn presign(&self, extension: &str) -> Result<PresignedTarget, ClientError> {
        self.record(format!("presign {}", extension));
        Ok(PresignedTarget {
            put_url: format!("mock://put/upload.{}", extension),
            get_url: format!("mock://get/upload.{}", extension),
            key: Some(format!("uploads/upload.{}", extension)),
        })
    }

    async fn upload(
        &self,
        put_url: &str,
        file: &UploadFile,
        progress: mpsc::UnboundedSender<UploadTick>,
    ) -> Result<(), ClientError> {
        let data = tokio::fs::read(&file.path).await?;
        let total = data.len() as u64;
        self.record(format!("upload {} {} {}", put_url, file.content_type(), total));

        let mut sent = 0u64;
        for chunk in data.chunks(UPLOAD_CHUNK_SIZE) {
            sent += chunk.len() as u64;
            let _ = progress.send(UploadTick {
                sent,
                total: Some(total),
            });
            tokio::task::yield_now().await;
            if self.stall_upload {
                std::future::pending::<()>().await;
            }
        }

        match &self.upload_failure {
            Some((status, body)) => Err(ClientError::Upstream {
                status: *status,
                body: body.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn ingest_stream(&self, source_url: &str, tenant_id: &str) -> Result<ByteStream, ClientError> {
        self.record(format!("ingest {} {}", source_url, tenant_id));
        if let Some((status, body)) = &self.ingest_failure {
            return Err(ClientError::Upstream {
                status: *status,
                body: body.clone(),
            });
        }
        Ok(self.stream_of(&self.ingest_chunks))
    }

    async fn chat_stream(&self, query: &str, tenant_id: &str) -> Result<ByteStream, ClientError> {
        self.record(format!("chat {} {}", query, tenant_id));
        Ok(self.stream_of(&self.chat_chunks))
    }
}

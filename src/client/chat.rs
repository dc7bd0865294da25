//! 聊天流：无分帧，解码后的文本按到达顺序原样追加

use std::sync::Arc;

use futures_util::StreamExt;

use super::backend::JobBackend;
use crate::core::{CancelHandle, CancellationScope, IngestError, SlotKind};
use crate::protocol::TextDecoder;

/// 一次提问的结果；被取消时 text 为取消前已收到的部分
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub text: String,
    pub cancelled: bool,
}

pub struct ChatSession<B> {
    backend: Arc<B>,
    tenant_id: String,
    scope: CancellationScope,
}

impl<B: JobBackend> ChatSession<B> {
    pub fn new(backend: Arc<B>, tenant_id: impl Into<String>) -> Self {
        Self {
            backend,
            tenant_id: tenant_id.into(),
            scope: CancellationScope::new(),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.scope.handle()
    }

    /// 提问并流式接收回答；每段新文本都会回调 `on_text`
    pub async fn ask<F>(&self, query: &str, mut on_text: F) -> Result<ChatReply, IngestError>
    where
        F: FnMut(&str) + Send,
    {
        let query = query.trim();
        if query.is_empty() || self.tenant_id.trim().is_empty() {
            return Err(IngestError::MissingInput("query and tenant id are required"));
        }
        let guard = self.scope.begin(SlotKind::Stream)?;

        let mut reply = String::new();
        let mut decoder = TextDecoder::new();
        let mut push = |text: String, reply: &mut String| {
            if !text.is_empty() {
                on_text(&text);
                reply.push_str(&text);
            }
        };

        let mut stream = tokio::select! {
            biased;
            _ = guard.cancelled() => return Ok(ChatReply { text: reply, cancelled: true }),
            result = self.backend.chat_stream(query, &self.tenant_id) => result?,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = guard.cancelled() => {
                    tracing::info!("Chat stream cancelled after {} bytes", reply.len());
                    return Ok(ChatReply { text: reply, cancelled: true });
                }
                next = stream.next() => next,
            };
            match next {
                Some(Ok(chunk)) => push(decoder.decode(&chunk), &mut reply),
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }
        push(decoder.finish(), &mut reply);

        Ok(ChatReply {
            text: reply,
            cancelled: false,
        })
    }
}

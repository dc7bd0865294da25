//! 入库编排：可选的 presign + 上传，随后消费事件流驱动进度
//!
//! 每轮运行是单一逻辑控制流：唯一的挂起点是「等待下一块 / 下一次上传回报」，
//! 解码器、聚合器、上传跟踪器都只在这里按到达顺序更新，不存在并发修改。
//! 取消在下一个挂起点生效；取消后半条记录直接丢弃，不做冲刷。

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use super::backend::{JobBackend, UploadFile, UploadTick};
use crate::core::{CancelHandle, CancellationScope, IngestError, SlotKind};
use crate::progress::{ProgressAggregator, ProgressState, TransferState, TransferTracker};
use crate::protocol::{Frame, FrameDecoder};

/// 入库源：本地文件先上传，远程 URL 直接使用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestSource {
    File(PathBuf),
    Url(String),
}

/// 调用方提交的原始输入（文件与 URL 二选一，文件优先）
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub file: Option<PathBuf>,
    pub url: Option<String>,
}

impl IngestRequest {
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(path.into()),
            url: None,
        }
    }

    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            file: None,
            url: Some(url.into()),
        }
    }

    /// 本地校验，不发任何网络请求
    pub fn into_source(self) -> Result<IngestSource, IngestError> {
        if let Some(path) = self.file {
            return Ok(IngestSource::File(path));
        }
        match self.url.map(|u| u.trim().to_string()) {
            Some(url) if !url.is_empty() => Ok(IngestSource::Url(url)),
            _ => Err(IngestError::MissingInput("choose a file or provide a URL")),
        }
    }
}

/// 运行所处阶段
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    #[default]
    Idle,
    Presigning,
    Uploading,
    Streaming,
    Finished,
}

/// 对外发布的快照：阶段 + 上传进度 + 入库进度
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestSnapshot {
    pub stage: RunStage,
    pub transfer: TransferState,
    pub progress: ProgressState,
}

/// 单轮运行的可变状态，每轮新建
#[derive(Debug, Default)]
struct RunState {
    stage: RunStage,
    decoder: FrameDecoder,
    aggregator: ProgressAggregator,
    tracker: TransferTracker,
}

impl RunState {
    fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            stage: self.stage,
            transfer: self.tracker.snapshot(),
            progress: self.aggregator.snapshot(),
        }
    }
}

pub struct IngestOrchestrator<B> {
    backend: Arc<B>,
    tenant_id: String,
    scope: CancellationScope,
    updates: watch::Sender<IngestSnapshot>,
}

impl<B: JobBackend> IngestOrchestrator<B> {
    pub fn new(backend: Arc<B>, tenant_id: impl Into<String>) -> Self {
        let (updates, _) = watch::channel(IngestSnapshot::default());
        Self {
            backend,
            tenant_id: tenant_id.into(),
            scope: CancellationScope::new(),
            updates,
        }
    }

    /// 订阅快照更新（每次应用进度回报或帧之后发布）
    pub fn subscribe(&self) -> watch::Receiver<IngestSnapshot> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        self.updates.borrow().clone()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.scope.handle()
    }

    /// 取消当前活动的上传和 / 或流读取；空闲时是 no-op
    pub fn cancel_all(&self) -> bool {
        self.scope.cancel_all()
    }

    /// 执行一轮入库
    ///
    /// 输入缺失、上一轮资源未释放或已有运行进行中时返回 Err，不发任何请求；
    /// 其余结局（完成、后端报错、传输失败、取消）都体现在返回的 `ProgressState.status` 上。
    pub async fn run(&self, request: IngestRequest) -> Result<ProgressState, IngestError> {
        let source = request.into_source()?;
        for kind in [SlotKind::Upload, SlotKind::Stream] {
            if self.scope.is_active(kind) {
                return Err(IngestError::Busy(kind));
            }
        }

        let _run_guard = self.scope.begin_run()?;

        let run_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("ingest_run", %run_id);
        async move {
            let mut run = RunState::default();
            self.publish(&run);
            tracing::info!("Ingest run started: {:?}", source);

            match self.drive(source, &mut run).await {
                Ok(()) => {
                    tracing::info!(
                        "Ingest stream ended: status={:?} percent={}",
                        run.aggregator.snapshot().status,
                        run.aggregator.snapshot().percent
                    );
                }
                Err(IngestError::Cancelled) => {
                    run.decoder.discard();
                    run.aggregator.cancel();
                    tracing::info!("Ingest run cancelled");
                }
                Err(e) => {
                    let detail = match &e {
                        IngestError::Client(client) => client.detail(),
                        other => other.to_string(),
                    };
                    tracing::warn!("Ingest run failed: {}", detail);
                    run.aggregator.fail(detail);
                }
            }

            run.stage = RunStage::Finished;
            self.publish(&run);
            Ok(run.aggregator.snapshot())
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, source: IngestSource, run: &mut RunState) -> Result<(), IngestError> {
        let source_url = match source {
            IngestSource::Url(url) => url,
            IngestSource::File(path) => self.upload_file(path, run).await?,
        };
        self.consume_stream(&source_url, run).await
    }

    /// presign → PUT；返回用作入库源的下载地址
    async fn upload_file(&self, path: PathBuf, run: &mut RunState) -> Result<String, IngestError> {
        let guard = self.scope.begin(SlotKind::Upload)?;
        let file = UploadFile::new(path);

        run.stage = RunStage::Presigning;
        self.publish(run);
        let target = tokio::select! {
            biased;
            _ = guard.cancelled() => return Err(IngestError::Cancelled),
            result = self.backend.presign(&file.extension) => result?,
        };
        let source_url = target.get_url.clone();

        run.stage = RunStage::Uploading;
        run.tracker.reset();
        self.publish(run);

        let (tick_tx, mut tick_rx) = mpsc::unbounded_channel::<UploadTick>();
        let upload = self.backend.upload(&target.put_url, &file, tick_tx);
        tokio::pin!(upload);
        loop {
            tokio::select! {
                biased;
                _ = guard.cancelled() => return Err(IngestError::Cancelled),
                Some(tick) = tick_rx.recv() => self.apply_tick(run, tick),
                result = &mut upload => {
                    result?;
                    break;
                }
            }
        }
        while let Ok(tick) = tick_rx.try_recv() {
            self.apply_tick(run, tick);
        }
        tracing::info!("Upload finished ({}%)", run.tracker.snapshot().percent);
        Ok(source_url)
    }

    fn apply_tick(&self, run: &mut RunState, tick: UploadTick) {
        if run.tracker.on_progress(tick.sent, tick.total).is_some() {
            self.publish(run);
        }
    }

    /// 逐块读取事件流：解码 → 聚合 → 发布；流结束时排空尾部记录
    async fn consume_stream(&self, source_url: &str, run: &mut RunState) -> Result<(), IngestError> {
        let guard = self.scope.begin(SlotKind::Stream)?;
        run.stage = RunStage::Streaming;
        self.publish(run);

        let mut stream = tokio::select! {
            biased;
            _ = guard.cancelled() => return Err(IngestError::Cancelled),
            result = self.backend.ingest_stream(source_url, &self.tenant_id) => result?,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = guard.cancelled() => return Err(IngestError::Cancelled),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    for frame in run.decoder.feed(&chunk) {
                        self.apply_frame(run, &frame);
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }

        // 尾部排空对所有帧类型生效，不只是 complete
        if let Some(frame) = run.decoder.finish() {
            self.apply_frame(run, &frame);
        }
        Ok(())
    }

    fn apply_frame(&self, run: &mut RunState, frame: &Frame) {
        run.aggregator.apply(frame);
        self.publish(run);
    }

    fn publish(&self, run: &RunState) {
        self.updates.send_replace(run.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockJobBackend;
    use crate::progress::RunStatus;

    #[test]
    fn test_request_validation() {
        assert!(matches!(
            IngestRequest::default().into_source(),
            Err(IngestError::MissingInput(_))
        ));
        assert!(matches!(
            IngestRequest::from_url("   ").into_source(),
            Err(IngestError::MissingInput(_))
        ));
        let both = IngestRequest {
            file: Some(PathBuf::from("a.csv")),
            url: Some("https://example.com/a.csv".into()),
        };
        assert_eq!(both.into_source().unwrap(), IngestSource::File(PathBuf::from("a.csv")));
    }

    #[tokio::test]
    async fn test_missing_input_makes_no_calls() {
        let backend = Arc::new(MockJobBackend::new());
        let orchestrator = IngestOrchestrator::new(Arc::clone(&backend), "demo");
        let err = orchestrator.run(IngestRequest::default()).await.unwrap_err();
        assert!(matches!(err, IngestError::MissingInput(_)));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_url_run_completes() {
        let backend = Arc::new(MockJobBackend::new().with_ingest_chunks(vec![
            "data: {\"status\":\"starting\",\"files\":[\"a.csv\"]}\n\ndata: {\"phase\":\"chunk\",\"total",
            "_produced\":4}\n\ndata: {\"phase\":\"insert\",\"count\":2}\n\n",
            "data: {\"status\":\"complete\"}\n\n",
        ]));
        let orchestrator = IngestOrchestrator::new(Arc::clone(&backend), "demo");
        let state = orchestrator
            .run(IngestRequest::from_url("https://example.com/a.csv"))
            .await
            .unwrap();
        assert_eq!(state.status, RunStatus::Complete);
        assert_eq!(state.percent, 100);
        assert_eq!(state.inserted, 2);
        assert_eq!(
            backend.calls(),
            vec!["ingest https://example.com/a.csv demo".to_string()]
        );
        assert_eq!(orchestrator.snapshot().stage, RunStage::Finished);
    }

    #[tokio::test]
    async fn test_trailing_error_frame_is_applied() {
        let backend = Arc::new(MockJobBackend::new().with_ingest_chunks(vec![
            "data: {\"phase\":\"chunk\",\"total_produced\":10}\n\n",
            "data: {\"status\":\"error\",\"detail\":\"DB connect failed\"}",
        ]));
        let orchestrator = IngestOrchestrator::new(backend, "demo");
        let state = orchestrator.run(IngestRequest::from_url("s3://x")).await.unwrap();
        assert_eq!(state.status, RunStatus::Error);
        assert_eq!(state.detail, "DB connect failed");
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces_error_detail() {
        let backend = Arc::new(MockJobBackend::new().failing_ingest(502, "Upstream 502"));
        let orchestrator = IngestOrchestrator::new(backend, "demo");
        let state = orchestrator.run(IngestRequest::from_url("s3://x")).await.unwrap();
        assert_eq!(state.status, RunStatus::Error);
        assert_eq!(state.detail, "Upstream 502");
    }
}

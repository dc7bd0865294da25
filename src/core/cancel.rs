//! 取消控制：一个上传槽 + 一个流读取槽
//!
//! 每个槽要么空闲，要么持有一个活动的 `CancellationToken`。开始传输时通过 `begin`
//! 占用槽位并拿到 `SlotGuard`；完成、出错或被取消后 guard 被 drop，槽位自动归还。
//! `cancel_all` 幂等：对空闲槽是 no-op，可重复调用。
//! 入库运行另外持有一个运行级 token（`begin_run`），槽位 token 是它的子节点；
//! `cancel_all` 同时触发它，因此在两个槽位交接的间隙发出的取消也不会丢失。
//! 作用域本身被 drop（调用方视图关闭）时无条件取消所有活动句柄。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use super::error::IngestError;

/// 槽位种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Upload,
    Stream,
}

#[derive(Debug, Default)]
struct Slot {
    /// 每次 begin 自增，防止旧 guard 释放新句柄
    generation: u64,
    token: Option<CancellationToken>,
}

#[derive(Debug)]
struct ScopeInner {
    root: CancellationToken,
    run: Mutex<Slot>,
    upload: Mutex<Slot>,
    stream: Mutex<Slot>,
}

impl ScopeInner {
    fn slot(&self, kind: SlotKind) -> MutexGuard<'_, Slot> {
        let slot = match kind {
            SlotKind::Upload => &self.upload,
            SlotKind::Stream => &self.stream,
        };
        lock(slot)
    }

    fn cancel(&self, kind: SlotKind) -> bool {
        let token = self.slot(kind).token.take();
        match token {
            Some(token) => {
                tracing::info!("Cancelling active {:?} handle", kind);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 运行级 token 只取消不移除，由 `RunGuard` 归还，后续 begin 的槽位随之立即处于取消态
    fn cancel_run(&self) -> bool {
        let run = lock(&self.run);
        match &run.token {
            Some(token) if !token.is_cancelled() => {
                tracing::info!("Cancelling active run");
                token.cancel();
                true
            }
            _ => false,
        }
    }

    fn cancel_all(&self) -> bool {
        // 逐个尝试，不能短路
        let run = self.cancel_run();
        let upload = self.cancel(SlotKind::Upload);
        let stream = self.cancel(SlotKind::Stream);
        run || upload || stream
    }

    fn parent_token(&self) -> CancellationToken {
        match &lock(&self.run).token {
            Some(run) => run.clone(),
            None => self.root.clone(),
        }
    }

    fn is_active(&self, kind: SlotKind) -> bool {
        self.slot(kind).token.is_some()
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 一次运行的取消作用域（不可 Clone；对外通过 `CancelHandle` 取消）
#[derive(Debug)]
pub struct CancellationScope {
    inner: Arc<ScopeInner>,
}

impl CancellationScope {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                root: CancellationToken::new(),
                run: Mutex::new(Slot::default()),
                upload: Mutex::new(Slot::default()),
                stream: Mutex::new(Slot::default()),
            }),
        }
    }

    /// 占用槽位；槽位已活动返回 `Busy`，作用域已拆除返回 `Cancelled`
    pub fn begin(&self, kind: SlotKind) -> Result<SlotGuard, IngestError> {
        if self.inner.root.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        let parent = self.inner.parent_token();
        let mut slot = self.inner.slot(kind);
        if slot.token.is_some() {
            return Err(IngestError::Busy(kind));
        }
        slot.generation += 1;
        let token = parent.child_token();
        slot.token = Some(token.clone());
        Ok(SlotGuard {
            inner: Arc::clone(&self.inner),
            kind,
            generation: slot.generation,
            token,
        })
    }

    /// 开始一轮运行；运行期间 begin 的槽位都挂在运行级 token 下
    pub fn begin_run(&self) -> Result<RunGuard, IngestError> {
        if self.inner.root.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        let mut run = lock(&self.inner.run);
        if run.token.is_some() {
            return Err(IngestError::RunInProgress);
        }
        run.generation += 1;
        run.token = Some(self.inner.root.child_token());
        Ok(RunGuard {
            inner: Arc::clone(&self.inner),
            generation: run.generation,
        })
    }

    /// 可跨任务传递的取消句柄
    pub fn handle(&self) -> CancelHandle {
        CancelHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn is_active(&self, kind: SlotKind) -> bool {
        self.inner.is_active(kind)
    }

    /// 取消指定槽；空闲时返回 false
    pub fn cancel(&self, kind: SlotKind) -> bool {
        self.inner.cancel(kind)
    }

    /// 取消所有活动句柄；至少取消了一个时返回 true
    pub fn cancel_all(&self) -> bool {
        self.inner.cancel_all()
    }

    /// 拆除作用域：取消所有活动句柄，之后不能再 begin
    pub fn teardown(&self) {
        self.inner.cancel_all();
        self.inner.root.cancel();
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.root.is_cancelled()
    }
}

impl Default for CancellationScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancellationScope {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// 取消句柄（Clone），供 UI / 信号处理任务调用
#[derive(Debug, Clone)]
pub struct CancelHandle {
    inner: Arc<ScopeInner>,
}

impl CancelHandle {
    pub fn cancel(&self, kind: SlotKind) -> bool {
        self.inner.cancel(kind)
    }

    pub fn cancel_all(&self) -> bool {
        self.inner.cancel_all()
    }

    pub fn is_active(&self, kind: SlotKind) -> bool {
        self.inner.is_active(kind)
    }
}

/// 运行占用凭证；drop 时归还运行级 token
#[derive(Debug)]
pub struct RunGuard {
    inner: Arc<ScopeInner>,
    generation: u64,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut run = lock(&self.inner.run);
        if run.generation == self.generation {
            run.token = None;
        }
    }
}

/// 槽位占用凭证；drop 时归还槽位
#[derive(Debug)]
pub struct SlotGuard {
    inner: Arc<ScopeInner>,
    kind: SlotKind,
    generation: u64,
    token: CancellationToken,
}

impl SlotGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 挂起直到本句柄被取消
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut slot = self.inner.slot(self.kind);
        if slot.generation == self.generation {
            slot.token = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_all_when_idle_is_noop() {
        let scope = CancellationScope::new();
        assert!(!scope.cancel_all());
        assert!(!scope.cancel_all());
        assert!(!scope.is_active(SlotKind::Upload));
        assert!(!scope.is_active(SlotKind::Stream));
        assert!(scope.begin(SlotKind::Upload).is_ok());
    }

    #[test]
    fn test_cancel_only_active_slot() {
        let scope = CancellationScope::new();
        let stream = scope.begin(SlotKind::Stream).unwrap();
        assert!(scope.is_active(SlotKind::Stream));
        assert!(scope.cancel_all());
        assert!(stream.is_cancelled());
        assert!(!scope.is_active(SlotKind::Stream));
        assert!(!scope.cancel_all());
    }

    #[test]
    fn test_guard_drop_releases_slot() {
        let scope = CancellationScope::new();
        {
            let _guard = scope.begin(SlotKind::Upload).unwrap();
            assert!(matches!(
                scope.begin(SlotKind::Upload),
                Err(IngestError::Busy(SlotKind::Upload))
            ));
        }
        assert!(!scope.is_active(SlotKind::Upload));
        let guard = scope.begin(SlotKind::Upload).unwrap();
        assert!(!guard.is_cancelled());
    }

    #[test]
    fn test_stale_guard_does_not_release_new_handle() {
        let scope = CancellationScope::new();
        let old = scope.begin(SlotKind::Stream).unwrap();
        scope.cancel(SlotKind::Stream);
        let fresh = scope.begin(SlotKind::Stream).unwrap();
        drop(old);
        assert!(scope.is_active(SlotKind::Stream));
        assert!(!fresh.is_cancelled());
    }

    #[test]
    fn test_handle_cancels_from_elsewhere() {
        let scope = CancellationScope::new();
        let handle = scope.handle();
        let upload = scope.begin(SlotKind::Upload).unwrap();
        let stream = scope.begin(SlotKind::Stream).unwrap();
        assert!(handle.cancel_all());
        assert!(upload.is_cancelled());
        assert!(stream.is_cancelled());
    }

    #[test]
    fn test_drop_scope_cancels_live_handles() {
        let scope = CancellationScope::new();
        let handle = scope.handle();
        let guard = scope.begin(SlotKind::Stream).unwrap();
        let token = guard.token().clone();
        drop(scope);
        assert!(token.is_cancelled());
        assert!(!handle.cancel_all());
    }

    #[test]
    fn test_begin_after_teardown_is_rejected() {
        let scope = CancellationScope::new();
        scope.teardown();
        assert!(scope.is_torn_down());
        assert!(matches!(scope.begin(SlotKind::Upload), Err(IngestError::Cancelled)));
    }

    #[test]
    fn test_cancel_between_slots_reaches_next_slot() {
        let scope = CancellationScope::new();
        let run = scope.begin_run().unwrap();
        let upload = scope.begin(SlotKind::Upload).unwrap();
        drop(upload);
        // 上传已结束、流尚未开始
        assert!(scope.handle().cancel_all());
        let stream = scope.begin(SlotKind::Stream).unwrap();
        assert!(stream.is_cancelled());

        drop(stream);
        drop(run);
        let run = scope.begin_run().unwrap();
        assert!(!scope.begin(SlotKind::Stream).unwrap().is_cancelled());
        drop(run);
    }

    #[test]
    fn test_second_run_is_rejected_while_active() {
        let scope = CancellationScope::new();
        let _run = scope.begin_run().unwrap();
        assert!(matches!(scope.begin_run(), Err(IngestError::RunInProgress)));
    }

    #[tokio::test]
    async fn test_cancelled_future_wakes() {
        let scope = CancellationScope::new();
        let guard = scope.begin(SlotKind::Stream).unwrap();
        let handle = scope.handle();
        tokio::spawn(async move {
            handle.cancel(SlotKind::Stream);
        });
        guard.cancelled().await;
        assert!(guard.is_cancelled());
    }
}

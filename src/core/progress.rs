use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use tracing::{trace, warn};
use super::traits::UploadBackend;
use super::types::{percent_of, TransferProgress, VideoId};

pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Sync + Send>;

/// 后端进度上报节流：百分比至少前进一个整点才上报。
/// 一次跨过多个整点只报一次最新值，所以每次传输最多 101 次。
#[derive(Debug, Default, Clone)]
pub struct ProgressThrottle {
    last_reported: Option<u8>,
}

impl ProgressThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, percent: u8) -> Option<u8> {
        match self.last_reported {
            Some(last) if percent <= last => None,
            _ => {
                self.last_reported = Some(percent);
                Some(percent)
            }
        }
    }

    pub fn last_reported(&self) -> Option<u8> {
        self.last_reported
    }
}

/// 一次性结算标记：完成与取消只能有一个生效
#[derive(Debug, Clone, Default)]
pub struct Settlement {
    settled: Arc<AtomicBool>,
}

impl Settlement {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只有第一次调用返回 true
    pub fn settle(&self) -> bool {
        self.settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }
}

struct ReporterState {
    loaded: u64,
    started: bool,
    throttle: ProgressThrottle,
}

/// 进度汇报：每个事件都回调界面，节流后异步上报后端
pub struct ProgressReporter {
    video_id: VideoId,
    total: u64,
    callback: Option<ProgressCallback>,
    backend: Option<Arc<dyn UploadBackend>>,
    state: Mutex<ReporterState>,
    settlement: Settlement,
}

impl ProgressReporter {
    pub fn new(video_id: VideoId, total: u64) -> Self {
        Self {
            video_id,
            total,
            callback: None,
            backend: None,
            state: Mutex::new(ReporterState {
                loaded: 0,
                started: false,
                throttle: ProgressThrottle::new(),
            }),
            settlement: Settlement::new(),
        }
    }

    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn UploadBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// 更新已传输字节数，回退或重复的值直接忽略
    pub fn update(&self, loaded: u64) {
        if self.settlement.is_settled() {
            return;
        }

        let loaded = loaded.min(self.total);
        let report = {
            let mut state = self.state.lock();
            if state.started && loaded <= state.loaded {
                return;
            }
            state.started = true;
            state.loaded = loaded;
            state.throttle.observe(percent_of(loaded, self.total))
        };

        if let Some(callback) = &self.callback {
            callback(TransferProgress {
                loaded,
                total: self.total,
            });
        }

        if let Some(percent) = report {
            self.forward(percent);
        }
    }

    /// 结束后到达的事件全部丢弃
    pub fn settle(&self) {
        self.settlement.settle();
    }

    pub fn loaded(&self) -> u64 {
        self.state.lock().loaded
    }

    pub fn last_reported_percent(&self) -> Option<u8> {
        self.state.lock().throttle.last_reported()
    }

    // 不等待、不影响传输，失败只记日志
    fn forward(&self, percent: u8) {
        let Some(backend) = self.backend.clone() else {
            return;
        };

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(video_id = %self.video_id, percent, "no runtime, progress report dropped");
                return;
            }
        };

        let video_id = self.video_id.clone();
        trace!(video_id = %video_id, percent, "reporting progress");
        handle.spawn(async move {
            if let Err(err) = backend.report_progress(&video_id, percent).await {
                warn!(video_id = %video_id, percent, error = %err, "failed to report progress");
            }
        });
    }
}

pin_project! {
    /// 统计请求体已发送的字节数
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        reporter: Arc<ProgressReporter>,
        settlement: Settlement,
        base: u64,
        sent: u64,
    }
}

impl<S> ProgressStream<S> {
    /// `base` 是之前分片已完成的字节数
    pub fn new(inner: S, reporter: Arc<ProgressReporter>, settlement: Settlement, base: u64) -> Self {
        Self {
            inner,
            reporter,
            settlement,
            base,
            sent: 0,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                *this.sent += chunk.len() as u64;
                if !chunk.is_empty() && !this.settlement.is_settled() {
                    this.reporter.update(*this.base + *this.sent);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

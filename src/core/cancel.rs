//! 取消登记表
//!
//! 界面点击取消时把 `VideoId` 加入集合，正在运行的上传器按固定间隔轮询。
//! 原先的界面是单线程事件循环，不需要加锁；这里运行在多线程 tokio 运行时上，
//! 所以集合放在 `Mutex` 后面。检查只是一次加锁加哈希查找，不做任何 I/O。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use super::types::VideoId;

#[derive(Debug, Default)]
struct RegistryState {
    /// 已创建记录、尚未结束的上传
    running: HashSet<VideoId>,
    cancelled: HashSet<VideoId>,
}

#[derive(Debug, Default)]
pub struct CancellationRegistry {
    state: Mutex<RegistryState>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个正在进行的上传，之后才能通过 `request_cancel` 取消
    pub fn track(&self, video_id: &VideoId) {
        self.state.lock().running.insert(video_id.clone());
    }

    pub fn is_running(&self, video_id: &VideoId) -> bool {
        self.state.lock().running.contains(video_id)
    }

    /// 幂等，返回是否为新加入
    pub fn mark_cancelled(&self, video_id: &VideoId) -> bool {
        let inserted = self.state.lock().cancelled.insert(video_id.clone());
        if inserted {
            debug!(video_id = %video_id, "upload marked cancelled");
        }
        inserted
    }

    /// 只标记仍在进行的上传；与 `clear` 在同一把锁下判断，结束后的上传不会留下标记
    pub fn request_cancel(&self, video_id: &VideoId) -> bool {
        let mut state = self.state.lock();
        if !state.running.contains(video_id) {
            return false;
        }

        let inserted = state.cancelled.insert(video_id.clone());
        if inserted {
            debug!(video_id = %video_id, "upload marked cancelled");
        }
        inserted
    }

    pub fn is_cancelled(&self, video_id: &VideoId) -> bool {
        self.state.lock().cancelled.contains(video_id)
    }

    /// 上传结束后移除，避免同一个 ID 再次上传时被误取消
    pub fn clear(&self, video_id: &VideoId) {
        let mut state = self.state.lock();
        state.running.remove(video_id);
        state.cancelled.remove(video_id);
    }

    pub fn clear_all(&self) {
        let mut state = self.state.lock();
        state.running.clear();
        state.cancelled.clear();
    }

    /// 取消标记的数量
    pub fn len(&self) -> usize {
        self.state.lock().cancelled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().cancelled.is_empty()
    }

    pub fn signal(self: &Arc<Self>, video_id: VideoId, poll_interval: Duration) -> CancelSignal {
        CancelSignal {
            registry: self.clone(),
            video_id,
            poll_interval,
        }
    }
}

/// 绑定到单个上传的取消信号，传给上传器在每个步骤边界检查
#[derive(Debug, Clone)]
pub struct CancelSignal {
    registry: Arc<CancellationRegistry>,
    video_id: VideoId,
    poll_interval: Duration,
}

impl CancelSignal {
    pub fn video_id(&self) -> &VideoId {
        &self.video_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.registry.is_cancelled(&self.video_id)
    }

    /// 轮询直到被取消，最多晚一个轮询间隔
    pub async fn cancelled(&self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

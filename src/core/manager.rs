use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use super::errors::{Result, UploadError};
use super::manager_worker::UploadManagerWorker;
use super::orchestrator::UploadOrchestrator;
use super::types::{TransferProgress, UploadMode, UploadTask, VideoId, VideoRecord};

/// 上传事件，通过 broadcast 分发给界面
#[derive(Debug, Clone)]
pub enum UploadEvent {
    Started {
        video_id: VideoId,
        mode: UploadMode,
    },
    Progress {
        video_id: VideoId,
        progress: TransferProgress,
    },
    Completed {
        video_id: VideoId,
        record: VideoRecord,
    },
    Cancelled {
        video_id: VideoId,
    },
    Failed {
        video_id: VideoId,
        error: String,
    },
}

impl UploadEvent {
    pub fn video_id(&self) -> &VideoId {
        match self {
            UploadEvent::Started { video_id, .. }
            | UploadEvent::Progress { video_id, .. }
            | UploadEvent::Completed { video_id, .. }
            | UploadEvent::Cancelled { video_id }
            | UploadEvent::Failed { video_id, .. } => video_id,
        }
    }

    /// 该上传的最后一个事件
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadEvent::Completed { .. } | UploadEvent::Cancelled { .. } | UploadEvent::Failed { .. }
        )
    }
}

pub(crate) enum ManagerCommand {
    AddUpload {
        file_path: PathBuf,
        reply: oneshot::Sender<Result<VideoId>>,
    },
    CancelUpload {
        video_id: VideoId,
        reply: oneshot::Sender<Result<()>>,
    },
    GetTask {
        video_id: VideoId,
        reply: oneshot::Sender<Option<UploadTask>>,
    },
    GetAllTasks {
        reply: oneshot::Sender<Vec<UploadTask>>,
    },
    ActiveUploads {
        reply: oneshot::Sender<Vec<VideoId>>,
    },
}

/// 一个界面会话内的上传管理器，多个上传并发执行
#[derive(Clone)]
pub struct UploadManager {
    command_tx: mpsc::Sender<ManagerCommand>,
    event_tx: broadcast::Sender<UploadEvent>,
}

/// 上传管理器句柄 - 包含管理器和工作线程
pub struct UploadManagerHandle {
    pub manager: UploadManager,
    pub worker_handle: JoinHandle<()>,
}

impl UploadManagerHandle {
    /// 结束会话：取消仍在进行的上传，等待清理完成后清空取消登记表。
    /// 其他克隆出去的 `UploadManager` 也要先释放，否则会一直等待。
    pub async fn shutdown(self) -> Result<()> {
        drop(self.manager);
        self.worker_handle
            .await
            .map_err(|err| UploadError::internal(format!("Worker panic: {}", err)))
    }
}

impl UploadManager {
    pub fn new(orchestrator: Arc<UploadOrchestrator>) -> UploadManagerHandle {
        let (command_tx, command_rx) = mpsc::channel(100);
        // 进度事件较多，缓存 1024 个
        let (event_tx, _) = broadcast::channel(1024);

        let worker_handle = tokio::spawn(UploadManagerWorker::run(
            orchestrator,
            command_rx,
            event_tx.clone(),
        ));

        let manager = Self {
            command_tx,
            event_tx,
        };

        UploadManagerHandle {
            manager,
            worker_handle,
        }
    }

    /// 创建后端记录并开始上传，返回记录 ID
    pub async fn add_upload(&self, file_path: impl Into<PathBuf>) -> Result<VideoId> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(ManagerCommand::AddUpload {
            file_path: file_path.into(),
            reply: reply_tx,
        })
        .await?;

        reply_rx
            .await
            .map_err(|err| UploadError::internal(err.to_string()))?
    }

    /// Cancel upload
    pub async fn cancel_upload(&self, video_id: VideoId) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(ManagerCommand::CancelUpload {
            video_id,
            reply: reply_tx,
        })
        .await?;

        reply_rx
            .await
            .map_err(|err| UploadError::internal(err.to_string()))?
    }

    /// 任务快照，运行中的任务在结束前保持创建时的状态，进度通过事件获取
    pub async fn get_task(&self, video_id: VideoId) -> Result<Option<UploadTask>> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(ManagerCommand::GetTask {
            video_id,
            reply: reply_tx,
        })
        .await?;

        reply_rx
            .await
            .map_err(|err| UploadError::internal(err.to_string()))
    }

    pub async fn get_all_tasks(&self) -> Result<Vec<UploadTask>> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(ManagerCommand::GetAllTasks { reply: reply_tx }).await?;

        reply_rx
            .await
            .map_err(|err| UploadError::internal(err.to_string()))
    }

    pub async fn active_uploads(&self) -> Result<Vec<VideoId>> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(ManagerCommand::ActiveUploads { reply: reply_tx }).await?;

        reply_rx
            .await
            .map_err(|err| UploadError::internal(err.to_string()))
    }

    /// 订阅事件
    ///
    /// 接收太慢会丢失事件（lagged error），终止事件之前的进度事件可以丢，
    /// 需要可靠结果时用 `get_task`。
    pub fn subscribe_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.event_tx.subscribe()
    }

    async fn send(&self, command: ManagerCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| UploadError::internal("Manager shut down"))
    }
}

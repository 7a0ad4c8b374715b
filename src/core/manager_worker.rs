use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use super::errors::{Result, UploadError};
use super::manager::{ManagerCommand, UploadEvent};
use super::orchestrator::UploadOrchestrator;
use super::progress::ProgressCallback;
use super::types::{LocalFile, UploadOutcome, UploadTask, VideoId};

struct TaskHandle {
    task: UploadTask,
    join_handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    fn is_active(&self) -> bool {
        self.join_handle.is_some()
    }
}

/// 上传任务回传给管理器的消息，同一个任务的消息按发送顺序到达
enum JobMessage {
    /// 后端记录已创建，即将开始传输
    Prepared {
        job_id: u64,
        task: UploadTask,
    },
    /// 打开文件或创建记录失败
    Rejected {
        job_id: u64,
    },
    Finished {
        task: UploadTask,
        result: Result<UploadOutcome>,
    },
}

pub(crate) struct UploadManagerWorker {
    orchestrator: Arc<UploadOrchestrator>,
    tasks: HashMap<VideoId, TaskHandle>,
    /// 还没拿到 `VideoId` 的任务
    pending: HashMap<u64, JoinHandle<()>>,
    next_job_id: u64,
    shutting_down: Arc<AtomicBool>,

    event_tx: broadcast::Sender<UploadEvent>,
    job_tx: mpsc::UnboundedSender<JobMessage>,
    job_rx: mpsc::UnboundedReceiver<JobMessage>,
}

impl UploadManagerWorker {
    pub(crate) async fn run(
        orchestrator: Arc<UploadOrchestrator>,
        mut command_rx: mpsc::Receiver<ManagerCommand>,
        event_tx: broadcast::Sender<UploadEvent>,
    ) {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let mut worker = Self {
            orchestrator,
            tasks: HashMap::new(),
            pending: HashMap::new(),
            next_job_id: 0,
            shutting_down: Arc::new(AtomicBool::new(false)),
            event_tx,
            job_tx,
            job_rx,
        };

        // 主事件循环，所有管理器句柄释放后退出。
        // 任务消息优先，回复 add_upload 之前发出的 Prepared 一定先于后续命令处理
        loop {
            tokio::select! {
                biased;
                Some(message) = worker.job_rx.recv() => {
                    worker.handle_job_message(message);
                }
                command = command_rx.recv() => match command {
                    Some(command) => worker.handle_command(command).await,
                    None => break,
                },
            }
        }

        worker.shutdown().await;
    }

    async fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::AddUpload { file_path, reply } => {
                self.add_upload(file_path, reply);
            }
            ManagerCommand::CancelUpload { video_id, reply } => {
                let result = self.cancel_upload(&video_id).await;
                let _ = reply.send(result);
            }
            ManagerCommand::GetTask { video_id, reply } => {
                let task = self.tasks
                    .get(&video_id)
                    .map(|handle| handle.task.clone());
                let _ = reply.send(task);
            }
            ManagerCommand::GetAllTasks { reply } => {
                let mut tasks: Vec<_> = self.tasks
                    .values()
                    .map(|handle| handle.task.clone())
                    .collect();
                tasks.sort_by_key(|task| task.created_at);
                let _ = reply.send(tasks);
            }
            ManagerCommand::ActiveUploads { reply } => {
                let _ = reply.send(self.active_ids());
            }
        }
    }

    /// 打开文件、创建记录和传输都在单独的任务里进行，管理器循环不做网络请求
    fn add_upload(&mut self, file_path: PathBuf, reply: oneshot::Sender<Result<VideoId>>) {
        let job_id = self.next_job_id;
        self.next_job_id += 1;

        let orchestrator = self.orchestrator.clone();
        let event_tx = self.event_tx.clone();
        let job_tx = self.job_tx.clone();
        let shutting_down = self.shutting_down.clone();

        let join_handle = tokio::spawn(async move {
            let prepared: Result<UploadTask> = async {
                let file = LocalFile::open(&file_path).await?;
                orchestrator.prepare(file).await
            }
            .await;

            let mut task = match prepared {
                Ok(task) => task,
                Err(err) => {
                    let _ = job_tx.send(JobMessage::Rejected { job_id });
                    let _ = reply.send(Err(err));
                    return;
                }
            };

            let video_id = task.video_id.clone();
            let _ = job_tx.send(JobMessage::Prepared {
                job_id,
                task: task.clone(),
            });
            let _ = event_tx.send(UploadEvent::Started {
                video_id: video_id.clone(),
                mode: task.mode,
            });
            let _ = reply.send(Ok(video_id.clone()));

            // 在 Prepared 之后检查：管理器要么已经看到这个任务，要么这里能看到关闭标记
            if shutting_down.load(Ordering::Acquire) {
                orchestrator.cancel(&video_id).await;
            }

            let on_progress: ProgressCallback = Arc::new(move |progress| {
                let _ = event_tx.send(UploadEvent::Progress {
                    video_id: video_id.clone(),
                    progress,
                });
            });

            let result = orchestrator.run(&mut task, Some(on_progress)).await;

            // 通知完成
            let _ = job_tx.send(JobMessage::Finished { task, result });
        });

        self.pending.insert(job_id, join_handle);
    }

    async fn cancel_upload(&mut self, video_id: &VideoId) -> Result<()> {
        let handle = self.tasks
            .get(video_id)
            .ok_or_else(|| UploadError::internal(format!("Upload {} not found", video_id)))?;

        let state = handle.task.state;
        if !handle.is_active() || !self.orchestrator.cancel(video_id).await {
            return Err(UploadError::internal(format!(
                "Cannot cancel upload {} in state {:?}",
                video_id, state
            )));
        }

        Ok(())
    }

    fn handle_job_message(&mut self, message: JobMessage) {
        match message {
            JobMessage::Prepared { job_id, task } => {
                let join_handle = self.pending.remove(&job_id);
                self.tasks.insert(task.video_id.clone(), TaskHandle {
                    task,
                    join_handle,
                });
            }
            JobMessage::Rejected { job_id } => {
                self.pending.remove(&job_id);
            }
            JobMessage::Finished { task, result } => self.handle_completion(task, result),
        }
    }

    fn handle_completion(&mut self, task: UploadTask, result: Result<UploadOutcome>) {
        let video_id = task.video_id.clone();

        let event = match result {
            Ok(UploadOutcome::Completed(record)) => UploadEvent::Completed {
                video_id: video_id.clone(),
                record,
            },
            Ok(UploadOutcome::Cancelled(_)) => UploadEvent::Cancelled {
                video_id: video_id.clone(),
            },
            Err(err) => UploadEvent::Failed {
                video_id: video_id.clone(),
                error: err.to_string(),
            },
        };

        debug!(video_id = %video_id, state = ?task.state, "upload task finished");
        if let Some(handle) = self.tasks.get_mut(&video_id) {
            handle.task = task;
            handle.join_handle = None;
        }

        self.emit(event);
    }

    fn active_ids(&self) -> Vec<VideoId> {
        self.tasks
            .iter()
            .filter(|(_, handle)| handle.is_active())
            .map(|(video_id, _)| video_id.clone())
            .collect()
    }

    async fn shutdown(&mut self) {
        self.shutting_down.store(true, Ordering::Release);

        // 已结束但还没处理的任务不能再取消
        while let Ok(message) = self.job_rx.try_recv() {
            self.handle_job_message(message);
        }

        let active = self.active_ids();
        if !active.is_empty() {
            info!(active = active.len(), pending = self.pending.len(), "cancelling unfinished uploads");
        }

        for video_id in &active {
            self.orchestrator.cancel(video_id).await;
        }

        let join_handles: Vec<JoinHandle<()>> = self.pending
            .drain()
            .map(|(_, join_handle)| join_handle)
            .chain(self.tasks.values_mut().filter_map(|handle| handle.join_handle.take()))
            .collect();

        for join_handle in join_handles {
            if let Err(err) = join_handle.await {
                error!(error = %err, "upload task panicked");
            }
        }

        while let Ok(message) = self.job_rx.try_recv() {
            self.handle_job_message(message);
        }

        self.orchestrator.teardown();
    }

    fn emit(&self, event: UploadEvent) {
        // 没有订阅者时发送失败，忽略即可
        let _ = self.event_tx.send(event);
    }
}

use std::sync::Arc;
use tracing::{debug, error, info, warn};
use crate::uploaders::{MultipartUploader, SingleUploader};
use super::cancel::{CancelSignal, CancellationRegistry};
use super::errors::Result;
use super::progress::{ProgressCallback, ProgressReporter};
use super::traits::{ObjectStorage, UploadBackend};
use super::types::{
    LocalFile,
    MultipartSession,
    UploadConfig,
    UploadMode,
    UploadOutcome,
    UploadState,
    UploadTask,
    VideoId,
    VideoRecord,
};

/// 上传编排：创建记录 → 传输 → 确认/失败
///
/// 取消不算错误，返回 `UploadOutcome::Cancelled`。其他失败都会先调用
/// `fail` 再返回错误，避免后端记录一直停在 `uploading`。
pub struct UploadOrchestrator {
    backend: Arc<dyn UploadBackend>,
    storage: Arc<dyn ObjectStorage>,
    registry: Arc<CancellationRegistry>,
    config: UploadConfig,
    single: SingleUploader,
    multipart: MultipartUploader,
}

impl UploadOrchestrator {
    pub fn new(
        backend: Arc<dyn UploadBackend>,
        storage: Arc<dyn ObjectStorage>,
        config: UploadConfig,
    ) -> Result<Self> {
        Self::with_registry(backend, storage, config, Arc::new(CancellationRegistry::new()))
    }

    pub fn with_registry(
        backend: Arc<dyn UploadBackend>,
        storage: Arc<dyn ObjectStorage>,
        config: UploadConfig,
        registry: Arc<CancellationRegistry>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            single: SingleUploader::new(backend.clone(), storage.clone()),
            multipart: MultipartUploader::new(backend.clone(), storage.clone()),
            backend,
            storage,
            registry,
            config,
        })
    }

    pub fn registry(&self) -> &Arc<CancellationRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStorage> {
        &self.storage
    }

    pub fn select_mode(&self, file_size: u64) -> UploadMode {
        self.config.select_mode(file_size)
    }

    /// 在后端创建 `uploading` 记录，并决定上传方式
    pub async fn prepare(&self, file: LocalFile) -> Result<UploadTask> {
        let video_id = self.backend.initiate(&file.name, file.size).await?;
        let mode = self.select_mode(file.size);
        self.registry.track(&video_id);

        info!(
            video_id = %video_id,
            filename = %file.name,
            size = file.size,
            mode = ?mode,
            "upload record created"
        );

        Ok(UploadTask::new(video_id, file, mode))
    }

    pub async fn upload(&self, file: LocalFile, on_progress: Option<ProgressCallback>) -> Result<UploadOutcome> {
        let mut task = self.prepare(file).await?;
        self.run(&mut task, on_progress).await
    }

    /// 执行传输直到终止。无论结果如何都会清除该 ID 的取消标记
    pub async fn run(&self, task: &mut UploadTask, on_progress: Option<ProgressCallback>) -> Result<UploadOutcome> {
        self.registry.track(&task.video_id);
        let signal = self.registry.signal(task.video_id.clone(), self.config.cancel_poll_interval);

        let mut reporter = ProgressReporter::new(task.video_id.clone(), task.file.size)
            .with_backend(self.backend.clone());
        if let Some(callback) = on_progress {
            reporter = reporter.with_callback(callback);
        }
        let reporter = Arc::new(reporter);

        let transferred = self.transfer(task, &signal, &reporter).await;
        reporter.settle();
        task.last_reported_percent = reporter.last_reported_percent();

        let outcome = match transferred {
            Ok(object_key) => self.confirm(task, &object_key).await,
            Err(err) if err.is_cancelled() => {
                self.fail_quietly(&task.video_id).await;
                if !task.state.is_terminal() {
                    task.finish(UploadState::Cancelled);
                }
                info!(video_id = %task.video_id, "upload cancelled by user");
                Ok(UploadOutcome::Cancelled(task.video_id.clone()))
            }
            Err(err) => {
                error!(video_id = %task.video_id, error = %err, "upload failed");
                self.fail_quietly(&task.video_id).await;
                task.error.get_or_insert_with(|| err.to_string());
                task.finish(UploadState::Failed);
                Err(err)
            }
        };

        self.registry.clear(&task.video_id);
        outcome
    }

    /// 界面的取消操作：打上取消标记并通知后端。
    /// 只对已 `prepare` 且尚未结束的上传生效，返回是否新打上了标记
    pub async fn cancel(&self, video_id: &VideoId) -> bool {
        if !self.registry.request_cancel(video_id) {
            debug!(video_id = %video_id, "cancel ignored, upload not running");
            return false;
        }

        info!(video_id = %video_id, "cancel requested");
        if let Err(err) = self.backend.notify_cancel(video_id).await {
            warn!(video_id = %video_id, error = %err, "failed to notify backend of cancel");
        }
        true
    }

    /// 界面会话结束
    pub fn teardown(&self) {
        self.registry.clear_all();
    }

    // 协商上传目标并执行对应的上传器，返回对象的存储路径
    async fn transfer(
        &self,
        task: &mut UploadTask,
        signal: &CancelSignal,
        reporter: &Arc<ProgressReporter>,
    ) -> Result<String> {
        let file = task.file.clone();

        match task.mode {
            UploadMode::Single => {
                let target = self.backend
                    .single_upload_url(&file.name, file.size, &file.content_type, &task.video_id)
                    .await?;

                self.single.upload(task, &target, signal, reporter).await?;
                Ok(target.object_key)
            }
            UploadMode::Multipart => {
                let init = self.backend
                    .initiate_multipart(&file.name, file.size, &file.content_type, &task.video_id)
                    .await?;

                let session = MultipartSession::new(init, self.config.part_size);
                let object = self.multipart.upload(task, session, signal, reporter).await?;
                Ok(object.object_key)
            }
        }
    }

    async fn confirm(&self, task: &mut UploadTask, object_key: &str) -> Result<UploadOutcome> {
        let confirmed: Result<VideoRecord> = async {
            task.advance(UploadState::Confirming)?;
            let record = self.backend
                .confirm(&task.video_id, object_key, &task.file.name, task.file.size)
                .await?;
            task.advance(UploadState::Done)?;
            Ok(record)
        }
        .await;

        match confirmed {
            Ok(record) => {
                info!(video_id = %task.video_id, object_key, "upload confirmed");
                Ok(UploadOutcome::Completed(record))
            }
            Err(err) => {
                error!(video_id = %task.video_id, error = %err, "failed to confirm upload");
                self.fail_quietly(&task.video_id).await;
                task.error = Some(err.to_string());
                task.finish(UploadState::Failed);
                Err(err)
            }
        }
    }

    async fn fail_quietly(&self, video_id: &VideoId) {
        if let Err(err) = self.backend.fail(video_id).await {
            warn!(video_id = %video_id, error = %err, "failed to mark upload as failed");
        }
    }
}

impl std::fmt::Debug for UploadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOrchestrator")
            .field("config", &self.config)
            .field("cancelled", &self.registry.len())
            .finish()
    }
}

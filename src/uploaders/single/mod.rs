use std::sync::Arc;
use tracing::{debug, info};
use crate::core::{
    CancelSignal,
    ObjectStorage,
    PresignedUpload,
    ProgressReporter,
    Result,
    UploadBackend,
    UploadError,
    UploadState,
    UploadTask,
};
use super::{abort_quietly, open_slice, put_cancellable, PutRequest};

/// 单次 PUT 上传整个文件
pub struct SingleUploader {
    backend: Arc<dyn UploadBackend>,
    storage: Arc<dyn ObjectStorage>,
}

impl SingleUploader {
    pub fn new(backend: Arc<dyn UploadBackend>, storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            backend,
            storage,
        }
    }

    pub async fn upload(
        &self,
        task: &mut UploadTask,
        target: &PresignedUpload,
        signal: &CancelSignal,
        reporter: &Arc<ProgressReporter>,
    ) -> Result<()> {
        task.object_key = Some(target.object_key.clone());

        match self.transfer(task, target, signal, reporter).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_cancelled() => {
                task.advance(UploadState::Cancelling)?;
                abort_quietly(self.backend.as_ref(), &task.video_id).await;
                task.advance(UploadState::Cancelled)?;
                info!(video_id = %task.video_id, "single upload cancelled");
                Err(err)
            }
            Err(err) => {
                task.error = Some(err.to_string());
                task.finish(UploadState::Failed);
                Err(err)
            }
        }
    }

    async fn transfer(
        &self,
        task: &mut UploadTask,
        target: &PresignedUpload,
        signal: &CancelSignal,
        reporter: &Arc<ProgressReporter>,
    ) -> Result<()> {
        if signal.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        task.advance(UploadState::Transferring)?;
        debug!(video_id = %task.video_id, object_key = %target.object_key, size = task.file.size, "starting single PUT");

        let body = open_slice(&task.file.path, 0, task.file.size).await?;
        put_cancellable(
            self.storage.as_ref(),
            PutRequest {
                url: &target.upload_url,
                body,
                content_length: task.file.size,
                content_type: &task.file.content_type,
                base: 0,
            },
            signal,
            reporter,
        )
        .await?;

        task.bytes_transferred = task.file.size;
        reporter.update(task.file.size);
        task.last_reported_percent = reporter.last_reported_percent();

        Ok(())
    }
}

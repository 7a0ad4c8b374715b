use std::sync::Arc;
use tracing::{debug, info};
use crate::core::{
    plan_parts,
    CancelSignal,
    CompletedObject,
    MultipartSession,
    ObjectStorage,
    PartPlan,
    ProgressReporter,
    Result,
    UploadBackend,
    UploadError,
    UploadState,
    UploadTask,
};
use super::{abort_quietly, open_slice, put_cancellable, unquote_etag, PutRequest};

/// 分片上传器
///
/// 分片严格按序号顺序逐个上传，每个分片单独申请预签名 URL。
/// 每个步骤边界都会检查取消：
///
/// 1. 申请分片 URL 之前
/// 2. 拿到 URL 之后（申请 URL 本身是一次网络往返）
/// 3. PUT 进行中，按轮询间隔检查
/// 4. PUT 成功之后、记录分片之前
///
/// 取消时跳过合并，改为中止分片上传。
pub struct MultipartUploader {
    backend: Arc<dyn UploadBackend>,
    storage: Arc<dyn ObjectStorage>,
}

impl MultipartUploader {
    pub fn new(backend: Arc<dyn UploadBackend>, storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            backend,
            storage,
        }
    }

    /// 上传所有分片并合并，`session` 在合并后被消费
    pub async fn upload(
        &self,
        task: &mut UploadTask,
        mut session: MultipartSession,
        signal: &CancelSignal,
        reporter: &Arc<ProgressReporter>,
    ) -> Result<CompletedObject> {
        task.object_key = Some(session.object_key.clone());

        match self.drive(task, &mut session, signal, reporter).await {
            Ok(object) => Ok(object),
            Err(err) if err.is_cancelled() => {
                task.advance(UploadState::Cancelling)?;
                abort_quietly(self.backend.as_ref(), &task.video_id).await;
                task.advance(UploadState::Cancelled)?;
                info!(
                    video_id = %task.video_id,
                    parts_uploaded = session.parts().len(),
                    "multipart upload cancelled"
                );
                Err(err)
            }
            Err(err) => {
                // 不留下孤立的分片
                abort_quietly(self.backend.as_ref(), &task.video_id).await;
                task.error = Some(err.to_string());
                task.finish(UploadState::Failed);
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        task: &mut UploadTask,
        session: &mut MultipartSession,
        signal: &CancelSignal,
        reporter: &Arc<ProgressReporter>,
    ) -> Result<CompletedObject> {
        let plan = plan_parts(task.file.size, session.part_size)?;
        let total_parts = plan.len();
        debug!(
            video_id = %task.video_id,
            upload_id = %session.upload_id,
            total_parts,
            part_size = session.part_size,
            "starting multipart upload"
        );

        for part in &plan {
            ensure_not_cancelled(signal)?;
            task.advance(UploadState::PartUploading(part.part_number))?;

            let etag = self.upload_part(task, session, part, signal, reporter).await?;

            // PUT 期间可能已被取消，不能再记录这个分片
            ensure_not_cancelled(signal)?;
            session.record(part.part_number, etag)?;

            task.bytes_transferred = part.end();
            reporter.update(task.bytes_transferred);
            task.last_reported_percent = reporter.last_reported_percent();

            debug!(
                video_id = %task.video_id,
                part_number = part.part_number,
                total_parts,
                bytes_transferred = task.bytes_transferred,
                "part uploaded"
            );
        }

        ensure_not_cancelled(signal)?;
        task.advance(UploadState::Completing)?;
        session.ensure_complete(total_parts)?;

        let object = self.backend
            .complete_multipart(&session.object_key, &session.upload_id, session.parts())
            .await?;

        info!(
            video_id = %task.video_id,
            object_key = %object.object_key,
            size = object.size,
            "multipart upload completed"
        );

        Ok(object)
    }

    async fn upload_part(
        &self,
        task: &UploadTask,
        session: &MultipartSession,
        part: &PartPlan,
        signal: &CancelSignal,
        reporter: &Arc<ProgressReporter>,
    ) -> Result<String> {
        let part_url = self.backend
            .part_url(&session.object_key, &session.upload_id, part.part_number)
            .await?;

        ensure_not_cancelled(signal)?;

        let body = open_slice(&task.file.path, part.offset, part.len).await?;
        let response = put_cancellable(
            self.storage.as_ref(),
            PutRequest {
                url: &part_url.upload_url,
                body,
                content_length: part.len,
                content_type: &task.file.content_type,
                base: part.offset,
            },
            signal,
            reporter,
        )
        .await?;

        response
            .etag
            .as_deref()
            .map(unquote_etag)
            .filter(|etag| !etag.is_empty())
            .ok_or(UploadError::MissingETag {
                part_number: part.part_number,
            })
    }
}

fn ensure_not_cancelled(signal: &CancelSignal) -> Result<()> {
    if signal.is_cancelled() {
        return Err(UploadError::Cancelled);
    }

    Ok(())
}

pub mod single;
pub mod multipart;

pub use single::SingleUploader;
pub use multipart::MultipartUploader;

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use crate::core::constants::READ_BUFFER_SIZE;
use crate::core::{
    ByteStream,
    CancelSignal,
    ObjectStorage,
    ProgressReporter,
    ProgressStream,
    PutResponse,
    Result,
    Settlement,
    UploadBackend,
    UploadError,
    VideoId,
};

/// 以流的方式读取文件的 `[offset, offset + len)`
pub(crate) async fn open_slice(path: &Path, offset: u64, len: u64) -> Result<ByteStream> {
    let mut file = File::open(path).await?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset)).await?;
    }

    let reader = file.take(len);
    Ok(Box::pin(ReaderStream::with_capacity(reader, READ_BUFFER_SIZE)))
}

/// 一次 PUT 请求的参数
pub(crate) struct PutRequest<'a> {
    pub url: &'a str,
    pub body: ByteStream,
    pub content_length: u64,
    pub content_type: &'a str,
    /// 本次请求之前已完成的字节数
    pub base: u64,
}

/// 发起 PUT，同时轮询取消信号。取消时丢弃进行中的请求。
/// 完成和取消由 `Settlement` 保证只结算一次，之后的进度事件被忽略。
pub(crate) async fn put_cancellable(
    storage: &dyn ObjectStorage,
    request: PutRequest<'_>,
    signal: &CancelSignal,
    reporter: &Arc<ProgressReporter>,
) -> Result<PutResponse> {
    let settlement = Settlement::new();
    let body = ProgressStream::new(request.body, reporter.clone(), settlement.clone(), request.base);
    let put = storage.put(request.url, Box::pin(body), request.content_length, request.content_type);

    tokio::select! {
        biased;
        result = put => {
            settlement.settle();
            result
        }
        _ = signal.cancelled() => {
            settlement.settle();
            debug!(video_id = %signal.video_id(), "in-flight PUT aborted by cancel");
            Err(UploadError::Cancelled)
        }
    }
}

/// 清理调用失败只记日志
pub(crate) async fn abort_quietly(backend: &dyn UploadBackend, video_id: &VideoId) {
    if let Err(err) = backend.abort_upload(video_id).await {
        warn!(video_id = %video_id, error = %err, "failed to abort upload");
    }
}

/// 去掉 ETag 两侧的引号
pub fn unquote_etag(raw: &str) -> String {
    raw.trim().trim_matches('"').to_string()
}

use std::pin::Pin;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use super::errors::Result;
use super::types::{
    CompletedObject,
    CompletedPart,
    MultipartInit,
    PartUrl,
    PresignedUpload,
    VideoId,
    VideoRecord,
};

/// PUT 请求体
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Sync + 'static>>;

/// 后端上传接口：创建记录、签发预签名 URL、合并/中止分片、确认/失败
#[async_trait]
pub trait UploadBackend: Send + Sync {
    /// 创建 `uploading` 状态的视频记录，必须在任何存储请求之前调用
    async fn initiate(&self, filename: &str, size: u64) -> Result<VideoId>;

    async fn single_upload_url(
        &self,
        filename: &str,
        size: u64,
        content_type: &str,
        video_id: &VideoId,
    ) -> Result<PresignedUpload>;

    async fn initiate_multipart(
        &self,
        filename: &str,
        size: u64,
        content_type: &str,
        video_id: &VideoId,
    ) -> Result<MultipartInit>;

    /// 每个分片单独申请，URL 会过期
    async fn part_url(&self, object_key: &str, upload_id: &str, part_number: u32) -> Result<PartUrl>;

    async fn complete_multipart(
        &self,
        object_key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompletedObject>;

    /// 清理存储端的未完成上传
    async fn abort_upload(&self, video_id: &VideoId) -> Result<()>;

    async fn confirm(
        &self,
        video_id: &VideoId,
        object_key: &str,
        filename: &str,
        size: u64,
    ) -> Result<VideoRecord>;

    async fn fail(&self, video_id: &VideoId) -> Result<()>;

    async fn report_progress(&self, video_id: &VideoId, percent: u8) -> Result<()>;

    async fn notify_cancel(&self, video_id: &VideoId) -> Result<()>;
}

/// 存储端对一次 PUT 的响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResponse {
    pub status: u16,
    /// 原样保留响应头，可能带引号
    pub etag: Option<String>,
}

/// 预签名 URL 的对象存储
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(
        &self,
        url: &str,
        body: ByteStream,
        content_length: u64,
        content_type: &str,
    ) -> Result<PutResponse>;
}

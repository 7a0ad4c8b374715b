use std::path::{Path, PathBuf};
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use super::constants::{
    DEFAULT_CANCEL_POLL_INTERVAL,
    DEFAULT_CONTENT_TYPE,
    DEFAULT_MULTIPART_THRESHOLD,
    DEFAULT_PART_SIZE,
};
use super::errors::{Result, UploadError};

// 用于序列化 Duration（毫秒）
fn serialize_millis<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

fn deserialize_millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

/// 后端视频记录 ID，在开始传输之前由 `initiate` 创建
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VideoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 本地待上传文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub content_type: String,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, size: u64, content_type: Option<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            size,
            content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        }
    }

    /// 读取文件元数据，并根据扩展名推断 MIME 类型
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(UploadError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Not a regular file: {}", path.display()),
            )));
        }

        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| UploadError::internal(format!("Can't read filename of {}", path.display())))?
            .to_string();

        let content_type = mime_guess::from_path(path)
            .first()
            .map(|mime| mime.essence_str().to_string());

        Ok(Self::new(path, name, metadata.len(), content_type))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum UploadMode {
    Single,
    Multipart,
}

/// 上传状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum UploadState {
    /// 与后端协商上传目标
    Negotiating,
    /// 单次上传中
    Transferring,
    /// 正在上传第 n 个分片
    PartUploading(u32),
    /// 合并分片
    Completing,
    /// 通知后端确认
    Confirming,
    Done,
    Cancelling,
    Cancelled,
    Failed,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Done | UploadState::Cancelled | UploadState::Failed)
    }

    pub fn can_transition_to(&self, next: UploadState) -> bool {
        use UploadState::*;

        match (*self, next) {
            (Negotiating, Transferring) | (Negotiating, PartUploading(1)) => true,
            (PartUploading(n), PartUploading(m)) => m == n + 1,
            (PartUploading(_), Completing) => true,
            (Transferring, Confirming) | (Completing, Confirming) => true,
            (Confirming, Done) => true,
            (Negotiating | Transferring | PartUploading(_), Cancelling) => true,
            (Cancelling, Cancelled) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// 一次文件传输
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub video_id: VideoId,
    pub file: LocalFile,
    /// 存储路径，由协商阶段分配
    pub object_key: Option<String>,
    pub mode: UploadMode,
    pub state: UploadState,
    pub bytes_transferred: u64,
    pub last_reported_percent: Option<u8>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl UploadTask {
    pub fn new(video_id: VideoId, file: LocalFile, mode: UploadMode) -> Self {
        Self {
            video_id,
            file,
            object_key: None,
            mode,
            state: UploadState::Negotiating,
            bytes_transferred: 0,
            last_reported_percent: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// 按状态机推进，非法转换返回错误
    pub fn advance(&mut self, next: UploadState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(UploadError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        debug!(video_id = %self.video_id, from = ?self.state, to = ?next, "upload state changed");

        if matches!(next, UploadState::Transferring | UploadState::PartUploading(1)) {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.state = next;

        Ok(())
    }

    /// 直接进入终止状态；已经终止的任务保持不变
    pub fn finish(&mut self, terminal: UploadState) {
        if self.state.is_terminal() {
            return;
        }

        debug!(video_id = %self.video_id, from = ?self.state, to = ?terminal, "upload finished");
        self.state = terminal;
        self.completed_at = Some(Utc::now());
    }
}

/// 单个分片的切片范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    pub part_number: u32,
    pub offset: u64,
    pub len: u64,
}

impl PartPlan {
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// 计算分片：`[(n-1)*part_size, min(n*part_size, file_size))`
pub fn plan_parts(file_size: u64, part_size: u64) -> Result<Vec<PartPlan>> {
    if part_size == 0 {
        return Err(UploadError::Config("part size must be greater than zero".to_string()));
    }

    let total_parts = u32::try_from(file_size.div_ceil(part_size)).map_err(|_| {
        UploadError::Config(format!(
            "part size {} is too small for a file of {} bytes",
            part_size, file_size
        ))
    })?;

    let parts = (1..=total_parts)
        .map(|part_number| {
            let offset = u64::from(part_number - 1) * part_size;
            PartPlan {
                part_number,
                offset,
                len: part_size.min(file_size - offset),
            }
        })
        .collect();

    Ok(parts)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// 分片上传会话，只允许按分片序号追加
#[derive(Debug, Clone)]
pub struct MultipartSession {
    pub upload_id: String,
    pub object_key: String,
    pub part_size: u64,
    parts: Vec<CompletedPart>,
}

impl MultipartSession {
    pub fn new(init: MultipartInit, part_size: u64) -> Self {
        Self {
            upload_id: init.upload_id,
            object_key: init.object_key,
            part_size,
            parts: Vec::new(),
        }
    }

    pub fn record(&mut self, part_number: u32, etag: String) -> Result<()> {
        let expected = self.parts.len() as u32 + 1;
        if part_number != expected {
            return Err(UploadError::internal(format!(
                "part {} recorded out of order, expected {}",
                part_number, expected
            )));
        }

        self.parts.push(CompletedPart { part_number, etag });
        Ok(())
    }

    pub fn ensure_complete(&self, total_parts: usize) -> Result<()> {
        if self.parts.len() != total_parts {
            return Err(UploadError::IncompleteUpload {
                expected: total_parts,
                actual: self.parts.len(),
            });
        }

        Ok(())
    }

    pub fn parts(&self) -> &[CompletedPart] {
        &self.parts
    }
}

/// 传输进度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub loaded: u64,
    pub total: u64,
}

impl TransferProgress {
    pub fn percent(&self) -> u8 {
        percent_of(self.loaded, self.total)
    }
}

/// 整数百分比，空文件视为 100
pub fn percent_of(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }

    let loaded = loaded.min(total) as u128;
    (loaded * 100 / total as u128) as u8
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUpload {
    pub upload_url: String,
    pub object_key: String,
    #[serde(default)]
    pub expires_in: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartInit {
    pub upload_id: String,
    pub object_key: String,
    #[serde(default)]
    pub expires_in: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartUrl {
    pub upload_url: String,
    #[serde(default)]
    pub expires_in: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedObject {
    pub object_key: String,
    pub size: u64,
}

/// 后端确认后的视频记录
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub id: VideoId,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub object_key: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// 上传的最终结果，取消不算错误
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Completed(VideoRecord),
    Cancelled(VideoId),
}

impl UploadOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadOutcome::Cancelled(_))
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// 文件大小不超过该值时使用单次上传
    pub multipart_threshold: u64,
    pub part_size: u64,
    #[serde(
        rename = "cancel_poll_interval_ms",
        serialize_with = "serialize_millis",
        deserialize_with = "deserialize_millis"
    )]
    pub cancel_poll_interval: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            part_size: DEFAULT_PART_SIZE,
            cancel_poll_interval: DEFAULT_CANCEL_POLL_INTERVAL,
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.part_size == 0 {
            return Err(UploadError::Config("upload.part_size must be greater than zero".to_string()));
        }
        if self.cancel_poll_interval.is_zero() {
            return Err(UploadError::Config("upload.cancel_poll_interval_ms must be greater than zero".to_string()));
        }

        Ok(())
    }

    pub fn select_mode(&self, file_size: u64) -> UploadMode {
        if file_size <= self.multipart_threshold {
            UploadMode::Single
        } else {
            UploadMode::Multipart
        }
    }
}

// 静态断言确保类型是 Send 的
const _: () = {
    fn assert_send<T: Send>() {}
    fn assert_types() {
        assert_send::<UploadTask>();
        assert_send::<MultipartSession>();
        assert_send::<UploadOutcome>();
    }
};

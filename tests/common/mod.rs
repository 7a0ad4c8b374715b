#![allow(dead_code)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use video_uploader::core::{
    ByteStream,
    CancellationRegistry,
    CompletedObject,
    CompletedPart,
    MultipartInit,
    ObjectStorage,
    PartUrl,
    PresignedUpload,
    PutResponse,
    Result,
    UploadBackend,
    UploadConfig,
    UploadError,
    UploadOrchestrator,
    VideoId,
    VideoRecord,
};

pub const STORAGE_HOST: &str = "https://storage.test";

/// 后端收到的调用
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Initiate { filename: String, size: u64 },
    SingleUploadUrl,
    InitiateMultipart,
    PartUrl(u32),
    Complete(Vec<CompletedPart>),
    Abort,
    Confirm { object_key: String },
    Fail,
    Progress(u8),
    NotifyCancel,
}

/// 模拟后端 - 记录所有调用，可指定某个接口失败
pub struct MockBackend {
    calls: Mutex<Vec<Call>>,
    next_id: AtomicU32,
    failing: HashSet<&'static str>,
    /// 第 n 次 initiate（从 1 开始）延迟返回
    slow_initiate: Option<(u32, Duration)>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(1),
            failing: HashSet::new(),
            slow_initiate: None,
        }
    }

    pub fn slow_initiate(mut self, call_index: u32, delay: Duration) -> Self {
        self.slow_initiate = Some((call_index, delay));
        self
    }

    /// 接口名：initiate / presigned / multipart-initiate / part-url / complete / confirm / fail / abort
    pub fn failing(mut self, endpoint: &'static str) -> Self {
        self.failing.insert(endpoint);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|&call| predicate(call)).count()
    }

    pub fn part_url_requests(&self) -> Vec<u32> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::PartUrl(part_number) => Some(*part_number),
                _ => None,
            })
            .collect()
    }

    pub fn completed_parts(&self) -> Option<Vec<CompletedPart>> {
        self.calls.lock().iter().find_map(|call| match call {
            Call::Complete(parts) => Some(parts.clone()),
            _ => None,
        })
    }

    pub fn progress_reports(&self) -> Vec<u8> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Progress(percent) => Some(*percent),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call, endpoint: &'static str) -> Result<()> {
        self.calls.lock().push(call);
        if self.failing.contains(endpoint) {
            return Err(UploadError::negotiation(endpoint, 500, "mock failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl UploadBackend for MockBackend {
    async fn initiate(&self, filename: &str, size: u64) -> Result<VideoId> {
        self.record(
            Call::Initiate {
                filename: filename.to_string(),
                size,
            },
            "initiate",
        )?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Some((call_index, delay)) = self.slow_initiate {
            if call_index == id {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(VideoId::new(format!("video-{}", id)))
    }

    async fn single_upload_url(
        &self,
        filename: &str,
        _size: u64,
        _content_type: &str,
        video_id: &VideoId,
    ) -> Result<PresignedUpload> {
        self.record(Call::SingleUploadUrl, "presigned")?;

        Ok(PresignedUpload {
            upload_url: format!("{}/single/{}", STORAGE_HOST, video_id),
            object_key: format!("videos/{}/{}", video_id, filename),
            expires_in: 3600,
        })
    }

    async fn initiate_multipart(
        &self,
        filename: &str,
        _size: u64,
        _content_type: &str,
        video_id: &VideoId,
    ) -> Result<MultipartInit> {
        self.record(Call::InitiateMultipart, "multipart-initiate")?;

        Ok(MultipartInit {
            upload_id: format!("upload-{}", video_id),
            object_key: format!("videos/{}/{}", video_id, filename),
            expires_in: 3600,
        })
    }

    async fn part_url(&self, _object_key: &str, upload_id: &str, part_number: u32) -> Result<PartUrl> {
        self.record(Call::PartUrl(part_number), "part-url")?;

        Ok(PartUrl {
            upload_url: format!("{}/{}/part/{}", STORAGE_HOST, upload_id, part_number),
            expires_in: 3600,
        })
    }

    async fn complete_multipart(
        &self,
        object_key: &str,
        _upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompletedObject> {
        self.record(Call::Complete(parts.to_vec()), "complete")?;

        Ok(CompletedObject {
            object_key: object_key.to_string(),
            size: 0,
        })
    }

    async fn abort_upload(&self, _video_id: &VideoId) -> Result<()> {
        self.record(Call::Abort, "abort")
    }

    async fn confirm(
        &self,
        video_id: &VideoId,
        object_key: &str,
        _filename: &str,
        _size: u64,
    ) -> Result<VideoRecord> {
        self.record(
            Call::Confirm {
                object_key: object_key.to_string(),
            },
            "confirm",
        )?;

        Ok(VideoRecord {
            id: video_id.clone(),
            status: Some("ready".to_string()),
            object_key: Some(object_key.to_string()),
            extra: Default::default(),
        })
    }

    async fn fail(&self, _video_id: &VideoId) -> Result<()> {
        self.record(Call::Fail, "fail")
    }

    async fn report_progress(&self, _video_id: &VideoId, percent: u8) -> Result<()> {
        self.record(Call::Progress(percent), "progress")
    }

    async fn notify_cancel(&self, _video_id: &VideoId) -> Result<()> {
        self.record(Call::NotifyCancel, "cancel")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PutRecord {
    pub url: String,
    pub content_length: u64,
    pub content_type: String,
    pub received: u64,
}

/// 在第 `put_index` 次 PUT（从 1 开始）时打上取消标记
struct CancelTrigger {
    registry: Arc<CancellationRegistry>,
    video_id: VideoId,
    put_index: usize,
    /// true：标记后请求一直挂起；false：标记后请求正常返回
    mid_flight: bool,
}

/// 模拟对象存储 - 完整读取请求体并记录
pub struct MockStorage {
    puts: Mutex<Vec<PutRecord>>,
    started: AtomicUsize,
    stall_on: Option<usize>,
    omit_etag_on: Option<usize>,
    cancel_trigger: Option<CancelTrigger>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self {
            puts: Mutex::new(Vec::new()),
            started: AtomicUsize::new(0),
            stall_on: None,
            omit_etag_on: None,
            cancel_trigger: None,
        }
    }

    /// 第 n 次 PUT 读完请求体后不再返回
    pub fn stall_on(mut self, put_index: usize) -> Self {
        self.stall_on = Some(put_index);
        self
    }

    pub fn omit_etag_on(mut self, put_index: usize) -> Self {
        self.omit_etag_on = Some(put_index);
        self
    }

    pub fn cancel_during(mut self, registry: Arc<CancellationRegistry>, video_id: VideoId, put_index: usize) -> Self {
        self.cancel_trigger = Some(CancelTrigger {
            registry,
            video_id,
            put_index,
            mid_flight: true,
        });
        self
    }

    pub fn cancel_after(mut self, registry: Arc<CancellationRegistry>, video_id: VideoId, put_index: usize) -> Self {
        self.cancel_trigger = Some(CancelTrigger {
            registry,
            video_id,
            put_index,
            mid_flight: false,
        });
        self
    }

    pub fn puts(&self) -> Vec<PutRecord> {
        self.puts.lock().clone()
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStorage for MockStorage {
    async fn put(
        &self,
        url: &str,
        mut body: ByteStream,
        content_length: u64,
        content_type: &str,
    ) -> Result<PutResponse> {
        let index = self.started.fetch_add(1, Ordering::SeqCst) + 1;

        let mut received = 0u64;
        while let Some(chunk) = body.next().await {
            received += chunk?.len() as u64;
        }

        self.puts.lock().push(PutRecord {
            url: url.to_string(),
            content_length,
            content_type: content_type.to_string(),
            received,
        });

        if let Some(trigger) = &self.cancel_trigger {
            if trigger.put_index == index {
                trigger.registry.mark_cancelled(&trigger.video_id);
                if trigger.mid_flight {
                    futures::future::pending::<()>().await;
                }
            }
        }

        if self.stall_on == Some(index) {
            futures::future::pending::<()>().await;
        }

        let etag = if self.omit_etag_on == Some(index) {
            None
        } else {
            Some(format!("\"etag-{}\"", index))
        };

        Ok(PutResponse {
            status: 200,
            etag,
        })
    }
}

pub struct Harness {
    pub backend: Arc<MockBackend>,
    pub storage: Arc<MockStorage>,
    pub registry: Arc<CancellationRegistry>,
    pub orchestrator: Arc<UploadOrchestrator>,
}

impl Harness {
    pub fn new(
        backend: MockBackend,
        storage: MockStorage,
        registry: Arc<CancellationRegistry>,
        config: UploadConfig,
    ) -> Self {
        let backend = Arc::new(backend);
        let storage = Arc::new(storage);
        let orchestrator = UploadOrchestrator::with_registry(
            backend.clone(),
            storage.clone(),
            config,
            registry.clone(),
        )
        .unwrap();

        Self {
            backend,
            storage,
            registry,
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub fn simple(config: UploadConfig) -> Self {
        Self::new(MockBackend::new(), MockStorage::new(), Arc::new(CancellationRegistry::new()), config)
    }
}

pub fn test_config(multipart_threshold: u64, part_size: u64) -> UploadConfig {
    UploadConfig {
        multipart_threshold,
        part_size,
        cancel_poll_interval: Duration::from_millis(10),
    }
}

/// 在临时目录创建测试文件，名称要在所有测试中唯一
pub async fn create_test_file(name: &str, size: usize) -> PathBuf {
    let path = std::env::temp_dir().join(format!("video-uploader-{}-{}", std::process::id(), name));
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    tokio::fs::write(&path, data).await.unwrap();
    path
}

pub async fn remove_test_file(path: &PathBuf) {
    let _ = tokio::fs::remove_file(path).await;
}

/// 进度上报是异步发出的，计数前先让它们执行完
pub async fn settle_background_reports() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

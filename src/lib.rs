pub mod core;
pub mod uploaders;
pub mod protocol;
pub mod utils;
pub mod config;
pub mod logging;

// 重新导出核心类型
pub use core::{
    CancellationRegistry,
    LocalFile,
    ObjectStorage,
    Result,
    UploadBackend,
    UploadConfig,
    UploadError,
    UploadEvent,
    UploadManager,
    UploadManagerHandle,
    UploadOrchestrator,
    UploadOutcome,
    UploadState,
    UploadTask,
    VideoId,
};

// 重新导出上传器
pub use uploaders::{MultipartUploader, SingleUploader};

pub use protocol::{HttpBackend, HttpBackendConfig, HttpStorage};

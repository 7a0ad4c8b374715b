use std::time::Duration;

/// 分片大小 100 MiB
pub const DEFAULT_PART_SIZE: u64 = 100 * 1024 * 1024;

/// 超过该大小走分片上传
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 100 * 1024 * 1024;

/// 取消状态的轮询间隔
pub const DEFAULT_CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub const DEFAULT_CSRF_COOKIE: &str = "csrf_token";

pub const DEFAULT_CSRF_HEADER: &str = "X-CSRF-Token";

/// 读取文件时每次产出的块大小
pub const READ_BUFFER_SIZE: usize = 256 * 1024;

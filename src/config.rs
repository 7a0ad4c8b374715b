//! 配置文件，默认读取工作目录下的 `config.toml`，可用 `UPLOAD_CONFIG` 指定路径

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use parking_lot::Mutex;
use serde::Deserialize;
use crate::core::constants::{DEFAULT_CSRF_COOKIE, DEFAULT_CSRF_HEADER};
use crate::core::{Result, UploadConfig, UploadError};
use crate::protocol::HttpBackendConfig;

pub const CONFIG_PATH_ENV: &str = "UPLOAD_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";

static CONFIG: OnceLock<Mutex<Config>> = OnceLock::new();

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_csrf_cookie")]
    pub csrf_cookie: String,
    #[serde(default = "default_csrf_header")]
    pub csrf_header: String,
    #[serde(default)]
    pub csrf_token: Option<String>,
    /// 登录后的会话 cookie，`name=value` 格式
    #[serde(default)]
    pub cookies: Vec<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_csrf_cookie() -> String {
    DEFAULT_CSRF_COOKIE.to_string()
}

fn default_csrf_header() -> String {
    DEFAULT_CSRF_HEADER.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn config_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn load_config() -> Result<Config> {
        Self::load_from(Self::config_path())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|err| UploadError::Config(format!("Can't read {}: {}", path.display(), err)))?;

        Self::parse(&config_str)
    }

    pub fn parse(config_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(config_str)
            .map_err(|err| UploadError::Config(err.to_string()))?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            return Err(UploadError::Config("backend.base_url is required".to_string()));
        }

        self.upload.validate()
    }

    pub fn to_backend_config(&self) -> HttpBackendConfig {
        HttpBackendConfig {
            base_url: self.backend.base_url.clone(),
            csrf_cookie: self.backend.csrf_cookie.clone(),
            csrf_header: self.backend.csrf_header.clone(),
            csrf_token: self.backend.csrf_token.clone(),
            cookies: self.backend.cookies.clone(),
            timeout: self.request_timeout(),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.backend.request_timeout_secs.map(Duration::from_secs)
    }
}

/// 只加载一次，之后的调用直接返回
pub fn init_config() -> Result<()> {
    if CONFIG.get().is_some() {
        return Ok(());
    }

    let config = Config::load_config()?;
    let _ = CONFIG.set(Mutex::new(config));
    Ok(())
}

pub fn get_config() -> Result<Config> {
    init_config()?;
    CONFIG
        .get()
        .map(|config| config.lock().clone())
        .ok_or_else(|| UploadError::internal("config not initialized"))
}

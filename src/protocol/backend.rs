use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;
use crate::core::constants::{DEFAULT_CSRF_COOKIE, DEFAULT_CSRF_HEADER};
use crate::core::{
    CompletedObject,
    CompletedPart,
    MultipartInit,
    PartUrl,
    PresignedUpload,
    Result,
    UploadBackend,
    UploadError,
    VideoId,
    VideoRecord,
};

#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// 后端 API 根地址，例如 `https://app.example.com/api/`
    pub base_url: String,
    pub csrf_cookie: String,
    pub csrf_header: String,
    /// 固定的 CSRF token，设置后不再读取 cookie
    pub csrf_token: Option<String>,
    /// 预置的 cookie，格式 `name=value`
    pub cookies: Vec<String>,
    pub timeout: Option<Duration>,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            csrf_cookie: DEFAULT_CSRF_COOKIE.to_string(),
            csrf_header: DEFAULT_CSRF_HEADER.to_string(),
            csrf_token: None,
            cookies: Vec::new(),
            timeout: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateResponse {
    video_id: VideoId,
}

#[derive(Deserialize, Default)]
struct IncompleteBody {
    #[serde(default)]
    expected: usize,
    #[serde(default)]
    actual: usize,
}

/// 通过 REST 接口与后端协商上传
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    jar: Arc<Jar>,
    csrf_cookie: String,
    csrf_header: HeaderName,
    csrf_token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        let base_url = parse_base_url(&config.base_url)?;
        let csrf_header = HeaderName::from_bytes(config.csrf_header.as_bytes())
            .map_err(|err| UploadError::Config(format!("Invalid CSRF header name: {}", err)))?;

        let jar = Arc::new(Jar::default());
        for cookie in &config.cookies {
            jar.add_cookie_str(cookie, &base_url);
        }

        let mut builder = Client::builder().cookie_provider(jar.clone());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            base_url,
            jar,
            csrf_cookie: config.csrf_cookie,
            csrf_header,
            csrf_token: config.csrf_token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// 从后端设置的 cookie 中读取 CSRF token
    pub fn csrf_token(&self) -> Option<String> {
        if let Some(token) = &self.csrf_token {
            return Some(token.clone());
        }

        let header = self.jar.cookies(&self.base_url)?;
        let cookies = header.to_str().ok()?;
        find_cookie(cookies, &self.csrf_cookie)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| UploadError::Config(format!("Invalid endpoint {}: {}", path, err)))
    }

    fn request<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<RequestBuilder> {
        let url = self.endpoint(path)?;
        let mut request = self.client.post(url).json(body);

        if let Some(token) = self.csrf_token() {
            let value = HeaderValue::from_str(&token)
                .map_err(|err| UploadError::Config(format!("Invalid CSRF token: {}", err)))?;
            request = request.header(self.csrf_header.clone(), value);
        }

        Ok(request)
    }

    async fn send<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let request = self.request(path, body)?;

        debug!(endpoint = path, "calling backend");
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(map_error(path, status, &message))
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.send(path, body).await?;
        Ok(response.json().await?)
    }

    async fn post_empty<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        self.send(path, body).await?;
        Ok(())
    }
}

#[async_trait]
impl UploadBackend for HttpBackend {
    async fn initiate(&self, filename: &str, size: u64) -> Result<VideoId> {
        let response: InitiateResponse = self
            .post_json("/upload/initiate", &json!({
                "filename": filename,
                "size": size,
            }))
            .await?;

        Ok(response.video_id)
    }

    async fn single_upload_url(
        &self,
        filename: &str,
        size: u64,
        content_type: &str,
        video_id: &VideoId,
    ) -> Result<PresignedUpload> {
        self.post_json("/upload/presigned", &json!({
            "filename": filename,
            "size": size,
            "contentType": content_type,
            "videoId": video_id,
        }))
        .await
    }

    async fn initiate_multipart(
        &self,
        filename: &str,
        size: u64,
        content_type: &str,
        video_id: &VideoId,
    ) -> Result<MultipartInit> {
        self.post_json("/upload/multipart/initiate", &json!({
            "filename": filename,
            "size": size,
            "contentType": content_type,
            "videoId": video_id,
        }))
        .await
    }

    async fn part_url(&self, object_key: &str, upload_id: &str, part_number: u32) -> Result<PartUrl> {
        self.post_json("/upload/multipart/part-url", &json!({
            "objectKey": object_key,
            "uploadId": upload_id,
            "partNumber": part_number,
        }))
        .await
    }

    async fn complete_multipart(
        &self,
        object_key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompletedObject> {
        self.post_json("/upload/multipart/complete", &json!({
            "objectKey": object_key,
            "uploadId": upload_id,
            "parts": parts,
        }))
        .await
    }

    async fn abort_upload(&self, video_id: &VideoId) -> Result<()> {
        self.post_empty("/upload/abort", &json!({ "videoId": video_id })).await
    }

    async fn confirm(
        &self,
        video_id: &VideoId,
        object_key: &str,
        filename: &str,
        size: u64,
    ) -> Result<VideoRecord> {
        self.post_json("/upload/confirm", &json!({
            "videoId": video_id,
            "objectKey": object_key,
            "filename": filename,
            "size": size,
        }))
        .await
    }

    async fn fail(&self, video_id: &VideoId) -> Result<()> {
        self.post_empty("/upload/fail", &json!({ "videoId": video_id })).await
    }

    async fn report_progress(&self, video_id: &VideoId, percent: u8) -> Result<()> {
        let path = format!("/videos/{}/progress", video_id);
        self.post_empty(&path, &json!({ "progress": percent })).await
    }

    async fn notify_cancel(&self, video_id: &VideoId) -> Result<()> {
        let path = format!("/videos/{}/cancel", video_id);
        self.post_empty(&path, &json!({})).await
    }
}

/// 非 2xx 响应转换为错误；合并分片时的 409 表示后端发现分片不完整
fn map_error(path: &str, status: StatusCode, body: &str) -> UploadError {
    if status == StatusCode::CONFLICT && path.ends_with("/complete") {
        let incomplete: IncompleteBody = serde_json::from_str(body).unwrap_or_default();
        return UploadError::IncompleteUpload {
            expected: incomplete.expected,
            actual: incomplete.actual,
        };
    }

    UploadError::negotiation(path, status.as_u16(), body)
}

/// 根地址必须以 `/` 结尾，否则 `join` 会丢掉最后一段路径
fn parse_base_url(raw: &str) -> Result<Url> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };

    Url::parse(&normalized)
        .map_err(|err| UploadError::Config(format!("Invalid backend url {:?}: {}", raw, err)))
}

/// 从 `a=1; b=2` 形式的 Cookie 头中找出指定的值
fn find_cookie(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

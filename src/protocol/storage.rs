use std::time::Duration;
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use reqwest::{Body, Client};
use crate::core::{ByteStream, ObjectStorage, PutResponse, Result, UploadError};

/// 直接向预签名 URL 发起 PUT，不附带任何认证信息
#[derive(Debug, Clone)]
pub struct HttpStorage {
    client: Client,
}

impl HttpStorage {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStorage for HttpStorage {
    async fn put(
        &self,
        url: &str,
        body: ByteStream,
        content_length: u64,
        content_type: &str,
    ) -> Result<PutResponse> {
        // 预签名 PUT 不接受 chunked 编码，需要显式的 Content-Length
        let response = self.client
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, content_length)
            .body(Body::wrap_stream(body))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(UploadError::storage_rejected(status.as_u16(), message));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Ok(PutResponse {
            status: status.as_u16(),
            etag,
        })
    }
}

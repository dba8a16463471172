//! HTTP 客户端模块 - 媒体工作室远端接口
//!
//! 本模块使用 reqwest 实现 `remote` 中的全部协作方接口：
//! - 远端清单查询
//! - 媒体上传（multipart，瞬时错误按 `RetryPolicy` 重试）/ 下载（流式读取）
//! - 任务文档读取与 NDJSON 推送订阅
//! - 任务设置写入

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{multipart, Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, error, info, warn};

use crate::error::{Result, StudioSDKError};
use crate::job::{JobKind, JobStatus, RemoteJobDocument};
use crate::remote::{
    DownloadedMedia, DubbingTargetOptions, JobSettingsEndpoint, JobStatusSource, MediaDownloadEndpoint,
    MediaUploadEndpoint, RemoteInventoryEndpoint, RemoteInventorySnapshot, UploadReceipt, UploadRequest,
};
use crate::retry_policy::{RetryPolicy, UploadFailureReason};
use crate::sdk::HttpClientConfig;
use crate::storage::entities::{MediaKind, MediaPayload};
use crate::version::user_agent;

/// 下载响应中携带归属角色的头
pub const OWNER_HEADER: &str = "x-owner-id";
/// 下载响应中携带媒体类别的头
pub const KIND_HEADER: &str = "x-media-kind";
const REQUEST_ID_HEADER: &str = "x-request-id";

/// 工作室 HTTP 客户端
pub struct HttpStudioClient {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    retry_policy: RetryPolicy,
    /// 推送订阅的读取上限（覆盖客户端默认请求超时）
    stream_timeout: Duration,
}

impl HttpStudioClient {
    /// 创建新的 HTTP 客户端
    pub fn new(
        config: &HttpClientConfig,
        base_url: impl Into<String>,
        auth_token: Option<String>,
        retry_policy: RetryPolicy,
    ) -> Result<Self> {
        let mut builder = Client::builder().user_agent(user_agent());

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| StudioSDKError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!("✅ HTTP 客户端已创建 (base_url: {})", base_url);

        let retry_policy = if config.enable_retry {
            RetryPolicy {
                max_retries: config.max_retries,
                ..retry_policy
            }
        } else {
            RetryPolicy::none()
        };

        Ok(Self {
            client,
            base_url,
            auth_token,
            retry_policy,
            stream_timeout: JobKind::Dubbing.default_timeout(),
        })
    }

    /// 调整推送订阅的读取上限
    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header(REQUEST_ID_HEADER, uuid::Uuid::new_v4().to_string());
        match self.auth_token {
            Some(ref token) => builder.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => builder,
        }
    }

    async fn upload_once(&self, request: &UploadRequest) -> Result<UploadReceipt> {
        let part = multipart::Part::bytes(request.payload.bytes.to_vec())
            .file_name(request.item_id.clone())
            .mime_str(&request.payload.mime_type)
            .map_err(|e| StudioSDKError::InvalidArgument(format!("创建 multipart part 失败: {}", e)))?;

        let form = multipart::Form::new()
            .text("itemId", request.item_id.clone())
            .text("ownerId", request.owner_id.clone())
            .text("kind", request.kind.as_str())
            .part("file", part);

        let response = self
            .authorized(self.client.post(self.url("/media/upload")))
            .multipart(form)
            .send()
            .await?;
        let response = check_status(response, "上传失败").await?;

        let receipt: UploadReceipt = response
            .json()
            .await
            .map_err(|e| StudioSDKError::Serialization(format!("解析上传响应失败: {}", e)))?;
        Ok(receipt)
    }
}

/// 非 2xx 响应转换为 `Http` 错误
async fn check_status(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response.text().await.unwrap_or_else(|_| "无法读取错误信息".to_string());
    error!("❌ {}，HTTP 状态码: {}, 错误: {}", context, status, error_text);
    Err(StudioSDKError::Http {
        status: status.as_u16(),
        message: format!("{} ({})", context, error_text),
    })
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// 解析一行 NDJSON 任务文档；空行返回 None
fn parse_status_line(line: &[u8], job_id: &str, kind: JobKind) -> Option<Result<JobStatus>> {
    if line.iter().all(|b| b.is_ascii_whitespace()) {
        return None;
    }
    Some(
        serde_json::from_slice::<RemoteJobDocument>(line)
            .map(|doc| doc.into_status(job_id, Some(kind)))
            .map_err(StudioSDKError::from),
    )
}

/// 把分块字节流切成按行解析的任务状态流
fn ndjson_statuses(
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    job_id: String,
    kind: JobKind,
) -> BoxStream<'static, Result<JobStatus>> {
    stream::unfold((body, BytesMut::new(), false), move |(mut body, mut buf, mut done)| {
        let job_id = job_id.clone();
        async move {
            loop {
                if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line = buf.split_to(pos + 1);
                    if let Some(item) = parse_status_line(&line[..pos], &job_id, kind) {
                        return Some((item, (body, buf, done)));
                    }
                    continue;
                }
                if done {
                    return None;
                }
                match body.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                    Some(Err(e)) => return Some((Err(StudioSDKError::from(e)), (body, buf, true))),
                    None => {
                        // 连接关闭时把最后一段不完整的行也交给解析
                        done = true;
                        if !buf.is_empty() {
                            buf.extend_from_slice(b"\n");
                        }
                    }
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl RemoteInventoryEndpoint for HttpStudioClient {
    async fn fetch_inventory(&self, owner_id: &str) -> Result<RemoteInventorySnapshot> {
        debug!("查询远端清单: owner={}", owner_id);
        let response = self
            .authorized(self.client.get(self.url(&format!("/owners/{}/inventory", owner_id))))
            .send()
            .await?;
        let response = check_status(response, "查询远端清单失败").await?;

        let mut snapshot: RemoteInventorySnapshot = response
            .json()
            .await
            .map_err(|e| StudioSDKError::Serialization(format!("解析远端清单失败: {}", e)))?;
        if snapshot.owner_id.is_empty() {
            snapshot.owner_id = owner_id.to_string();
        }
        if snapshot.fetched_at == 0 {
            snapshot.fetched_at = chrono::Utc::now().timestamp_millis();
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl MediaUploadEndpoint for HttpStudioClient {
    async fn upload(&self, request: UploadRequest) -> Result<UploadReceipt> {
        info!("📤 开始上传媒体: {} ({} bytes)", request.item_id, request.payload.len());

        let mut retry_count = 0;
        loop {
            match self.upload_once(&request).await {
                Ok(receipt) => {
                    if receipt.success {
                        info!("✅ 媒体上传成功: {}", request.item_id);
                    }
                    return Ok(receipt);
                }
                Err(e) => {
                    let reason = UploadFailureReason::from(&e);
                    match self.retry_policy.next_delay(retry_count, &reason) {
                        Some(delay) => {
                            warn!(
                                "上传失败，{}ms 后第 {} 次重试: {}: {}",
                                delay.as_millis(),
                                retry_count + 1,
                                request.item_id,
                                e
                            );
                            tokio::time::sleep(delay).await;
                            retry_count += 1;
                        }
                        None => return Err(e),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl MediaDownloadEndpoint for HttpStudioClient {
    async fn download(&self, item_id: &str) -> Result<DownloadedMedia> {
        info!("📥 开始下载媒体: {}", item_id);
        let response = self
            .authorized(self.client.get(self.url(&format!("/media/{}", item_id))))
            .send()
            .await?;
        let response = check_status(response, "下载失败").await?;

        let headers = response.headers().clone();
        let owner_id = header_value(&headers, OWNER_HEADER)
            .ok_or_else(|| StudioSDKError::Serialization(format!("下载响应缺少 {}", OWNER_HEADER)))?
            .to_string();
        let kind = header_value(&headers, KIND_HEADER)
            .and_then(MediaKind::parse)
            .ok_or_else(|| StudioSDKError::Serialization(format!("下载响应缺少或无法识别 {}", KIND_HEADER)))?;
        let mime_type = header_value(&headers, CONTENT_TYPE.as_str())
            .unwrap_or("application/octet-stream")
            .to_string();

        let mut body = response.bytes_stream();
        let mut bytes = BytesMut::new();
        while let Some(chunk) = body.next().await {
            bytes.extend_from_slice(&chunk?);
        }

        info!("✅ 媒体下载成功: {} ({} bytes)", item_id, bytes.len());
        Ok(DownloadedMedia {
            item_id: item_id.to_string(),
            owner_id,
            kind,
            payload: MediaPayload::new(bytes.freeze(), mime_type),
        })
    }
}

#[async_trait]
impl JobStatusSource for HttpStudioClient {
    async fn subscribe(&self, job_id: &str, kind: JobKind) -> Result<BoxStream<'static, Result<JobStatus>>> {
        let response = self
            .authorized(self.client.get(self.url(&format!("/jobs/{}/stream", job_id))))
            .header(reqwest::header::ACCEPT, "application/x-ndjson")
            .timeout(self.stream_timeout)
            .send()
            .await?;
        let response = check_status(response, "建立任务订阅失败").await?;
        debug!("任务订阅已建立: job_id={}", job_id);

        Ok(ndjson_statuses(response.bytes_stream().boxed(), job_id.to_string(), kind))
    }

    async fn fetch(&self, job_id: &str, kind: JobKind) -> Result<Option<JobStatus>> {
        let response = self
            .authorized(self.client.get(self.url(&format!("/jobs/{}", job_id))))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("任务不存在: job_id={}", job_id);
            return Ok(None);
        }
        let response = check_status(response, "读取任务状态失败").await?;

        let document: RemoteJobDocument = response
            .json()
            .await
            .map_err(|e| StudioSDKError::Serialization(format!("解析任务文档失败: {}", e)))?;
        Ok(Some(document.into_status(job_id, Some(kind))))
    }
}

#[async_trait]
impl JobSettingsEndpoint for HttpStudioClient {
    async fn update_target_options(&self, job_id: &str, options: &DubbingTargetOptions) -> Result<()> {
        let response = self
            .authorized(self.client.patch(self.url(&format!("/jobs/{}/settings", job_id))))
            .json(options)
            .send()
            .await?;
        check_status(response, "更新任务设置失败").await?;
        info!("任务设置已更新: job_id={}, target_language={}", job_id, options.target_language);
        Ok(())
    }
}

//! Job Backend 抽象与基于 reqwest 的实现
//!
//! 客户端只和中继网关打交道（presign / ingest / chat 三个入口），
//! 二进制上传则直接 PUT 到预签名 URL，不经过网关。

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, SET_COOKIE};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;

use crate::core::ClientError;

/// 响应体字节流
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// 预签名结果：put_url 用于上传，get_url 作为入库源地址
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresignedTarget {
    pub put_url: String,
    pub get_url: String,
    #[serde(default)]
    pub key: Option<String>,
}

/// 一次上传进度回报（字节级）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadTick {
    pub sent: u64,
    /// 总长未知时为 None
    pub total: Option<u64>,
}

/// 待上传的本地文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub path: PathBuf,
    /// 小写扩展名，缺省为 csv
    pub extension: String,
}

impl UploadFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let extension = extension_of(&path);
        Self { path, extension }
    }

    pub fn content_type(&self) -> &'static str {
        content_type_for_extension(&self.extension)
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "csv".to_string())
}

/// 扩展名 → Content-Type：zip / csv 之外一律按二进制
pub fn content_type_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "zip" => "application/zip",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

/// 核心依赖的后端操作
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// 获取预签名上传 / 下载地址
    async fn presign(&self, extension: &str) -> Result<PresignedTarget, ClientError>;

    /// PUT 文件到预签名地址；每交给传输层一块数据就回报一次进度
    async fn upload(
        &self,
        put_url: &str,
        file: &UploadFile,
        progress: mpsc::UnboundedSender<UploadTick>,
    ) -> Result<(), ClientError>;

    /// 打开入库事件流（text/event-stream）
    async fn ingest_stream(&self, source_url: &str, tenant_id: &str) -> Result<ByteStream, ClientError>;

    /// 打开聊天文本流（text/plain）
    async fn chat_stream(&self, query: &str, tenant_id: &str) -> Result<ByteStream, ClientError>;
}

/// 通过中继网关访问后端
#[derive(Debug, Clone)]
pub struct HttpJobBackend {
    http: reqwest::Client,
    gateway_url: String,
    /// `name=value` 形式的会话 Cookie
    session_cookie: Option<String>,
}

impl HttpJobBackend {
    pub fn new(gateway_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            session_cookie: None,
        })
    }

    pub fn with_session_cookie(mut self, name: &str, value: &str) -> Self {
        self.session_cookie = Some(format!("{}={}", name, value));
        self
    }

    /// 用用户名 / 密码登录网关，保存返回的会话 Cookie
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), ClientError> {
        let resp = self
            .http
            .post(self.url("/proxy/login"))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        let cookie = resp
            .headers()
            .get(SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|pair| pair.trim().to_string())
            .filter(|pair| pair.contains('='))
            .ok_or_else(|| ClientError::InvalidResponse("login response without session cookie".into()))?;
        self.session_cookie = Some(cookie);
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.gateway_url, path)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.session_cookie {
            Some(cookie) => builder.header(COOKIE, cookie.as_str()),
            None => builder,
        }
    }
}

/// 非 2xx 时尽力读取错误正文
async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Upstream {
        status: status.as_u16(),
        body,
    })
}

fn into_byte_stream(resp: reqwest::Response) -> ByteStream {
    Box::pin(resp.bytes_stream().map_err(ClientError::from))
}

#[async_trait]
impl JobBackend for HttpJobBackend {
    async fn presign(&self, extension: &str) -> Result<PresignedTarget, ClientError> {
        let resp = self
            .authorized(self.http.get(self.url("/proxy/ingest/presign")))
            .query(&[("ext", extension)])
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        resp.json::<PresignedTarget>()
            .await
            .map_err(|e| ClientError::InvalidResponse(format!("presign: {}", e)))
    }

    async fn upload(
        &self,
        put_url: &str,
        file: &UploadFile,
        progress: mpsc::UnboundedSender<UploadTick>,
    ) -> Result<(), ClientError> {
        let handle = tokio::fs::File::open(&file.path).await?;
        let total = handle.metadata().await?.len();

        let mut sent = 0u64;
        let body = ReaderStream::new(handle).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                let _ = progress.send(UploadTick {
                    sent,
                    total: Some(total),
                });
            }
            chunk
        });

        tracing::debug!("Uploading {} ({} bytes)", file.path.display(), total);
        let resp = self
            .http
            .put(put_url)
            .header(CONTENT_TYPE, file.content_type())
            .header(CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;
        ensure_success(resp).await?;
        Ok(())
    }

    async fn ingest_stream(&self, source_url: &str, tenant_id: &str) -> Result<ByteStream, ClientError> {
        let form = reqwest::multipart::Form::new()
            .text("tenant_id", tenant_id.to_string())
            .text("csv_url", source_url.to_string());
        let resp = self
            .authorized(self.http.post(self.url("/proxy/ingest/stream")))
            .header(ACCEPT, "text/event-stream")
            .multipart(form)
            .send()
            .await?;
        Ok(into_byte_stream(ensure_success(resp).await?))
    }

    async fn chat_stream(&self, query: &str, tenant_id: &str) -> Result<ByteStream, ClientError> {
        let resp = self
            .authorized(self.http.post(self.url("/proxy/chat/stream")))
            .header(ACCEPT, "text/plain")
            .json(&serde_json::json!({ "q": query, "tenant_id": tenant_id }))
            .send()
            .await?;
        Ok(into_byte_stream(ensure_success(resp).await?))
    }
}

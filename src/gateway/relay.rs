//! 中继：把请求体原样流给内部后端，再把响应体原样流回调用方
//!
//! 本层不解析任何帧。两个方向各自按需拉取（请求体由 reqwest 拉、响应体由 hyper 拉），
//! 互不阻塞，背压自然传递，不做整体缓冲。

use axum::{
    body::Body,
    extract::{RawQuery, Request, State},
    http::{
        header::{ACCEPT, CACHE_CONTROL, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING},
        HeaderMap, HeaderName, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::GatewayState;

/// 流式中继路由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayRoute {
    Ingest,
    Chat,
}

impl RelayRoute {
    pub fn upstream_path(self) -> &'static str {
        match self {
            RelayRoute::Ingest => "/api/ingest/stream",
            RelayRoute::Chat => "/api/chat/stream",
        }
    }

    /// 发给上游的 accept
    pub fn accept(self) -> &'static str {
        match self {
            RelayRoute::Ingest => "text/event-stream",
            RelayRoute::Chat => "text/plain",
        }
    }

    /// 回给调用方的 content-type
    pub fn content_type(self) -> &'static str {
        match self {
            RelayRoute::Ingest => "text/event-stream; charset=utf-8",
            RelayRoute::Chat => "text/plain; charset=utf-8",
        }
    }
}

/// 复制请求头，去掉传输分帧相关的头，并设置 accept
///
/// 请求体是转发而非重新序列化，原 content-length 不再可信。
pub fn sanitize_request_headers(headers: &HeaderMap, accept: &'static str) -> HeaderMap {
    let mut out = headers.clone();
    for name in [HOST, CONTENT_LENGTH, TRANSFER_ENCODING, CONNECTION] {
        out.remove(name);
    }
    out.insert(ACCEPT, HeaderValue::from_static(accept));
    out
}

/// POST /proxy/ingest/stream
pub async fn relay_ingest(State(state): State<GatewayState>, req: Request) -> Response {
    relay(&state, RelayRoute::Ingest, req).await
}

/// POST /proxy/chat/stream
pub async fn relay_chat(State(state): State<GatewayState>, req: Request) -> Response {
    relay(&state, RelayRoute::Chat, req).await
}

async fn relay(state: &GatewayState, route: RelayRoute, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let headers = sanitize_request_headers(&parts.headers, route.accept());
    let url = state.upstream_url(route.upstream_path());

    let upstream = state
        .http
        .post(&url)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await;

    let upstream = match upstream {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!("Relay to {} failed to connect: {}", url, e);
            return upstream_failure(None, e.to_string());
        }
    };

    let status = upstream.status();
    if !status.is_success() {
        let text = upstream.text().await.unwrap_or_default();
        tracing::warn!("Relay to {} returned {}", url, status);
        return upstream_failure(Some(status), text);
    }

    tracing::debug!("Relaying {:?} stream from {}", route, url);
    streaming_response(route.content_type(), Body::from_stream(upstream.bytes_stream()))
}

/// 上游失败：带回上游状态码与错误文本；两者都缺失时为 502
fn upstream_failure(status: Option<StatusCode>, text: String) -> Response {
    let status = status.unwrap_or(StatusCode::BAD_GATEWAY);
    let body = if text.is_empty() {
        format!("Upstream {}", status.as_u16())
    } else {
        text
    };
    (status, body).into_response()
}

/// 流式响应头：关闭中间层缓冲与缓存，保持连接
fn streaming_response(content_type: &'static str, body: Body) -> Response {
    let mut res = Response::new(body);
    let headers = res.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    res
}

/// GET /proxy/ingest/presign?ext=...：原样转发查询串，回传上游正文、状态码与类型
pub async fn relay_presign(State(state): State<GatewayState>, RawQuery(query): RawQuery) -> Response {
    let mut url = state.upstream_url("/api/ingest/presign");
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(&query);
    }

    let resp = match state.http.get(&url).send().await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!("Presign relay failed: {}", e);
            return upstream_failure(None, e.to_string());
        }
    };
    let status = resp.status();
    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));
    match resp.bytes().await {
        Ok(body) => (status, [(CONTENT_TYPE, content_type)], body).into_response(),
        Err(e) => upstream_failure(Some(status), e.to_string()),
    }
}

/// GET /proxy/health：探测上游 /health
pub async fn health(State(state): State<GatewayState>) -> Response {
    let url = state.upstream_url("/health");
    let resp = match state.http.get(&url).send().await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!("Health probe failed: {}", e);
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "ok": false, "upstream": StatusCode::BAD_GATEWAY.as_u16() })),
            )
                .into_response();
        }
    };
    let status = resp.status();
    if !status.is_success() {
        return (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "ok": false, "upstream": status.as_u16() })),
        )
            .into_response();
    }
    match resp.json::<serde_json::Value>().await {
        Ok(body) => Json(body).into_response(),
        Err(_) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "ok": false, "upstream": status.as_u16() })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_framing_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("ui.example.com"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("42"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("multipart/form-data; boundary=x"));
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert("x-tenant", HeaderValue::from_static("demo"));

        let out = sanitize_request_headers(&headers, RelayRoute::Ingest.accept());
        assert!(out.get(HOST).is_none());
        assert!(out.get(CONTENT_LENGTH).is_none());
        assert_eq!(out.get(ACCEPT).unwrap(), "text/event-stream");
        assert_eq!(out.get(CONTENT_TYPE).unwrap(), "multipart/form-data; boundary=x");
        assert_eq!(out.get("x-tenant").unwrap(), "demo");
    }

    #[test]
    fn test_upstream_failure_defaults() {
        let res = upstream_failure(None, String::new());
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        let res = upstream_failure(Some(StatusCode::BAD_REQUEST), "bad csv".into());
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_streaming_headers() {
        let res = streaming_response(RelayRoute::Chat.content_type(), Body::empty());
        assert_eq!(res.headers().get(CONTENT_TYPE).unwrap(), "text/plain; charset=utf-8");
        assert_eq!(res.headers().get(CACHE_CONTROL).unwrap(), "no-cache, no-transform");
        assert_eq!(res.headers().get("x-accel-buffering").unwrap(), "no");
    }
}

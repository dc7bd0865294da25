//! 中继网关：浏览器侧入口 → 内部 Job Backend 的无缓冲流式转发
//!
//! - **auth**: 会话门卫与登录
//! - **relay**: ingest / chat 流式中继、presign 与 health 透传
//! - **routes**: 路由装配

pub mod auth;
pub mod relay;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, AuthSection};

pub use auth::{Gatekeeper, SessionCookieGatekeeper};
pub use relay::{sanitize_request_headers, RelayRoute};
pub use routes::build_router;

/// 网关共享状态
#[derive(Clone)]
pub struct GatewayState {
    pub http: reqwest::Client,
    /// 不含末尾斜杠
    pub upstream_base_url: String,
    pub gatekeeper: Arc<dyn Gatekeeper>,
    pub auth: AuthSection,
}

impl GatewayState {
    pub fn from_config(config: &AppConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.gateway.connect_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            upstream_base_url: config.gateway.upstream_base_url.trim_end_matches('/').to_string(),
            gatekeeper: Arc::new(SessionCookieGatekeeper::from_config(&config.auth)),
            auth: config.auth.clone(),
        })
    }

    pub fn upstream_url(&self, path: &str) -> String {
        format!("{}{}", self.upstream_base_url, path)
    }
}

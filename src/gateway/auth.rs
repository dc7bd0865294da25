//! 会话门卫：检查会话 Cookie，未登录的请求在到达后端之前就被拒绝

use axum::{
    extract::{Request, State},
    http::{
        header::{COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::GatewayState;
use crate::config::AuthSection;

/// 中继入口只关心「调用方是否已授权」
pub trait Gatekeeper: Send + Sync {
    fn is_authorized(&self, headers: &HeaderMap) -> bool;
}

/// 布尔会话 Cookie：`{cookie_name}={cookie_value}` 即视为已登录
#[derive(Debug, Clone)]
pub struct SessionCookieGatekeeper {
    cookie_name: String,
    cookie_value: String,
}

impl SessionCookieGatekeeper {
    pub fn new(cookie_name: impl Into<String>, cookie_value: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            cookie_value: cookie_value.into(),
        }
    }

    pub fn from_config(auth: &AuthSection) -> Self {
        Self::new(&auth.cookie_name, &auth.cookie_value)
    }
}

impl Gatekeeper for SessionCookieGatekeeper {
    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        cookie_value(headers, &self.cookie_name).is_some_and(|v| v == self.cookie_value)
    }
}

/// 在所有 Cookie 头中查找指定名称的值
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

/// route_layer 中间件：未授权直接 401
pub async fn require_session(State(state): State<GatewayState>, req: Request, next: Next) -> Response {
    if state.gatekeeper.is_authorized(req.headers()) {
        next.run(req).await
    } else {
        tracing::debug!("Rejecting unauthenticated request to {}", req.uri().path());
        (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

/// POST /proxy/login：凭据匹配则下发会话 Cookie
pub async fn login(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Response {
    let auth = &state.auth;
    if req.username != auth.username || req.password != auth.password {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "message": "Invalid login" })),
        )
            .into_response();
    }

    let secure = auth.secure_cookie.unwrap_or_else(|| {
        headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
    });
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax{}",
        auth.cookie_name,
        auth.cookie_value,
        if secure { "; Secure" } else { "" }
    );

    let mut res = Json(json!({ "success": true })).into_response();
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            res.headers_mut().insert(SET_COOKIE, value);
            res
        }
        Err(e) => {
            tracing::warn!("Invalid session cookie configuration: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "invalid cookie configuration").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(cookies: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for c in cookies {
            headers.append(COOKIE, HeaderValue::from_str(c).unwrap());
        }
        headers
    }

    #[test]
    fn test_cookie_lookup_across_headers() {
        let headers = headers_with(&["theme=dark; lang=en", "auth=true"]);
        assert_eq!(cookie_value(&headers, "auth"), Some("true"));
        assert_eq!(cookie_value(&headers, "lang"), Some("en"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_gatekeeper_requires_exact_value() {
        let gate = SessionCookieGatekeeper::new("auth", "true");
        assert!(gate.is_authorized(&headers_with(&["auth=true"])));
        assert!(!gate.is_authorized(&headers_with(&["auth=false"])));
        assert!(!gate.is_authorized(&headers_with(&["xauth=true"])));
        assert!(!gate.is_authorized(&HeaderMap::new()));
    }
}

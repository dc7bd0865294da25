//! 路由装配：受保护的中继入口 + 公开的登录 / 健康检查

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::auth::{login, require_session};
use super::relay::{health, relay_chat, relay_ingest, relay_presign};
use super::GatewayState;

pub fn build_router(state: GatewayState) -> Router {
    let protected = Router::new()
        .route("/proxy/ingest/stream", post(relay_ingest))
        .route("/proxy/ingest/presign", get(relay_presign))
        .route("/proxy/chat/stream", post(relay_chat))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    Router::new()
        .merge(protected)
        .route("/proxy/login", post(login))
        .route("/proxy/health", get(health))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

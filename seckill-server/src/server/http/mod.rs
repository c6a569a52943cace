//! HTTP サーバー（フロント層の入口）
//!
//! - POST /sec/kill : 購入。結果が出るか、タイムアウト / 切断まで待つ
//! - GET  /sec/info : 商品 1 件（?product_id=）
//! - GET  /sec/list : 公開中の商品一覧
//! - GET  /health   : キュー長・登録数・各層のカウンタ
//!
//! クライアントが切断すると hyper がハンドラの future を捨てる。
//! その時点で相関レジストリの登録も外れる。

mod health;
mod seckill;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::JwtAuth;
use crate::front::Seckill;

pub use health::HealthProbe;
use health::handle_health;
use seckill::{handle_info, handle_list, handle_sec_kill};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn Seckill>,
    pub jwt_auth: Arc<JwtAuth>,
    pub health: Arc<HealthProbe>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sec/kill", post(handle_sec_kill))
        .route("/sec/info", get(handle_info))
        .route("/sec/list", get(handle_list))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(port: u16, state: AppState) -> anyhow::Result<()> {
    let app = router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

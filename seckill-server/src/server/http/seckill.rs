//! 購入 API と商品情報 API

use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    Json,
};
use futures::FutureExt;
use seckill_core::StatusCode as SecStatus;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use super::AppState;
use crate::auth::AuthError;
use crate::front::service::ProductInfo;
use crate::front::PurchaseCall;

#[derive(Debug, Deserialize)]
pub(super) struct SecKillRequest {
    pub product_id: u64,
}

#[derive(Debug, Serialize)]
pub(super) struct SecKillResponse {
    pub code: u32,
    pub status: &'static str,
    pub product_id: u64,
    pub user_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub(super) struct ErrorResponse {
    pub code: u32,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub(super) struct DataResponse<T> {
    pub code: u32,
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub(super) struct InfoQuery {
    pub product_id: Option<u64>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn auth_error(e: AuthError) -> ApiError {
    let status = match e {
        AuthError::SecretNotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNAUTHORIZED,
    };
    (
        status,
        Json(ErrorResponse {
            code: SecStatus::ServiceBusy.code(),
            error: e.as_str().into(),
        }),
    )
}

/// 購入（POST /sec/kill）
/// - 業務結果（売り切れ等）は 200 で `code` に載せる
/// - 認証失敗のみ 401
pub(super) async fn handle_sec_kill(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<SecKillRequest>,
) -> Result<Json<SecKillResponse>, ApiError> {
    let auth_header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let principal = state.jwt_auth.authenticate(auth_header).map_err(auth_error)?;

    let call = PurchaseCall {
        product_id: req.product_id,
        user_id: principal.user_id,
        username: principal.username,
        client_addr: peer.ip().to_string(),
        access_token: principal.token,
    };
    // 切断はハンドラ future の drop で伝わる
    let reply = state
        .service
        .purchase(call, futures::future::pending().boxed())
        .await;

    let result = reply.result;
    let success = result.status.is_success();
    Ok(Json(SecKillResponse {
        code: result.status.code(),
        status: result.status.as_str(),
        product_id: result.product_id,
        user_id: result.user_id,
        token: result.token,
        token_time: success.then_some(result.token_time),
        reason: reply.reason,
    }))
}

/// 商品 1 件（GET /sec/info?product_id=）
pub(super) async fn handle_info(
    State(state): State<AppState>,
    Query(q): Query<InfoQuery>,
) -> Result<Json<DataResponse<ProductInfo>>, ApiError> {
    let Some(product_id) = q.product_id else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                code: SecStatus::NotFound.code(),
                error: "product_id is required".into(),
            }),
        ));
    };
    match state.service.info(product_id) {
        Some(info) => Ok(Json(DataResponse {
            code: SecStatus::Success.code(),
            data: info,
        })),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                code: SecStatus::NotFound.code(),
                error: format!("product {} not found", product_id),
            }),
        )),
    }
}

/// 商品一覧（GET /sec/list）
pub(super) async fn handle_list(State(state): State<AppState>) -> Json<DataResponse<Vec<ProductInfo>>> {
    Json(DataResponse {
        code: SecStatus::Success.code(),
        data: state.service.info_list(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::make_test_token;
    use crate::auth::JwtAuth;
    use crate::front::service::tests::product;
    use crate::front::{CorrelationRegistry, LoggingSeckill, ResultRouter, SeckillService, Submitter};
    use crate::back::EngineWorker;
    use crate::queue::{MemoryBackend, QueueBackend, QueueNames, QueueSet};
    use crate::server::http::HealthProbe;
    use axum::http::HeaderValue;
    use seckill_core::{
        unix_now, AccessLimits, AdmissionGate, LockStrategy, SeckillEngine, StockCatalog, TokenSigner,
    };
    use std::sync::Arc;
    use std::time::Duration;

    const SECRET: &str = "jwt-secret";

    /// 単一プロセス構成（フロント + バック）をメモリキューで組む
    fn build_test_state(total: u32) -> (AppState, Vec<tokio::task::JoinHandle<()>>) {
        let catalog = Arc::new(StockCatalog::from_records(vec![product(1, total, 1)]));
        let backend: Arc<dyn QueueBackend> = Arc::new(MemoryBackend::new());
        let queues = QueueSet::open(backend, &QueueNames::default());

        let registry = Arc::new(CorrelationRegistry::new());
        let submitter = Arc::new(Submitter::new(
            Arc::clone(&registry),
            Arc::clone(&queues.requests),
            queues.results.name(),
        ));
        let gate = Arc::new(AdmissionGate::new(AccessLimits {
            user_per_sec: 100,
            user_per_min: 100,
            addr_per_sec: 100,
            addr_per_min: 100,
        }));
        let front = Arc::new(LoggingSeckill::new(SeckillService::new(
            Arc::clone(&catalog),
            gate,
            submitter,
            Duration::from_secs(5),
        )));

        let engine = Arc::new(SeckillEngine::new(
            Arc::clone(&catalog),
            TokenSigner::new(b"token").unwrap(),
            LockStrategy::Global,
        ));
        let router = Arc::new(ResultRouter::new(Arc::clone(&registry), Arc::clone(&queues.results)));
        let worker = Arc::new(EngineWorker::new(engine, queues.clone(), Duration::from_secs(30)));
        let mut handles = router.spawn(1);
        handles.extend(worker.spawn(1));

        let health = HealthProbe::new("all", queues)
            .with_front(Arc::clone(&front), registry)
            .with_router(router)
            .with_worker(worker);
        let state = AppState {
            service: front,
            jwt_auth: Arc::new(JwtAuth::new(Some(SECRET), 30)),
            health: Arc::new(health),
        };
        (state, handles)
    }

    fn headers_for(user_id: u64) -> HeaderMap {
        let token = make_test_token(
            SECRET,
            &format!(r#"{{"userId":{user_id},"exp":{}}}"#, unix_now() + 3600),
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    fn peer() -> ConnectInfo<SocketAddr> {
        ConnectInfo("127.0.0.1:40000".parse().unwrap())
    }

    async fn sec_kill(state: &AppState, user_id: u64) -> SecKillResponse {
        let Json(resp) = handle_sec_kill(
            State(state.clone()),
            peer(),
            headers_for(user_id),
            Json(SecKillRequest { product_id: 1 }),
        )
        .await
        .unwrap_or_else(|_| panic!("sec kill failed"));
        resp
    }

    #[tokio::test]
    async fn end_to_end_purchase_then_sold_out() {
        let (state, handles) = build_test_state(1);

        let first = sec_kill(&state, 10).await;
        assert_eq!(first.status, "success");
        assert_eq!(first.code, 1002);
        assert!(first.token.is_some());

        // 残数 0 はフロントの事前チェックか、エンジンで sold-out
        let second = sec_kill(&state, 11).await;
        assert_eq!(second.status, "sold-out");
        assert!(second.token.is_none());

        for h in handles {
            h.abort();
        }
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let (state, handles) = build_test_state(1);
        let err = handle_sec_kill(
            State(state),
            peer(),
            HeaderMap::new(),
            Json(SecKillRequest { product_id: 1 }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
        assert_eq!(err.1.error, "MISSING_BEARER_TOKEN");
        for h in handles {
            h.abort();
        }
    }

    #[tokio::test]
    async fn info_and_list() {
        let (state, handles) = build_test_state(3);

        let Json(info) = handle_info(State(state.clone()), Query(InfoQuery { product_id: Some(1) }))
            .await
            .unwrap_or_else(|_| panic!("info failed"));
        assert_eq!(info.data.product_id, 1);
        assert_eq!(info.data.left_num, 3);

        let missing = handle_info(State(state.clone()), Query(InfoQuery { product_id: Some(9) }))
            .await
            .err()
            .unwrap();
        assert_eq!(missing.0, StatusCode::NOT_FOUND);
        assert_eq!(missing.1.code, 1003);

        let bad = handle_info(State(state.clone()), Query(InfoQuery { product_id: None }))
            .await
            .err()
            .unwrap();
        assert_eq!(bad.0, StatusCode::BAD_REQUEST);

        let Json(list) = handle_list(State(state)).await;
        assert_eq!(list.data.len(), 1);
        for h in handles {
            h.abort();
        }
    }
}

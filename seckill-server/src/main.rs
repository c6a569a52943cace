//! Seckill Server - 秒杀（フラッシュセール）サービス
//!
//! 在庫の少ない商品に一斉に押し寄せる購入リクエストを、
//! 売り越しなし・取りこぼしなし・呼び出しごとに上限付きの待ち時間で捌く。
//!
//! ## 起動方法
//! ```bash
//! SECKILL_PORT=9090 JWT_HS256_SECRET=... cargo run --release -p seckill-server
//! ```
//!
//! ## 全体フロー（超要約）
//! 1) HTTP で購入を受理 → 入場判定（ブラックリスト + 固定窓レート制限）
//! 2) 相関レジストリに待ちスロットを登録し、request キューへ投入
//! 3) バック層 worker がエンジンで判定し、result / order キューへ
//! 4) 結果ルーターが待ちスロットへ配送 → HTTP レスポンス（またはタイムアウト）
//! 5) 永続化ループが残数を在庫ストア / 設定ストアへ書き戻す
//!
//! `SECKILL_ROLE=front|back` で層ごとに別プロセスにできる（キューは redis を使う）。
//!
//! ## 環境変数
//! - `SECKILL_PORT`: HTTPサーバーのポート（デフォルト: 9090）
//! - `RUST_LOG`: ログレベル（デフォルト: info）
//! - 他は config.rs を参照

mod auth;
mod back;
mod config;
mod front;
mod queue;
mod server;
mod store;
mod sync;

use anyhow::Context;
use seckill_core::{AdmissionGate, SeckillEngine, StockCatalog, TokenSigner};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{Config, QueueBackendKind, Role};
use queue::{MemoryBackend, QueueBackend, QueueSet, RedisBackend};
use store::{ConfigStore, FileConfigStore, StockStore, Version};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1) プロセス初期化（ログ + 設定）
    init_tracing();
    let config = Config::from_env();
    info!(
        role = config.role.as_str(),
        port = config.port,
        queue_backend = ?config.queue_backend,
        lock = ?config.lock_strategy,
        "Seckill server starting"
    );

    // 2) キューとカタログ（どちらも失敗したら起動しない）
    let queues = init_queues(&config).await?;
    let config_store: Arc<dyn ConfigStore> = Arc::new(FileConfigStore::new(&config.config_store_path));
    let stock_store = Arc::new(StockStore::new(&config.stock_store_path));
    let (catalog, version) = init_catalog(&config, config_store.as_ref(), &stock_store)?;
    let applied = Arc::new(sync::AppliedVersion::new(version));

    let mut health = server::http::HealthProbe::new(config.role.as_str(), queues.clone());

    // 3) バック層
    if config.role.runs_back() {
        health = start_back_tier(
            &config,
            &queues,
            &catalog,
            &config_store,
            &stock_store,
            &applied,
            health,
        )?;
    }

    // 4) カタログ更新はどちらの層でも回す（フロントの事前チェック用）
    sync::CatalogRefresher::new(
        Arc::clone(&catalog),
        Arc::clone(&config_store),
        Arc::clone(&applied),
        config.refresh_mode,
    )
    .start(config.catalog_refresh_interval);

    // 5) フロント層 + HTTP
    if config.role.runs_front() {
        let state = start_front_tier(&config, &queues, &catalog, health);
        tokio::select! {
            result = server::http::run(config.port, state) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "HTTP server exited with error");
                    return Err(e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
            }
        }
    } else {
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");
    }

    Ok(())
}

/// ログ出力基盤を初期化する。
/// `RUST_LOG` が無い場合は `info,seckill_server=debug` を既定値に使う。
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,seckill_server=debug".into()),
        )
        .init();
}

async fn init_queues(config: &Config) -> anyhow::Result<QueueSet> {
    let backend: Arc<dyn QueueBackend> = match config.queue_backend {
        QueueBackendKind::Memory => Arc::new(MemoryBackend::new()),
        QueueBackendKind::Redis => Arc::new(
            RedisBackend::connect(&config.redis_url)
                .await
                .with_context(|| format!("redis connect failed: {}", config.redis_url))?,
        ),
    };
    if backend.kind() == "memory" && config.role != Role::All {
        warn!("memory queues are process-local; split roles need QUEUE_BACKEND=redis");
    }
    info!(backend = backend.kind(), queues = ?config.queues, "Work queues initialized");
    Ok(QueueSet::open(backend, &config.queues))
}

/// 設定ストアから全件読み、前回の残数スナップショットを重ねる
fn init_catalog(
    config: &Config,
    config_store: &dyn ConfigStore,
    stock_store: &StockStore,
) -> anyhow::Result<(Arc<StockCatalog>, Version)> {
    let (records, version) = config_store
        .load()
        .with_context(|| format!("catalog load failed: {}", config.config_store_path))?;
    let catalog = Arc::new(StockCatalog::from_records(records));

    match stock_store.load() {
        Ok(levels) => {
            let restored = catalog.restore_levels(&levels);
            info!(restored, "stock levels restored");
        }
        Err(e) => warn!(error = %e, "stock snapshot unreadable, starting from config store"),
    }
    info!(products = catalog.len(), version = %version, "StockCatalog initialized");
    Ok((catalog, version))
}

fn start_back_tier(
    config: &Config,
    queues: &QueueSet,
    catalog: &Arc<StockCatalog>,
    config_store: &Arc<dyn ConfigStore>,
    stock_store: &Arc<StockStore>,
    applied: &Arc<sync::AppliedVersion>,
    health: server::http::HealthProbe,
) -> anyhow::Result<server::http::HealthProbe> {
    let signer = TokenSigner::new(config.token_secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("token signer init failed: {e}"))?;
    let engine = Arc::new(SeckillEngine::new(
        Arc::clone(catalog),
        signer,
        config.lock_strategy,
    ));

    let worker = Arc::new(back::EngineWorker::new(
        engine,
        queues.clone(),
        config.max_request_age,
    ));
    worker.spawn(config.handle_workers);

    let sink = Arc::new(back::OrderSink::new(
        Arc::clone(&queues.orders),
        &config.order_log_path,
    ));
    sink.spawn(config.order_flush_interval);

    sync::PersistenceSync::new(
        Arc::clone(catalog),
        Arc::clone(stock_store),
        Arc::clone(config_store),
        Arc::clone(applied),
    )
    .start(config.persist_interval);

    Ok(health.with_worker(worker).with_sink(sink))
}

fn start_front_tier(
    config: &Config,
    queues: &QueueSet,
    catalog: &Arc<StockCatalog>,
    health: server::http::HealthProbe,
) -> server::http::AppState {
    let gate = Arc::new(AdmissionGate::new(config.access_limits));
    let seeded = sync::blacklist::seed(&gate, &config.blacklist_user_ids, &config.blacklist_addrs);
    info!(seeded, limits = ?config.access_limits, "AdmissionGate initialized");
    sync::BlacklistSync::new(Arc::clone(&gate), Arc::clone(&queues.blacklist)).spawn();

    let registry = Arc::new(front::CorrelationRegistry::new());
    let router = Arc::new(front::ResultRouter::new(
        Arc::clone(&registry),
        Arc::clone(&queues.results),
    ));
    router.spawn(config.read_result_workers);

    let submitter = Arc::new(front::Submitter::new(
        Arc::clone(&registry),
        Arc::clone(&queues.requests),
        queues.results.name(),
    ));
    let service = Arc::new(front::LoggingSeckill::new(front::SeckillService::new(
        Arc::clone(catalog),
        gate,
        submitter,
        config.wait_result_timeout,
    )));

    let jwt_auth = Arc::new(auth::JwtAuth::new(config.jwt_secret.as_deref(), 30));
    if !jwt_auth.is_configured() {
        warn!("JWT_HS256_SECRET is not set; /sec/kill will reject every request");
    }

    let health = health
        .with_front(Arc::clone(&service), registry)
        .with_router(router);
    server::http::AppState {
        service,
        jwt_auth,
        health: Arc::new(health),
    }
}

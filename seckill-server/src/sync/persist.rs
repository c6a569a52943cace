//! Persistence Sync
//!
//! 一定間隔でカタログの残数を
//! 1) 在庫ストアへ（再起動時の再開点）
//! 2) 設定ストアへ（バージョン付き。不一致なら次回に回す）
//! 書き出す。失敗しても判定処理は止めない。
//!
//! 設定ストアに未反映の外部変更があるときは 2) を見送る（先にリフレッシュで取り込む）。

use seckill_core::{unix_now, ProductStatus, StockCatalog};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::AppliedVersion;
use crate::store::{ConfigStore, ConfigStoreError, StockStore, Version};

/// 1 回分の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    pub products: usize,
    pub stock_saved: bool,
    /// 設定ストアに書いたバージョン（見送り・失敗時 None）
    pub config_version: Option<Version>,
}

enum ConfigWrite {
    Written(Version),
    /// 外部変更がまだカタログに反映されていない
    Pending { store: Version, applied: Version },
}

pub struct PersistenceSync {
    catalog: Arc<StockCatalog>,
    stock_store: Arc<StockStore>,
    config_store: Arc<dyn ConfigStore>,
    applied: Arc<AppliedVersion>,
}

impl PersistenceSync {
    pub fn new(
        catalog: Arc<StockCatalog>,
        stock_store: Arc<StockStore>,
        config_store: Arc<dyn ConfigStore>,
        applied: Arc<AppliedVersion>,
    ) -> Self {
        Self {
            catalog,
            stock_store,
            config_store,
            applied,
        }
    }

    pub fn start(self, interval: Duration) -> thread::JoinHandle<()> {
        info!(
            interval_sec = interval.as_secs(),
            stock_path = %self.stock_store.path().display(),
            "persistence sync started"
        );
        thread::spawn(move || loop {
            thread::sleep(interval);
            self.sync_once();
        })
    }

    pub fn sync_once(&self) -> SyncReport {
        let levels = self.catalog.stock_levels();
        let mut report = SyncReport {
            products: levels.len(),
            ..SyncReport::default()
        };

        match self.stock_store.save(&levels, unix_now()) {
            Ok(()) => report.stock_saved = true,
            Err(e) => warn!(error = %e, "stock snapshot write failed"),
        }

        match self.write_config_store() {
            Ok(ConfigWrite::Written(version)) => {
                debug!(products = report.products, version = %version, "config store synced");
                report.config_version = Some(version);
            }
            Ok(ConfigWrite::Pending { store, applied }) => {
                debug!(%store, %applied, "config store has unapplied changes, skip write");
            }
            Err(ConfigStoreError::VersionMismatch { expected, actual }) => {
                warn!(%expected, %actual, "config store changed concurrently, retry next cycle");
            }
            Err(e) => warn!(error = %e, "config store sync failed"),
        }
        report
    }

    /// 設定ストアの商品配列に、エンジン所有フィールド（残数 / SoldOut）だけ上書きする
    fn write_config_store(&self) -> Result<ConfigWrite, ConfigStoreError> {
        let mut applied = self.applied.lock();
        let (mut products, version) = self.config_store.load()?;
        if version != *applied {
            return Ok(ConfigWrite::Pending {
                store: version,
                applied: *applied,
            });
        }
        let live: HashMap<u64, (u32, u32, ProductStatus)> = self
            .catalog
            .snapshot()
            .into_iter()
            .map(|p| (p.product_id, (p.total, p.left_num, p.status)))
            .collect();

        for p in products.iter_mut() {
            let Some(&(total, left_num, status)) = live.get(&p.product_id) else {
                continue;
            };
            // total が変わっていれば補充中なので触らない
            if p.total != total {
                continue;
            }
            p.left_num = left_num;
            if status == ProductStatus::SoldOut {
                p.status = ProductStatus::SoldOut;
            }
        }
        let written = self.config_store.store(&products, version)?;
        // 自分の書き込みはリフレッシュ対象にしない
        *applied = written;
        Ok(ConfigWrite::Written(written))
    }
}

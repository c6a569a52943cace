//! カタログリフレッシュ
//!
//! 一定間隔で設定ストアを読み、バージョンが変わっていたときだけカタログへ反映する。
//! 自分の永続化で上がったバージョンは反映済み扱い（`AppliedVersion`）。
//! - Merge  : total が同じ商品は残数の小さい方と SoldOut を保持する（既定）
//! - Replace: 全件入れ替え。外部変更と同時に進んだ減算はストア側の値で上書きされうる

use seckill_core::StockCatalog;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::AppliedVersion;
use crate::config::RefreshMode;
use crate::store::{ConfigStore, ConfigStoreError, Version};

pub struct CatalogRefresher {
    catalog: Arc<StockCatalog>,
    store: Arc<dyn ConfigStore>,
    applied: Arc<AppliedVersion>,
    mode: RefreshMode,
}

impl CatalogRefresher {
    pub fn new(
        catalog: Arc<StockCatalog>,
        store: Arc<dyn ConfigStore>,
        applied: Arc<AppliedVersion>,
        mode: RefreshMode,
    ) -> Self {
        Self {
            catalog,
            store,
            applied,
            mode,
        }
    }

    pub fn start(self, interval: Duration) -> thread::JoinHandle<()> {
        info!(
            interval_sec = interval.as_secs(),
            mode = ?self.mode,
            version = %self.applied.get(),
            "catalog refresh started"
        );
        thread::spawn(move || loop {
            thread::sleep(interval);
            if let Err(e) = self.refresh_once() {
                // 前回のカタログで動き続ける
                warn!(error = %e, "catalog refresh failed");
            }
        })
    }

    /// 反映した商品数と新しいバージョン。ストアが変わっていなければ None
    pub fn refresh_once(&self) -> Result<Option<(usize, Version)>, ConfigStoreError> {
        let mut applied = self.applied.lock();
        let (records, version) = self.store.load()?;
        if version == *applied {
            return Ok(None);
        }
        let n = match self.mode {
            RefreshMode::Replace => self.catalog.replace(records),
            RefreshMode::Merge => self.catalog.merge(records),
        };
        let previous = *applied;
        debug!(products = n, from = %previous, to = %version, "catalog refreshed");
        *applied = version;
        Ok(Some((n, version)))
    }
}

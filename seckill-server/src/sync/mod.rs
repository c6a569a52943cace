//! バックグラウンド同期ループ（永続化 / カタログ更新 / ブラックリスト）

pub mod blacklist;
pub mod persist;
pub mod refresh;

pub use blacklist::BlacklistSync;
pub use persist::PersistenceSync;
pub use refresh::CatalogRefresher;

use parking_lot::{Mutex, MutexGuard};

use crate::store::Version;

/// カタログに反映済みの設定ストアバージョン
///
/// リフレッシュと永続化は、このロックを持ったまま設定ストアを読み書きする。
/// 永続化が書いたバージョンはここで反映済みになるので、リフレッシュは読み直さない。
#[derive(Debug, Default)]
pub struct AppliedVersion {
    inner: Mutex<Version>,
}

impl AppliedVersion {
    pub fn new(version: Version) -> Self {
        Self {
            inner: Mutex::new(version),
        }
    }

    pub fn get(&self) -> Version {
        *self.inner.lock()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Version> {
        self.inner.lock()
    }
}

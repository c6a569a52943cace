//! 永続化ストア
//!
//! - 設定ストア: 商品配列の JSON ドキュメント（楽観バージョン付き）
//! - 在庫ストア: 商品ごとの残数スナップショット
//!
//! どちらもファイルを tmp に書いて rename で差し替える。

pub mod config_store;
pub mod stock_store;

pub use config_store::{ConfigStore, ConfigStoreError, FileConfigStore, Version};
pub use stock_store::StockStore;

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// tmp + rename で丸ごと置き換える
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = parent {
        std::fs::create_dir_all(dir)?;
    }
    let tmp_path = temp_path(path);
    {
        let mut f = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp_path)?;
        f.write_all(bytes)?;
        f.flush()?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    if let Some(dir) = parent {
        if let Ok(dir) = File::open(dir) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

//! 在庫ストア（残数スナップショット）
//!
//! 再起動時に元の total からではなく、最後に書き出した残数から再開するためのもの。

use seckill_core::StockLevel;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

use super::write_atomic;

#[derive(Debug, thiserror::Error)]
pub enum StockStoreError {
    #[error("stock store io error: {0}")]
    Io(#[from] io::Error),
    #[error("stock store document is invalid: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    saved_at: i64,
    levels: Vec<StockLevel>,
}

pub struct StockStore {
    path: PathBuf,
}

impl StockStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, levels: &[StockLevel], saved_at: i64) -> Result<(), StockStoreError> {
        let snapshot = Snapshot {
            saved_at,
            levels: levels.to_vec(),
        };
        let bytes = serde_json::to_vec(&snapshot)?;
        write_atomic(&self.path, &bytes)?;
        Ok(())
    }

    /// ファイルが無ければ空
    pub fn load(&self) -> Result<Vec<StockLevel>, StockStoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_str(&raw)?;
        Ok(snapshot.levels)
    }
}

//! 設定ストア（商品マスタ）
//!
//! 1 つの JSON ドキュメントを丸ごと読み書きする。
//! 書き込みは楽観ロック: 読んだときのバージョンと一致しなければ拒否。
//!
//! ファイル形式:
//! ```json
//! { "version": 3, "products": [ { "product_id": 1, ... } ] }
//! ```
//! 手書きのシード用に、素の配列（バージョン 0 扱い）も読める。

use parking_lot::Mutex;
use seckill_core::ProductRecord;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

use super::write_atomic;

/// 楽観ロック用のバージョン
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigStoreError {
    #[error("config store io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("config store document is invalid: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("config store version mismatch: expected {expected}, found {actual}")]
    VersionMismatch { expected: Version, actual: Version },
}

pub trait ConfigStore: Send + Sync {
    /// 商品配列と現在のバージョン
    fn load(&self) -> Result<(Vec<ProductRecord>, Version), ConfigStoreError>;

    /// `expected` が現在のバージョンと一致するときだけ書き込み、新しいバージョンを返す
    fn store(&self, products: &[ProductRecord], expected: Version) -> Result<Version, ConfigStoreError>;
}

#[derive(Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    version: Version,
    products: Vec<ProductRecord>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OnDisk {
    Versioned(Document),
    Bare(Vec<ProductRecord>),
}

pub struct FileConfigStore {
    path: PathBuf,
    // 読み → 比較 → 書きをプロセス内で直列化
    write_lock: Mutex<()>,
}

impl FileConfigStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Document, ConfigStoreError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| ConfigStoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(match serde_json::from_str::<OnDisk>(&raw)? {
            OnDisk::Versioned(doc) => doc,
            OnDisk::Bare(products) => Document {
                version: Version::default(),
                products,
            },
        })
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<(Vec<ProductRecord>, Version), ConfigStoreError> {
        let doc = self.read_document()?;
        Ok((doc.products, doc.version))
    }

    fn store(&self, products: &[ProductRecord], expected: Version) -> Result<Version, ConfigStoreError> {
        let _guard = self.write_lock.lock();
        let current = match self.read_document() {
            Ok(doc) => doc.version,
            // 初回作成
            Err(ConfigStoreError::Io { ref source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Version::default()
            }
            Err(e) => return Err(e),
        };
        if current != expected {
            return Err(ConfigStoreError::VersionMismatch {
                expected,
                actual: current,
            });
        }

        let next = current.next();
        let doc = Document {
            version: next,
            products: products.to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&doc)?;
        write_atomic(&self.path, &bytes).map_err(|source| ConfigStoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(next)
    }
}

/// テスト用のメモリ内ストア
#[cfg(test)]
#[derive(Default)]
pub struct MemoryConfigStore {
    inner: Mutex<(Vec<ProductRecord>, Version)>,
}

#[cfg(test)]
impl MemoryConfigStore {
    pub fn with_products(products: Vec<ProductRecord>) -> Self {
        Self {
            inner: Mutex::new((products, Version::default())),
        }
    }

    /// 外部の管理ツールによる書き換えを模す
    pub fn bump(&self, products: Vec<ProductRecord>) {
        let mut guard = self.inner.lock();
        let next = guard.1.next();
        *guard = (products, next);
    }
}

#[cfg(test)]
impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<(Vec<ProductRecord>, Version), ConfigStoreError> {
        let guard = self.inner.lock();
        Ok((guard.0.clone(), guard.1))
    }

    fn store(&self, products: &[ProductRecord], expected: Version) -> Result<Version, ConfigStoreError> {
        let mut guard = self.inner.lock();
        if guard.1 != expected {
            return Err(ConfigStoreError::VersionMismatch {
                expected,
                actual: guard.1,
            });
        }
        let next = guard.1.next();
        *guard = (products.to_vec(), next);
        Ok(next)
    }
}

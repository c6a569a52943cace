//! 在庫カタログ（Stock Catalog Cache）
//!
//! 商品状態をメモリ内に保持する。読み取りが圧倒的に多いので RwLock。
//! 残数（left_num）と status はエンジンだけが更新し、それ以外のフィールドは
//! 設定ストアからの定期リフレッシュで入れ替わる。

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 商品ステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    #[default]
    OnSale,
    SoldOut,
    Disabled,
}

/// 商品在庫レコード（設定ストアの JSON 配列の要素）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub product_id: u64,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub activity_name: String,
    /// 販売開始（unix 秒）
    pub start_time: i64,
    /// 販売終了（unix 秒）
    pub end_time: i64,
    pub activity_price: u64,
    pub total: u32,
    pub left_num: u32,
    pub max_buy_per_person: u32,
    /// フロント層で通過させる割合（1.0 = 全通過）
    #[serde(default = "default_buy_rate")]
    pub buy_rate: f64,
    #[serde(default)]
    pub status: ProductStatus,
}

fn default_buy_rate() -> f64 {
    1.0
}

impl ProductRecord {
    /// `0 <= left_num <= total` を強制する
    fn normalized(mut self) -> Self {
        if self.left_num > self.total {
            self.left_num = self.total;
        }
        self
    }

    pub fn is_sold_out(&self) -> bool {
        self.status == ProductStatus::SoldOut
    }

    pub fn not_started(&self, now: i64) -> bool {
        now < self.start_time
    }

    pub fn ended(&self, now: i64) -> bool {
        now > self.end_time
    }
}

/// 永続化される残数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: u64,
    pub total: u32,
    pub left_num: u32,
}

/// 在庫カタログ
///
/// プロセスのコンポジションルートで 1 つ作り、Arc で各層に配る。
#[derive(Debug, Default)]
pub struct StockCatalog {
    products: RwLock<HashMap<u64, ProductRecord>>,
}

impl StockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<ProductRecord>) -> Self {
        let catalog = Self::new();
        catalog.replace(records);
        catalog
    }

    /// 全件入れ替え（マージしない）
    ///
    /// 入れ替えと競合したエンジン側の減算は失われる。
    pub fn replace(&self, records: Vec<ProductRecord>) -> usize {
        let next: HashMap<u64, ProductRecord> = records
            .into_iter()
            .map(|r| (r.product_id, r.normalized()))
            .collect();
        let len = next.len();
        *self.products.write() = next;
        len
    }

    /// 入れ替えつつ、エンジンが所有するフィールドは保持する
    ///
    /// total が変わっていない商品は、残数を「メモリとストアの小さい方」、
    /// SoldOut をメモリ側から引き継ぐ。total が変わった商品（補充）はストア側を採用。
    pub fn merge(&self, records: Vec<ProductRecord>) -> usize {
        let mut guard = self.products.write();
        let mut next = HashMap::with_capacity(records.len());
        for incoming in records {
            let mut incoming = incoming.normalized();
            if let Some(current) = guard.get(&incoming.product_id) {
                if current.total == incoming.total {
                    incoming.left_num = incoming.left_num.min(current.left_num);
                    if current.status == ProductStatus::SoldOut {
                        incoming.status = ProductStatus::SoldOut;
                    }
                }
            }
            next.insert(incoming.product_id, incoming);
        }
        let len = next.len();
        *guard = next;
        len
    }

    pub fn get(&self, product_id: u64) -> Option<ProductRecord> {
        self.products.read().get(&product_id).cloned()
    }

    /// product_id 昇順のスナップショット
    pub fn snapshot(&self) -> Vec<ProductRecord> {
        let mut out: Vec<ProductRecord> = self.products.read().values().cloned().collect();
        out.sort_by_key(|p| p.product_id);
        out
    }

    /// 永続化用の残数一覧（product_id 昇順）
    pub fn stock_levels(&self) -> Vec<StockLevel> {
        let mut out: Vec<StockLevel> = self
            .products
            .read()
            .values()
            .map(|p| StockLevel {
                product_id: p.product_id,
                total: p.total,
                left_num: p.left_num,
            })
            .collect();
        out.sort_unstable_by_key(|l| l.product_id);
        out
    }

    /// 再起動時に、前回永続化した残数を重ねる
    ///
    /// total が一致する商品だけ、小さい方の残数を採用する。0 になれば SoldOut。
    /// 戻り値は適用した件数。
    pub fn restore_levels(&self, levels: &[StockLevel]) -> usize {
        let mut guard = self.products.write();
        let mut applied = 0;
        for level in levels {
            let Some(p) = guard.get_mut(&level.product_id) else {
                continue;
            };
            if p.total != level.total {
                continue;
            }
            p.left_num = p.left_num.min(level.left_num);
            if p.left_num == 0 && p.status == ProductStatus::OnSale {
                p.status = ProductStatus::SoldOut;
            }
            applied += 1;
        }
        applied
    }

    /// 書き込みロック下で 1 商品を更新する
    pub fn with_product_mut<R>(
        &self,
        product_id: u64,
        f: impl FnOnce(&mut ProductRecord) -> R,
    ) -> Option<R> {
        let mut guard = self.products.write();
        guard.get_mut(&product_id).map(f)
    }

    pub fn len(&self) -> usize {
        self.products.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.read().is_empty()
    }
}

#[cfg(test)]
pub(crate) fn sample_product(product_id: u64, total: u32, cap: u32) -> ProductRecord {
    ProductRecord {
        product_id,
        product_name: format!("product-{product_id}"),
        activity_name: format!("activity-{product_id}"),
        start_time: 0,
        end_time: i64::MAX,
        activity_price: 999,
        total,
        left_num: total,
        max_buy_per_person: cap,
        buy_rate: 1.0,
        status: ProductStatus::OnSale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_is_wholesale() {
        let catalog = StockCatalog::from_records(vec![sample_product(1, 10, 1), sample_product(2, 5, 1)]);
        catalog.with_product_mut(1, |p| p.left_num = 3);

        let n = catalog.replace(vec![sample_product(1, 10, 1)]);
        assert_eq!(n, 1);
        assert_eq!(catalog.get(1).unwrap().left_num, 10);
        assert!(catalog.get(2).is_none());
    }

    #[test]
    fn merge_keeps_engine_owned_fields() {
        let catalog = StockCatalog::from_records(vec![sample_product(1, 10, 1)]);
        catalog.with_product_mut(1, |p| {
            p.left_num = 0;
            p.status = ProductStatus::SoldOut;
        });

        let mut renamed = sample_product(1, 10, 1);
        renamed.product_name = "renamed".into();
        catalog.merge(vec![renamed]);

        let p = catalog.get(1).unwrap();
        assert_eq!(p.product_name, "renamed");
        assert_eq!(p.left_num, 0);
        assert_eq!(p.status, ProductStatus::SoldOut);
    }

    #[test]
    fn merge_takes_store_values_on_restock() {
        let catalog = StockCatalog::from_records(vec![sample_product(1, 10, 1)]);
        catalog.with_product_mut(1, |p| p.left_num = 2);

        catalog.merge(vec![sample_product(1, 20, 1)]);
        assert_eq!(catalog.get(1).unwrap().left_num, 20);
    }

    #[test]
    fn restore_levels_only_when_total_matches() {
        let catalog = StockCatalog::from_records(vec![sample_product(1, 10, 1), sample_product(2, 5, 1)]);
        let applied = catalog.restore_levels(&[
            StockLevel { product_id: 1, total: 10, left_num: 0 },
            StockLevel { product_id: 2, total: 8, left_num: 1 },
            StockLevel { product_id: 3, total: 1, left_num: 1 },
        ]);
        assert_eq!(applied, 1);

        let p1 = catalog.get(1).unwrap();
        assert_eq!(p1.left_num, 0);
        assert_eq!(p1.status, ProductStatus::SoldOut);
        // total が変わった商品は補充扱い
        assert_eq!(catalog.get(2).unwrap().left_num, 5);
        assert_eq!(
            catalog.stock_levels(),
            vec![
                StockLevel { product_id: 1, total: 10, left_num: 0 },
                StockLevel { product_id: 2, total: 5, left_num: 5 },
            ]
        );
    }

    #[test]
    fn left_num_is_clamped_to_total() {
        let mut p = sample_product(1, 5, 1);
        p.left_num = 50;
        let catalog = StockCatalog::from_records(vec![p]);
        assert_eq!(catalog.get(1).unwrap().left_num, 5);
    }

    #[test]
    fn record_json_uses_defaults() {
        let raw = r#"[{"product_id":3,"start_time":0,"end_time":100,"activity_price":10,
                      "total":4,"left_num":4,"max_buy_per_person":1}]"#;
        let records: Vec<ProductRecord> = serde_json::from_str(raw).unwrap();
        assert_eq!(records[0].status, ProductStatus::OnSale);
        assert_eq!(records[0].buy_rate, 1.0);
    }
}

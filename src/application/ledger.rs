//! Inventory ledger
//!
//! Stock only moves through here. Decrements are optimistic: read, check, then a
//! conditional write that fails if anyone else wrote in between. A lost race is
//! retried exactly once; losing twice is reported as insufficient stock.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::application::ports::StockStore;
use crate::domain::aggregates::LineItem;
use crate::domain::value_objects::ProductId;
use crate::{EcommerceError, Result};

/// Read-check-write rounds per decrement: the first try plus one retry.
const CAS_ATTEMPTS: usize = 2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StockLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl StockLine {
    /// Lines of the same product (different sizes) collapse into one.
    pub fn from_items(items: &[LineItem]) -> Vec<StockLine> {
        let mut merged: BTreeMap<ProductId, u32> = BTreeMap::new();
        for item in items {
            *merged.entry(item.product_id).or_default() += item.quantity;
        }
        merged.into_iter().map(|(product_id, quantity)| StockLine { product_id, quantity }).collect()
    }
}

/// Outcome of putting several lines back on the shelf. Each line stands alone.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestockReport {
    pub restored: Vec<StockLine>,
    pub failed: Vec<(StockLine, String)>,
}

impl RestockReport {
    pub fn is_complete(&self) -> bool { self.failed.is_empty() }
}

#[derive(Clone)]
pub struct InventoryLedger {
    store: Arc<dyn StockStore>,
}

impl InventoryLedger {
    pub fn new(store: Arc<dyn StockStore>) -> Self { Self { store } }

    pub fn store(&self) -> &Arc<dyn StockStore> { &self.store }

    pub async fn stock(&self, product_id: ProductId) -> Result<u32> {
        self.store.read_stock(product_id).await?.ok_or(EcommerceError::ProductNotFound(product_id))
    }

    /// Takes `quantity` units, returning the new stock.
    pub async fn try_decrement(&self, product_id: ProductId, quantity: u32) -> Result<u32> {
        if quantity == 0 { return Err(EcommerceError::InvalidQuantity); }
        let mut observed = 0;
        for attempt in 1..=CAS_ATTEMPTS {
            observed = self.stock(product_id).await?;
            if observed < quantity {
                return Err(EcommerceError::InsufficientStock { product_id, available: observed });
            }
            let new_stock = observed - quantity;
            if self.store.compare_and_set_stock(product_id, observed, new_stock).await? {
                debug!(%product_id, quantity, new_stock, attempt, "stock decremented");
                return Ok(new_stock);
            }
            debug!(%product_id, quantity, attempt, "lost stock race");
        }
        warn!(%product_id, quantity, observed, "stock contention persisted past retry");
        Err(EcommerceError::InsufficientStock { product_id, available: observed })
    }

    /// Puts `quantity` units back, returning the new stock.
    pub async fn increment(&self, product_id: ProductId, quantity: u32) -> Result<u32> {
        if quantity == 0 { return Err(EcommerceError::InvalidQuantity); }
        let new_stock = self.store.add_stock(product_id, quantity).await?;
        debug!(%product_id, quantity, new_stock, "stock incremented");
        Ok(new_stock)
    }

    /// Decrements every line or none: a failing line rolls back the ones already taken.
    pub async fn decrement_all(&self, lines: &[StockLine]) -> Result<()> {
        let mut applied: Vec<&StockLine> = Vec::with_capacity(lines.len());
        for line in lines {
            match self.try_decrement(line.product_id, line.quantity).await {
                Ok(_) => applied.push(line),
                Err(e) => {
                    warn!(product_id = %line.product_id, quantity = line.quantity, error = %e, compensating = applied.len(), "multi-line decrement failed");
                    for done in applied {
                        if let Err(ce) = self.increment(done.product_id, done.quantity).await {
                            error!(product_id = %done.product_id, quantity = done.quantity, error = %ce, "compensating increment failed, stock is short");
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    pub async fn restore_all(&self, lines: &[StockLine]) -> RestockReport {
        let mut report = RestockReport::default();
        for line in lines {
            match self.increment(line.product_id, line.quantity).await {
                Ok(new_stock) => {
                    info!(product_id = %line.product_id, quantity = line.quantity, new_stock, "stock restored");
                    report.restored.push(line.clone());
                }
                Err(e) => {
                    error!(product_id = %line.product_id, quantity = line.quantity, error = %e, "stock restore failed");
                    report.failed.push((line.clone(), e.to_string()));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory::InMemoryStore;

    fn ledger_with(stock: u32) -> (InventoryLedger, InMemoryStore) {
        let store = InMemoryStore::new();
        store.seed_product(ProductId(1), "Tote", 1500, stock);
        (InventoryLedger::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_decrement_and_insufficient() {
        let (ledger, _) = ledger_with(5);
        assert_eq!(ledger.try_decrement(ProductId(1), 2).await.unwrap(), 3);
        let err = ledger.try_decrement(ProductId(1), 4).await.unwrap_err();
        assert!(matches!(err, EcommerceError::InsufficientStock { available: 3, .. }));
        assert_eq!(ledger.stock(ProductId(1)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_zero_quantity_and_unknown_product() {
        let (ledger, _) = ledger_with(5);
        assert!(matches!(ledger.try_decrement(ProductId(1), 0).await, Err(EcommerceError::InvalidQuantity)));
        assert!(matches!(ledger.try_decrement(ProductId(9), 1).await, Err(EcommerceError::ProductNotFound(_))));
        assert!(matches!(ledger.increment(ProductId(9), 1).await, Err(EcommerceError::ProductNotFound(_))));
    }

    #[tokio::test]
    async fn test_one_lost_race_is_retried() {
        let (ledger, store) = ledger_with(5);
        // Another writer takes one unit between our read and our write.
        store.interfere(ProductId(1), vec![-1]);
        assert_eq!(ledger.try_decrement(ProductId(1), 2).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_two_lost_races_report_insufficient() {
        let (ledger, store) = ledger_with(5);
        store.interfere(ProductId(1), vec![-1, -1]);
        let err = ledger.try_decrement(ProductId(1), 2).await.unwrap_err();
        assert!(matches!(err, EcommerceError::InsufficientStock { .. }));
        assert_eq!(ledger.stock(ProductId(1)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retry_rechecks_availability() {
        let (ledger, store) = ledger_with(2);
        store.interfere(ProductId(1), vec![-1]);
        let err = ledger.try_decrement(ProductId(1), 2).await.unwrap_err();
        assert!(matches!(err, EcommerceError::InsufficientStock { available: 1, .. }));
    }

    #[tokio::test]
    async fn test_decrement_all_compensates() {
        let store = InMemoryStore::new();
        store.seed_product(ProductId(1), "A", 100, 5);
        store.seed_product(ProductId(2), "B", 100, 1);
        let ledger = InventoryLedger::new(Arc::new(store.clone()));
        let lines = vec![
            StockLine { product_id: ProductId(1), quantity: 2 },
            StockLine { product_id: ProductId(2), quantity: 3 },
        ];
        assert!(ledger.decrement_all(&lines).await.is_err());
        assert_eq!(ledger.stock(ProductId(1)).await.unwrap(), 5);
        assert_eq!(ledger.stock(ProductId(2)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_restore_all_reports_each_line() {
        let (ledger, _) = ledger_with(0);
        let report = ledger.restore_all(&[
            StockLine { product_id: ProductId(1), quantity: 2 },
            StockLine { product_id: ProductId(42), quantity: 1 },
        ]).await;
        assert_eq!(report.restored.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.is_complete());
        assert_eq!(ledger.stock(ProductId(1)).await.unwrap(), 2);
    }

    #[test]
    fn test_stock_lines_merge_sizes() {
        use crate::domain::aggregates::order::tests::line;
        let mut small = line(1, 1, 10);
        small.size = Some("S".into());
        let lines = StockLine::from_items(&[line(1, 2, 10), small, line(2, 1, 10)]);
        assert_eq!(lines, vec![
            StockLine { product_id: ProductId(1), quantity: 3 },
            StockLine { product_id: ProductId(2), quantity: 1 },
        ]);
    }
}

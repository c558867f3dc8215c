//! Product as seen by the inventory core
//!
//! Catalog CRUD lives elsewhere; this crate only reads a product's name and price
//! to snapshot order lines, and owns the `stock` counter through the ledger.

use serde::{Deserialize, Serialize};
use crate::domain::aggregates::order::LineItem;
use crate::domain::value_objects::{Money, ProductId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub stock: u32,
}

impl Product {
    /// Freezes name and price into an order line; later catalog edits do not reach it.
    pub fn snapshot_line(&self, quantity: u32, size: Option<String>) -> LineItem {
        LineItem {
            product_id: self.id,
            name: self.name.clone(),
            quantity,
            unit_price: self.price.clone(),
            subtotal: self.price.multiply(quantity),
            size,
        }
    }
}

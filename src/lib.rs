//! Storefront core
//!
//! Inventory concurrency control coupled to the order and refund lifecycle.
//!
//! ## Features
//! - Compare-and-set stock ledger with a single bounded retry
//! - Server-owned, TTL-bound stock holds for carts
//! - Order and return-case state machines
//! - Refund orchestration against a hosted payment processor
//! - Best-effort customer notifications

pub mod api;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

use thiserror::Error;

use crate::domain::aggregates::{CartError, OrderError, ReturnError};
use crate::domain::value_objects::{Money, MoneyError, OrderId, ProductId, ReturnCaseId, SessionIdError};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum EcommerceError {
    #[error("Product {0} not found")]
    ProductNotFound(ProductId),

    #[error("Order {0} not found")]
    OrderNotFound(OrderId),

    #[error("Return case {0} not found")]
    ReturnCaseNotFound(ReturnCaseId),

    #[error("Insufficient stock for product {product_id}: {available} available")]
    InsufficientStock { product_id: ProductId, available: u32 },

    #[error("Invalid quantity")]
    InvalidQuantity,

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Refund {refund} exceeds order total {total}")]
    RefundExceedsTotal { refund: Money, total: Money },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{0} was modified concurrently")]
    ConcurrentModification(String),

    #[error("Payment gateway failure: {0}")]
    Gateway(String),

    #[error("Invalid webhook signature: {0}")]
    SignatureInvalid(String),

    #[error("Messaging error: {0}")]
    Messaging(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, EcommerceError>;

impl From<OrderError> for EcommerceError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::InvalidTransition { .. } => Self::InvalidStateTransition(e.to_string()),
            OrderError::NoItems | OrderError::ZeroQuantity | OrderError::CurrencyMismatch => Self::Validation(e.to_string()),
        }
    }
}

impl From<ReturnError> for EcommerceError {
    fn from(e: ReturnError) -> Self {
        match e {
            ReturnError::InvalidTransition { .. } | ReturnError::ConfirmationUnderway => Self::InvalidStateTransition(e.to_string()),
            ReturnError::RefundExceedsTotal { refund, total } => Self::RefundExceedsTotal { refund, total },
            _ => Self::Validation(e.to_string()),
        }
    }
}

impl From<CartError> for EcommerceError {
    fn from(e: CartError) -> Self {
        match e {
            CartError::UnknownProduct(id) => Self::ProductNotFound(id),
            CartError::ZeroQuantity => Self::InvalidQuantity,
        }
    }
}

impl From<MoneyError> for EcommerceError {
    fn from(e: MoneyError) -> Self { Self::Validation(e.to_string()) }
}

impl From<SessionIdError> for EcommerceError {
    fn from(e: SessionIdError) -> Self { Self::Validation(e.to_string()) }
}

impl From<sqlx::Error> for EcommerceError {
    fn from(e: sqlx::Error) -> Self { Self::Storage(e.to_string()) }
}

impl From<serde_json::Error> for EcommerceError {
    fn from(e: serde_json::Error) -> Self { Self::Storage(e.to_string()) }
}

//! Boundaries to the outside world: stores, the payment processor, and messaging.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::domain::aggregates::{CheckoutSnapshot, Hold, Order, Product, ReturnCase};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::{Money, OrderId, PaymentReference, ProductId, ReturnCaseId, SessionId};
use crate::Result;

/// Authoritative stock. Implementations must never write `stock` unconditionally.
#[async_trait]
pub trait StockStore: Send + Sync {
    async fn product(&self, id: ProductId) -> Result<Option<Product>>;

    async fn read_stock(&self, id: ProductId) -> Result<Option<u32>>;

    /// Writes `new` only if the stored stock still equals `expected`.
    /// `Ok(false)` means another writer got there first.
    async fn compare_and_set_stock(&self, id: ProductId, expected: u32, new: u32) -> Result<bool>;

    /// Atomic in-store increment (`stock = stock + n`), returning the new stock.
    ///
    /// The only stock write that skips the compare-and-set: restoring units can never
    /// drive stock negative, so there is nothing for a concurrent writer to invalidate.
    async fn add_stock(&self, id: ProductId, quantity: u32) -> Result<u32>;
}

#[derive(Clone, Debug)]
pub struct HoldRequest {
    pub session_id: SessionId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub now: DateTime<Utc>,
    pub ttl: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HoldOutcome {
    /// `available` is what remains claimable by anyone once this hold is counted.
    Placed { hold: Hold, available: u32 },
    Refused { available: u32 },
}

#[async_trait]
pub trait HoldStore: Send + Sync {
    /// Places or renews a hold. Stock and the other sessions' live holds are read in
    /// the same atomic step as the write.
    async fn place_hold(&self, request: HoldRequest) -> Result<HoldOutcome>;

    async fn release_hold(&self, session_id: &SessionId, product_id: ProductId) -> Result<Option<Hold>>;

    async fn release_session(&self, session_id: &SessionId) -> Result<Vec<Hold>>;

    async fn live_holds(&self, product_id: ProductId, now: DateTime<Utc>) -> Result<Vec<Hold>>;

    async fn session_holds(&self, session_id: &SessionId, now: DateTime<Utc>) -> Result<Vec<Hold>>;

    /// Deletes holds that expired at or before `now`; returns how many went.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// `Ok(false)` if an order for the same payment reference already exists.
    async fn insert_order(&self, order: &Order) -> Result<bool>;

    async fn order(&self, id: OrderId) -> Result<Option<Order>>;

    async fn order_by_payment(&self, payment_reference: &PaymentReference) -> Result<Option<Order>>;

    /// Conditional on the stored version matching `order.version()`; bumps it on success.
    async fn update_order(&self, order: &Order) -> Result<bool>;
}

#[async_trait]
pub trait ReturnStore: Send + Sync {
    /// Inserts the case and writes the order in one atomic step, conditional on the order's version.
    async fn open_return(&self, case: &ReturnCase, order: &Order) -> Result<bool>;

    async fn return_case(&self, id: ReturnCaseId) -> Result<Option<ReturnCase>>;

    /// Conditional on the stored version matching `case.version()`.
    async fn update_return(&self, case: &ReturnCase) -> Result<bool>;

    /// Writes a decided case and its order together, each conditional on its version.
    async fn resolve_return(&self, case: &ReturnCase, order: &Order) -> Result<bool>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PaymentSession {
    pub id: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefundReceipt {
    pub reference: String,
    pub amount: Money,
}

/// The sole integration point for money movement.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_session(&self, snapshot: &CheckoutSnapshot) -> Result<PaymentSession>;

    async fn retrieve_payment_reference(&self, session_id: &str) -> Result<PaymentReference>;

    /// `amount: None` refunds the full payment. Repeating a call with the same
    /// `idempotency_key` must not move money twice.
    async fn refund(&self, payment: &PaymentReference, amount: Option<&Money>, idempotency_key: &str) -> Result<RefundReceipt>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplate {
    OrderConfirmed,
    OrderShipped,
    OrderCancelled,
    ReturnInProcess,
    ReturnConfirmed,
    ReturnRejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    CreditNote { number: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub template: NotificationTemplate,
    pub to: String,
    pub order_id: OrderId,
    pub return_case_id: Option<ReturnCaseId>,
    pub attachment: Option<Attachment>,
}

/// Fire-and-forget email. Callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<()>;
}

//! In-memory adapters
//!
//! One mutex guards all state, so each trait method is atomic on its own.
//! Two calls in a row are not atomic together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::application::ports::{
    EventPublisher, HoldOutcome, HoldRequest, HoldStore, Notification, Notifier, OrderStore, PaymentGateway,
    PaymentSession, RefundReceipt, ReturnStore, StockStore,
};
use crate::domain::aggregates::reservation;
use crate::domain::aggregates::{CheckoutSnapshot, Hold, Order, OrderRecord, Product, ReturnCase, ReturnRecord};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::{Money, OrderId, PaymentReference, ProductId, ReturnCaseId, SessionId};
use crate::{EcommerceError, Result};

#[derive(Default)]
struct State {
    products: HashMap<ProductId, Product>,
    holds: HashMap<(SessionId, ProductId), Hold>,
    orders: HashMap<OrderId, OrderRecord>,
    returns: HashMap<ReturnCaseId, ReturnRecord>,
    /// Stock changes applied by a phantom writer right before the next CAS on a product.
    interference: HashMap<ProductId, VecDeque<i64>>,
    /// Order inserts that fail with a storage error before any succeeds.
    failing_order_inserts: u32,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn seed_product(&self, id: ProductId, name: &str, price_cents: i64, stock: u32) {
        let product = Product { id, name: name.to_string(), price: Money::eur(Decimal::new(price_cents, 2)), stock };
        self.state.lock().products.insert(id, product);
    }

    pub fn stock_of(&self, id: ProductId) -> Option<u32> {
        self.state.lock().products.get(&id).map(|p| p.stock)
    }

    pub fn hold_count(&self) -> usize { self.state.lock().holds.len() }

    pub fn order_count(&self) -> usize { self.state.lock().orders.len() }

    /// Simulates other writers racing each upcoming CAS on `id`.
    pub fn interfere(&self, id: ProductId, deltas: Vec<i64>) {
        self.state.lock().interference.entry(id).or_default().extend(deltas);
    }

    /// Makes the next `count` order inserts fail as a lost database connection would.
    pub fn fail_order_inserts(&self, count: u32) {
        self.state.lock().failing_order_inserts = count;
    }
}

fn apply_delta(stock: u32, delta: i64) -> u32 {
    (i64::from(stock) + delta).clamp(0, i64::from(u32::MAX)) as u32
}

#[async_trait]
impl StockStore for InMemoryStore {
    async fn product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.lock().products.get(&id).cloned())
    }

    async fn read_stock(&self, id: ProductId) -> Result<Option<u32>> {
        Ok(self.state.lock().products.get(&id).map(|p| p.stock))
    }

    async fn compare_and_set_stock(&self, id: ProductId, expected: u32, new: u32) -> Result<bool> {
        let mut state = self.state.lock();
        let delta = state.interference.get_mut(&id).and_then(VecDeque::pop_front);
        let product = state.products.get_mut(&id).ok_or(EcommerceError::ProductNotFound(id))?;
        if let Some(delta) = delta {
            product.stock = apply_delta(product.stock, delta);
        }
        if product.stock != expected { return Ok(false); }
        product.stock = new;
        Ok(true)
    }

    async fn add_stock(&self, id: ProductId, quantity: u32) -> Result<u32> {
        let mut state = self.state.lock();
        let product = state.products.get_mut(&id).ok_or(EcommerceError::ProductNotFound(id))?;
        product.stock = product.stock.saturating_add(quantity);
        Ok(product.stock)
    }
}

#[async_trait]
impl HoldStore for InMemoryStore {
    async fn place_hold(&self, request: HoldRequest) -> Result<HoldOutcome> {
        let mut state = self.state.lock();
        let stock = state.products.get(&request.product_id).map(|p| p.stock)
            .ok_or(EcommerceError::ProductNotFound(request.product_id))?;
        let key = (request.session_id.clone(), request.product_id);
        let held_by_others = reservation::held_quantity(
            state.holds.values().filter(|h| h.session_id != request.session_id),
            request.product_id,
            request.now,
        );
        let placed = reservation::place(
            state.holds.get(&key), held_by_others, stock, &request.session_id,
            request.product_id, request.quantity, request.now, request.ttl,
        );
        match placed {
            Ok(hold) => {
                state.holds.insert(key, hold.clone());
                let available = reservation::available(request.product_id, stock, state.holds.values(), request.now);
                Ok(HoldOutcome::Placed { hold, available })
            }
            Err(available) => Ok(HoldOutcome::Refused { available }),
        }
    }

    async fn release_hold(&self, session_id: &SessionId, product_id: ProductId) -> Result<Option<Hold>> {
        Ok(self.state.lock().holds.remove(&(session_id.clone(), product_id)))
    }

    async fn release_session(&self, session_id: &SessionId) -> Result<Vec<Hold>> {
        let mut state = self.state.lock();
        let keys: Vec<_> = state.holds.keys().filter(|(s, _)| s == session_id).cloned().collect();
        Ok(keys.iter().filter_map(|k| state.holds.remove(k)).collect())
    }

    async fn live_holds(&self, product_id: ProductId, now: DateTime<Utc>) -> Result<Vec<Hold>> {
        Ok(self.state.lock().holds.values()
            .filter(|h| h.product_id == product_id && h.is_active(now))
            .cloned().collect())
    }

    async fn session_holds(&self, session_id: &SessionId, now: DateTime<Utc>) -> Result<Vec<Hold>> {
        Ok(self.state.lock().holds.values()
            .filter(|h| &h.session_id == session_id && h.is_active(now))
            .cloned().collect())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock();
        let before = state.holds.len();
        state.holds.retain(|_, h| h.is_active(now));
        Ok((before - state.holds.len()) as u64)
    }
}

fn version_matches<K: std::hash::Hash + Eq, V>(map: &HashMap<K, V>, key: &K, expected: i64, version: impl Fn(&V) -> i64) -> bool {
    map.get(key).is_some_and(|v| version(v) == expected)
}

fn bumped_order(order: &Order) -> OrderRecord {
    let mut record = order.record().clone();
    record.version += 1;
    record
}

fn bumped_return(case: &ReturnCase) -> ReturnRecord {
    let mut record = case.record().clone();
    record.version += 1;
    record
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<bool> {
        let mut state = self.state.lock();
        if state.failing_order_inserts > 0 {
            state.failing_order_inserts -= 1;
            return Err(EcommerceError::Storage("connection reset".into()));
        }
        if state.orders.values().any(|o| &o.payment_reference == order.payment_reference()) {
            return Ok(false);
        }
        state.orders.insert(order.id(), bumped_order(order));
        Ok(true)
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.lock().orders.get(&id).cloned().map(Order::restore))
    }

    async fn order_by_payment(&self, payment_reference: &PaymentReference) -> Result<Option<Order>> {
        Ok(self.state.lock().orders.values()
            .find(|o| &o.payment_reference == payment_reference)
            .cloned().map(Order::restore))
    }

    async fn update_order(&self, order: &Order) -> Result<bool> {
        let mut state = self.state.lock();
        if !version_matches(&state.orders, &order.id(), order.version(), |o| o.version) { return Ok(false); }
        state.orders.insert(order.id(), bumped_order(order));
        Ok(true)
    }
}

#[async_trait]
impl ReturnStore for InMemoryStore {
    async fn open_return(&self, case: &ReturnCase, order: &Order) -> Result<bool> {
        let mut state = self.state.lock();
        if !version_matches(&state.orders, &order.id(), order.version(), |o| o.version) { return Ok(false); }
        state.orders.insert(order.id(), bumped_order(order));
        state.returns.insert(case.id(), bumped_return(case));
        Ok(true)
    }

    async fn return_case(&self, id: ReturnCaseId) -> Result<Option<ReturnCase>> {
        Ok(self.state.lock().returns.get(&id).cloned().map(ReturnCase::restore))
    }

    async fn update_return(&self, case: &ReturnCase) -> Result<bool> {
        let mut state = self.state.lock();
        if !version_matches(&state.returns, &case.id(), case.version(), |c| c.version) { return Ok(false); }
        state.returns.insert(case.id(), bumped_return(case));
        Ok(true)
    }

    async fn resolve_return(&self, case: &ReturnCase, order: &Order) -> Result<bool> {
        let mut state = self.state.lock();
        if !version_matches(&state.returns, &case.id(), case.version(), |c| c.version)
            || !version_matches(&state.orders, &order.id(), order.version(), |o| o.version)
        {
            return Ok(false);
        }
        state.returns.insert(case.id(), bumped_return(case));
        state.orders.insert(order.id(), bumped_order(order));
        Ok(true)
    }
}

// =============================================================================
// Payment, mail and event doubles
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRefund {
    pub payment: PaymentReference,
    pub requested: Option<Money>,
    pub receipt: RefundReceipt,
    pub idempotency_key: String,
}

#[derive(Default)]
struct GatewayState {
    sessions: HashMap<String, (CheckoutSnapshot, PaymentReference)>,
    amounts: HashMap<PaymentReference, Money>,
    refunds: Vec<RecordedRefund>,
    fail_refunds: bool,
    next_id: u32,
}

/// Payment processor stand-in. Sessions settle immediately; refunds honour idempotency keys.
#[derive(Clone, Default)]
pub struct InMemoryGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl InMemoryGateway {
    pub fn new() -> Self { Self::default() }

    pub fn set_fail_refunds(&self, fail: bool) { self.state.lock().fail_refunds = fail; }

    /// Refunds that actually moved money.
    pub fn refunds(&self) -> Vec<RecordedRefund> { self.state.lock().refunds.clone() }

    /// Records a settled payment, as if the customer paid outside a session.
    pub fn settle(&self, payment: &PaymentReference, amount: Money) {
        self.state.lock().amounts.insert(payment.clone(), amount);
    }

    pub fn session(&self, id: &str) -> Option<(CheckoutSnapshot, PaymentReference)> {
        self.state.lock().sessions.get(id).cloned()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    async fn create_payment_session(&self, snapshot: &CheckoutSnapshot) -> Result<PaymentSession> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("cs_test_{:04}", state.next_id);
        let payment = PaymentReference(format!("pi_test_{:04}", state.next_id));
        let total = snapshot.subtotal()?.add(&snapshot.shipping)?.saturating_sub(&snapshot.discount)?;
        state.amounts.insert(payment.clone(), total);
        state.sessions.insert(id.clone(), (snapshot.clone(), payment));
        Ok(PaymentSession { url: format!("https://pay.example.test/{id}"), id })
    }

    async fn retrieve_payment_reference(&self, session_id: &str) -> Result<PaymentReference> {
        self.state.lock().sessions.get(session_id).map(|(_, p)| p.clone())
            .ok_or_else(|| EcommerceError::Gateway(format!("no such session {session_id}")))
    }

    async fn refund(&self, payment: &PaymentReference, amount: Option<&Money>, idempotency_key: &str) -> Result<RefundReceipt> {
        let mut state = self.state.lock();
        if let Some(done) = state.refunds.iter().find(|r| r.idempotency_key == idempotency_key) {
            return Ok(done.receipt.clone());
        }
        if state.fail_refunds { return Err(EcommerceError::Gateway("processor unavailable".into())); }
        let settled = amount.cloned()
            .or_else(|| state.amounts.get(payment).cloned())
            .ok_or_else(|| EcommerceError::Gateway(format!("unknown payment {payment}")))?;
        state.next_id += 1;
        let receipt = RefundReceipt { reference: format!("re_test_{:04}", state.next_id), amount: settled };
        state.refunds.push(RecordedRefund {
            payment: payment.clone(), requested: amount.cloned(), receipt: receipt.clone(), idempotency_key: idempotency_key.to_string(),
        });
        Ok(receipt)
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> { self.sent.lock().clone() }
    pub fn set_failing(&self, failing: bool) { *self.failing.lock() = failing; }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        if *self.failing.lock() { return Err(EcommerceError::Messaging("smtp relay down".into())); }
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<DomainEvent>>>,
}

impl RecordingPublisher {
    pub fn published(&self) -> Vec<DomainEvent> { self.published.lock().clone() }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        self.published.lock().push(event.clone());
        Ok(())
    }
}

//! Order lifecycle orchestrator
//!
//! The only writer of order and return-case state. Every business event runs the
//! same sequence: inventory mutation, persistence, payment side effect, notification.
//! Restock and refund are separate fallible steps and are logged separately; neither
//! is taken as proof the other happened. Notifications never fail a transition.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::application::ledger::{InventoryLedger, StockLine};
use crate::application::ports::{
    Attachment, EventPublisher, Notification, NotificationTemplate, Notifier, OrderStore, PaymentGateway,
    PaymentSession, ReturnStore,
};
use crate::application::reservations::ReservationService;
use crate::domain::aggregates::{
    Cart, CartLine, CheckoutSnapshot, Order, RefundRecord, ReturnCase, ReturnLineRequest, ShippingPolicy,
};
use crate::domain::events::{DomainEvent, OrderEvent, ReturnEvent};
use crate::domain::value_objects::{
    CustomerContact, Money, OrderId, PaymentReference, ProductId, ReturnCaseId, SessionId, ShippingAddress,
};
use crate::{EcommerceError, Result};

#[derive(Clone, Debug)]
pub struct OrderPolicy {
    pub currency: String,
    pub shipping: ShippingPolicy,
    pub return_reason_min_len: usize,
}

#[derive(Clone, Debug)]
pub struct CheckoutRequest {
    pub session_id: SessionId,
    pub user_id: Option<String>,
    pub customer: CustomerContact,
    pub shipping_address: ShippingAddress,
    pub lines: Vec<CartLine>,
}

#[derive(Clone, Debug)]
pub struct CheckoutStarted {
    pub session: PaymentSession,
    pub total: Money,
}

pub struct OrderOrchestrator {
    ledger: InventoryLedger,
    reservations: ReservationService,
    orders: Arc<dyn OrderStore>,
    returns: Arc<dyn ReturnStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    events: Arc<dyn EventPublisher>,
    policy: OrderPolicy,
}

impl OrderOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: InventoryLedger,
        reservations: ReservationService,
        orders: Arc<dyn OrderStore>,
        returns: Arc<dyn ReturnStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        events: Arc<dyn EventPublisher>,
        policy: OrderPolicy,
    ) -> Self {
        Self { ledger, reservations, orders, returns, gateway, notifier, events, policy }
    }

    pub fn ledger(&self) -> &InventoryLedger { &self.ledger }
    pub fn reservations(&self) -> &ReservationService { &self.reservations }

    // -------------------------------------------------------------------------
    // Cart and checkout
    // -------------------------------------------------------------------------

    /// Returns the stock still available to other shoppers once this hold is counted.
    #[instrument(skip(self))]
    pub async fn add_to_cart(&self, session_id: &SessionId, product_id: ProductId, quantity: u32) -> Result<u32> {
        self.reservations.reserve(session_id, product_id, quantity).await
    }

    pub async fn remove_from_cart(&self, session_id: &SessionId, product_id: ProductId) -> Result<()> {
        self.reservations.release(session_id, product_id).await
    }

    /// Tops up holds to cover the cart, prices it, and opens a hosted payment session.
    #[instrument(skip(self, request), fields(session_id = %request.session_id))]
    pub async fn start_checkout(&self, request: CheckoutRequest) -> Result<CheckoutStarted> {
        let mut cart = Cart::new(request.session_id.clone());
        for line in request.lines { cart.add_line(line)?; }
        if cart.is_empty() { return Err(EcommerceError::Validation("cart is empty".into())); }

        let mut catalog = Vec::new();
        for line in cart_stock_lines(&cart) {
            let product = self.ledger.store().product(line.product_id).await?
                .ok_or(EcommerceError::ProductNotFound(line.product_id))?;
            let held = self.reservations.held_by(cart.session_id(), line.product_id).await?;
            if held < line.quantity {
                self.reservations.reserve(cart.session_id(), line.product_id, line.quantity - held).await?;
            }
            catalog.push(product);
        }

        let items = cart.price(&catalog)?;
        let subtotal = items.iter().try_fold(Money::zero(&self.policy.currency), |acc, i| acc.add(&i.subtotal))?;
        let snapshot = CheckoutSnapshot {
            session_id: cart.session_id().clone(),
            user_id: request.user_id,
            customer: request.customer,
            shipping_address: request.shipping_address,
            shipping: self.policy.shipping.charge_for(&subtotal)?,
            discount: Money::zero(&self.policy.currency),
            items,
        };
        let total = snapshot.subtotal()?.add(&snapshot.shipping)?.saturating_sub(&snapshot.discount)?;
        let session = self.gateway.create_payment_session(&snapshot).await?;
        info!(payment_session = %session.id, %total, "checkout started");
        Ok(CheckoutStarted { session, total })
    }

    /// Turns a confirmed payment into an order. Stock is decremented here, once.
    ///
    /// A redelivered confirmation for a known payment returns the existing order
    /// untouched. If stock cannot be taken, nothing is kept: applied decrements are
    /// rolled back, the payment is refunded in full, and no order is created. A failed
    /// refund or order insert is returned as an error so the confirmation is redelivered.
    #[instrument(skip(self, snapshot), fields(session_id = %snapshot.session_id))]
    pub async fn confirm_payment(
        &self,
        payment_session: &str,
        payment_reference: Option<PaymentReference>,
        snapshot: CheckoutSnapshot,
    ) -> Result<Order> {
        let payment_reference = match payment_reference {
            Some(r) => r,
            None => self.gateway.retrieve_payment_reference(payment_session).await?,
        };
        if let Some(existing) = self.orders.order_by_payment(&payment_reference).await? {
            info!(order_id = %existing.id(), %payment_reference, "payment already recorded");
            return Ok(existing);
        }

        let lines = StockLine::from_items(&snapshot.items);
        if let Err(e) = self.ledger.decrement_all(&lines).await {
            warn!(%payment_reference, error = %e, "stock unavailable for paid checkout, refunding");
            match self.gateway.refund(&payment_reference, None, &format!("unfulfillable-{payment_reference}")).await {
                Ok(receipt) => info!(%payment_reference, refund = %receipt.reference, amount = %receipt.amount, "unfulfillable checkout refunded"),
                Err(re) => {
                    // Surfaced so the processor redelivers; the retry reuses the idempotency key.
                    error!(%payment_reference, error = %re, "refund of unfulfillable checkout failed");
                    return Err(re);
                }
            }
            self.release_holds(&snapshot.session_id).await;
            return Err(e);
        }

        let session_id = snapshot.session_id.clone();
        let mut order = match Order::place(snapshot.into_new_order(payment_reference.clone())) {
            Ok(order) => order,
            Err(e) => {
                self.ledger.restore_all(&lines).await;
                return Err(e.into());
            }
        };
        match self.orders.insert_order(&order).await {
            Ok(true) => {}
            Ok(false) => {
                // Lost to a concurrent delivery of the same event.
                self.ledger.restore_all(&lines).await;
                return self.orders.order_by_payment(&payment_reference).await?
                    .ok_or_else(|| EcommerceError::ConcurrentModification(format!("order for payment {payment_reference}")));
            }
            Err(e) => {
                error!(%payment_reference, error = %e, "order insert failed, restoring stock");
                self.ledger.restore_all(&lines).await;
                return Err(e);
            }
        }
        order.mark_persisted();
        info!(order_id = %order.id(), %payment_reference, total = %order.total(), "order confirmed");
        self.release_holds(&session_id).await;
        self.dispatch(order.take_events(), order.customer()).await;
        Ok(order)
    }

    // -------------------------------------------------------------------------
    // Fulfilment
    // -------------------------------------------------------------------------

    pub async fn order(&self, order_id: OrderId) -> Result<Order> {
        self.orders.order(order_id).await?.ok_or(EcommerceError::OrderNotFound(order_id))
    }

    pub async fn return_case(&self, id: ReturnCaseId) -> Result<ReturnCase> {
        self.returns.return_case(id).await?.ok_or(EcommerceError::ReturnCaseNotFound(id))
    }

    #[instrument(skip(self))]
    pub async fn ship(&self, order_id: OrderId) -> Result<Order> {
        let mut order = self.order(order_id).await?;
        order.ship()?;
        self.save_order(&mut order).await?;
        info!(%order_id, "order shipped");
        self.dispatch(order.take_events(), order.customer()).await;
        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn deliver(&self, order_id: OrderId) -> Result<Order> {
        let mut order = self.order(order_id).await?;
        order.deliver()?;
        self.save_order(&mut order).await?;
        info!(%order_id, "order delivered");
        self.dispatch(order.take_events(), order.customer()).await;
        Ok(order)
    }

    /// Restock, then refund the full amount, then mark cancelled.
    ///
    /// The restock is claimed by a conditional write before any unit moves, so a
    /// retry after a failed refund goes straight to the refund.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<Order> {
        let mut order = self.order(order_id).await?;
        if order.begin_cancellation()? {
            self.save_order(&mut order).await?;
            let report = self.ledger.restore_all(&StockLine::from_items(order.items())).await;
            if report.is_complete() {
                info!(%order_id, lines = report.restored.len(), "cancelled order restocked");
            } else {
                error!(%order_id, failed = report.failed.len(), "cancelled order only partly restocked");
            }
        }

        let payment = order.payment_reference().clone();
        let receipt = self.gateway.refund(&payment, None, &format!("cancel-{order_id}")).await.map_err(|e| {
            error!(%order_id, payment_reference = %payment, error = %e, "cancellation refund failed, order left confirmed");
            e
        })?;
        info!(%order_id, refund = %receipt.reference, amount = %receipt.amount, "cancellation refunded");

        order.complete_cancellation(RefundRecord { reference: receipt.reference, amount: receipt.amount, refunded_at: Utc::now() })?;
        self.save_order(&mut order).await?;
        self.dispatch(order.take_events(), order.customer()).await;
        Ok(order)
    }

    // -------------------------------------------------------------------------
    // Returns
    // -------------------------------------------------------------------------

    #[instrument(skip(self, reason, lines))]
    pub async fn request_return(&self, order_id: OrderId, reason: &str, lines: &[ReturnLineRequest]) -> Result<ReturnCase> {
        let mut order = self.order(order_id).await?;
        let mut case = ReturnCase::open(&order, reason, lines, self.policy.return_reason_min_len)?;
        order.begin_return(case.id())?;
        if !self.returns.open_return(&case, &order).await? {
            return Err(EcommerceError::ConcurrentModification(format!("order {order_id}")));
        }
        order.mark_persisted();
        case.mark_persisted();
        info!(%order_id, return_case_id = %case.id(), refund_amount = %case.refund_amount(), "return opened");
        let mut events = order.take_events();
        events.extend(case.take_events());
        self.dispatch(events, order.customer()).await;
        Ok(case)
    }

    /// Partial refund of the returned lines, after putting them back on the shelf.
    ///
    /// The refund bound is checked before anything moves. The gateway's receipt is
    /// stored before the case is marked confirmed; a failed refund leaves it processing.
    #[instrument(skip(self))]
    pub async fn confirm_return(&self, return_case_id: ReturnCaseId) -> Result<ReturnCase> {
        let mut case = self.return_case(return_case_id).await?;
        let mut order = self.order(case.order_id()).await?;
        case.check_refundable(order.total())?;

        if case.begin_confirmation()? {
            self.save_return(&mut case).await?;
            let report = self.ledger.restore_all(&StockLine::from_items(case.returned_items())).await;
            if report.is_complete() {
                info!(%return_case_id, lines = report.restored.len(), "returned goods restocked");
            } else {
                error!(%return_case_id, failed = report.failed.len(), "returned goods only partly restocked");
            }
        }

        if case.refund().is_none() {
            let amount = case.refund_amount().clone();
            let receipt = self.gateway
                .refund(order.payment_reference(), Some(&amount), &format!("return-{return_case_id}"))
                .await
                .map_err(|e| {
                    error!(%return_case_id, error = %e, "return refund failed, case left processing");
                    e
                })?;
            info!(%return_case_id, refund = %receipt.reference, amount = %receipt.amount, "return refunded");
            case.record_refund(RefundRecord { reference: receipt.reference, amount: receipt.amount, refunded_at: Utc::now() })?;
            self.save_return(&mut case).await?;
        }

        case.confirm()?;
        order.complete_return()?;
        self.resolve(&mut case, &mut order).await?;
        Ok(case)
    }

    /// No stock or money moves on a rejection.
    #[instrument(skip(self, reason))]
    pub async fn reject_return(&self, return_case_id: ReturnCaseId, reason: &str) -> Result<ReturnCase> {
        let mut case = self.return_case(return_case_id).await?;
        case.reject(reason)?;
        let mut order = self.order(case.order_id()).await?;
        order.decline_return()?;
        self.resolve(&mut case, &mut order).await?;
        info!(%return_case_id, "return rejected");
        Ok(case)
    }

    // -------------------------------------------------------------------------
    // Plumbing
    // -------------------------------------------------------------------------

    async fn save_order(&self, order: &mut Order) -> Result<()> {
        if !self.orders.update_order(order).await? {
            return Err(EcommerceError::ConcurrentModification(format!("order {}", order.id())));
        }
        order.mark_persisted();
        Ok(())
    }

    async fn save_return(&self, case: &mut ReturnCase) -> Result<()> {
        if !self.returns.update_return(case).await? {
            return Err(EcommerceError::ConcurrentModification(format!("return case {}", case.id())));
        }
        case.mark_persisted();
        Ok(())
    }

    async fn resolve(&self, case: &mut ReturnCase, order: &mut Order) -> Result<()> {
        if !self.returns.resolve_return(case, order).await? {
            return Err(EcommerceError::ConcurrentModification(format!("return case {}", case.id())));
        }
        case.mark_persisted();
        order.mark_persisted();
        let mut events = case.take_events();
        events.extend(order.take_events());
        self.dispatch(events, order.customer()).await;
        Ok(())
    }

    async fn release_holds(&self, session_id: &SessionId) {
        if let Err(e) = self.reservations.release_session(session_id).await {
            warn!(%session_id, error = %e, "holds not released, they will lapse");
        }
    }

    /// Publishes events and sends the matching emails. Best effort throughout.
    async fn dispatch(&self, events: Vec<DomainEvent>, contact: &CustomerContact) {
        for event in events {
            if let Err(e) = self.events.publish(&event).await {
                warn!(error = %e, "domain event not published");
            }
            if let Some(notification) = notification_for(&event, contact) {
                if let Err(e) = self.notifier.send(&notification).await {
                    warn!(template = ?notification.template, order_id = %notification.order_id, error = %e, "notification failed");
                }
            }
        }
    }
}

fn cart_stock_lines(cart: &Cart) -> Vec<StockLine> {
    let mut lines: Vec<StockLine> = Vec::new();
    for line in cart.lines() {
        if !lines.iter().any(|l| l.product_id == line.product_id) {
            lines.push(StockLine { product_id: line.product_id, quantity: cart.quantity_of(line.product_id) });
        }
    }
    lines
}

fn notification_for(event: &DomainEvent, contact: &CustomerContact) -> Option<Notification> {
    let mail = |template, order_id, return_case_id, attachment| Notification {
        template, to: contact.email.clone(), order_id, return_case_id, attachment,
    };
    match event {
        DomainEvent::Order(OrderEvent::Confirmed { order_id, .. }) => Some(mail(NotificationTemplate::OrderConfirmed, *order_id, None, None)),
        DomainEvent::Order(OrderEvent::Shipped { order_id }) => Some(mail(NotificationTemplate::OrderShipped, *order_id, None, None)),
        DomainEvent::Order(OrderEvent::Cancelled { order_id, .. }) => Some(mail(NotificationTemplate::OrderCancelled, *order_id, None, None)),
        DomainEvent::Order(OrderEvent::ReturnRequested { order_id, return_case_id }) => {
            Some(mail(NotificationTemplate::ReturnInProcess, *order_id, Some(*return_case_id), None))
        }
        DomainEvent::Return(ReturnEvent::Confirmed { return_case_id, order_id, .. }) => Some(mail(
            NotificationTemplate::ReturnConfirmed,
            *order_id,
            Some(*return_case_id),
            Some(Attachment::CreditNote { number: credit_note_number(*return_case_id) }),
        )),
        DomainEvent::Return(ReturnEvent::Rejected { return_case_id, order_id, .. }) => {
            Some(mail(NotificationTemplate::ReturnRejected, *order_id, Some(*return_case_id), None))
        }
        _ => None,
    }
}

/// Credit note numbers derive from the case id so a resend names the same document.
pub fn credit_note_number(id: ReturnCaseId) -> String {
    format!("CN-{}", id.0.simple().to_string()[..12].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_stock_lines_merge_sizes_of_one_product() {
        let mut cart = Cart::new(SessionId::new("s").unwrap());
        cart.add_line(CartLine { product_id: ProductId(1), quantity: 1, size: Some("S".into()) }).unwrap();
        cart.add_line(CartLine { product_id: ProductId(2), quantity: 3, size: None }).unwrap();
        cart.add_line(CartLine { product_id: ProductId(1), quantity: 2, size: Some("M".into()) }).unwrap();
        let lines = cart_stock_lines(&cart);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], StockLine { product_id: ProductId(1), quantity: 3 });
    }

    #[test]
    fn test_credit_note_number_is_stable() {
        let id = ReturnCaseId::generate();
        assert_eq!(credit_note_number(id), credit_note_number(id));
        assert_eq!(credit_note_number(id).len(), 15);
    }
}

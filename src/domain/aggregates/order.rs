//! Order Aggregate
//!
//! An order exists only once payment has been confirmed, so it is born `Confirmed`.
//! From there:
//!
//! ```text
//! confirmed ──ship──▶ shipped ──deliver──▶ delivered
//!     │                  │                     │
//!     ├──cancel──▶ cancelled                   │
//!     └──────────────────┴──request return─────┴──▶ return_in_process
//!                                                      ├─confirm─▶ returned
//!                                                      └─reject──▶ (previous state)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{CustomerContact, Money, MoneyError, OrderId, PaymentReference, ProductId, ReturnCaseId, ShippingAddress};

/// Immutable snapshot of a purchased line, taken at checkout time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub subtotal: Money,
    pub size: Option<String>,
}

/// Gateway confirmation of money sent back to the customer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRecord {
    pub reference: String,
    pub amount: Money,
    pub refunded_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { Confirmed, Shipped, Delivered, Cancelled, ReturnInProcess, Returned }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::ReturnInProcess => "return_in_process",
            Self::Returned => "returned",
        }
    }
    pub fn accepts_return(&self) -> bool { matches!(self, Self::Confirmed | Self::Shipped | Self::Delivered) }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(Self::Confirmed),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            "return_in_process" => Ok(Self::ReturnInProcess),
            "returned" => Ok(Self::Returned),
            other => Err(format!("unknown order status '{other}'")),
        }
    }
}

/// Everything checkout knows when the processor confirms payment.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub user_id: Option<String>,
    pub customer: CustomerContact,
    pub shipping_address: ShippingAddress,
    pub items: Vec<LineItem>,
    pub shipping: Money,
    pub discount: Money,
    pub payment_reference: PaymentReference,
}

/// Flat persisted form of an order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub user_id: Option<String>,
    pub customer: CustomerContact,
    pub shipping_address: ShippingAddress,
    pub items: Vec<LineItem>,
    pub subtotal: Money,
    pub shipping: Money,
    pub discount: Money,
    pub total: Money,
    pub status: OrderStatus,
    pub payment_reference: PaymentReference,
    pub refund: Option<RefundRecord>,
    pub restocked: bool,
    pub status_before_return: Option<OrderStatus>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct Order {
    record: OrderRecord,
    events: Vec<DomainEvent>,
}

impl Order {
    pub fn place(new: NewOrder) -> Result<Self, OrderError> {
        if new.items.is_empty() { return Err(OrderError::NoItems); }
        if new.items.iter().any(|i| i.quantity == 0) { return Err(OrderError::ZeroQuantity); }
        let currency = new.shipping.currency().to_string();
        let subtotal = new.items.iter().try_fold(Money::zero(&currency), |acc, i| acc.add(&i.subtotal))?;
        let total = subtotal.add(&new.shipping)?.saturating_sub(&new.discount)?;
        let now = Utc::now();
        let mut order = Self {
            record: OrderRecord {
                id: OrderId::generate(), user_id: new.user_id, customer: new.customer,
                shipping_address: new.shipping_address, items: new.items, subtotal,
                shipping: new.shipping, discount: new.discount, total,
                status: OrderStatus::Confirmed, payment_reference: new.payment_reference,
                refund: None, restocked: false, status_before_return: None, version: 0,
                created_at: now, updated_at: now,
            },
            events: vec![],
        };
        order.raise_event(OrderEvent::Confirmed {
            order_id: order.record.id,
            payment_reference: order.record.payment_reference.clone(),
            total: order.record.total.clone(),
        });
        Ok(order)
    }

    pub fn restore(record: OrderRecord) -> Self { Self { record, events: vec![] } }

    pub fn id(&self) -> OrderId { self.record.id }
    pub fn status(&self) -> OrderStatus { self.record.status }
    pub fn total(&self) -> &Money { &self.record.total }
    pub fn items(&self) -> &[LineItem] { &self.record.items }
    pub fn customer(&self) -> &CustomerContact { &self.record.customer }
    pub fn payment_reference(&self) -> &PaymentReference { &self.record.payment_reference }
    pub fn refund(&self) -> Option<&RefundRecord> { self.record.refund.as_ref() }
    pub fn is_restocked(&self) -> bool { self.record.restocked }
    pub fn version(&self) -> i64 { self.record.version }
    pub fn record(&self) -> &OrderRecord { &self.record }

    pub fn ship(&mut self) -> Result<(), OrderError> {
        // A restocked confirmed order is mid-cancellation; its goods are back on the shelf.
        if self.record.status != OrderStatus::Confirmed || self.record.restocked {
            return Err(self.invalid("ship"));
        }
        self.record.status = OrderStatus::Shipped;
        self.touch();
        self.raise_event(OrderEvent::Shipped { order_id: self.record.id });
        Ok(())
    }

    pub fn deliver(&mut self) -> Result<(), OrderError> {
        if self.record.status != OrderStatus::Shipped { return Err(self.invalid("deliver")); }
        self.record.status = OrderStatus::Delivered;
        self.touch();
        self.raise_event(OrderEvent::Delivered { order_id: self.record.id });
        Ok(())
    }

    /// First half of a cancellation: checks the order can be cancelled and reports
    /// whether its stock still has to go back to the ledger.
    pub fn begin_cancellation(&mut self) -> Result<bool, OrderError> {
        if self.record.status != OrderStatus::Confirmed { return Err(self.invalid("cancel")); }
        if self.record.restocked { return Ok(false); }
        self.record.restocked = true;
        self.touch();
        Ok(true)
    }

    pub fn complete_cancellation(&mut self, refund: RefundRecord) -> Result<(), OrderError> {
        if self.record.status != OrderStatus::Confirmed || !self.record.restocked {
            return Err(self.invalid("cancel"));
        }
        let refunded = refund.amount.clone();
        self.record.refund = Some(refund);
        self.record.status = OrderStatus::Cancelled;
        self.touch();
        self.raise_event(OrderEvent::Cancelled { order_id: self.record.id, refunded });
        Ok(())
    }

    pub fn begin_return(&mut self, return_case_id: ReturnCaseId) -> Result<(), OrderError> {
        if !self.record.status.accepts_return() || self.record.restocked {
            return Err(self.invalid("request return"));
        }
        self.record.status_before_return = Some(self.record.status);
        self.record.status = OrderStatus::ReturnInProcess;
        self.touch();
        self.raise_event(OrderEvent::ReturnRequested { order_id: self.record.id, return_case_id });
        Ok(())
    }

    pub fn complete_return(&mut self) -> Result<(), OrderError> {
        if self.record.status != OrderStatus::ReturnInProcess { return Err(self.invalid("complete return")); }
        self.record.status = OrderStatus::Returned;
        self.touch();
        self.raise_event(OrderEvent::Returned { order_id: self.record.id });
        Ok(())
    }

    pub fn decline_return(&mut self) -> Result<(), OrderError> {
        if self.record.status != OrderStatus::ReturnInProcess { return Err(self.invalid("decline return")); }
        self.record.status = self.record.status_before_return.take().unwrap_or(OrderStatus::Delivered);
        self.touch();
        self.raise_event(OrderEvent::ReturnDeclined { order_id: self.record.id });
        Ok(())
    }

    /// Called by stores after a successful conditional write.
    pub fn mark_persisted(&mut self) { self.record.version += 1; }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: OrderEvent) { self.events.push(DomainEvent::Order(e)); }
    fn touch(&mut self) { self.record.updated_at = Utc::now(); }
    fn invalid(&self, action: &'static str) -> OrderError {
        OrderError::InvalidTransition { from: self.record.status, action }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    NoItems,
    ZeroQuantity,
    CurrencyMismatch,
    InvalidTransition { from: OrderStatus, action: &'static str },
}

impl From<MoneyError> for OrderError {
    fn from(_: MoneyError) -> Self { Self::CurrencyMismatch }
}

impl std::error::Error for OrderError {}
impl fmt::Display for OrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoItems => write!(f, "No items"),
            Self::ZeroQuantity => write!(f, "Line quantity must be positive"),
            Self::CurrencyMismatch => write!(f, "Currency mismatch"),
            Self::InvalidTransition { from, action } => write!(f, "Cannot {action} an order in state {from}"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal::Decimal;

    pub(crate) fn line(product: i64, qty: u32, unit: i64) -> LineItem {
        let unit_price = Money::eur(Decimal::new(unit, 0));
        LineItem { product_id: ProductId(product), name: format!("P{product}"), quantity: qty, subtotal: unit_price.multiply(qty), unit_price, size: None }
    }

    pub(crate) fn placed(items: Vec<LineItem>) -> Order {
        Order::place(NewOrder {
            user_id: None,
            customer: CustomerContact { name: "Ana".into(), email: "ana@example.com".into(), phone: None },
            shipping_address: ShippingAddress::default(),
            items,
            shipping: Money::eur(Decimal::new(5, 0)),
            discount: Money::eur(Decimal::ZERO),
            payment_reference: PaymentReference("pi_123".into()),
        }).unwrap()
    }

    #[test]
    fn test_order_workflow() {
        let mut order = placed(vec![line(1, 2, 10)]);
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert_eq!(order.total().amount(), Decimal::new(25, 0));
        order.ship().unwrap();
        assert_eq!(order.status(), OrderStatus::Shipped);
        order.deliver().unwrap();
        assert_eq!(order.status(), OrderStatus::Delivered);
        let events = order.take_events();
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_place_rejects_empty() {
        let err = Order::place(NewOrder {
            user_id: None, customer: CustomerContact::default(), shipping_address: ShippingAddress::default(),
            items: vec![], shipping: Money::default(), discount: Money::default(), payment_reference: PaymentReference("pi".into()),
        }).unwrap_err();
        assert_eq!(err, OrderError::NoItems);
    }

    #[test]
    fn test_cannot_cancel_after_shipment() {
        let mut order = placed(vec![line(1, 1, 10)]);
        order.ship().unwrap();
        assert!(matches!(order.begin_cancellation(), Err(OrderError::InvalidTransition { from: OrderStatus::Shipped, .. })));
    }

    #[test]
    fn test_cancellation_restocks_once() {
        let mut order = placed(vec![line(7, 2, 10)]);
        assert!(order.begin_cancellation().unwrap());
        assert!(!order.begin_cancellation().unwrap());
        assert!(order.ship().is_err());
        order.complete_cancellation(RefundRecord { reference: "re_1".into(), amount: order.total().clone(), refunded_at: Utc::now() }).unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert!(order.begin_cancellation().is_err());
    }

    #[test]
    fn test_declined_return_restores_previous_state() {
        let mut order = placed(vec![line(1, 1, 10)]);
        order.ship().unwrap();
        order.begin_return(ReturnCaseId::generate()).unwrap();
        assert_eq!(order.status(), OrderStatus::ReturnInProcess);
        assert!(order.begin_return(ReturnCaseId::generate()).is_err());
        order.decline_return().unwrap();
        assert_eq!(order.status(), OrderStatus::Shipped);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for s in [OrderStatus::Confirmed, OrderStatus::ReturnInProcess, OrderStatus::Returned] {
            assert_eq!(s.as_str().parse::<OrderStatus>().unwrap(), s);
        }
    }
}

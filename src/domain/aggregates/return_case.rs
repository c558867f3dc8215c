//! Return/refund case aggregate
//!
//! `processing` until an admin decides; `confirmed` and `rejected` are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use crate::domain::aggregates::order::{LineItem, Order, RefundRecord};
use crate::domain::events::{DomainEvent, ReturnEvent};
use crate::domain::value_objects::{CustomerContact, Money, MoneyError, OrderId, ProductId, ReturnCaseId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus { Processing, Confirmed, Rejected }

impl ReturnStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Processing => "processing", Self::Confirmed => "confirmed", Self::Rejected => "rejected" }
    }
    pub fn is_terminal(&self) -> bool { !matches!(self, Self::Processing) }
}

impl fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ReturnStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "confirmed" => Ok(Self::Confirmed),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown return status '{other}'")),
        }
    }
}

/// A line the customer wants to send back. `size` disambiguates lines of the same product.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnLineRequest {
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(default)]
    pub size: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRecord {
    pub id: ReturnCaseId,
    pub order_id: OrderId,
    pub customer: CustomerContact,
    pub reason: String,
    pub returned_items: Vec<LineItem>,
    pub refund_amount: Money,
    pub status: ReturnStatus,
    pub rejection_reason: Option<String>,
    pub refund: Option<RefundRecord>,
    pub restocked: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct ReturnCase {
    record: ReturnRecord,
    events: Vec<DomainEvent>,
}

impl ReturnCase {
    /// Opens a case against `order`. An empty `requested` list returns the whole order.
    pub fn open(order: &Order, reason: &str, requested: &[ReturnLineRequest], min_reason_len: usize) -> Result<Self, ReturnError> {
        let reason = reason.trim();
        if reason.chars().count() < min_reason_len { return Err(ReturnError::ReasonTooShort { min: min_reason_len }); }
        let returned_items = select_lines(order.items(), requested)?;
        let refund_amount = returned_items.iter()
            .try_fold(Money::zero(order.total().currency()), |acc, l| acc.add(&l.subtotal))?;
        if refund_amount.exceeds(order.total())? {
            return Err(ReturnError::RefundExceedsTotal { refund: refund_amount, total: order.total().clone() });
        }
        let now = Utc::now();
        let mut case = Self {
            record: ReturnRecord {
                id: ReturnCaseId::generate(), order_id: order.id(), customer: order.customer().clone(),
                reason: reason.to_string(), returned_items, refund_amount, status: ReturnStatus::Processing,
                rejection_reason: None, refund: None, restocked: false, version: 0, created_at: now, updated_at: now,
            },
            events: vec![],
        };
        case.raise_event(ReturnEvent::Opened {
            return_case_id: case.record.id, order_id: case.record.order_id, refund_amount: case.record.refund_amount.clone(),
        });
        Ok(case)
    }

    pub fn restore(record: ReturnRecord) -> Self { Self { record, events: vec![] } }

    pub fn id(&self) -> ReturnCaseId { self.record.id }
    pub fn order_id(&self) -> OrderId { self.record.order_id }
    pub fn status(&self) -> ReturnStatus { self.record.status }
    pub fn refund_amount(&self) -> &Money { &self.record.refund_amount }
    pub fn returned_items(&self) -> &[LineItem] { &self.record.returned_items }
    pub fn customer(&self) -> &CustomerContact { &self.record.customer }
    pub fn refund(&self) -> Option<&RefundRecord> { self.record.refund.as_ref() }
    pub fn rejection_reason(&self) -> Option<&str> { self.record.rejection_reason.as_deref() }
    pub fn version(&self) -> i64 { self.record.version }
    pub fn record(&self) -> &ReturnRecord { &self.record }

    /// Guards the refund bound before any money moves.
    pub fn check_refundable(&self, order_total: &Money) -> Result<(), ReturnError> {
        self.require_processing("confirm")?;
        if self.record.refund_amount.exceeds(order_total)? {
            return Err(ReturnError::RefundExceedsTotal { refund: self.record.refund_amount.clone(), total: order_total.clone() });
        }
        Ok(())
    }

    /// Claims the restock of the returned goods. `false` means an earlier attempt already did it.
    pub fn begin_confirmation(&mut self) -> Result<bool, ReturnError> {
        self.require_processing("confirm")?;
        if self.record.restocked { return Ok(false); }
        self.record.restocked = true;
        self.touch();
        Ok(true)
    }

    pub fn record_refund(&mut self, refund: RefundRecord) -> Result<(), ReturnError> {
        self.require_processing("record refund for")?;
        self.record.refund = Some(refund);
        self.touch();
        Ok(())
    }

    pub fn confirm(&mut self) -> Result<(), ReturnError> {
        self.require_processing("confirm")?;
        let refund = self.record.refund.clone().ok_or(ReturnError::RefundMissing)?;
        self.record.status = ReturnStatus::Confirmed;
        self.touch();
        self.raise_event(ReturnEvent::Confirmed {
            return_case_id: self.record.id, order_id: self.record.order_id,
            refund_reference: refund.reference, refunded: refund.amount,
        });
        Ok(())
    }

    /// Refused once a confirmation has restocked goods or moved money; that case can only be confirmed.
    pub fn reject(&mut self, reason: &str) -> Result<(), ReturnError> {
        self.require_processing("reject")?;
        if self.record.restocked || self.record.refund.is_some() { return Err(ReturnError::ConfirmationUnderway); }
        let reason = reason.trim();
        if reason.is_empty() { return Err(ReturnError::EmptyRejectionReason); }
        self.record.status = ReturnStatus::Rejected;
        self.record.rejection_reason = Some(reason.to_string());
        self.touch();
        self.raise_event(ReturnEvent::Rejected { return_case_id: self.record.id, order_id: self.record.order_id, reason: reason.to_string() });
        Ok(())
    }

    pub fn mark_persisted(&mut self) { self.record.version += 1; }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: ReturnEvent) { self.events.push(DomainEvent::Return(e)); }
    fn touch(&mut self) { self.record.updated_at = Utc::now(); }
    fn require_processing(&self, action: &'static str) -> Result<(), ReturnError> {
        if self.record.status.is_terminal() {
            return Err(ReturnError::InvalidTransition { from: self.record.status, action });
        }
        Ok(())
    }
}

fn select_lines(items: &[LineItem], requested: &[ReturnLineRequest]) -> Result<Vec<LineItem>, ReturnError> {
    if requested.is_empty() { return Ok(items.to_vec()); }
    let mut lines: Vec<LineItem> = Vec::with_capacity(requested.len());
    for req in requested {
        if req.quantity == 0 { return Err(ReturnError::ZeroQuantity { product_id: req.product_id }); }
        let ordered = items.iter()
            .find(|i| i.product_id == req.product_id && (req.size.is_none() || i.size == req.size))
            .ok_or(ReturnError::UnknownItem { product_id: req.product_id })?;
        let already = lines.iter()
            .filter(|l| l.product_id == ordered.product_id && l.size == ordered.size)
            .fold(0u32, |acc, l| acc.saturating_add(l.quantity));
        if already.checked_add(req.quantity).map_or(true, |total| total > ordered.quantity) {
            return Err(ReturnError::QuantityExceedsOrdered { product_id: req.product_id, ordered: ordered.quantity });
        }
        lines.push(LineItem {
            quantity: req.quantity,
            subtotal: ordered.unit_price.multiply(req.quantity),
            ..ordered.clone()
        });
    }
    Ok(lines)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnError {
    ReasonTooShort { min: usize },
    EmptyRejectionReason,
    UnknownItem { product_id: ProductId },
    ZeroQuantity { product_id: ProductId },
    QuantityExceedsOrdered { product_id: ProductId, ordered: u32 },
    RefundExceedsTotal { refund: Money, total: Money },
    RefundMissing,
    ConfirmationUnderway,
    CurrencyMismatch,
    InvalidTransition { from: ReturnStatus, action: &'static str },
}

impl From<MoneyError> for ReturnError {
    fn from(_: MoneyError) -> Self { Self::CurrencyMismatch }
}

impl std::error::Error for ReturnError {}
impl fmt::Display for ReturnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReasonTooShort { min } => write!(f, "Return reason must be at least {min} characters"),
            Self::EmptyRejectionReason => write!(f, "Rejection reason required"),
            Self::UnknownItem { product_id } => write!(f, "Product {product_id} is not part of the order"),
            Self::ZeroQuantity { product_id } => write!(f, "Return quantity for product {product_id} must be positive"),
            Self::QuantityExceedsOrdered { product_id, ordered } => write!(f, "Only {ordered} units of product {product_id} were ordered"),
            Self::RefundExceedsTotal { refund, total } => write!(f, "Refund {refund} exceeds order total {total}"),
            Self::RefundMissing => write!(f, "No refund recorded"),
            Self::ConfirmationUnderway => write!(f, "Return confirmation already started, it can only be confirmed"),
            Self::CurrencyMismatch => write!(f, "Currency mismatch"),
            Self::InvalidTransition { from, action } => write!(f, "Cannot {action} a return case in state {from}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::order::tests::{line, placed};
    use rust_decimal::Decimal;

    fn refund(amount: &Money) -> RefundRecord {
        RefundRecord { reference: "re_1".into(), amount: amount.clone(), refunded_at: Utc::now() }
    }

    #[test]
    fn test_open_whole_order() {
        let order = placed(vec![line(1, 2, 10), line(2, 1, 30)]);
        let case = ReturnCase::open(&order, "arrived damaged", &[], 10).unwrap();
        assert_eq!(case.status(), ReturnStatus::Processing);
        assert_eq!(case.refund_amount().amount(), Decimal::new(50, 0));
        assert_eq!(case.returned_items().len(), 2);
    }

    #[test]
    fn test_open_partial() {
        let order = placed(vec![line(1, 3, 10)]);
        let req = [ReturnLineRequest { product_id: ProductId(1), quantity: 2, size: None }];
        let case = ReturnCase::open(&order, "too small for me", &req, 10).unwrap();
        assert_eq!(case.refund_amount().amount(), Decimal::new(20, 0));
    }

    #[test]
    fn test_reason_min_length() {
        let order = placed(vec![line(1, 1, 10)]);
        assert_eq!(ReturnCase::open(&order, "  bad  ", &[], 10).unwrap_err(), ReturnError::ReasonTooShort { min: 10 });
    }

    #[test]
    fn test_cannot_return_more_than_ordered() {
        let order = placed(vec![line(1, 1, 10)]);
        let req = [
            ReturnLineRequest { product_id: ProductId(1), quantity: 1, size: None },
            ReturnLineRequest { product_id: ProductId(1), quantity: 1, size: None },
        ];
        assert!(matches!(ReturnCase::open(&order, "changed my mind", &req, 10), Err(ReturnError::QuantityExceedsOrdered { .. })));
        let req = [ReturnLineRequest { product_id: ProductId(9), quantity: 1, size: None }];
        assert!(matches!(ReturnCase::open(&order, "changed my mind", &req, 10), Err(ReturnError::UnknownItem { .. })));
    }

    #[test]
    fn test_refund_bound_checked_against_total() {
        let order = placed(vec![line(1, 1, 10)]);
        let case = ReturnCase::open(&order, "changed my mind", &[], 10).unwrap();
        let smaller_total = Money::eur(Decimal::new(5, 0));
        assert!(matches!(case.check_refundable(&smaller_total), Err(ReturnError::RefundExceedsTotal { .. })));
        assert!(case.check_refundable(order.total()).is_ok());
    }

    #[test]
    fn test_confirm_requires_recorded_refund() {
        let order = placed(vec![line(1, 1, 10)]);
        let mut case = ReturnCase::open(&order, "changed my mind", &[], 10).unwrap();
        assert!(case.begin_confirmation().unwrap());
        assert!(!case.begin_confirmation().unwrap());
        assert_eq!(case.confirm().unwrap_err(), ReturnError::RefundMissing);
        let amount = case.refund_amount().clone();
        case.record_refund(refund(&amount)).unwrap();
        case.confirm().unwrap();
        assert_eq!(case.status(), ReturnStatus::Confirmed);
        assert!(matches!(case.reject("late"), Err(ReturnError::InvalidTransition { from: ReturnStatus::Confirmed, .. })));
    }

    #[test]
    fn test_reject() {
        let order = placed(vec![line(1, 1, 10)]);
        let mut case = ReturnCase::open(&order, "changed my mind", &[], 10).unwrap();
        assert_eq!(case.reject("   ").unwrap_err(), ReturnError::EmptyRejectionReason);
        case.reject("worn item").unwrap();
        assert_eq!(case.status(), ReturnStatus::Rejected);
        assert_eq!(case.rejection_reason(), Some("worn item"));
        assert!(case.begin_confirmation().is_err());
    }

    #[test]
    fn test_reject_refused_after_restock_or_refund() {
        let order = placed(vec![line(1, 1, 10)]);
        let mut case = ReturnCase::open(&order, "changed my mind", &[], 10).unwrap();
        assert!(case.begin_confirmation().unwrap());
        assert_eq!(case.reject("worn item").unwrap_err(), ReturnError::ConfirmationUnderway);
        assert_eq!(case.status(), ReturnStatus::Processing);

        let mut record = case.record().clone();
        record.restocked = false;
        record.refund = Some(refund(case.refund_amount()));
        let mut refunded = ReturnCase::restore(record);
        assert_eq!(refunded.reject("worn item").unwrap_err(), ReturnError::ConfirmationUnderway);
    }

    #[test]
    fn test_huge_return_quantity_is_refused_not_wrapped() {
        let order = placed(vec![line(1, 2, 10)]);
        let req = [
            ReturnLineRequest { product_id: ProductId(1), quantity: 1, size: None },
            ReturnLineRequest { product_id: ProductId(1), quantity: u32::MAX, size: None },
        ];
        assert_eq!(
            ReturnCase::open(&order, "changed my mind", &req, 10).unwrap_err(),
            ReturnError::QuantityExceedsOrdered { product_id: ProductId(1), ordered: 2 },
        );
    }
}

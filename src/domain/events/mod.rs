//! Domain events
use crate::domain::value_objects::{Money, OrderId, PaymentReference, ProductId, ReturnCaseId, SessionId};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "aggregate", rename_all = "snake_case")]
pub enum DomainEvent {
    Inventory(InventoryEvent),
    Order(OrderEvent),
    Return(ReturnEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InventoryEvent {
    Held { session_id: SessionId, product_id: ProductId, quantity: u32 },
    Released { session_id: SessionId, product_id: ProductId },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Confirmed { order_id: OrderId, payment_reference: PaymentReference, total: Money },
    Shipped { order_id: OrderId },
    Delivered { order_id: OrderId },
    Cancelled { order_id: OrderId, refunded: Money },
    ReturnRequested { order_id: OrderId, return_case_id: ReturnCaseId },
    Returned { order_id: OrderId },
    ReturnDeclined { order_id: OrderId },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReturnEvent {
    Opened { return_case_id: ReturnCaseId, order_id: OrderId, refund_amount: Money },
    Confirmed { return_case_id: ReturnCaseId, order_id: OrderId, refund_reference: String, refunded: Money },
    Rejected { return_case_id: ReturnCaseId, order_id: OrderId, reason: String },
}

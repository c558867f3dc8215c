//! Customer-facing order endpoints and the response shapes shared with admin.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{AppState, Validated};
use crate::domain::aggregates::{LineItem, Order, RefundRecord, ReturnCase, ReturnLineRequest};
use crate::domain::value_objects::{Money, OrderId, ProductId, ReturnCaseId};
use crate::Result;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: OrderId,
    pub status: String,
    pub items: Vec<LineItem>,
    pub subtotal: Money,
    pub shipping: Money,
    pub discount: Money,
    pub total: Money,
    pub payment_reference: String,
    pub refund: Option<RefundRecord>,
    pub created_at: DateTime<Utc>,
}

impl From<&Order> for OrderView {
    fn from(order: &Order) -> Self {
        let r = order.record();
        Self {
            id: r.id,
            status: r.status.as_str().to_string(),
            items: r.items.clone(),
            subtotal: r.subtotal.clone(),
            shipping: r.shipping.clone(),
            discount: r.discount.clone(),
            total: r.total.clone(),
            payment_reference: r.payment_reference.0.clone(),
            refund: r.refund.clone(),
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnCaseView {
    pub id: ReturnCaseId,
    pub order_id: OrderId,
    pub status: String,
    pub returned_items: Vec<LineItem>,
    pub refund_amount: Money,
    pub refund: Option<RefundRecord>,
    pub rejection_reason: Option<String>,
}

impl From<&ReturnCase> for ReturnCaseView {
    fn from(case: &ReturnCase) -> Self {
        Self {
            id: case.id(),
            order_id: case.order_id(),
            status: case.status().as_str().to_string(),
            returned_items: case.returned_items().to_vec(),
            refund_amount: case.refund_amount().clone(),
            refund: case.refund().cloned(),
            rejection_reason: case.rejection_reason().map(str::to_string),
        }
    }
}

pub async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<OrderView>> {
    let order = s.orchestrator.order(OrderId(id)).await?;
    Ok(Json(OrderView::from(&order)))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReturnItem {
    pub product_id: i64,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: u32,
    pub size: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RequestReturnBody {
    #[validate(length(max = 2000))]
    pub reason: String,
    /// Empty means the whole order.
    #[serde(default)]
    #[validate]
    pub items: Vec<ReturnItem>,
}

pub async fn request_return(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Validated(r): Validated<RequestReturnBody>,
) -> Result<(StatusCode, Json<ReturnCaseView>)> {
    let lines: Vec<ReturnLineRequest> = r.items.into_iter()
        .map(|i| ReturnLineRequest { product_id: ProductId(i.product_id), quantity: i.quantity, size: i.size })
        .collect();
    let case = s.orchestrator.request_return(OrderId(id), &r.reason, &lines).await?;
    Ok((StatusCode::CREATED, Json(ReturnCaseView::from(&case))))
}

pub async fn cancel_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<OrderView>> {
    let order = s.orchestrator.cancel_order(OrderId(id)).await?;
    Ok(Json(OrderView::from(&order)))
}

//! Back-office decisions on orders and return cases.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::orders::{OrderView, ReturnCaseView};
use super::{AppState, Validated};
use crate::domain::value_objects::{OrderId, ReturnCaseId};
use crate::Result;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCommand {
    pub order_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmReturn {
    pub return_case_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RejectReturn {
    pub return_case_id: Uuid,
    #[validate(length(min = 1, max = 2000))]
    pub reason: String,
}

pub async fn cancel_order(State(s): State<AppState>, Json(r): Json<OrderCommand>) -> Result<Json<OrderView>> {
    let order = s.orchestrator.cancel_order(OrderId(r.order_id)).await?;
    Ok(Json(OrderView::from(&order)))
}

pub async fn ship_order(State(s): State<AppState>, Json(r): Json<OrderCommand>) -> Result<Json<OrderView>> {
    let order = s.orchestrator.ship(OrderId(r.order_id)).await?;
    Ok(Json(OrderView::from(&order)))
}

pub async fn deliver_order(State(s): State<AppState>, Json(r): Json<OrderCommand>) -> Result<Json<OrderView>> {
    let order = s.orchestrator.deliver(OrderId(r.order_id)).await?;
    Ok(Json(OrderView::from(&order)))
}

pub async fn confirm_return(State(s): State<AppState>, Json(r): Json<ConfirmReturn>) -> Result<Json<ReturnCaseView>> {
    let case = s.orchestrator.confirm_return(ReturnCaseId(r.return_case_id)).await?;
    Ok(Json(ReturnCaseView::from(&case)))
}

pub async fn reject_return(State(s): State<AppState>, Validated(r): Validated<RejectReturn>) -> Result<Json<ReturnCaseView>> {
    let case = s.orchestrator.reject_return(ReturnCaseId(r.return_case_id), &r.reason).await?;
    Ok(Json(ReturnCaseView::from(&case)))
}

//! Cart holds and availability.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{AppState, Validated};
use crate::domain::value_objects::{ProductId, SessionId};
use crate::Result;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest {
    #[validate(length(min = 1, max = 128))]
    pub session_id: String,
    pub product_id: i64,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartResponse {
    pub new_stock_available: u32,
}

pub async fn add_to_cart(State(s): State<AppState>, Validated(r): Validated<AddToCartRequest>) -> Result<Json<AddToCartResponse>> {
    let session = SessionId::new(r.session_id)?;
    let available = s.orchestrator.add_to_cart(&session, ProductId(r.product_id), r.quantity).await?;
    Ok(Json(AddToCartResponse { new_stock_available: available }))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    #[validate(length(min = 1, max = 128))]
    pub session_id: String,
    pub product_id: Option<i64>,
}

/// Drops one hold, or every hold of the session when no product is named.
pub async fn release(State(s): State<AppState>, Validated(r): Validated<ReleaseRequest>) -> Result<Json<serde_json::Value>> {
    let session = SessionId::new(r.session_id)?;
    match r.product_id {
        Some(id) => s.orchestrator.remove_from_cart(&session, ProductId(id)).await?,
        None => {
            s.orchestrator.reservations().release_session(&session).await?;
        }
    }
    Ok(Json(serde_json::json!({ "released": true })))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub product_id: i64,
    pub stock: u32,
    pub available: u32,
}

pub async fn availability(State(s): State<AppState>, Path(id): Path<i64>) -> Result<Json<Availability>> {
    let product_id = ProductId(id);
    let stock = s.orchestrator.ledger().stock(product_id).await?;
    let available = s.orchestrator.reservations().available(product_id, stock).await?;
    Ok(Json(Availability { product_id: id, stock, available }))
}

//! Checkout start and the payment processor's webhook.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use super::{AppState, Validated};
use crate::application::CheckoutRequest;
use crate::domain::aggregates::CartLine;
use crate::domain::value_objects::{CustomerContact, ProductId, SessionId, ShippingAddress};
use crate::infrastructure::stripe;
use crate::{EcommerceError, Result};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutItem {
    pub product_id: i64,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: u32,
    pub size: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInput {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartCheckoutRequest {
    #[validate(length(min = 1, max = 128))]
    pub session_id: String,
    pub user_id: Option<String>,
    #[validate]
    pub customer: CustomerInput,
    pub shipping_address: ShippingAddress,
    #[validate]
    pub items: Vec<CheckoutItem>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCheckoutResponse {
    pub payment_session: String,
    pub url: String,
    pub total: String,
    pub currency: String,
}

pub async fn start_checkout(
    State(s): State<AppState>,
    Validated(r): Validated<StartCheckoutRequest>,
) -> Result<(StatusCode, Json<StartCheckoutResponse>)> {
    let request = CheckoutRequest {
        session_id: SessionId::new(r.session_id)?,
        user_id: r.user_id,
        customer: CustomerContact { name: r.customer.name, email: r.customer.email, phone: r.customer.phone },
        shipping_address: r.shipping_address,
        lines: r.items.into_iter()
            .map(|i| CartLine { product_id: ProductId(i.product_id), quantity: i.quantity, size: i.size })
            .collect(),
    };
    let started = s.orchestrator.start_checkout(request).await?;
    Ok((StatusCode::CREATED, Json(StartCheckoutResponse {
        payment_session: started.session.id,
        url: started.session.url,
        total: started.total.amount().to_string(),
        currency: started.total.currency().to_string(),
    })))
}

/// Verifies the signature over the raw body before anything else is read.
///
/// Outcomes the processor cannot fix by redelivering (stock gone and refunded,
/// malformed cart metadata) are acknowledged with 200; transient failures are
/// returned so the processor retries against the idempotent order insert.
pub async fn payment_webhook(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<StatusCode> {
    let signature = headers.get("Stripe-Signature").and_then(|v| v.to_str().ok())
        .ok_or_else(|| EcommerceError::SignatureInvalid("missing Stripe-Signature header".into()))?;
    stripe::verify_webhook_signature(&body, signature, &s.webhook_secret, stripe::now_secs())?;

    let completed = match stripe::parse_webhook_event(&body) {
        Ok(Some(completed)) => completed,
        Ok(None) => return Ok(StatusCode::OK),
        Err(e) => {
            warn!(error = %e, "webhook payload rejected");
            return Ok(StatusCode::OK);
        }
    };

    match s.orchestrator
        .confirm_payment(&completed.payment_session, completed.payment_reference, completed.snapshot)
        .await
    {
        Ok(order) => {
            info!(order_id = %order.id(), payment_session = %completed.payment_session, "payment webhook handled");
            Ok(StatusCode::OK)
        }
        Err(e @ (EcommerceError::InsufficientStock { .. } | EcommerceError::ProductNotFound(_) | EcommerceError::Validation(_))) => {
            warn!(payment_session = %completed.payment_session, error = %e, "paid checkout not fulfilled");
            Ok(StatusCode::OK)
        }
        Err(e) => Err(e),
    }
}
